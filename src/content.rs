// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 内容提供者
//!
//! 路由器通过 [`ContentProvider`] 获取渲染好的页面与文章。返回空串表示内容不存在；
//! 返回 `Err` 表示数据源故障，路由器记录日志后同样按空内容处理。
//!
//! [`FileContentProvider`] 是基于目录的实现：
//!
//! ```text
//! <root>/<tenant>/pages/<page_id>.html
//! <root>/<tenant>/layout/header.html, footer.html
//! <root>/posts/<post_id>.html
//! <root>/layout/header.html, footer.html
//! ```
//!
//! 正文中的第一个 `<h1>` 作为文档标题，替换模板中的标题占位符。

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use lazy_static::lazy_static;
use log::{debug, error, warn};
use regex::Regex;

use crate::{exception::Exception, param::TITLE_PLACEHOLDER};

lazy_static! {
    static ref PAGE_ID: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
    static ref HEADING: Regex = Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").unwrap();
}

/// 渲染页面与文章的数据源，必须可以在任意工作线程上调用。
#[cfg_attr(test, mockall::automock)]
pub trait ContentProvider: Send + Sync {
    /// 渲染 `tenant` 分区中编号为 `page_id` 的页面
    fn page(&self, host: &str, tenant: &str, page_id: &str) -> Result<String, Exception>;

    /// 渲染编号为 `post_id` 的文章
    fn post(&self, post_id: u64) -> Result<String, Exception>;
}

pub struct FileContentProvider {
    root: PathBuf,
}

impl FileContentProvider {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn render(&self, body_path: &Path, layout_dir: &Path) -> Result<String, Exception> {
        let content = match read_optional(body_path)? {
            Some(c) => c,
            None => return Ok(String::new()),
        };
        let header = read_optional(&layout_dir.join("header.html"))?.unwrap_or_default();
        let footer = read_optional(&layout_dir.join("footer.html"))?.unwrap_or_default();

        let mut document = String::with_capacity(header.len() + content.len() + footer.len());
        document.push_str(&header);
        document.push_str(&content);
        document.push_str(&footer);

        Ok(match extract_title(&content) {
            Some(title) => replace_title(&document, &title),
            None => document,
        })
    }
}

impl ContentProvider for FileContentProvider {
    fn page(&self, host: &str, tenant: &str, page_id: &str) -> Result<String, Exception> {
        if !PAGE_ID.is_match(page_id) || !PAGE_ID.is_match(tenant) {
            warn!("非法的页面标识：tenant={} page={}", tenant, page_id);
            return Ok(String::new());
        }
        debug!("加载页面 <{}> host <{}> tenant <{}>", page_id, host, tenant);
        let tenant_dir = self.root.join(tenant);
        let page_path = tenant_dir.join("pages").join(format!("{}.html", page_id));
        let html = self.render(&page_path, &tenant_dir.join("layout"))?;
        if html.is_empty() {
            warn!("页面不存在：{}", page_path.display());
        }
        Ok(html)
    }

    fn post(&self, post_id: u64) -> Result<String, Exception> {
        let post_path = self.root.join("posts").join(format!("{}.html", post_id));
        let html = self.render(&post_path, &self.root.join("layout"))?;
        if html.is_empty() {
            debug!("文章不存在：{}", post_path.display());
        }
        Ok(html)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, Exception> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => {
            error!("读取内容文件{}失败：{}", path.display(), e);
            Err(Exception::Upstream(format!("{}: {}", path.display(), e)))
        }
    }
}

/// 正文中第一个 `<h1>` 的文本
pub fn extract_title(content: &str) -> Option<String> {
    HEADING
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// 只替换第一个标题占位符
pub fn replace_title(document: &str, title: &str) -> String {
    let tag = format!("<title>{}</title>", title);
    document.replacen(TITLE_PLACEHOLDER, &tag, 1)
}
