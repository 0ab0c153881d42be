// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由引擎
//!
//! 把一次解析好的请求映射为响应，调用之间不保留任何状态。
//!
//! ## 路由规则（先匹配者胜出）
//! 1. `/`（GET）→ 渲染 `index` 页面。
//! 2. `/about`（GET）→ 渲染 `about` 页面。
//! 3. 包含 `/posts/` 的目标（GET）→ 第二个路径段必须是正整数文章编号，0 表示没有文章。
//! 4. 其余请求 → 在文档根目录下查找静态文件。
//!
//! 页面按 `分区 + "_page_" + 页面标识` 缓存；文章是否缓存由配置决定。

use std::{io, sync::Arc};

use log::{debug, error, warn};
use tokio::fs::File;

use crate::{
    cache::TtlCache,
    config::RouteConfig,
    content::ContentProvider,
    exception::Exception,
    param::{mime_type, HttpRequestMethod},
    request::Request,
    response::Response,
};

/// 路由所需的共享资源，由服务器在启动时构造一次，所有会话共享。
pub struct RouteContext {
    pub doc_root: String,
    pub cache: Arc<TtlCache>,
    pub provider: Arc<dyn ContentProvider>,
    pub config: RouteConfig,
}

/// 待渲染的资源
#[derive(Debug, Clone, PartialEq)]
enum Resource {
    Page(&'static str),
    Post(u64),
}

pub async fn route(request: &Request, ctx: &RouteContext, id: u128) -> Response {
    let method = request.method();
    if method != HttpRequestMethod::Get && method != HttpRequestMethod::Head {
        warn!("[ID{}]不支持的请求方法：{}，返回400", id, method);
        return Response::bad_request(request, "Unknown HTTP-method");
    }

    // 目标必须是绝对路径，且不能包含 ".."
    let target = request.target();
    if target.is_empty() || !target.starts_with('/') || target.contains("..") {
        warn!("[ID{}]请求的路径：{} 包含非法字符，返回400", id, target);
        return Response::bad_request(request, "Illegal request-target");
    }

    let tenant = ctx.config.tenant_for_host(request.host());
    let segments = path_segments(request.path());
    debug!(
        "[ID{}]路由匹配开始: target='{}', host='{}', tenant='{}'",
        id,
        target,
        request.host(),
        tenant
    );

    let is_get = method == HttpRequestMethod::Get;
    if is_get && segments.is_empty() {
        render(request, ctx, tenant, Resource::Page("index"), id).await
    } else if is_get && target == "/about" {
        render(request, ctx, tenant, Resource::Page("about"), id).await
    } else if is_get && target.contains("/posts/") {
        match segments.get(1).and_then(|s| parse_post_id(s)) {
            Some(post_id) => render(request, ctx, tenant, Resource::Post(post_id), id).await,
            None => {
                warn!("[ID{}]{}：{}", id, Exception::PostNotFound, target);
                Response::not_found(request)
            }
        }
    } else {
        serve_file(request, &ctx.doc_root, id).await
    }
}

async fn render(
    request: &Request,
    ctx: &RouteContext,
    tenant: &str,
    resource: Resource,
    id: u128,
) -> Response {
    let (key, cacheable) = match &resource {
        Resource::Page(page_id) => (format!("{}_page_{}", tenant, page_id), ctx.config.cache_pages),
        Resource::Post(post_id) => (format!("{}_post_{}", tenant, post_id), ctx.config.cache_posts),
    };

    if cacheable {
        if let Some(html) = ctx.cache.get(&key) {
            debug!("[ID{}]缓存命中：{}", id, key);
            return Response::html(request, &html, ctx.config.compress_html, id);
        }
        debug!("[ID{}]缓存未命中：{}", id, key);
    }

    // 数据源调用可能阻塞，放到阻塞线程池中执行
    let provider = Arc::clone(&ctx.provider);
    let host = request.host().to_string();
    let tenant_owned = tenant.to_string();
    let fetched = tokio::task::spawn_blocking(move || match resource {
        Resource::Page(page_id) => provider.page(&host, &tenant_owned, page_id),
        Resource::Post(post_id) => provider.post(post_id),
    })
    .await;

    let html = match fetched {
        Ok(Ok(html)) => html,
        Ok(Err(e)) => {
            error!("[ID{}]内容提供者失败：{}", id, e);
            String::new()
        }
        Err(e) => {
            error!("[ID{}]渲染任务异常终止：{}", id, e);
            return Response::server_error(request, "render task failed");
        }
    };

    if html.is_empty() {
        warn!("[ID{}]{}没有内容，返回404", id, key);
        return Response::not_found(request);
    }

    if cacheable && !ctx.cache.set(&key, &html, ctx.config.page_ttl) {
        warn!("[ID{}]缓存已满，{}未被缓存", id, key);
    }
    Response::html(request, &html, ctx.config.compress_html, id)
}

async fn serve_file(request: &Request, doc_root: &str, id: u128) -> Response {
    let path = path_cat(doc_root, request.path());
    debug!("[ID{}]映射物理路径：{}", id, path);

    match open_static(&path).await {
        Ok((file, len)) => {
            let mime = mime_type(&path);
            debug!("[ID{}]MIME类型: {}，文件大小: {} bytes", id, mime, len);
            Response::static_file(request, file, len, mime)
        }
        Err(Exception::FileNotFound) => {
            warn!("[ID{}]请求的路径：{} 不存在，返回404", id, request.target());
            Response::not_found(request)
        }
        Err(Exception::Transport(_, msg)) => {
            error!("[ID{}]无法打开文件{}: {}", id, path, msg);
            Response::server_error(request, &msg)
        }
        Err(e) => {
            error!("[ID{}]无法打开文件{}: {}", id, path, e);
            Response::server_error(request, &e.to_string())
        }
    }
}

/// 打开静态文件并取得其长度；目录视为不存在
async fn open_static(path: &str) -> Result<(File, u64), Exception> {
    let file = File::open(path).await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Exception::FileNotFound,
        _ => Exception::from(e),
    })?;
    let metadata = file.metadata().await?;
    if metadata.is_dir() {
        return Err(Exception::FileNotFound);
    }
    Ok((file, metadata.len()))
}

/// 把请求路径拼接到文档根目录后
fn path_cat(base: &str, path: &str) -> String {
    if base.is_empty() {
        return path.to_string();
    }
    let base = base.strip_suffix('/').unwrap_or(base);
    format!("{}{}", base, path)
}

/// 路径段，`/` 没有任何路径段
fn path_segments(path: &str) -> Vec<&str> {
    match path.strip_prefix('/').unwrap_or(path) {
        "" => vec![],
        rest => rest.split('/').collect(),
    }
}

/// 表示“没有文章”的编号，不会查询内容源
const NONE_POST_ID: u64 = 0;

/// 只接受纯数字（不带符号）且大于 0 的文章编号
fn parse_post_id(segment: &str) -> Option<u64> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok().filter(|id| *id > NONE_POST_ID)
}
