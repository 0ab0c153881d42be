// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块定义了内容服务器遵循的 HTTP 协议相关常量和数据结构，包括：
//! - 服务器用到的 HTTP 状态码及其原因短语。
//! - 固定的文件后缀到 MIME 类型映射表。
//! - HTTP 方法、版本及编码格式的强类型枚举。

use lazy_static::lazy_static;
use std::collections::HashMap;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "shaneyale-cms";

/// HTTP 协议规定的换行符
pub const CRLF: &str = "\r\n";

/// 请求头结束标记
pub const HEADER_END: &[u8] = b"\r\n\r\n";

/// 默认监听端口
pub const DEFAULT_PORT: u16 = 10000;

/// 请求头的最大长度（字节）
pub const MAX_HEADER_SIZE: usize = 8 * 1024;

/// 请求正文的默认最大长度（字节）
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// 渲染结果在缓存中的默认存活时间（秒）
pub const DEFAULT_PAGE_TTL: u64 = 900;

/// 默认缓存容量
pub const DEFAULT_CACHE_SIZE: usize = 25;

/// HTML 响应的 Content-Type
pub const CONTENT_TYPE_HTML: &str = "text/html";

/// 无法识别的文件后缀使用的 MIME 类型
pub const FALLBACK_MIME: &str = "application/text";

/// 模板中的标题占位符，渲染时替换为文档标题
pub const TITLE_PLACEHOLDER: &str = "<title>%REPLACE_WITH_TITLE_ID%</title>";

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        map.insert(200, "OK");
        map.insert(400, "Bad Request");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(408, "Request Timeout");
        map.insert(413, "Content Too Large");
        map.insert(431, "Request Header Fields Too Large");
        map.insert(500, "Internal Server Error");
        map.insert(503, "Service Unavailable");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

lazy_static! {
    /// 文件后缀名（小写、不含点）到 MIME 类型的映射表。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("htm", "text/html");
        map.insert("html", "text/html");
        map.insert("php", "text/html");
        map.insert("css", "text/css");
        map.insert("txt", "text/plain");
        map.insert("js", "application/javascript");
        map.insert("json", "application/json");
        map.insert("xml", "application/xml");
        map.insert("swf", "application/x-shockwave-flash");
        map.insert("flv", "video/x-flv");
        map.insert("png", "image/png");
        map.insert("jpe", "image/jpeg");
        map.insert("jpeg", "image/jpeg");
        map.insert("jpg", "image/jpeg");
        map.insert("gif", "image/gif");
        map.insert("bmp", "image/bmp");
        map.insert("ico", "image/vnd.microsoft.icon");
        map.insert("tiff", "image/tiff");
        map.insert("tif", "image/tiff");
        map.insert("svg", "image/svg+xml");
        map.insert("svgz", "image/svg+xml");
        map
    };
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpVersion {
    /// HTTP/1.0，默认不保持连接
    V1_0,
    /// HTTP/1.1，默认保持连接
    V1_1,
}

/// HTTP 请求方法。除 GET/HEAD 外的方法同样会被解析，以便路由器返回 400。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpRequestMethod {
    Get,
    Head,
    Options,
    Post,
    Put,
    Delete,
    Patch,
    Connect,
    Trace,
}

/// 支持的内容编码（压缩）格式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpEncoding {
    /// GNU zip 压缩
    Gzip,
    /// zlib 压缩
    Deflate,
    /// Brotli 压缩
    Br,
}

use std::fmt;

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_0 => write!(f, "HTTP/1.0"),
            HttpVersion::V1_1 => write!(f, "HTTP/1.1"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            HttpRequestMethod::Get => "GET",
            HttpRequestMethod::Head => "HEAD",
            HttpRequestMethod::Options => "OPTIONS",
            HttpRequestMethod::Post => "POST",
            HttpRequestMethod::Put => "PUT",
            HttpRequestMethod::Delete => "DELETE",
            HttpRequestMethod::Patch => "PATCH",
            HttpRequestMethod::Connect => "CONNECT",
            HttpRequestMethod::Trace => "TRACE",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for HttpEncoding {
    /// 将枚举格式化为 `Content-Encoding` 头所使用的标识符
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpEncoding::Gzip => write!(f, "gzip"),
            HttpEncoding::Deflate => write!(f, "deflate"),
            HttpEncoding::Br => write!(f, "br"),
        }
    }
}

impl HttpRequestMethod {
    /// 按大小写敏感的方法令牌解析（RFC 9110 规定方法名区分大小写）。
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "GET" => Some(HttpRequestMethod::Get),
            "HEAD" => Some(HttpRequestMethod::Head),
            "OPTIONS" => Some(HttpRequestMethod::Options),
            "POST" => Some(HttpRequestMethod::Post),
            "PUT" => Some(HttpRequestMethod::Put),
            "DELETE" => Some(HttpRequestMethod::Delete),
            "PATCH" => Some(HttpRequestMethod::Patch),
            "CONNECT" => Some(HttpRequestMethod::Connect),
            "TRACE" => Some(HttpRequestMethod::Trace),
            _ => None,
        }
    }
}

/// 根据路径的文件后缀返回 MIME 类型，后缀比较不区分大小写。
pub fn mime_type(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let extension = match file_name.rfind('.') {
        Some(pos) => file_name[pos + 1..].to_ascii_lowercase(),
        None => return FALLBACK_MIME,
    };
    MIME_TYPES.get(extension.as_str()).copied().unwrap_or(FALLBACK_MIME)
}
