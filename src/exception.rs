// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了内容服务器在启动、连接处理与请求路由过程中可能出现的各类异常。
//!
//! ## 分类
//! - **协议错误**：请求报文格式不合法、协议版本不支持或报文过大，对应 `400`/`413`，随后关闭连接。
//! - **资源缺失**：静态文件或文章不存在，由路由器转化为 `404`，不会向上传播。
//! - **上游错误**：内容提供者失败，记录日志后按空内容处理。
//! - **传输错误**：Socket 读写失败，终止当前会话；对端重置、超时等正常拆链情形不记为错误。
//! - **启动错误**：配置读取失败或端口绑定失败，由调用方决定是否退出进程。

use std::{fmt, io};

/// 服务器处理过程中发生的异常类型。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 请求行或请求头无法解析（包括非 UTF-8 的报文头）。
    MalformedRequest,
    /// 客户端使用了 HTTP/1.0 与 HTTP/1.1 之外的协议版本。
    UnsupportedHttpVersion,
    /// 请求头超过了允许的最大长度。
    HeaderTooLarge,
    /// 请求声明的正文长度超过了允许的上限。
    PayloadTooLarge,
    /// 在文档根目录下未找到所请求的文件。
    FileNotFound,
    /// 文章编号缺失、非法，或内容提供者返回了空内容。
    PostNotFound,
    /// 内容提供者（数据源）内部失败。
    Upstream(String),
    /// Socket 层读写失败。
    Transport(io::ErrorKind, String),
    /// 在空闲超时时间内没有读到完整请求。
    ReadTimeout,
    /// 对端在请求未读完时关闭了连接。
    PeerClosed,
    /// 配置文件无法读取或解析。
    Config(String),
    /// 监听 Socket 的创建、绑定或监听失败。
    Bind(String),
}

use Exception::*;

impl Exception {
    /// 协议错误会以错误响应结束当前连接。
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            MalformedRequest | UnsupportedHttpVersion | HeaderTooLarge | PayloadTooLarge
        )
    }

    /// 正常拆链过程中的错误（对端重置、超时等），不应作为失败记录。
    pub fn is_benign(&self) -> bool {
        match self {
            ReadTimeout => true,
            Transport(kind, _) => matches!(
                kind,
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// 协议错误对应的响应状态码。
    pub fn status_code(&self) -> u16 {
        match self {
            PayloadTooLarge => 413,
            FileNotFound | PostNotFound => 404,
            Upstream(_) => 500,
            _ => 400,
        }
    }
}

impl From<io::Error> for Exception {
    fn from(e: io::Error) -> Self {
        Transport(e.kind(), e.to_string())
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedRequest => write!(f, "Malformed HTTP request"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            HeaderTooLarge => write!(f, "Request header too large"),
            PayloadTooLarge => write!(f, "Request body too large"),
            FileNotFound => write!(f, "File not found (404)"),
            PostNotFound => write!(f, "Post not found (404)"),
            Upstream(msg) => write!(f, "Content provider failure: {}", msg),
            Transport(kind, msg) => write!(f, "Transport error ({:?}): {}", kind, msg),
            ReadTimeout => write!(f, "The socket was closed due to a timeout"),
            PeerClosed => write!(f, "Peer closed the connection mid-request"),
            Config(msg) => write!(f, "Invalid configuration: {}", msg),
            Bind(msg) => write!(f, "Listener setup failed: {}", msg),
        }
    }
}

impl std::error::Error for Exception {}
