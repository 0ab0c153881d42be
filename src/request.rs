// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求解析模块
//!
//! 负责把会话输入缓冲区前部的原始字节解析为强类型的 `Request`。
//! 解析是增量的：请求头尚未收全时返回 `Ok(None)`，由会话继续读取。
//! 1. 请求行（方法、目标、版本）的解析。
//! 2. 路由与连接管理用到的标头（Host、Connection、Content-Length 等）的提取。
//! 3. 请求头与请求体长度的上限检查。

use crate::{exception::Exception, param::*};
use log::{debug, warn};

/// 一次请求的元数据，解析后不再改变。请求体不会被保留。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法
    method: HttpRequestMethod,
    /// 请求目标（路径 + 查询字符串）
    target: String,
    /// HTTP 协议版本
    version: HttpVersion,
    /// Host 标头，缺失时为空串
    host: String,
    /// 客户端标识字符串
    user_agent: String,
    /// Connection 标头中的选项（小写）
    connection: Vec<String>,
    /// 客户端支持的压缩编码列表
    accept_encoding: Vec<HttpEncoding>,
    /// 声明的请求体长度
    content_length: usize,
}

impl Request {
    /// 尝试从缓冲区前部解析一个完整的请求头。
    ///
    /// 返回 `Ok(Some((request, consumed)))`，其中 `consumed` 为请求头（含结尾空行）占用的字节数；
    /// 请求体不在其中，调用方需要再丢弃 `request.content_length()` 个字节。
    /// 请求头不完整时返回 `Ok(None)`。
    pub fn parse(
        buffer: &[u8],
        max_body_size: usize,
        id: u128,
    ) -> Result<Option<(Self, usize)>, Exception> {
        // RFC 9112 允许在请求行之前出现多余的空行
        let start = buffer
            .iter()
            .take_while(|b| **b == b'\r' || **b == b'\n')
            .count();
        let head = &buffer[start..];

        let head_len = match head.windows(HEADER_END.len()).position(|w| w == HEADER_END) {
            Some(pos) => pos + HEADER_END.len(),
            None => {
                // 前导空行同样计入上限，否则只发送空行的连接可以无限占用内存
                if buffer.len() > MAX_HEADER_SIZE {
                    warn!("[ID{}]请求头超过{}字节仍未结束", id, MAX_HEADER_SIZE);
                    return Err(Exception::HeaderTooLarge);
                }
                return Ok(None);
            }
        };
        if head_len > MAX_HEADER_SIZE {
            warn!("[ID{}]请求头长度{}超过上限", id, head_len);
            return Err(Exception::HeaderTooLarge);
        }

        let request_string = match std::str::from_utf8(&head[..head_len - HEADER_END.len()]) {
            Ok(s) => s,
            Err(_) => {
                warn!("[ID{}]请求头不是合法的UTF-8", id);
                return Err(Exception::MalformedRequest);
            }
        };
        let mut lines = request_string.split(CRLF);

        // 解析请求行 (e.g., "GET /index.html HTTP/1.1")
        let request_line = lines.next().unwrap_or_default();
        let parts: Vec<&str> = request_line.split(' ').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            warn!("[ID{}]HTTP请求行格式不正确：{}", id, request_line);
            return Err(Exception::MalformedRequest);
        }

        let method = match HttpRequestMethod::from_token(parts[0]) {
            Some(m) => m,
            None => {
                warn!("[ID{}]无法识别的HTTP请求方法：{}", id, parts[0]);
                return Err(Exception::MalformedRequest);
            }
        };

        let version = match parts[2] {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            v if v.starts_with("HTTP/") => {
                warn!("[ID{}]不支持的HTTP协议版本：{}", id, v);
                return Err(Exception::UnsupportedHttpVersion);
            }
            v => {
                warn!("[ID{}]无法识别的协议标识：{}", id, v);
                return Err(Exception::MalformedRequest);
            }
        };

        let target = parts[1].to_string();

        // 逐行解析标头，标头名大小写不敏感
        let mut host = String::new();
        let mut user_agent = String::new();
        let mut connection = vec![];
        let mut accept_encoding = vec![];
        let mut content_length = 0usize;
        for line in lines {
            let (name, value) = match line.split_once(':') {
                Some((n, v)) if !n.is_empty() && !n.contains(' ') => (n, v.trim()),
                _ => {
                    warn!("[ID{}]非法的请求头：{}", id, line);
                    return Err(Exception::MalformedRequest);
                }
            };
            match name.to_ascii_lowercase().as_str() {
                "host" => host = value.to_string(),
                "user-agent" => user_agent = value.to_string(),
                "connection" => connection.extend(
                    value
                        .split(',')
                        .map(|token| token.trim().to_ascii_lowercase())
                        .filter(|token| !token.is_empty()),
                ),
                "accept-encoding" => {
                    if value.contains("gzip") {
                        accept_encoding.push(HttpEncoding::Gzip);
                    }
                    if value.contains("deflate") {
                        accept_encoding.push(HttpEncoding::Deflate);
                    }
                    if value.contains("br") {
                        accept_encoding.push(HttpEncoding::Br);
                    }
                }
                "content-length" => {
                    content_length = match value.parse::<usize>() {
                        Ok(len) => len,
                        Err(_) => {
                            warn!("[ID{}]非法的Content-Length：{}", id, value);
                            return Err(Exception::MalformedRequest);
                        }
                    };
                    if content_length > max_body_size {
                        warn!("[ID{}]请求体长度{}超过上限{}", id, content_length, max_body_size);
                        return Err(Exception::PayloadTooLarge);
                    }
                }
                // 不支持分块请求体
                "transfer-encoding" => {
                    warn!("[ID{}]不支持Transfer-Encoding请求：{}", id, value);
                    return Err(Exception::MalformedRequest);
                }
                _ => {}
            }
        }

        debug!("[ID{}]请求头解析完成：{} {} {}", id, method, target, version);
        Ok(Some((
            Self {
                method,
                target,
                version,
                host,
                user_agent,
                connection,
                accept_encoding,
                content_length,
            },
            start + head_len,
        )))
    }

    /// 客户端是否希望保持连接：HTTP/1.1 默认保持，HTTP/1.0 需显式声明 keep-alive。
    pub fn keep_alive(&self) -> bool {
        if self.connection.iter().any(|t| t == "close") {
            return false;
        }
        match self.version {
            HttpVersion::V1_1 => true,
            HttpVersion::V1_0 => self.connection.iter().any(|t| t == "keep-alive"),
        }
    }

    /// 去掉查询字符串与片段后的路径部分
    pub fn path(&self) -> &str {
        match self.target.find(|c| c == '?' || c == '#') {
            Some(pos) => &self.target[..pos],
            None => &self.target,
        }
    }
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 原始请求目标（含查询参数）
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn accept_encoding(&self) -> &[HttpEncoding] {
        &self.accept_encoding
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }
}
