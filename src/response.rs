// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应构建模块
//!
//! 每个响应属于 [`ResponseKind`] 中的一种，携带状态码、Content-Type、是否保持连接，
//! 以及响应体（内存中的字节、打开的文件句柄，或 HEAD 请求下的空体）。
//! 响应通过 [`Response::write_to`] 一次性写出：先写响应头，再写字节或流式拷贝文件。

use crate::{exception::Exception, param::*, request::Request};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error};
use tokio::{
    fs::File,
    io::{self as tokio_io, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

use std::io::{self, Write};

/// 响应的语义类别
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponseKind {
    StaticFile,
    Rendered,
    BadRequest,
    NotFound,
    ServerError,
}

#[derive(Debug)]
enum Body {
    Empty,
    Bytes(Bytes),
    File { file: File, len: u64 },
}

#[derive(Debug)]
pub struct Response {
    kind: ResponseKind,
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    content_length: u64,
    content_encoding: Option<HttpEncoding>,
    date: DateTime<Utc>,
    server_name: String,
    keep_alive: bool,
    body: Body,
}

impl Response {
    fn new(kind: ResponseKind, code: u16, version: HttpVersion, keep_alive: bool) -> Self {
        let information = match STATUS_CODES.get(&code) {
            Some(info) => info.to_string(),
            None => {
                error!("非法的状态码：{}。这条错误说明代码编写出现了错误。", code);
                "Unknown".to_string()
            }
        };
        Self {
            kind,
            version,
            status_code: code,
            information,
            content_type: None,
            content_length: 0,
            content_encoding: None,
            date: Utc::now(),
            server_name: SERVER_NAME.to_string(),
            keep_alive,
            body: Body::Empty,
        }
    }

    fn with_text(mut self, content_type: &str, text: String, headonly: bool) -> Self {
        self.content_type = Some(content_type.to_string());
        self.content_length = text.len() as u64;
        self.body = match headonly {
            true => Body::Empty,
            false => Body::Bytes(Bytes::from(text)),
        };
        self
    }

    /// 400：方法不被允许或请求目标非法
    pub fn bad_request(request: &Request, why: &str) -> Self {
        let headonly = request.method() == HttpRequestMethod::Head;
        Self::new(
            ResponseKind::BadRequest,
            400,
            request.version(),
            request.keep_alive(),
        )
        .with_text(CONTENT_TYPE_HTML, why.to_string(), headonly)
    }

    /// 404：资源不存在
    pub fn not_found(request: &Request) -> Self {
        let headonly = request.method() == HttpRequestMethod::Head;
        let body = format!("The resource '{}' was not found.", request.target());
        Self::new(
            ResponseKind::NotFound,
            404,
            request.version(),
            request.keep_alive(),
        )
        .with_text(CONTENT_TYPE_HTML, body, headonly)
    }

    /// 500：服务端内部错误，正文携带错误信息
    pub fn server_error(request: &Request, what: &str) -> Self {
        let headonly = request.method() == HttpRequestMethod::Head;
        let body = format!("An error occurred: '{}'", what);
        Self::new(
            ResponseKind::ServerError,
            500,
            request.version(),
            request.keep_alive(),
        )
        .with_text(CONTENT_TYPE_HTML, body, headonly)
    }

    /// 请求无法解析时的错误响应。此时没有可信的请求，连接总是随后关闭。
    pub fn protocol_error(exception: &Exception) -> Self {
        let code = exception.status_code();
        let kind = match code {
            500 => ResponseKind::ServerError,
            404 => ResponseKind::NotFound,
            _ => ResponseKind::BadRequest,
        };
        Self::new(kind, code, HttpVersion::V1_1, false).with_text(
            CONTENT_TYPE_HTML,
            exception.to_string(),
            false,
        )
    }

    /// 200：渲染得到的 HTML 文档，`compress` 为真时按 Accept-Encoding 协商压缩
    pub fn html(request: &Request, html: &str, compress: bool, id: u128) -> Self {
        let headonly = request.method() == HttpRequestMethod::Head;
        let mut response = Self::new(
            ResponseKind::Rendered,
            200,
            request.version(),
            request.keep_alive(),
        );
        response.content_type = Some(CONTENT_TYPE_HTML.to_string());
        response.content_encoding = match compress {
            true => decide_encoding(request.accept_encoding()),
            false => None,
        };
        let content = match compress_bytes(Vec::from(html), response.content_encoding) {
            Ok(c) => c,
            Err(e) => {
                error!("[ID{}]压缩HTML失败: {}，返回未压缩内容", id, e);
                response.content_encoding = None;
                Vec::from(html)
            }
        };
        response.content_length = content.len() as u64;
        if !headonly {
            response.body = Body::Bytes(Bytes::from(content));
        }
        response
    }

    /// 200：静态文件。GET 时流式发送文件内容，HEAD 时只发送响应头
    pub fn static_file(request: &Request, file: File, len: u64, mime: &str) -> Self {
        let mut response = Self::new(
            ResponseKind::StaticFile,
            200,
            request.version(),
            request.keep_alive(),
        );
        response.content_type = Some(mime.to_string());
        response.content_length = len;
        if request.method() != HttpRequestMethod::Head {
            response.body = Body::File { file, len };
        }
        response
    }

    /// 序列化响应头（含结尾空行）
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut header = format!(
            "{} {} {}{}",
            self.version, self.status_code, self.information, CRLF
        );
        if let Some(t) = &self.content_type {
            header.push_str(&["Content-Type: ", t, CRLF].concat());
        }
        if let Some(e) = self.content_encoding {
            header.push_str(&format!("Content-Encoding: {}{}", e, CRLF));
            header.push_str(&["Vary: Accept-Encoding", CRLF].concat());
        }
        header.push_str(&format!("Content-Length: {}{}", self.content_length, CRLF));
        header.push_str(&["Date: ", &format_date(&self.date), CRLF].concat());
        header.push_str(&["Server: ", &self.server_name, CRLF].concat());
        header.push_str(match self.keep_alive {
            true => "Connection: keep-alive\r\n",
            false => "Connection: close\r\n",
        });
        header.push_str(CRLF);
        header.into_bytes()
    }

    /// 写出完整响应，返回写出的响应体字节数。
    pub async fn write_to<W>(self, writer: &mut W, id: u128) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.head_bytes()).await?;
        let sent = match self.body {
            Body::Empty => 0,
            Body::Bytes(bytes) => {
                writer.write_all(&bytes).await?;
                bytes.len() as u64
            }
            Body::File { file, len } => {
                debug!("[ID{}]开始流式传输文件，大小: {} bytes", id, len);
                let mut limited = file.take(len);
                let copied = tokio_io::copy(&mut limited, writer).await?;
                if copied < len {
                    // 文件在发送过程中被截断，已声明的 Content-Length 无法满足
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("file shrank while sending: {} of {} bytes", copied, len),
                    ));
                }
                copied
            }
        };
        writer.flush().await?;
        Ok(sent)
    }
}

impl Response {
    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn content_encoding(&self) -> Option<HttpEncoding> {
        self.content_encoding
    }

    /// 内存中的响应体；文件响应与空响应返回 `None`
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn has_body(&self) -> bool {
        !matches!(self.body, Body::Empty)
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn compress_bytes(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    }
}

fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    if accept_encoding.contains(&HttpEncoding::Gzip) {
        Some(HttpEncoding::Gzip)
    } else if accept_encoding.contains(&HttpEncoding::Deflate) {
        Some(HttpEncoding::Deflate)
    } else if accept_encoding.contains(&HttpEncoding::Br) {
        Some(HttpEncoding::Br)
    } else {
        None
    }
}
