// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 集成测试共用的回环服务器与原始 HTTP 客户端。

#![allow(dead_code)]

use std::{fs, net::SocketAddr, sync::Arc, time::Duration};

use cms_server::{Config, ContentProvider, Exception, Server, ShutdownHandle, TtlCache};
use mockall::mock;
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
    time,
};

mock! {
    pub Provider {}

    impl ContentProvider for Provider {
        fn page(&self, host: &str, tenant: &str, page_id: &str) -> Result<String, Exception>;
        fn post(&self, post_id: u64) -> Result<String, Exception>;
    }
}

/// 运行在 127.0.0.1 随机端口上的服务器
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: ShutdownHandle,
    pub cache: Arc<TtlCache>,
    pub task: JoinHandle<Result<(), Exception>>,
    pub doc_root: TempDir,
}

/// 文档根目录中预置的文件
pub fn doc_root() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("hello.txt"), "hello world").unwrap();
    fs::write(dir.path().join("style.css"), "body { color: red; }").unwrap();
    fs::write(dir.path().join("logo.PNG"), [0x89, b'P', b'N', b'G']).unwrap();
    fs::create_dir(dir.path().join("docs")).unwrap();
    fs::write(dir.path().join("docs/guide.html"), "<p>guide</p>").unwrap();
    dir
}

pub fn base_config(dir: &TempDir) -> Config {
    Config::new()
        .with_doc_root(dir.path().to_str().unwrap())
        .with_port(0)
        .with_local(true)
        .with_shutdown_timeout(Duration::from_secs(3))
}

pub async fn start(provider: MockProvider) -> TestServer {
    let dir = doc_root();
    let config = base_config(&dir);
    start_with(config, dir, provider).await
}

pub async fn start_with(config: Config, doc_root: TempDir, provider: MockProvider) -> TestServer {
    let mut server = Server::new(config, Arc::new(provider));
    let addr = server.bind().unwrap();
    let shutdown = server.shutdown_handle();
    let cache = Arc::clone(server.cache());
    let task = tokio::spawn(server.serve());
    TestServer {
        addr,
        shutdown,
        cache,
        task,
        doc_root,
    }
}

impl TestServer {
    pub async fn stop(self) {
        self.shutdown.trigger();
        time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server did not stop in time")
            .unwrap()
            .unwrap();
    }
}

/// 发送原始请求并读到连接关闭为止
pub async fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    read_until_close(&mut stream).await
}

pub async fn read_until_close(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    time::timeout(Duration::from_secs(10), stream.read_to_end(&mut out))
        .await
        .expect("connection was not closed")
        .unwrap();
    String::from_utf8_lossy(&out).to_string()
}

/// 读取一个完整响应（依据 Content-Length），不等待连接关闭
pub async fn read_response(stream: &mut TcpStream) -> ParsedResponse {
    read_with(stream, true).await
}

/// 读取 HEAD 请求的响应，只有响应头
pub async fn read_head_response(stream: &mut TcpStream) -> ParsedResponse {
    read_with(stream, false).await
}

async fn read_with(stream: &mut TcpStream, expect_body: bool) -> ParsedResponse {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(parsed) = ParsedResponse::parse(&raw) {
            if parsed.complete || !expect_body {
                return parsed;
            }
        }
        let n = time::timeout(Duration::from_secs(10), stream.read(&mut chunk))
            .await
            .expect("response timed out")
            .unwrap();
        assert!(n > 0, "connection closed before the response was complete");
        raw.extend_from_slice(&chunk[..n]);
    }
}

#[derive(Debug)]
pub struct ParsedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    complete: bool,
}

impl ParsedResponse {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let end = raw.windows(4).position(|w| w == b"\r\n\r\n")?;
        let head = String::from_utf8_lossy(&raw[..end]).to_string();
        let mut lines = head.split("\r\n");
        let status = lines
            .next()?
            .split_whitespace()
            .nth(1)?
            .parse::<u16>()
            .ok()?;
        let headers: Vec<(String, String)> = lines
            .filter_map(|l| l.split_once(": "))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0);
        let body_start = end + 4;
        let available = raw.len() - body_start;
        Some(Self {
            status,
            body: raw[body_start..body_start + available.min(length)].to_vec(),
            complete: available >= length,
            headers,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// 原始响应的状态码
pub fn status_of(response: &str) -> u16 {
    response
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}
