// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 连接会话
//!
//! 每个 TCP 连接对应一个 [`Session`]，由监听器派生的 tokio 任务独占。
//! 会话按 `Idle → Reading → Routing → Writing` 循环处理请求，
//! 响应要求关闭连接或发生错误时进入 `Closing`，最后 `Closed`。
//!
//! 同一连接上的读写严格串行；超出当前请求的字节留在缓冲区中供下一轮使用（流水线）。

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::{Buf, BytesMut};
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::watch,
    time::{self, Instant},
};

use crate::{
    exception::Exception,
    param::{DEFAULT_MAX_BODY_SIZE, MAX_HEADER_SIZE},
    request::Request,
    response::Response,
    router::{self, RouteContext},
};

/// 拒绝请求后等待对端停止发送的最长时间
const LINGER_TIMEOUT: Duration = Duration::from_secs(2);
const LINGER_MAX_BYTES: usize = 1024 * 1024;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 等待新请求的第一个字节
    Idle,
    /// 请求已开始但尚未读完
    Reading,
    Routing,
    Writing,
    Closing,
    Closed,
}

/// 单个会话的读限制
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub read_timeout: Duration,
    pub max_body_size: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

pub struct Session {
    id: u128,
    peer: SocketAddr,
    stream: TcpStream,
    buffer: BytesMut,
    state: SessionState,
    ctx: Arc<RouteContext>,
    limits: SessionLimits,
    shutdown: watch::Receiver<bool>,
    served: u64,
    /// 拒绝请求后，关闭前需要读掉对端仍在发送的数据
    linger: bool,
}

impl Session {
    pub fn new(
        id: u128,
        stream: TcpStream,
        peer: SocketAddr,
        ctx: Arc<RouteContext>,
        limits: SessionLimits,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            peer,
            stream,
            buffer: BytesMut::with_capacity(MAX_HEADER_SIZE),
            state: SessionState::Idle,
            ctx,
            limits,
            shutdown,
            served: 0,
            linger: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 处理连接直到关闭，返回已完成的请求数
    pub async fn run(mut self) -> u64 {
        let id = self.id;
        debug!("[ID{}]TCP连接已建立：{}", id, self.peer);

        loop {
            let request = match self.read_request().await {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(e) if e.is_protocol_error() => {
                    self.reject(&e).await;
                    self.linger = true;
                    break;
                }
                Err(e) => {
                    self.fail(&e, "读取请求");
                    break;
                }
            };

            self.state = SessionState::Routing;
            let start_time = Instant::now();
            let response = router::route(&request, &self.ctx, id).await;
            let keep_alive = response.keep_alive();
            debug!(
                "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
                id,
                start_time.elapsed().as_millis()
            );
            info!(
                "[ID{}] {}, {}, {}, {}, {}, {}, {}",
                id,
                request.version(),
                request.target(),
                request.method(),
                response.status_code(),
                response.information(),
                request.host(),
                request.user_agent(),
            );

            self.state = SessionState::Writing;
            match response.write_to(&mut self.stream, id).await {
                Ok(sent) => debug!("[ID{}]响应发送完毕，响应体{}字节", id, sent),
                Err(e) => {
                    self.fail(&Exception::from(e), "发送响应");
                    break;
                }
            }
            self.served += 1;

            if !keep_alive {
                debug!("[ID{}]响应要求关闭连接", id);
                break;
            }
        }

        self.close().await;
        self.served
    }

    /// 读取一个完整请求并丢弃其请求体。对端在请求之间正常关闭，或空闲时收到停机信号，返回 `Ok(None)`。
    ///
    /// 读超时覆盖整个请求（含请求体），而不是单次读取。
    async fn read_request(&mut self) -> Result<Option<Request>, Exception> {
        let deadline = Instant::now() + self.limits.read_timeout;
        loop {
            // 请求之间的空行直接丢弃，不在缓冲区中累积
            let blank = blank_prefix(&self.buffer);
            self.buffer.advance(blank);

            if let Some((request, consumed)) =
                Request::parse(&self.buffer, self.limits.max_body_size, self.id)?
            {
                self.buffer.advance(consumed);
                self.discard_body(request.content_length(), deadline)
                    .await?;
                return Ok(Some(request));
            }

            self.state = match self.buffer.is_empty() {
                true => SessionState::Idle,
                false => SessionState::Reading,
            };
            if self.state == SessionState::Idle && *self.shutdown.borrow() {
                debug!("[ID{}]服务器正在停机，关闭空闲连接", self.id);
                return Ok(None);
            }

            if self.fill(deadline).await? == 0 {
                return match blank_prefix(&self.buffer) == self.buffer.len() {
                    true => {
                        debug!("[ID{}]对端关闭了连接", self.id);
                        Ok(None)
                    }
                    false => Err(Exception::PeerClosed),
                };
            }
        }
    }

    /// 从 Socket 读取更多字节，返回读到的字节数，0 表示对端已关闭。
    /// 空闲状态下收到停机信号同样返回 0。
    async fn fill(&mut self, deadline: Instant) -> Result<usize, Exception> {
        self.buffer.reserve(4096);
        let idle = self.state == SessionState::Idle;
        let read = time::timeout_at(deadline, self.stream.read_buf(&mut self.buffer));
        let shutdown = &mut self.shutdown;
        tokio::select! {
            result = read => match result {
                Ok(Ok(n)) => Ok(n),
                Ok(Err(e)) => Err(Exception::from(e)),
                Err(_) => Err(Exception::ReadTimeout),
            },
            _ = shutdown.wait_for(|stop| *stop), if idle => {
                debug!("[ID{}]等待请求时收到停机信号", self.id);
                Ok(0)
            }
        }
    }

    /// 丢弃声明长度的请求体
    async fn discard_body(&mut self, length: usize, deadline: Instant) -> Result<(), Exception> {
        let mut remaining = length;
        loop {
            let buffered = remaining.min(self.buffer.len());
            self.buffer.advance(buffered);
            remaining -= buffered;
            if remaining == 0 {
                return Ok(());
            }
            self.state = SessionState::Reading;
            if self.fill(deadline).await? == 0 {
                return Err(Exception::PeerClosed);
            }
        }
    }

    /// 以 400/413 回应无法处理的请求，随后关闭连接
    async fn reject(&mut self, e: &Exception) {
        warn!(
            "[ID{}]无法处理的请求：{}，返回{}并关闭连接",
            self.id,
            e,
            e.status_code()
        );
        self.state = SessionState::Writing;
        let response = Response::protocol_error(e);
        if let Err(err) = response.write_to(&mut self.stream, self.id).await {
            self.fail(&Exception::from(err), "发送错误响应");
        }
    }

    fn fail(&self, e: &Exception, what: &str) {
        match e.is_benign() {
            true => debug!("[ID{}]{}时连接中断：{}", self.id, what, e),
            false => error!("[ID{}]{}失败：{}", self.id, what, e),
        }
    }

    async fn close(&mut self) {
        self.state = SessionState::Closing;
        if let Err(e) = self.stream.shutdown().await {
            debug!("[ID{}]关闭发送方向失败：{}", self.id, e);
        }
        if self.linger {
            self.drain_input().await;
        }
        self.state = SessionState::Closed;
        debug!(
            "[ID{}]连接{}已关闭，共处理{}个请求",
            self.id, self.peer, self.served
        );
    }

    /// 带着未读数据关闭 Socket 会发送 RST，先在有限时间内读掉对端剩余的输入
    async fn drain_input(&mut self) {
        let mut scratch = [0u8; 4096];
        let mut drained = 0usize;
        let deadline = Instant::now() + LINGER_TIMEOUT;
        while drained < LINGER_MAX_BYTES {
            match time::timeout_at(deadline, self.stream.read(&mut scratch)).await {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
                Ok(Ok(n)) => drained += n,
            }
        }
        debug!("[ID{}]关闭前丢弃了{}字节未处理的输入", self.id, drained);
    }
}

/// 缓冲区开头属于请求之间空行的字节数
fn blank_prefix(buffer: &[u8]) -> usize {
    buffer
        .iter()
        .take_while(|b| **b == b'\r' || **b == b'\n')
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::TtlCache, config::RouteConfig, content::MockContentProvider};
    use std::fs;
    use tokio::{net::TcpListener, task::JoinHandle};

    struct Harness {
        client: TcpStream,
        handle: JoinHandle<u64>,
        shutdown: watch::Sender<bool>,
        _dir: tempfile::TempDir,
    }

    async fn start(limits: SessionLimits) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.txt"), "hello").unwrap();
        let ctx = Arc::new(RouteContext {
            doc_root: dir.path().to_str().unwrap().to_string(),
            cache: Arc::new(TtlCache::from_capacity(4)),
            provider: Arc::new(MockContentProvider::new()),
            config: RouteConfig::default(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let (shutdown, rx) = watch::channel(false);
        let session = Session::new(1, stream, peer, ctx, limits, rx);
        assert_eq!(session.state(), SessionState::Idle);
        let handle = tokio::spawn(session.run());
        Harness {
            client,
            handle,
            shutdown,
            _dir: dir,
        }
    }

    async fn read_all(client: &mut TcpStream) -> String {
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_keep_alive_then_close() {
        let mut h = start(SessionLimits::default()).await;
        h.client
            .write_all(b"GET /hello.txt HTTP/1.1\r\nHost: a\r\n\r\n")
            .await
            .unwrap();
        h.client
            .write_all(b"GET /hello.txt HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let text = read_all(&mut h.client).await;
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(text.contains("Connection: keep-alive"));
        assert!(text.ends_with("Connection: close\r\n\r\nhello"));
        assert_eq!(h.handle.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pipelined_requests_in_one_write() {
        let mut h = start(SessionLimits::default()).await;
        let batch = "GET /hello.txt HTTP/1.1\r\n\r\n\
                     HEAD /hello.txt HTTP/1.1\r\n\r\n\
                     GET /missing HTTP/1.0\r\n\r\n";
        h.client.write_all(batch.as_bytes()).await.unwrap();
        let text = read_all(&mut h.client).await;
        let first = text.find("HTTP/1.1 200").unwrap();
        let last = text.find("HTTP/1.0 404").unwrap();
        assert!(first < last);
        assert_eq!(text.matches("200 OK").count(), 2);
        assert_eq!(h.handle.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_body_is_discarded() {
        let mut h = start(SessionLimits::default()).await;
        h.client
            .write_all(b"GET /hello.txt HTTP/1.1\r\nContent-Length: 5\r\n\r\nAB")
            .await
            .unwrap();
        time::sleep(Duration::from_millis(20)).await;
        h.client
            .write_all(b"CDEGET /hello.txt HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let text = read_all(&mut h.client).await;
        assert_eq!(text.matches("200 OK").count(), 2);
        assert_eq!(h.handle.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_malformed_request_gets_400_and_close() {
        let mut h = start(SessionLimits::default()).await;
        h.client.write_all(b"NONSENSE\r\n\r\n").await.unwrap();
        let text = read_all(&mut h.client).await;
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("Connection: close"));
        assert_eq!(h.handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_gets_413() {
        let limits = SessionLimits {
            max_body_size: 10,
            ..SessionLimits::default()
        };
        let mut h = start(limits).await;
        h.client
            .write_all(b"GET / HTTP/1.1\r\nContent-Length: 11\r\n\r\n")
            .await
            .unwrap();
        let text = read_all(&mut h.client).await;
        assert!(text.starts_with("HTTP/1.1 413"));
        assert_eq!(h.handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clean_close_without_request() {
        let h = start(SessionLimits::default()).await;
        drop(h.client);
        assert_eq!(h.handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_timeout_closes_idle_connection() {
        let limits = SessionLimits {
            read_timeout: Duration::from_millis(100),
            ..SessionLimits::default()
        };
        let mut h = start(limits).await;
        let text = read_all(&mut h.client).await;
        assert!(text.is_empty());
        assert_eq!(h.handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_trickled_request_still_times_out() {
        let limits = SessionLimits {
            read_timeout: Duration::from_millis(300),
            ..SessionLimits::default()
        };
        let mut h = start(limits).await;
        let started = Instant::now();
        for byte in b"GET /hello.txt HTTP/1.1\r\nX-Slow: ".iter().cycle() {
            if h.handle.is_finished() || started.elapsed() > Duration::from_secs(5) {
                break;
            }
            if h.client.write_all(&[*byte]).await.is_err() {
                break;
            }
            time::sleep(Duration::from_millis(150)).await;
        }
        assert!(h.handle.is_finished());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(h.handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_trickled_body_still_times_out() {
        let limits = SessionLimits {
            read_timeout: Duration::from_millis(300),
            ..SessionLimits::default()
        };
        let mut h = start(limits).await;
        h.client
            .write_all(b"GET /hello.txt HTTP/1.1\r\nContent-Length: 100\r\n\r\n")
            .await
            .unwrap();
        let started = Instant::now();
        while !h.handle.is_finished() && started.elapsed() < Duration::from_secs(5) {
            if h.client.write_all(b"x").await.is_err() {
                break;
            }
            time::sleep(Duration::from_millis(150)).await;
        }
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(h.handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blank_lines_do_not_accumulate() {
        let limits = SessionLimits {
            read_timeout: Duration::from_secs(5),
            ..SessionLimits::default()
        };
        let mut h = start(limits).await;
        let blanks = vec![b'\n'; 64 * 1024];
        for _ in 0..16 {
            h.client.write_all(&blanks).await.unwrap();
        }
        h.client
            .write_all(b"GET /hello.txt HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let text = read_all(&mut h.client).await;
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(h.handle.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_session() {
        let mut h = start(SessionLimits::default()).await;
        h.client
            .write_all(b"GET /hello.txt HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 1024];
        let n = h.client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200"));

        h.shutdown.send(true).unwrap();
        let rest = read_all(&mut h.client).await;
        assert!(rest.is_empty() || rest.ends_with("hello"));
        assert_eq!(h.handle.await.unwrap(), 1);
    }

    #[test]
    fn test_blank_prefix() {
        assert_eq!(blank_prefix(b""), 0);
        assert_eq!(blank_prefix(b"\r\n\r\n"), 4);
        assert_eq!(blank_prefix(b"\r\nGET"), 2);
        assert_eq!(blank_prefix(b"GET\r\n"), 0);
    }
}
