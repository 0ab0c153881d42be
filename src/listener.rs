// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 监听器
//!
//! 打开监听 Socket（`SO_REUSEADDR`、绑定、以系统允许的最大 backlog 监听），
//! 然后循环接受连接，为每个连接派生一个独立的会话任务。
//! 单次 accept 失败不会停止监听，只有停机信号才会让监听器进入 `Stopped`。

use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, error, info};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
};

use crate::{
    exception::Exception,
    router::RouteContext,
    session::{Session, SessionLimits},
};

/// 资源耗尽后暂停接受连接的时间
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Binding,
    Listening,
    Accepting,
    Stopped,
}

/// accept 失败的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// 只影响单个连接
    Connection,
    /// 文件描述符或内存耗尽
    Exhausted,
    Other,
}

pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: ListenerState,
    ctx: Arc<RouteContext>,
    limits: SessionLimits,
    shutdown: watch::Receiver<bool>,
    drain: mpsc::Sender<()>,
    active: Arc<AtomicUsize>,
    next_id: u128,
}

impl Listener {
    /// 创建并绑定监听 Socket，必须在 tokio 运行时中调用。
    pub fn bind(
        addr: SocketAddr,
        ctx: Arc<RouteContext>,
        limits: SessionLimits,
        shutdown: watch::Receiver<bool>,
        drain: mpsc::Sender<()>,
        active: Arc<AtomicUsize>,
    ) -> Result<Self, Exception> {
        debug!("监听器状态：{:?}", ListenerState::Binding);
        let listener = open(addr).map_err(|e| {
            error!("无法在{}上监听：{}，监听器状态：{:?}", addr, e, ListenerState::Stopped);
            e
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Exception::Bind(format!("local_addr: {}", e)))?;
        info!("端口{}绑定完成", local_addr.port());

        Ok(Self {
            listener,
            local_addr,
            state: ListenerState::Listening,
            ctx,
            limits,
            shutdown,
            drain,
            active,
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// 接受连接直到收到停机信号
    pub async fn run(mut self) {
        info!("开始在{}上接受连接", self.local_addr);
        loop {
            self.state = ListenerState::Accepting;
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = self.shutdown.wait_for(|stop| *stop) => {
                    info!("监听器收到停机指令，停止接受新连接");
                    break;
                }
            };

            match accepted {
                Ok((stream, peer)) => self.spawn_session(stream, peer),
                Err(e) => match classify(&e) {
                    AcceptFailure::Connection => debug!("accept失败（单个连接）：{}", e),
                    AcceptFailure::Exhausted => {
                        error!("accept失败，系统资源耗尽：{}，{}ms后重试", e, ACCEPT_BACKOFF.as_millis());
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    AcceptFailure::Other => error!("accept失败：{}", e),
                },
            }
        }
        self.state = ListenerState::Stopped;
        debug!("监听器状态：{:?}", self.state);
    }

    fn spawn_session(&mut self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let id = self.next_id;
        self.next_id += 1;
        debug!("[ID{}]新的连接：{}", id, peer);

        if let Err(e) = stream.set_nodelay(true) {
            debug!("[ID{}]设置TCP_NODELAY失败：{}", id, e);
        }
        let session = Session::new(
            id,
            stream,
            peer,
            Arc::clone(&self.ctx),
            self.limits,
            self.shutdown.clone(),
        );
        let drain = self.drain.clone();
        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            session.run().await;
            active.fetch_sub(1, Ordering::SeqCst);
            drop(drain);
        });
    }
}

/// 按 `SO_REUSEADDR` → bind → listen 的顺序打开监听 Socket
fn open(addr: SocketAddr) -> Result<TcpListener, Exception> {
    let step = |what: &str, e: io::Error| Exception::Bind(format!("{} {}: {}", what, addr, e));

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| step("open", e))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| step("set_option", e))?;
    socket.bind(&addr.into()).map_err(|e| step("bind", e))?;
    // 内核会把 backlog 截断为系统上限
    socket.listen(i32::MAX).map_err(|e| step("listen", e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| step("set_nonblocking", e))?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(|e| step("register", e))
}

fn classify(e: &io::Error) -> AcceptFailure {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => return AcceptFailure::Connection,
        io::ErrorKind::OutOfMemory => return AcceptFailure::Exhausted,
        _ => {}
    }
    #[cfg(unix)]
    if let Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM) = e.raw_os_error() {
        return AcceptFailure::Exhausted;
    }
    AcceptFailure::Other
}
