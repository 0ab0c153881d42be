// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 服务器生命周期
//!
//! [`Server`] 把配置、缓存与内容提供者组装成路由上下文，绑定监听器并运行到停机。
//!
//! 停机流程：
//! 1. 停机信号（SIGINT/SIGTERM 或控制台 `stop`）通过 `watch` 通道广播。
//! 2. 监听器停止接受新连接；空闲会话立即关闭，正在发送响应的会话发送完毕后关闭。
//! 3. 每个会话持有一个 `mpsc::Sender<()>` 的副本，全部释放后通道关闭，
//!    等待时间以 `shutdown_timeout` 为上限，超时仍未结束的会话随运行时一起丢弃。

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    signal,
    sync::{mpsc, watch},
    time,
};

use crate::{
    cache::TtlCache,
    config::Config,
    content::{ContentProvider, FileContentProvider},
    exception::Exception,
    listener::Listener,
    router::RouteContext,
    session::SessionLimits,
};

/// 触发停机的句柄，可以任意复制
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            info!("停机指令已发出");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// 控制台 `status` 命令展示的运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStatus {
    pub active_connections: usize,
    pub cached_entries: usize,
}

/// 读取运行状态的句柄
#[derive(Clone)]
pub struct StatusProbe {
    active: Arc<AtomicUsize>,
    cache: Arc<TtlCache>,
}

impl StatusProbe {
    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            active_connections: self.active.load(Ordering::SeqCst),
            cached_entries: self.cache.size(),
        }
    }
}

pub struct Server {
    config: Config,
    ctx: Arc<RouteContext>,
    active: Arc<AtomicUsize>,
    shutdown: ShutdownHandle,
    listener: Option<Listener>,
    drain_tx: mpsc::Sender<()>,
    drain_rx: mpsc::Receiver<()>,
}

impl Server {
    /// 使用配置中的内容目录构造基于文件的内容提供者
    pub fn from_config(config: Config) -> Self {
        let provider = FileContentProvider::new(config.content_root());
        info!("content root: {}", provider.root().display());
        Self::new(config, Arc::new(provider))
    }

    pub fn new(config: Config, provider: Arc<dyn ContentProvider>) -> Self {
        let cache = Arc::new(TtlCache::from_capacity(config.cache_size()));
        let ctx = Arc::new(RouteContext {
            doc_root: config.doc_root().to_string(),
            cache,
            provider,
            config: config.routing().clone(),
        });
        let (tx, _) = watch::channel(false);
        let (drain_tx, drain_rx) = mpsc::channel(1);
        Self {
            config,
            ctx,
            active: Arc::new(AtomicUsize::new(0)),
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
            listener: None,
            drain_tx,
            drain_rx,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn status_probe(&self) -> StatusProbe {
        StatusProbe {
            active: Arc::clone(&self.active),
            cache: Arc::clone(&self.ctx.cache),
        }
    }

    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.ctx.cache
    }

    /// 配置中的监听地址：`local` 为真时只监听回环地址
    pub fn endpoint(&self) -> SocketAddr {
        let address = match self.config.local() {
            true => Ipv4Addr::new(127, 0, 0, 1),
            false => Ipv4Addr::new(0, 0, 0, 0),
        };
        SocketAddr::V4(SocketAddrV4::new(address, self.config.port()))
    }

    /// 绑定监听 Socket，返回实际的本地地址（端口为 0 时由系统分配）。必须在 tokio 运行时中调用。
    pub fn bind(&mut self) -> Result<SocketAddr, Exception> {
        let endpoint = self.endpoint();
        info!("服务端将在{}上监听Socket连接", endpoint);
        let limits = SessionLimits {
            read_timeout: self.config.read_timeout(),
            max_body_size: self.config.max_body_size(),
        };
        let listener = Listener::bind(
            endpoint,
            Arc::clone(&self.ctx),
            limits,
            self.shutdown.tx.subscribe(),
            self.drain_tx.clone(),
            Arc::clone(&self.active),
        )?;
        let addr = listener.local_addr();
        self.listener = Some(listener);
        Ok(addr)
    }

    /// 绑定（如尚未绑定）并运行到停机完成
    pub async fn serve(mut self) -> Result<(), Exception> {
        if self.listener.is_none() {
            self.bind()?;
        }
        let listener = match self.listener.take() {
            Some(l) => l,
            None => return Err(Exception::Bind("listener missing after bind".to_string())),
        };

        let mut shutdown_rx = self.shutdown.tx.subscribe();
        let listener_task = tokio::spawn(listener.run());
        let _ = shutdown_rx.wait_for(|stop| *stop).await;

        if let Err(e) = listener_task.await {
            error!("监听任务异常终止：{}", e);
        }
        let Server {
            config,
            active,
            drain_tx,
            mut drain_rx,
            ..
        } = self;
        drop(drain_tx);

        let timeout = config.shutdown_timeout();
        info!(
            "等待{}个活跃连接结束，最多{}秒",
            active.load(Ordering::SeqCst),
            timeout.as_secs()
        );
        match time::timeout(timeout, drain_rx.recv()).await {
            Ok(_) => info!("所有连接已关闭，服务器停止"),
            Err(_) => warn!(
                "停机超时，放弃{}个仍未结束的连接",
                active.load(Ordering::SeqCst)
            ),
        }
        Ok(())
    }
}

/// 等待 SIGINT 或 SIGTERM 后触发停机
pub async fn watch_signals(handle: ShutdownHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("无法监听Ctrl+C信号：{}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("无法监听SIGTERM信号：{}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到Ctrl+C信号"),
        _ = terminate => info!("收到SIGTERM信号"),
    }
    handle.trigger();
}

/// 控制台命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Stop,
    Status,
    Help,
    Unknown(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "" => None,
            "stop" => Some(Self::Stop),
            "status" => Some(Self::Status),
            "help" => Some(Self::Help),
            other => Some(Self::Unknown(other.to_string())),
        }
    }
}

/// 从标准输入读取管理命令
pub async fn run_console(handle: ShutdownHandle, probe: StatusProbe) {
    run_console_from(BufReader::new(tokio::io::stdin()), handle, probe).await
}

/// 从任意输入读取管理命令，直到 `stop`、输入结束或读取失败
pub async fn run_console_from<R>(mut reader: R, handle: ShutdownHandle, probe: StatusProbe)
where
    R: AsyncBufRead + Unpin,
{
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) => {
                debug!("控制台输入已结束");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("读取控制台输入失败：{}", e);
                break;
            }
        }
        match ConsoleCommand::parse(&input) {
            None => {}
            Some(ConsoleCommand::Stop) => {
                println!("停机指令已激活，服务器将在处理完当前请求后关闭...");
                handle.trigger();
                break;
            }
            Some(ConsoleCommand::Help) => {
                println!("== Server Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("=================");
            }
            Some(ConsoleCommand::Status) => {
                let status = probe.status();
                println!("== Server 状态 ==");
                println!("当前活跃连接数: {}", status.active_connections);
                println!("缓存条目数: {}", status.cached_entries);
                println!("=================");
            }
            Some(ConsoleCommand::Unknown(cmd)) => {
                println!("无效的命令：{}", cmd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MockContentProvider;
    use std::time::Duration;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };

    fn server(doc_root: &str) -> Server {
        let config = Config::new()
            .with_doc_root(doc_root)
            .with_port(0)
            .with_local(true)
            .with_shutdown_timeout(Duration::from_secs(2));
        Server::new(config, Arc::new(MockContentProvider::new()))
    }

    #[test]
    fn test_console_command_parse() {
        assert_eq!(ConsoleCommand::parse("stop\n"), Some(ConsoleCommand::Stop));
        assert_eq!(ConsoleCommand::parse("  status "), Some(ConsoleCommand::Status));
        assert_eq!(ConsoleCommand::parse("help"), Some(ConsoleCommand::Help));
        assert_eq!(ConsoleCommand::parse("\n"), None);
        assert_eq!(
            ConsoleCommand::parse("reboot"),
            Some(ConsoleCommand::Unknown("reboot".to_string()))
        );
    }

    #[test]
    fn test_endpoint() {
        let s = server("/tmp");
        assert_eq!(s.endpoint(), "127.0.0.1:0".parse::<SocketAddr>().unwrap());
        let s = Server::new(Config::new(), Arc::new(MockContentProvider::new()));
        assert_eq!(s.endpoint(), "0.0.0.0:10000".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_console_stop_triggers_shutdown() {
        let s = server("/tmp");
        let handle = s.shutdown_handle();
        let input: &[u8] = b"help\nstatus\nbogus\nstop\nstatus\n";
        run_console_from(input, handle.clone(), s.status_probe()).await;
        assert!(handle.is_triggered());
    }

    #[tokio::test]
    async fn test_console_eof_does_not_stop() {
        let s = server("/tmp");
        let handle = s.shutdown_handle();
        let input: &[u8] = b"status\n";
        run_console_from(input, handle.clone(), s.status_probe()).await;
        assert!(!handle.is_triggered());
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.txt"), "ok").unwrap();
        let mut s = server(dir.path().to_str().unwrap());
        let handle = s.shutdown_handle();
        let probe = s.status_probe();

        let addr = s.bind().unwrap();
        assert_ne!(addr.port(), 0);
        let task = tokio::spawn(s.serve());

        let mut idle = TcpStream::connect(addr).await.unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /index.txt HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert!(out.ends_with("ok"));

        handle.trigger();
        time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // 空闲连接被服务器关闭
        let mut rest = Vec::new();
        idle.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(probe.status().active_connections, 0);
    }
}
