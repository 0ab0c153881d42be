// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 内容服务器
//!
//! 程序入口：解析命令行、初始化日志、加载配置、按配置构建多线程运行时，
//! 然后运行服务器直到收到停机信号（Ctrl+C、SIGTERM 或控制台 `stop`）。

use std::{process::ExitCode, time::Duration};

use clap::Parser;
use log::{error, info, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use tokio::runtime::Builder;

use cms_server::{
    server::{run_console, watch_signals},
    Config, Server,
};

/// 小型内容服务器：静态文件、缓存的页面与文章
#[derive(Parser, Debug)]
#[command(name = "cms-server", version, about)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config/development.toml")]
    config: String,

    /// log4rs 日志配置文件路径
    #[arg(long, default_value = "config/log4rs.yaml")]
    log_config: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // 1. 日志：优先使用 YAML 配置，文件缺失或无效时退回到控制台输出
    init_logging(&cli.log_config);

    // 2. 配置
    let config = match Config::from_toml(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("配置文件{}已载入", cli.config);
    info!("doc root: {}", config.doc_root());

    // 3. 运行时：工作线程数来自配置，至少为 1
    let worker_threads = config.worker_threads();
    info!("工作线程数：{}", worker_threads);
    let runtime = match Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("无法创建运行时：{}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async move {
        let mut server = Server::from_config(config);
        server.bind()?;

        let handle = server.shutdown_handle();
        tokio::spawn(watch_signals(handle.clone()));
        tokio::spawn(run_console(handle, server.status_probe()));

        server.serve().await
    });
    // 控制台任务可能阻塞在标准输入上，不等待它
    runtime.shutdown_timeout(Duration::from_millis(100));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("服务器启动失败：{}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(path: &str) {
    let file_error = match log4rs::init_file(path, Default::default()) {
        Ok(()) => return,
        Err(e) => e,
    };

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}",
        )))
        .build();
    let fallback = log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match fallback.map(log4rs::init_config) {
        Ok(Ok(_)) => info!("无法读取日志配置{}：{}，使用控制台日志", path, file_error),
        Ok(Err(e)) => eprintln!("无法初始化日志：{}", e),
        Err(e) => eprintln!("日志配置无效：{}", e),
    }
}
