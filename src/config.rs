// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 配置模块
//!
//! 运行参数从 TOML 文件读取，缺省字段使用 serde 默认值；随后应用环境变量覆盖
//! （`DOC_ROOT`、`CONTENT_ROOT`、`PORT`）。路由相关的参数集中在 [`RouteConfig`] 中，
//! 由服务器显式传给路由器，而不是作为全局状态存在。

use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{info, warn};
use std::fs;
use std::time::Duration;

use crate::{exception::Exception, param::*};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_doc_root")]
    doc_root: String,
    #[serde(default = "default_content_root")]
    content_root: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    local: bool,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_cache_size")]
    cache_size: usize,
    #[serde(default = "default_read_timeout")]
    read_timeout: u64,
    #[serde(default = "default_shutdown_timeout")]
    shutdown_timeout: u64,
    #[serde(default = "default_max_body_size")]
    max_body_size: usize,
    #[serde(default)]
    routing: RouteConfig,
}

/// 路由器使用的类型化配置。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RouteConfig {
    #[serde(default = "default_page_ttl")]
    pub page_ttl: u64,
    #[serde(default = "default_true")]
    pub cache_pages: bool,
    #[serde(default)]
    pub cache_posts: bool,
    #[serde(default = "default_true")]
    pub compress_html: bool,
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
    #[serde(default = "default_tenants")]
    pub tenants: Vec<TenantRule>,
}

/// 当请求的 Host 中包含 `host_pattern` 时，使用 `tenant` 指定的内容分区。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TenantRule {
    pub host_pattern: String,
    pub tenant: String,
}

fn default_doc_root() -> String {
    "/var/www/html".to_string()
}

fn default_content_root() -> String {
    "content".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_read_timeout() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_max_body_size() -> usize {
    DEFAULT_MAX_BODY_SIZE
}

fn default_page_ttl() -> u64 {
    DEFAULT_PAGE_TTL
}

fn default_true() -> bool {
    true
}

fn default_tenant() -> String {
    "localhost".to_string()
}

fn default_tenants() -> Vec<TenantRule> {
    vec![TenantRule {
        host_pattern: "quizbin.com".to_string(),
        tenant: "quizbin".to_string(),
    }]
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            page_ttl: default_page_ttl(),
            cache_pages: true,
            cache_posts: false,
            compress_html: true,
            default_tenant: default_tenant(),
            tenants: default_tenants(),
        }
    }
}

impl RouteConfig {
    /// 根据 Host 头选择内容分区：第一个被包含的 host_pattern 胜出，否则使用默认分区。
    pub fn tenant_for_host(&self, host: &str) -> &str {
        self.tenants
            .iter()
            .find(|rule| host.contains(rule.host_pattern.as_str()))
            .map(|rule| rule.tenant.as_str())
            .unwrap_or(&self.default_tenant)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            doc_root: default_doc_root(),
            content_root: default_content_root(),
            port: DEFAULT_PORT,
            local: false,
            worker_threads: 0,
            cache_size: DEFAULT_CACHE_SIZE,
            read_timeout: default_read_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            routing: RouteConfig::default(),
        }
    }

    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let str_val = fs::read_to_string(filename)
            .map_err(|e| Exception::Config(format!("无法读取配置文件{}：{}", filename, e)))?;
        let mut config = Self::from_toml_str(&str_val)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, Exception> {
        let mut config: Config =
            toml::from_str(text).map_err(|e| Exception::Config(e.to_string()))?;
        config.normalize();
        Ok(config)
    }

    /// 应用环境变量覆盖，`lookup` 通常为 `std::env::var`。
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(doc_root) = lookup("DOC_ROOT") {
            info!("DOC_ROOT => {}", doc_root);
            self.doc_root = doc_root;
        }
        if let Some(content_root) = lookup("CONTENT_ROOT") {
            info!("CONTENT_ROOT => {}", content_root);
            self.content_root = content_root;
        }
        if let Some(port) = lookup("PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.port = p,
                Err(_) => warn!("环境变量PORT的值{}不是合法端口，忽略", port),
            }
        }
    }

    fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get().max(1);
        }
        if self.cache_size == 0 {
            warn!("cache_size被设置为0，渲染结果将不会被缓存");
        }
        if self.read_timeout == 0 {
            warn!("read_timeout不能为0，该值将被改为30秒");
            self.read_timeout = default_read_timeout();
        }
    }

    /// 以构建者风格修改配置，供测试和嵌入场景使用。
    pub fn with_doc_root(mut self, doc_root: &str) -> Self {
        self.doc_root = doc_root.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout.as_secs().max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout.as_secs();
        self
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn with_routing(mut self, routing: RouteConfig) -> Self {
        self.routing = routing;
        self
    }
}

impl Config {
    pub fn doc_root(&self) -> &str {
        &self.doc_root
    }

    pub fn content_root(&self) -> &str {
        &self.content_root
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        match self.worker_threads {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn routing(&self) -> &RouteConfig {
        &self.routing
    }
}
