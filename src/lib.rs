// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

pub mod cache;
pub mod config;
pub mod content;
pub mod exception;
pub mod listener;
pub mod param;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod session;

pub use cache::{Clock, ManualClock, SystemClock, TtlCache};
pub use config::{Config, RouteConfig, TenantRule};
pub use content::{ContentProvider, FileContentProvider};
pub use exception::Exception;
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use request::Request;
pub use response::{Response, ResponseKind};
pub use router::RouteContext;
pub use server::{Server, ShutdownHandle};
