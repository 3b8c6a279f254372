//! # RIS Web 模块
//!
//! 通过 JSON/HTTP 暴露放射科工作流的全部操作。

pub mod error;
pub mod extract;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{create_app, AppState, WebServer};
