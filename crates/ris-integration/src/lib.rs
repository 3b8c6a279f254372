//! # RIS 集成模块
//!
//! 工作流所依赖的外部协作服务的具体实现：
//! - 报告签名：远程 CA 签名网关、本地摘要签名
//! - 报告渲染：纯文本报告单
//! - 影像归档关联：HTTP 通知、仅记录日志

pub mod archive;
pub mod renderer;
pub mod signing;

pub use archive::{HttpArchiveLinker, LoggingArchiveLinker};
pub use renderer::PlainTextRenderer;
pub use signing::{DigestSigningService, RemoteSigningClient};
