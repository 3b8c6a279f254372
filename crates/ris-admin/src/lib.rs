//! # RIS 管理模块
//!
//! 运维相关的公共设施：分层配置加载与校验、日志初始化

pub mod config;
pub mod logging;

pub use self::config::{
    ConfigManager, ConfigValidator, DatabaseConfig, IntegrationConfig, LogFormat, LoggingConfig,
    QueueConfig, RisConfig, ServerConfig, StoreBackend, StoreConfig,
};
pub use self::logging::init_tracing;
