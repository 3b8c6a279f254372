//! # RIS Core
//!
//! 放射科信息系统的核心模块，提供数据模型、错误定义、存储接口和外部服务接口。

pub mod display;
pub mod error;
pub mod integration;
pub mod memory;
pub mod models;
pub mod store;
pub mod utils;

pub use error::{Result, RisError};
pub use memory::MemoryOrderStore;
pub use models::*;
pub use store::{Change, OrderStore, UnitOfWork, Versioned};
