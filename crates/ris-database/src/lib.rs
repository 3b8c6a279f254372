//! # RIS 数据库模块
//!
//! 基于 PostgreSQL 的 [`OrderStore`](ris_core::OrderStore) 实现：连接池、建表和行模型。
//! 乐观锁通过 `WHERE version = $n` 的条件更新实现，唯一性由数据库约束保证。

pub mod connection;
pub mod models;
pub mod queries;
pub mod store;

// 重新导出主要类型
pub use connection::{DatabasePool, PoolSettings};
pub use queries::DatabaseQueries;
pub use store::PgOrderStore;
