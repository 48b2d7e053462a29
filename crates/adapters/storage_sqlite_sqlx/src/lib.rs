//! # homegate-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement every storage port defined in `homegate-app::ports::storage`
//!   on one cloneable [`SqliteStorage`] handle
//! - Manage the `SQLite` connection pool lifecycle
//! - Run the embedded migrations
//! - Map between domain types and database rows
//!
//! ## Dependency rule
//! Depends on `homegate-app` (for port traits) and `homegate-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

mod command_repo;
mod connection_repo;
mod device_repo;
pub mod error;
mod event_repo;
mod log_repo;
pub mod pool;
mod row;
mod script_repo;
mod storage;
mod timer_repo;

pub use error::StorageError;
pub use pool::{Config, Database};
pub use storage::SqliteStorage;
