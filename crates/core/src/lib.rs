//! # TubeMirror Core
//!
//! Shared plumbing for the TubeMirror services: environment-driven
//! configuration, the PostgreSQL connection pool, retry utilities, and
//! the common error type.
//!
//! ## Modules
//!
//! - `config`: Configuration loading and validation
//! - `database`: Shared PostgreSQL connection pool
//! - `error`: Common error type
//! - `retry`: Exponential backoff retry utilities

pub mod config;
pub mod database;
pub mod error;
pub mod retry;

pub use config::{load_dotenv, ConfigLoader, DatabaseConfig, ServiceConfig, VideoApiConfig};
pub use database::{DatabasePool, PoolStats};
pub use error::CoreError;
pub use retry::{retry_with_backoff, RetryPolicy};
