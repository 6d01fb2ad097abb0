//! Shared library for the Harvester document-retrieval platform
//!
//! Provides common utilities used across all services:
//! - Configuration management
//! - Database connection pooling and the repository layer
//! - Error types and HTTP error responses
//! - Portal-facing issue codes and message templates
//! - Queue utilities for run dispatch
//! - Downstream HTTP and object-storage clients
//! - Metrics helpers

pub mod clients;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod errors;
pub mod issues;
pub mod metrics;
pub mod queue;

pub use config::AppConfig;
pub use db::{models, DbPool, Repository};
pub use errors::{AppError, ErrorCode, Result};
pub use issues::{Issue, IssueCode};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
