//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and pragma setup
//! - Repository access to fee brackets, exchange rates and profit rates

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{ExchangeRateRecord, FeeTable, ProfitRateLimit, Repository};
