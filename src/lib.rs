//! Cross-region price factor engine.
//!
//! Computes affiliate prices for Local SIP, CB SIP and CBSC listings from
//! fixed-point inputs, rule snapshots and factors fetched from downstream
//! services through tiered caches.

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod ratetable;
pub mod resolver;
pub mod telemetry;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{Decimal, PricingSnapshot, QueryResult, SnapshotStore};
pub use error::PricingError;
pub use orchestration::{BatchOrchestrator, CancelToken};
