//! Jobscout - Job Ingestion and Proxy Pool System
//!
//! A quota-aware job ingestion engine paired with a self-maintaining proxy
//! pool, written in Rust.
//!
//! ## Features
//!
//! - Proxy candidate aggregation from public text and HTML sources
//! - Two-stage proxy validation (generic HTTPS, then target site)
//! - Scored single-use proxy rotation with cooldowns and fail-open reset
//! - Multi-credential quota accounting with least-used selection
//! - Probe-plan-page ingestion sweeps with mid-page credential switching
//! - Insert-if-absent persistence (in-memory or PostgreSQL)

pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod proxy;
pub mod store;

pub use config::Config;
pub use error::{Result, ScoutError};
