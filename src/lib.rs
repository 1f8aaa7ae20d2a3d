//! Bank Ledger - accounts and atomic double-entry transfers
//!
//! # Modules
//!
//! - [`config`] - YAML configuration with environment overrides
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool and bootstrap schema
//! - [`store`] - Record store traits, PostgreSQL and in-memory backends
//! - [`transfer`] - Transfer engine (one transaction per transfer)
//! - [`service`] - Ledger facade over a store
//! - [`gateway`] - HTTP API

pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod service;
pub mod store;
pub mod transfer;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use service::{Ledger, LedgerService};
pub use store::{Account, Currency, Entry, MemoryStore, PgStore, Store, StoreError, Transfer};
pub use transfer::{TransferEngine, TransferTxParams, TransferTxResult};
