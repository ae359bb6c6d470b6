//! # Paperfolio Database Crate
//!
//! The persistent store behind the decision and settlement batches: signals,
//! recommendations, orders, positions, the append-only ledger, the portfolio
//! row, prices, FX rates, snapshots and settlement locks, all in SQLite.
//!
//! ## Public API
//!
//! - `connect` / `connect_in_memory`: build the `SqlitePool`.
//! - `run_migrations`: applies the embedded schema.
//! - `DbRepository`: pool-level ingestion, read models and settlement locks.
//! - `BatchTx`: the transaction a whole decision or fill batch runs in.
//! - `DbError`: the error type returned from this crate.

pub mod batch;
pub mod connection;
pub mod error;
pub mod repository;
mod rows;

pub use batch::BatchTx;
pub use connection::{connect, connect_in_memory, run_migrations};
pub use error::DbError;
pub use repository::DbRepository;
