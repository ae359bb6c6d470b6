//! # Paperfolio Core Types
//!
//! The shared vocabulary of the workspace: signals, stances, orders, positions,
//! ledger entries and the portfolio singleton, plus the inbound batch payloads.
//! Every other crate depends on this one; it depends on none of them.

pub mod batch;
pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use batch::{normalize_currency, FxBatch, PriceBatch, PriceInput, SignalBatch, SignalInput};
pub use enums::{Action, DecisionTag, OrderSide, OrderStatus, PositionStatus, Stance};
pub use error::CoreError;
pub use structs::{
    Fill, FxRate, LedgerEntry, Order, OrderDraft, Portfolio, Position, PriceBar, Rationale,
    Recommendation, RiskSnapshot, Signal, Snapshot,
};
