//! # Paperfolio Engine Crate
//!
//! The two batch orchestrators and the ingestion boundary.
//!
//! - `DecisionRunner` runs once per trading day: signals in, recommendations
//!   and staged orders out.
//! - `FillEngine` runs once per following session: pending orders are settled
//!   at the open, and positions, the ledger and the portfolio row move with them.
//!
//! Each run is a single store transaction. It commits only on full success,
//! and an error or a dropped future rolls the whole batch back.

pub mod decision;
pub mod error;
pub mod ingest;
pub mod settlement;

pub use decision::{DecisionReport, DecisionRunner, StagedOrder};
pub use error::{EngineError, ErrorKind, LookupError, SettlementError};
pub use ingest::{ingest_fx_rates, ingest_prices, ingest_signals};
pub use settlement::{FillEngine, FillReport, FilledOrder, PortfolioSummary, LEDGER_ORDER_FILL};
