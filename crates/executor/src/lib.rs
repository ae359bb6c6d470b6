//! # Paperfolio Executor Crate
//!
//! Settlement arithmetic with no I/O.
//!
//! - **Pricing vs. state:** `SimulatedExecutor` turns an order and an opening
//!   price into a `Fill` without touching any state. `Book` is the state
//!   machine that applies fills to cash and positions and derives the new
//!   portfolio row.
//!
//! ## Public API
//!
//! - `Executor`: the pricing trait.
//! - `SimulatedExecutor`: next-open fills with slippage and fees.
//! - `Book`: the in-memory account for one settlement batch.
//! - `ExecutorError`: the error type returned from this crate.

pub mod book;
pub mod error;
pub mod exchange;

pub use book::{Book, PositionUpdate};
pub use error::ExecutorError;
pub use exchange::{Executor, FillRequest, SimulatedExecutor};
