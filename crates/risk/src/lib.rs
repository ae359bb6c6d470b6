//! Decision-side rules: mapping signals to stances and stances to orders.
//!
//! Both components are pure. They read configuration snapshots and domain
//! values and never touch the store.

pub mod error;
pub mod stager;
pub mod stance;

pub use error::RiskError;
pub use stager::{OrderStager, StagingContext};
pub use stance::{RiskFlags, StanceResolver};
