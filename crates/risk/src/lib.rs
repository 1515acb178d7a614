//! Admission control for the desk.
//!
//! [`RiskFence`] composes the [`CircuitBreaker`], [`EdgeFilter`] and the
//! position sizer into a single ordered gate; [`RiskLedger`] tracks what
//! the admitted trades consume.

pub mod circuit_breaker;
pub mod edge_filter;
pub mod fence;
pub mod ledger;

pub use circuit_breaker::{BreakerDecision, CircuitBreaker};
pub use edge_filter::{CandidateScoreModel, EdgeFilter, EdgeVerdict};
pub use fence::{Admission, RiskFence};
pub use ledger::{DailyArchive, LedgerEntry, LedgerEntryKind, RiskLedger};
