//! Credential coordination protocol
//!
//! The coordinator is responsible for:
//! - Acquiring the credential on the root rank
//! - Distributing it to every rank
//! - Redeeming it locally with bounded polling
//! - Releasing it and reporting the attempt distribution

pub mod histogram;
pub mod poll;
pub mod protocol;

pub use histogram::Histogram;
pub use poll::{AttemptRecord, PollOutcome, PollState, RetryPoller};
pub use protocol::{Coordinator, RankSummary, RunReport};
