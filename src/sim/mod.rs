//! In-process simulation of a group and its granting service

pub mod runner;
pub mod service;

pub use runner::{run_group, GroupOutcome, RankExit};
pub use service::{parse_code, CallCounts, RankService, SimulatedService};
