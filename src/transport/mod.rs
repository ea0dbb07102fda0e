//! Group transport
//!
//! The collective operations every rank uses to coordinate: broadcast,
//! gather and group abort. The protocol only consumes this surface; the
//! in-process [`local::LocalGroup`] backs it for simulation and tests.

pub mod local;

use crate::common::Result;
use std::future::Future;

pub use local::{LocalGroup, LocalTransport};

/// Rank that acquires the credential and collects the attempt records
pub const ROOT_RANK: usize = 0;

/// Exit status used for every fatal group abort
pub const ABORT_CODE: i32 = -1;

/// Collective operations over a fixed group of ranks.
///
/// Every rank must issue the same sequence of collectives with matching
/// roots and buffer sizes.
pub trait GroupTransport: Send + Sync {
    /// Zero-based index of this rank
    fn rank(&self) -> usize;

    /// Number of ranks in the group
    fn size(&self) -> usize;

    /// Copy `buf` from `root` into every rank's `buf`.
    fn broadcast(&self, buf: &mut [u8], root: usize) -> impl Future<Output = Result<()>> + Send;

    /// Collect one value per rank at `root`, ordered by rank. Non-root ranks
    /// get `None`.
    fn gather(&self, value: u32, root: usize)
        -> impl Future<Output = Result<Option<Vec<u32>>>> + Send;

    /// Terminate every rank in the group with `code`.
    fn abort(&self, code: i32);
}
