//! Distribution of redemption attempts across the group
//!
//! Built on the root once every rank's attempt record has been gathered.
//! Operators use it to tune the poll interval and attempt cap.

use super::poll::AttemptRecord;
use crate::common::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Header line of the text rendering
pub const HEADER: &str = "pass : number of ranks succeeded";

/// Attempt count -> number of ranks, with one bucket per value in `0..cap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Histogram {
    cap: u32,
    buckets: BTreeMap<u32, usize>,
}

impl Histogram {
    /// Empty histogram with every bucket in `0..cap` present
    pub fn new(cap: u32) -> Self {
        Self {
            cap,
            buckets: (0..cap).map(|attempts| (attempts, 0)).collect(),
        }
    }

    /// Build from the records gathered at the root.
    ///
    /// An exhausted rank aborts before gathering, so a record at or above
    /// `cap` means the protocol was violated; it is rejected rather than
    /// counted.
    pub fn aggregate(records: &[AttemptRecord], cap: u32, group_size: usize) -> Result<Self> {
        if records.len() != group_size {
            return Err(Error::RecordCountMismatch {
                expected: group_size,
                actual: records.len(),
            });
        }

        let mut histogram = Self::new(cap);
        for record in records {
            histogram.record(*record)?;
        }
        Ok(histogram)
    }

    pub fn record(&mut self, record: AttemptRecord) -> Result<()> {
        let attempts = record.get();
        match self.buckets.get_mut(&attempts) {
            Some(count) => {
                *count += 1;
                Ok(())
            }
            None => Err(Error::AttemptOutOfRange {
                attempts,
                cap: self.cap,
            }),
        }
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Ranks that needed exactly `attempts` failed attempts
    pub fn count(&self, attempts: u32) -> usize {
        self.buckets.get(&attempts).copied().unwrap_or(0)
    }

    /// Occupied buckets in ascending attempt order
    pub fn nonzero(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.buckets
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(attempts, count)| (*attempts, *count))
    }

    /// Sum over all buckets; equals the group size for a complete run.
    pub fn total(&self) -> usize {
        self.buckets.values().sum()
    }

    /// Header plus one `attempts : count` line per bucket.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(HEADER.len() + 8 * self.buckets.len());
        out.push_str(HEADER);
        out.push('\n');
        for (attempts, count) in &self.buckets {
            out.push_str(&format!("{} : {}\n", attempts, count));
        }
        out
    }
}

impl std::fmt::Display for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}
