//! In-memory credential-granting service
//!
//! Stands in for the external service when running the protocol in-process.
//! Each rank talks to it through its own [`RankService`] so calls can be
//! attributed and failures injected per rank.

use crate::credential::{CredentialFlags, CredentialService, ErrorKind, ServiceResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

const NOT_FOUND: i32 = -6;
const EINVAL: i32 = -1;
const ALREADY_GRANTED: i32 = -5;

/// Per-rank call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub acquire: u32,
    pub access: u32,
    pub release: u32,
}

#[derive(Debug, Default)]
struct ServiceState {
    next_id: u32,
    acquire_error: Option<i32>,
    release_error: Option<i32>,
    /// Remaining "not found" answers before a rank sees the credential
    lag: HashMap<usize, u32>,
    /// Ranks that are refused outright
    rejected: HashMap<usize, i32>,
    /// Credential -> ranks holding a redeemed claim
    claims: HashMap<u32, BTreeSet<usize>>,
    /// Credential -> acquiring rank
    granted: HashMap<u32, usize>,
    calls: HashMap<usize, CallCounts>,
}

/// Simulated granting service shared by every rank of a local group.
#[derive(Debug)]
pub struct SimulatedService {
    state: Mutex<ServiceState>,
}

impl Default for SimulatedService {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SimulatedService {
    /// Service that hands out ids sequentially from `first_id`
    pub fn new(first_id: u32) -> Self {
        Self {
            state: Mutex::new(ServiceState {
                next_id: first_id,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail every acquire with `code`
    pub fn fail_acquire(self, code: i32) -> Self {
        self.state().acquire_error = Some(code);
        self
    }

    /// Fail every release with `code`
    pub fn fail_release(self, code: i32) -> Self {
        self.state().release_error = Some(code);
        self
    }

    /// Answer "not found" to `rank`'s first `misses` access calls
    pub fn lag(self, rank: usize, misses: u32) -> Self {
        self.state().lag.insert(rank, misses);
        self
    }

    /// Per-rank lags, indexed by rank
    pub fn lags(self, misses: &[u32]) -> Self {
        {
            let mut state = self.state();
            for (rank, misses) in misses.iter().enumerate() {
                state.lag.insert(rank, *misses);
            }
        }
        self
    }

    /// Random lag in `0..=max_misses` for each of `size` ranks, reproducible
    /// from `seed`.
    pub fn random_lags(self, size: usize, max_misses: u32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let misses: Vec<u32> = (0..size).map(|_| rng.gen_range(0..=max_misses)).collect();
        self.lags(&misses)
    }

    /// Refuse every access from `rank` with `code`
    pub fn reject(self, rank: usize, code: i32) -> Self {
        self.state().rejected.insert(rank, code);
        self
    }

    /// Service view for `rank`
    pub fn endpoint(self: &Arc<Self>, rank: usize) -> RankService {
        RankService {
            rank,
            service: Arc::clone(self),
        }
    }

    pub fn calls(&self, rank: usize) -> CallCounts {
        self.state().calls.get(&rank).copied().unwrap_or_default()
    }

    pub fn total_calls(&self) -> CallCounts {
        self.state()
            .calls
            .values()
            .fold(CallCounts::default(), |acc, c| CallCounts {
                acquire: acc.acquire + c.acquire,
                access: acc.access + c.access,
                release: acc.release + c.release,
            })
    }

    /// Ranks currently holding a redeemed claim on `credential`
    pub fn holders(&self, credential: u32) -> Vec<usize> {
        self.state()
            .claims
            .get(&credential)
            .map(|ranks| ranks.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Has `credential` been handed out by this service?
    pub fn is_granted(&self, credential: u32) -> bool {
        self.state().granted.contains_key(&credential)
    }

    fn acquire(&self, rank: usize) -> ServiceResult<u32> {
        let mut state = self.state();
        state.calls.entry(rank).or_default().acquire += 1;

        if let Some(code) = state.acquire_error {
            return Err(code);
        }
        if state.granted.values().any(|owner| *owner == rank) {
            return Err(ALREADY_GRANTED);
        }

        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        state.granted.insert(id, rank);
        state.claims.entry(id).or_default();
        Ok(id)
    }

    fn access(&self, rank: usize, credential: u32) -> ServiceResult<u64> {
        let mut state = self.state();
        state.calls.entry(rank).or_default().access += 1;

        if let Some(code) = state.rejected.get(&rank) {
            return Err(*code);
        }
        if let Some(misses) = state.lag.get_mut(&rank) {
            if *misses > 0 {
                *misses -= 1;
                return Err(NOT_FOUND);
            }
        }
        if !state.granted.contains_key(&credential) {
            return Err(NOT_FOUND);
        }

        state.claims.entry(credential).or_default().insert(rank);
        Ok((u64::from(credential) << 32) | rank as u64)
    }

    fn release(&self, rank: usize, credential: u32) -> ServiceResult<()> {
        let mut state = self.state();
        state.calls.entry(rank).or_default().release += 1;

        if let Some(code) = state.release_error {
            return Err(code);
        }
        let removed = state
            .claims
            .get_mut(&credential)
            .is_some_and(|holders| holders.remove(&rank));
        if !removed {
            return Err(EINVAL);
        }
        Ok(())
    }
}

/// One rank's connection to a [`SimulatedService`]
#[derive(Debug, Clone)]
pub struct RankService {
    rank: usize,
    service: Arc<SimulatedService>,
}

impl CredentialService for RankService {
    fn acquire(&self, _flags: CredentialFlags) -> ServiceResult<u32> {
        self.service.acquire(self.rank)
    }

    fn access(&self, credential: u32, _flags: CredentialFlags) -> ServiceResult<u64> {
        self.service.access(self.rank, credential)
    }

    fn release(&self, credential: u32, _flags: CredentialFlags) -> ServiceResult<()> {
        self.service.release(self.rank, credential)
    }
}

/// Parse a failure code given either as a number or a taxonomy name
/// (`credential_not_found`, `permission_denied`, ...).
pub fn parse_code(s: &str) -> crate::Result<i32> {
    if let Ok(code) = s.trim().parse::<i32>() {
        return Ok(code);
    }
    let kind: ErrorKind = serde_json::from_value(serde_json::Value::String(s.trim().into()))
        .map_err(|_| crate::Error::InvalidConfig(format!("unknown service code: {}", s)))?;
    kind.code()
        .ok_or_else(|| crate::Error::InvalidConfig(format!("no code for {}", s)))
}
