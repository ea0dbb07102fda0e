//! In-process group transport
//!
//! All endpoints share one `watch` board. Each collective call is numbered per
//! endpoint; the n-th call on every rank meets at the same board step, which
//! is how mismatched collectives are detected.

use super::GroupTransport;
use crate::common::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collective {
    Broadcast { len: usize },
    Gather,
}

impl std::fmt::Display for Collective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collective::Broadcast { len } => write!(f, "broadcast({} bytes)", len),
            Collective::Gather => write!(f, "gather"),
        }
    }
}

#[derive(Debug)]
struct Step {
    op: Collective,
    root: usize,
    payload: Option<Vec<u8>>,
    contributions: BTreeMap<usize, u32>,
}

impl Step {
    fn new(op: Collective, root: usize) -> Self {
        Self {
            op,
            root,
            payload: None,
            contributions: BTreeMap::new(),
        }
    }

    fn check(&self, op: Collective, root: usize, rank: usize, step: u64) -> Result<()> {
        match (self.op, op) {
            (Collective::Broadcast { len: expected }, Collective::Broadcast { len: actual })
                if expected != actual =>
            {
                Err(Error::BufferSizeMismatch { expected, actual })
            }
            _ if self.op != op || self.root != root => Err(Error::CollectiveMismatch {
                step,
                rank,
                issued: format!("{} rooted at {}", op, root),
                expected: format!("{} rooted at {}", self.op, self.root),
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Abort {
    code: i32,
    rank: usize,
}

impl Abort {
    fn to_error(self) -> Error {
        Error::Aborted {
            code: self.code,
            reason: format!("aborted by rank {}", self.rank),
        }
    }
}

#[derive(Debug, Default)]
struct Board {
    steps: HashMap<u64, Step>,
    aborted: Option<Abort>,
}

impl Board {
    /// Register `rank`'s arrival at `step`, returning the step for updates.
    fn arrive(
        &mut self,
        step: u64,
        op: Collective,
        root: usize,
        rank: usize,
    ) -> Result<&mut Step> {
        if let Some(abort) = self.aborted {
            return Err(abort.to_error());
        }
        let entry = self
            .steps
            .entry(step)
            .or_insert_with(|| Step::new(op, root));
        entry.check(op, root, rank, step)?;
        Ok(entry)
    }
}

/// An in-process group of `size` ranks.
#[derive(Clone)]
pub struct LocalGroup {
    size: usize,
    board: Arc<watch::Sender<Board>>,
}

impl LocalGroup {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig("group must have at least one rank".into()));
        }
        let (board, _) = watch::channel(Board::default());
        Ok(Self {
            size,
            board: Arc::new(board),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Transport endpoint for `rank`. Each rank should hold exactly one.
    pub fn endpoint(&self, rank: usize) -> Result<LocalTransport> {
        if rank >= self.size {
            return Err(Error::InvalidRank {
                rank,
                size: self.size,
            });
        }
        Ok(LocalTransport {
            rank,
            size: self.size,
            board: self.board.clone(),
            step: AtomicU64::new(0),
        })
    }

    pub fn endpoints(&self) -> Vec<LocalTransport> {
        (0..self.size)
            .filter_map(|rank| self.endpoint(rank).ok())
            .collect()
    }

    /// Abort code, if the group has been aborted
    pub fn abort_code(&self) -> Option<i32> {
        self.board.borrow().aborted.map(|abort| abort.code)
    }

    /// Resolves with the abort code once any rank aborts the group.
    pub async fn aborted(&self) -> i32 {
        let mut rx = self.board.subscribe();
        rx.wait_for(|board| board.aborted.is_some())
            .await
            .ok()
            .and_then(|board| board.aborted.map(|abort| abort.code))
            .unwrap_or(super::ABORT_CODE)
    }
}

/// One rank's view of a [`LocalGroup`]
pub struct LocalTransport {
    rank: usize,
    size: usize,
    board: Arc<watch::Sender<Board>>,
    step: AtomicU64,
}

impl LocalTransport {
    fn next_step(&self) -> u64 {
        self.step.fetch_add(1, Ordering::SeqCst)
    }

    fn check_root(&self, root: usize) -> Result<()> {
        if root >= self.size {
            return Err(Error::InvalidRank {
                rank: root,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Post this rank's part of a collective. A mismatch aborts the group so
    /// the other ranks do not wait forever.
    fn post<F>(&self, step: u64, op: Collective, root: usize, update: F) -> Result<()>
    where
        F: FnOnce(&mut Step),
    {
        let mut outcome = Ok(());
        self.board.send_modify(|board| {
            let posted = board.arrive(step, op, root, self.rank).map(update);
            if let Err(e) = posted {
                if !e.is_abort() {
                    board.aborted.get_or_insert(Abort {
                        code: super::ABORT_CODE,
                        rank: self.rank,
                    });
                }
                outcome = Err(e);
            }
        });
        if let Err(e) = &outcome {
            if !e.is_abort() {
                tracing::error!(rank = self.rank, "collective failed: {}", e);
            }
        }
        outcome
    }
}

impl GroupTransport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn broadcast(&self, buf: &mut [u8], root: usize) -> Result<()> {
        self.check_root(root)?;
        let step = self.next_step();
        let op = Collective::Broadcast { len: buf.len() };

        if self.rank == root {
            let payload = buf.to_vec();
            return self.post(step, op, root, |entry| entry.payload = Some(payload));
        }

        self.post(step, op, root, |_| {})?;

        let mut rx = self.board.subscribe();
        let board = rx
            .wait_for(|board| {
                board.aborted.is_some()
                    || board
                        .steps
                        .get(&step)
                        .is_some_and(|entry| entry.payload.is_some())
            })
            .await
            .map_err(|_| Error::Internal("group board closed".into()))?;

        if let Some(abort) = board.aborted {
            return Err(abort.to_error());
        }
        let payload = board
            .steps
            .get(&step)
            .and_then(|entry| entry.payload.as_deref())
            .ok_or_else(|| Error::Internal(format!("broadcast step {} vanished", step)))?;
        buf.copy_from_slice(payload);
        Ok(())
    }

    async fn gather(&self, value: u32, root: usize) -> Result<Option<Vec<u32>>> {
        self.check_root(root)?;
        let step = self.next_step();
        let rank = self.rank;

        self.post(step, Collective::Gather, root, |entry| {
            entry.contributions.insert(rank, value);
        })?;

        if rank != root {
            return Ok(None);
        }

        let size = self.size;
        let mut rx = self.board.subscribe();
        let board = rx
            .wait_for(|board| {
                board.aborted.is_some()
                    || board
                        .steps
                        .get(&step)
                        .is_some_and(|entry| entry.contributions.len() == size)
            })
            .await
            .map_err(|_| Error::Internal("group board closed".into()))?;

        if let Some(abort) = board.aborted {
            return Err(abort.to_error());
        }
        let values = board
            .steps
            .get(&step)
            .map(|entry| entry.contributions.values().copied().collect())
            .ok_or_else(|| Error::Internal(format!("gather step {} vanished", step)))?;
        Ok(Some(values))
    }

    fn abort(&self, code: i32) {
        tracing::error!(rank = self.rank, code, "aborting group");
        let rank = self.rank;
        self.board.send_modify(|board| {
            board.aborted.get_or_insert(Abort { code, rank });
        });
    }
}
