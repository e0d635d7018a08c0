//! Rotating pool of interchangeable credentials.
//!
//! One [`ResourcePool`] owns its entries and rotation cursor; every caller
//! shares it by reference. All reads and writes of the cursor and cooldowns
//! happen under a single mutex, and no lock is held across an `.await`.
//!
//! Two policies sit on the same rotation:
//! - [`ResourcePool::acquire`]: plain round robin, used when exhaustion is only
//!   visible from the failed call itself (see [`rotate`]).
//! - [`ResourcePool::acquire_ready`]: skips entries cooling down after a
//!   rate-limit response and reports the shortest remaining wait when every
//!   entry is cooling down.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use healthcast_core::RetryPolicy;
use tracing::{debug, warn};

/// Cooldown applied to a credential after a rate-limit response.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Shortest wait reported when every entry is cooling down.
pub const MIN_BLOCKED_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("resource pool needs at least one entry")]
    Empty,
}

#[derive(Debug)]
struct PoolEntry<T> {
    value: T,
    blocked_until: Option<Instant>,
}

#[derive(Debug)]
struct PoolState<T> {
    entries: Vec<PoolEntry<T>>,
    cursor: usize,
}

/// A credential handed out by the pool, with its slot for [`ResourcePool::block_for`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease<T> {
    pub index: usize,
    pub value: T,
}

/// Outcome of a cooldown-aware acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire<T> {
    Ready(Lease<T>),
    AllBlocked { retry_after: Duration },
}

#[derive(Debug)]
pub struct ResourcePool<T> {
    state: Mutex<PoolState<T>>,
}

impl<T: Clone> ResourcePool<T> {
    pub fn new(values: impl IntoIterator<Item = T>) -> Result<Self, PoolError> {
        let entries: Vec<PoolEntry<T>> = values
            .into_iter()
            .map(|value| PoolEntry {
                value,
                blocked_until: None,
            })
            .collect();
        if entries.is_empty() {
            return Err(PoolError::Empty);
        }
        Ok(Self {
            state: Mutex::new(PoolState { entries, cursor: 0 }),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Round robin: return the entry at the cursor and advance it.
    pub fn acquire(&self) -> Lease<T> {
        let mut state = self.lock();
        let index = state.cursor;
        state.cursor = (index + 1) % state.entries.len();
        Lease {
            index,
            value: state.entries[index].value.clone(),
        }
    }

    /// Round robin over entries that are not cooling down.
    ///
    /// The cursor moves just past the returned entry. When every entry is
    /// cooling down the cursor is left alone and the shortest remaining
    /// cooldown (at least [`MIN_BLOCKED_WAIT`]) is returned.
    pub fn acquire_ready(&self) -> Acquire<T> {
        let now = Instant::now();
        let mut state = self.lock();
        let len = state.entries.len();

        for step in 0..len {
            let index = (state.cursor + step) % len;
            let entry = &state.entries[index];
            let ready = entry.blocked_until.is_none_or(|until| until <= now);
            if ready {
                let value = entry.value.clone();
                state.cursor = (index + 1) % len;
                return Acquire::Ready(Lease { index, value });
            }
        }

        let retry_after = state
            .entries
            .iter()
            .filter_map(|e| e.blocked_until)
            .map(|until| until.saturating_duration_since(now))
            .min()
            .unwrap_or(MIN_BLOCKED_WAIT)
            .max(MIN_BLOCKED_WAIT);
        Acquire::AllBlocked { retry_after }
    }

    /// Put entry `index` on cooldown for `duration` from now.
    pub fn block_for(&self, index: usize, duration: Duration) {
        let mut state = self.lock();
        match state.entries.get_mut(index) {
            Some(entry) => entry.blocked_until = Some(Instant::now() + duration),
            None => warn!(index, "block_for on unknown pool entry"),
        }
    }

    /// Number of entries currently cooling down.
    pub fn blocked_count(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .entries
            .iter()
            .filter(|e| e.blocked_until.is_some_and(|until| until > now))
            .count()
    }
}

/// Errors that may succeed on another credential.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for healthcast_ai::AiError {
    fn is_retryable(&self) -> bool {
        healthcast_ai::AiError::is_retryable(self)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RotationError<E> {
    /// Every credential was tried once and failed retryably.
    #[error("all {attempts} credentials failed; last error: {last}")]
    Exhausted { attempts: usize, last: E },

    /// The call failed in a way another credential cannot fix.
    #[error(transparent)]
    Terminal(E),
}

/// Run `op` with successive round-robin credentials.
///
/// Retryable failures sleep `policy.delay_for_attempt(n)` after the n-th
/// attempt and move to the next credential, at most once per pool entry; the
/// first terminal failure is returned as is.
pub async fn rotate<T, R, E, F, Fut>(
    pool: &ResourcePool<T>,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<R, RotationError<E>>
where
    T: Clone,
    E: Retryable + std::fmt::Display,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let attempts = pool.len();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let lease = pool.acquire();
        let err = match op(lease.value).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(RotationError::Terminal(err));
        }
        if attempt as usize >= attempts {
            return Err(RotationError::Exhausted { attempts, last: err });
        }

        let pause = policy.delay_for_attempt(attempt);
        debug!(attempt, slot = lease.index, pause_ms = pause.as_millis() as u64, error = %err, "credential failed, rotating");
        tokio::time::sleep(pause).await;
    }
}
