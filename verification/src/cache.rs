//! Single-flight action cache
//!
//! Remote actions are slow and some are not idempotent on the wire (they
//! create a task record every time). Within one session every distinct
//! `(unit, action, params)` triple runs at most once; concurrent callers for
//! the same key wait on the one in-flight call instead of issuing their own.
//!
//! ```text
//! caller A ──get_or_run(k)──► entry(k) empty ──► run call ──► store outcome
//! caller B ──get_or_run(k)──► entry(k) in flight ──► wait ──┘
//! caller C ──get_or_run(k)──► entry(k) stored ──► clone outcome
//! ```
//!
//! Failures are stored as well, so every caller of a failed action sees the
//! same error. If the task driving a call is cancelled, the next waiter picks
//! the call up.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::error::{VerifyError, VerifyResult};
use crate::platform::{ActionOutput, ActionParams};

/// Cache key: unit, action and the sorted parameter set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionKey {
    pub unit: String,
    pub action: String,
    pub params: ActionParams,
}

impl ActionKey {
    pub fn new(unit: impl Into<String>, action: impl Into<String>, params: ActionParams) -> Self {
        Self {
            unit: unit.into(),
            action: action.into(),
            params,
        }
    }
}

type Slot = Arc<OnceCell<VerifyResult<ActionOutput>>>;

/// Per-session memo of action outcomes
#[derive(Debug, Default)]
pub struct ActionCache {
    entries: Mutex<HashMap<ActionKey, Slot>>,
    lookups: AtomicU64,
    calls: AtomicU64,
    timeouts: AtomicU64,
}

/// Counters for one session's cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Remote calls actually issued
    pub calls: u64,
    /// Requests answered without issuing a call
    pub hits: u64,
    pub timeouts: u64,
    /// Distinct keys seen
    pub entries: u64,
}

impl ActionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the memoized outcome for `key`, running `call` if this is the
    /// first request for it.
    ///
    /// `call` is bounded by `timeout`; running out of time stores a
    /// [`VerifyError::Timeout`] for the key.
    pub async fn get_or_run<F, Fut>(
        &self,
        key: ActionKey,
        timeout: Duration,
        call: F,
    ) -> VerifyResult<ActionOutput>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = VerifyResult<ActionOutput>>,
    {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let slot = {
            let mut entries = self.entries.lock().await;
            Arc::clone(entries.entry(key.clone()).or_default())
        };

        let outcome = slot
            .get_or_init(|| async {
                self.calls.fetch_add(1, Ordering::Relaxed);
                debug!(unit = %key.unit, action = %key.action, "Running action");
                match tokio::time::timeout(timeout, call()).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        self.timeouts.fetch_add(1, Ordering::Relaxed);
                        Err(VerifyError::timeout(&key.unit, &key.action, timeout))
                    }
                }
            })
            .await;

        outcome.clone()
    }

    /// Whether an outcome is stored for `key`
    pub async fn contains(&self, key: &ActionKey) -> bool {
        let entries = self.entries.lock().await;
        entries.get(key).map(|slot| slot.initialized()).unwrap_or(false)
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await.len() as u64;
        let lookups = self.lookups.load(Ordering::Relaxed);
        let calls = self.calls.load(Ordering::Relaxed);
        CacheStats {
            calls,
            hits: lookups.saturating_sub(calls),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            entries,
        }
    }
}
