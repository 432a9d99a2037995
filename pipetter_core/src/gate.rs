//! Pausable, cancellable execution gate.
//!
//! Motion-initiating operations call [`ExecutionGate::wait_for_running`]
//! first. Long waits register a [`CancelToken`] so that a cancel aborts them
//! at once instead of letting the sleep run out.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, watch};

use crate::error::{HardwareError, Result, fail};
use crate::types::PauseType;
use crate::util::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PauseState {
    Running,
    Paused,
    /// Terminal until [`ExecutionGate::reset`].
    Cancelled,
}

#[derive(Debug)]
struct TokenInner {
    id: u64,
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation flag for one cancellable task.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    fn new(id: u64) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                id,
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Sleep for `duration` unless `token` is cancelled first.
pub async fn cancellable_sleep(token: &CancelToken, duration: Duration) -> Result<()> {
    if token.is_cancelled() {
        return fail(HardwareError::ExecutionCancelled);
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = token.cancelled() => fail(HardwareError::ExecutionCancelled),
    }
}

/// Gate state plus the number of cancels so far. A waiter that sees the
/// count move fails even if a reset already put the gate back to running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    state: PauseState,
    epoch: u64,
}

/// Registration of a cancellable task; deregisters on drop.
#[derive(Debug)]
pub struct Registration<'a> {
    gate: &'a ExecutionGate,
    token: CancelToken,
}

impl Registration<'_> {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        lock(&self.gate.tasks).remove(&self.token.id());
    }
}

#[derive(Debug)]
pub struct ExecutionGate {
    state: watch::Sender<Snapshot>,
    tasks: Mutex<BTreeMap<u64, CancelToken>>,
    next_id: AtomicU64,
}

impl Default for ExecutionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Snapshot {
            state: PauseState::Running,
            epoch: 0,
        });
        Self {
            state,
            tasks: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> PauseState {
        self.state.borrow().state
    }

    /// Running to Paused. No-op when already paused or cancelled.
    pub fn pause(&self) {
        self.state.send_if_modified(|s| {
            if s.state == PauseState::Running {
                s.state = PauseState::Paused;
                true
            } else {
                false
            }
        });
    }

    /// Paused to Running. No-op when cancelled.
    pub fn resume(&self) {
        self.state.send_if_modified(|s| {
            if s.state == PauseState::Paused {
                s.state = PauseState::Running;
                true
            } else {
                false
            }
        });
    }

    /// Enter Cancelled and cancel every registered task.
    pub fn cancel(&self) {
        self.cancel_tasks(None);
    }

    /// Like [`cancel`](Self::cancel) but spares the caller's own task.
    pub fn cancel_from(&self, own: &CancelToken) {
        self.cancel_tasks(Some(own.id()));
    }

    fn cancel_tasks(&self, spare: Option<u64>) {
        self.state.send_modify(|s| {
            s.state = PauseState::Cancelled;
            s.epoch += 1;
        });
        let tasks = lock(&self.tasks);
        let mut n = 0usize;
        for (id, t) in tasks.iter() {
            if Some(*id) != spare {
                t.cancel();
                n += 1;
            }
        }
        tracing::info!(cancelled_tasks = n, "execution cancelled");
    }

    /// Leave Cancelled; the recovery path after a stop.
    pub fn reset(&self) {
        self.state.send_modify(|s| s.state = PauseState::Running);
    }

    /// Return when running; wait while paused; fail when cancelled, including
    /// a cancel that was already followed by a reset.
    pub async fn wait_for_running(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let start = rx.borrow_and_update().epoch;
        loop {
            let now = *rx.borrow_and_update();
            if now.epoch != start {
                return fail(HardwareError::ExecutionCancelled);
            }
            match now.state {
                PauseState::Running => return Ok(()),
                PauseState::Cancelled => return fail(HardwareError::ExecutionCancelled),
                PauseState::Paused => {}
            }
            if rx.changed().await.is_err() {
                return fail(HardwareError::ExecutionCancelled);
            }
        }
    }

    /// Register a cancellable task. Already cancelled if the gate is.
    pub fn register(&self) -> Registration<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancelToken::new(id);
        if self.state() == PauseState::Cancelled {
            token.cancel();
        }
        lock(&self.tasks).insert(id, token.clone());
        Registration { gate: self, token }
    }

    pub fn registered_tasks(&self) -> usize {
        lock(&self.tasks).len()
    }
}

/// Outstanding pause reasons. Execution resumes only when none remain.
#[derive(Debug, Default)]
pub struct PauseManager {
    reasons: Mutex<BTreeSet<PauseType>>,
}

impl PauseManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self, reason: PauseType) {
        lock(&self.reasons).insert(reason);
    }

    pub fn resume(&self, reason: PauseType) {
        lock(&self.reasons).remove(&reason);
    }

    pub fn should_pause(&self) -> bool {
        !lock(&self.reasons).is_empty()
    }

    pub fn reset(&self) {
        lock(&self.reasons).clear();
    }
}
