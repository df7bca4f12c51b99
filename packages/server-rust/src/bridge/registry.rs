//! Correlation registry: the single source of truth for outstanding calls.
//!
//! Every terminal transition (`resolve`, `fail`, `expire`, `discard`) goes
//! through `DashMap::remove`, so for any correlation id exactly one of them
//! observes the entry and delivers an outcome. The losers see the entry
//! already gone and return `false`. No lock is held across an await and
//! unrelated ids only contend on their own shard.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relay_core::{CorrelationId, ReplyEnvelope};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::{FailureCause, RegistryError};

/// Final outcome delivered to a waiting caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Resolved(ReplyEnvelope),
    Failed(FailureCause),
    TimedOut,
}

impl Terminal {
    #[must_use]
    pub fn state(&self) -> CallState {
        match self {
            Terminal::Resolved(_) => CallState::Resolved,
            Terminal::Failed(_) => CallState::Failed,
            Terminal::TimedOut => CallState::TimedOut,
        }
    }
}

/// Lifecycle state of a pending call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Waiting,
    Resolved,
    TimedOut,
    Failed,
}

struct PendingCall {
    created_at: Instant,
    deadline: Instant,
    slot: oneshot::Sender<Terminal>,
}

/// Concurrent map from correlation id to the one-shot slot of its waiter.
///
/// Presence of an entry means the call is still [`CallState::Waiting`].
#[derive(Default)]
pub struct CorrelationRegistry {
    entries: DashMap<CorrelationId, PendingCall>,
}

impl CorrelationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiting call that must reach a terminal state by `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateCorrelationId`] if `id` is already
    /// waiting.
    pub fn register(
        self: &Arc<Self>,
        id: CorrelationId,
        deadline: Instant,
    ) -> Result<PendingCallHandle, RegistryError> {
        let (tx, rx) = oneshot::channel();
        match self.entries.entry(id.clone()) {
            Entry::Occupied(_) => {
                warn!(correlation_id = %id, "duplicate correlation id rejected");
                return Err(RegistryError::DuplicateCorrelationId(id));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingCall {
                    created_at: Instant::now(),
                    deadline,
                    slot: tx,
                });
            }
        }

        Ok(PendingCallHandle {
            id,
            deadline,
            rx,
            registry: Arc::clone(self),
            settled: false,
        })
    }

    /// Completes a waiting call with the responder's reply.
    ///
    /// Returns `false` for an unknown or already-terminal id, which is the
    /// normal fate of a reply arriving after its caller timed out.
    pub fn resolve(&self, id: &CorrelationId, reply: ReplyEnvelope) -> bool {
        let matched = self.complete(id, Terminal::Resolved(reply));
        if !matched {
            debug!(correlation_id = %id, "resolve for unknown or late correlation id");
            metrics::counter!("relay_late_replies_total").increment(1);
        }
        matched
    }

    /// Completes a waiting call as failed.
    pub fn fail(&self, id: &CorrelationId, cause: FailureCause) -> bool {
        self.complete(id, Terminal::Failed(cause))
    }

    /// Completes a waiting call as timed out.
    pub fn expire(&self, id: &CorrelationId) -> bool {
        let expired = self.complete(id, Terminal::TimedOut);
        if expired {
            debug!(correlation_id = %id, "pending call expired");
        }
        expired
    }

    /// Removes an entry whose waiter is gone. Nobody observes the outcome.
    fn discard(&self, id: &CorrelationId) -> bool {
        let discarded = self.complete(id, Terminal::Failed(FailureCause::Abandoned));
        if discarded {
            debug!(correlation_id = %id, "pending call cancelled by caller");
        }
        discarded
    }

    /// Expires every entry whose deadline is at or before `now`. Returns how
    /// many entries this call expired.
    pub fn expire_overdue(&self, now: Instant) -> usize {
        let overdue: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = 0;
        for id in overdue {
            // Re-check under the shard lock; the entry may have completed since.
            if let Some((_, call)) = self.entries.remove_if(&id, |_, call| call.deadline <= now) {
                debug!(
                    correlation_id = %id,
                    waited_ms = u64::try_from(call.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "sweeper expired pending call"
                );
                let _ = call.slot.send(Terminal::TimedOut);
                expired += 1;
            }
        }
        expired
    }

    /// Fails every waiting call with `cause`. Returns how many were failed.
    pub fn fail_all(&self, cause: &FailureCause) -> usize {
        let ids: Vec<CorrelationId> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter(|id| self.fail(id, cause.clone()))
            .count()
    }

    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.entries.contains_key(id)
    }

    /// `Some(Waiting)` while the call is outstanding, `None` once it is gone.
    #[must_use]
    pub fn state(&self, id: &CorrelationId) -> Option<CallState> {
        self.contains(id).then_some(CallState::Waiting)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn complete(&self, id: &CorrelationId, terminal: Terminal) -> bool {
        match self.entries.remove(id) {
            Some((_, call)) => {
                // The waiter may already be gone; the transition still counts.
                let _ = call.slot.send(terminal);
                true
            }
            None => false,
        }
    }
}

/// The caller's side of a registered call.
///
/// Dropping the handle before [`wait`](Self::wait) finishes removes the
/// registry entry, so a cancelled caller never leaks one.
pub struct PendingCallHandle {
    id: CorrelationId,
    deadline: Instant,
    rx: oneshot::Receiver<Terminal>,
    registry: Arc<CorrelationRegistry>,
    settled: bool,
}

impl PendingCallHandle {
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.id
    }

    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Waits for the terminal outcome, expiring the call at its deadline.
    ///
    /// If the expiry loses a race with a reply or failure, the winning
    /// outcome is returned instead of `TimedOut`.
    pub async fn wait(mut self) -> Terminal {
        let outcome = match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(terminal)) => terminal,
            Ok(Err(_)) => Terminal::Failed(FailureCause::Abandoned),
            Err(_elapsed) => {
                self.registry.expire(&self.id);
                // Whoever removed the entry has sent (or is about to send).
                (&mut self.rx)
                    .await
                    .unwrap_or(Terminal::Failed(FailureCause::Abandoned))
            }
        };
        self.settled = true;
        outcome
    }

    #[cfg(test)]
    fn try_outcome(&mut self) -> Option<Terminal> {
        let outcome = self.rx.try_recv().ok();
        self.settled |= outcome.is_some();
        outcome
    }
}

impl Drop for PendingCallHandle {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.discard(&self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
