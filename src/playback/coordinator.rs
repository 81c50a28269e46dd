//! Single entry point for audible playback
//!
//! [`PlaybackCoordinator`] decides *when* a supplied playback action may run:
//! at most one request plays at a time, starts are throttled to a minimum
//! interval, and refused ids land in a bounded advisory queue. It never
//! looks at audio itself.
//!
//! Queue entries are advisory only. They exist so a UI can show "waiting"
//! on a button; the coordinator never replays them. Callers resubmit with
//! their action once [`PlaybackCoordinator::time_until_next_admission`]
//! reaches zero, and that admission removes the id from the queue.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::{AbortHandle, Abortable, Aborted};

use super::clock::Clock;
use super::state::{PlaybackState, RateLimitConfig};
use crate::Result;

/// Something that can silence audio output immediately
///
/// Called while the coordinator holds its lock: it must return promptly
/// and must not call back into the coordinator.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// Result of a play request that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted; the action ran to completion
    Played,
    /// Admitted, then cut off by `stop_current` or a newer request
    Interrupted,
    /// Not admitted; the action was not run
    Rejected(Rejection),
}

impl Admission {
    #[must_use]
    pub const fn was_admitted(self) -> bool {
        matches!(self, Self::Played | Self::Interrupted)
    }
}

/// Why a play request was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The same id is playing right now
    AlreadyPlaying,
    /// Too soon after the last start; id added to the advisory queue
    Queued { position: usize },
    /// Too soon after the last start; id was already queued
    AlreadyQueued { position: usize },
    /// Too soon after the last start and the queue is full; dropped
    QueueFull,
}

type ObserverFn = dyn Fn(&PlaybackState) + Send + Sync;

#[derive(Default)]
struct Observers {
    next_id: AtomicU64,
    list: Mutex<Vec<(u64, Arc<ObserverFn>)>>,
    /// Snapshots not yet delivered, in revision order
    outbox: Mutex<VecDeque<PlaybackState>>,
    /// Set while some caller is draining the outbox
    delivering: AtomicBool,
}

impl Observers {
    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Arc<ObserverFn>)>> {
        self.list.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn outbox(&self) -> MutexGuard<'_, VecDeque<PlaybackState>> {
        self.outbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|(observer_id, _)| *observer_id != id);
    }

    /// Queue a snapshot; must be called under the coordinator lock so the
    /// outbox stays in revision order
    fn post(&self, snapshot: PlaybackState) {
        self.outbox().push_back(snapshot);
    }

    /// Deliver queued snapshots unless another caller already is
    ///
    /// Only one caller drains at a time, so observers never see an older
    /// revision after a newer one. A snapshot posted from inside an
    /// observer is delivered once the current one has been seen by all.
    fn flush(&self) {
        loop {
            if self
                .delivering
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            {
                let _draining = Draining(&self.delivering);
                loop {
                    let next = self.outbox().pop_front();
                    let Some(snapshot) = next else { break };
                    self.notify(&snapshot);
                }
            }
            // A post that lost the race above is ours to deliver
            if self.outbox().is_empty() {
                return;
            }
        }
    }

    fn notify(&self, snapshot: &PlaybackState) {
        // Call outside the lock so observers may unsubscribe or subscribe
        let current: Vec<Arc<ObserverFn>> =
            self.lock().iter().map(|(_, f)| Arc::clone(f)).collect();
        for observer in current {
            observer(snapshot);
        }
    }
}

/// Releases the delivery flag, even if an observer panics
struct Draining<'a>(&'a AtomicBool);

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle returned by [`PlaybackCoordinator::subscribe`]
///
/// Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    observers: Weak<Observers>,
    id: u64,
}

impl Subscription {
    /// Stop receiving notifications
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

struct Inner {
    state: PlaybackState,
    rate_limit: RateLimitConfig,
    /// Identifies the admission that owns `Playing`
    generation: u64,
    abort: Option<AbortHandle>,
}

impl Inner {
    fn touch(&mut self) -> PlaybackState {
        self.state.revision += 1;
        self.state.clone()
    }

    /// Force `Idle`, cutting off the running action
    fn halt(&mut self) -> Option<PlaybackState> {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
        if !self.state.is_playing {
            return None;
        }
        self.state.is_playing = false;
        self.state.active_request_id = None;
        Some(self.touch())
    }
}

enum Decision {
    Admit {
        generation: u64,
        registration: futures::future::AbortRegistration,
    },
    Reject(Rejection),
}

/// Governs when playback actions may run
pub struct PlaybackCoordinator {
    inner: Mutex<Inner>,
    observers: Arc<Observers>,
    clock: Arc<dyn Clock>,
    output: Arc<dyn Interrupt>,
}

impl std::fmt::Debug for PlaybackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackCoordinator")
            .field("state", &self.state())
            .field("rate_limit", &self.rate_limit())
            .finish_non_exhaustive()
    }
}

impl PlaybackCoordinator {
    /// Create a coordinator
    ///
    /// `output` is silenced whenever playback is interrupted or stopped.
    #[must_use]
    pub fn new(
        rate_limit: RateLimitConfig,
        clock: Arc<dyn Clock>,
        output: Arc<dyn Interrupt>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: PlaybackState::default(),
                rate_limit,
                generation: 0,
                abort: None,
            }),
            observers: Arc::new(Observers::default()),
            clock,
            output,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask to run `action` as the playback for `id`
    ///
    /// When admitted, any other playback is interrupted first, the state
    /// becomes `Playing(id)` and `action` runs; whatever happens to it, the
    /// state returns to `Idle` afterwards (unless a newer request has taken
    /// over in the meantime).
    ///
    /// # Errors
    ///
    /// Returns the action's error when an admitted action fails
    pub async fn request_play<F, Fut>(&self, id: &str, action: F) -> Result<Admission>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let decision = self.admit(id);
        self.observers.flush();

        let (generation, registration) = match decision {
            Decision::Admit {
                generation,
                registration,
            } => (generation, registration),
            Decision::Reject(rejection) => {
                tracing::debug!(request_id = id, ?rejection, "play request not admitted");
                return Ok(Admission::Rejected(rejection));
            }
        };

        tracing::debug!(request_id = id, generation, "playback started");

        // Settles even if the action panics or this future is dropped
        let _settle = SettleGuard {
            coordinator: self,
            generation,
        };

        match Abortable::new(action(), registration).await {
            Ok(Ok(())) => Ok(Admission::Played),
            Ok(Err(e)) => {
                tracing::warn!(request_id = id, error = %e, "playback action failed");
                Err(e)
            }
            Err(Aborted) => {
                tracing::debug!(request_id = id, "playback interrupted");
                Ok(Admission::Interrupted)
            }
        }
    }

    /// Decide on `id` and post the resulting snapshots
    fn admit(&self, id: &str) -> Decision {
        let now = self.clock.now();
        let mut inner = self.lock();
        let config = inner.rate_limit;

        if inner.state.is_active(id) {
            return Decision::Reject(Rejection::AlreadyPlaying);
        }

        if config.enabled {
            let too_soon = inner
                .state
                .last_playback_start
                .is_some_and(|last| now.saturating_duration_since(last) < config.min_interval());

            if too_soon {
                let rejection = Self::enqueue(&mut inner, id, config.max_queue_depth);
                if matches!(rejection, Rejection::Queued { .. }) {
                    self.observers.post(inner.touch());
                }
                return Decision::Reject(rejection);
            }
        }

        if let Some(idle) = inner.halt() {
            // Silenced before the new action can start its own output
            self.output.interrupt();
            self.observers.post(idle);
        }

        let (abort, registration) = AbortHandle::new_pair();
        inner.generation += 1;
        inner.abort = Some(abort);
        inner.state.is_playing = true;
        inner.state.active_request_id = Some(id.to_string());
        inner.state.pending_queue.retain(|queued| queued != id);
        inner.state.last_playback_start = Some(now);
        self.observers.post(inner.touch());

        Decision::Admit {
            generation: inner.generation,
            registration,
        }
    }

    fn enqueue(inner: &mut Inner, id: &str, max_depth: usize) -> Rejection {
        if let Some(position) = inner.state.queue_position(id) {
            return Rejection::AlreadyQueued { position };
        }

        if inner.state.pending_queue.len() >= max_depth {
            return Rejection::QueueFull;
        }

        inner.state.pending_queue.push(id.to_string());
        Rejection::Queued {
            position: inner.state.pending_queue.len() - 1,
        }
    }

    /// Return to `Idle` if `generation` still owns playback
    fn settle(&self, generation: u64) {
        {
            let mut inner = self.lock();
            if inner.generation != generation || !inner.state.is_playing {
                return;
            }
            inner.abort = None;
            inner.state.is_playing = false;
            inner.state.active_request_id = None;
            self.observers.post(inner.touch());
        }

        tracing::debug!(generation, "playback settled");
        self.observers.flush();
    }

    /// Halt any playback immediately and go `Idle`
    ///
    /// The queue is left untouched. Remote synthesis already dispatched
    /// by the interrupted action still completes and fills the cache.
    pub fn stop_current(&self) {
        {
            let mut inner = self.lock();
            let halted = inner.halt();
            self.output.interrupt();
            if let Some(snapshot) = halted {
                tracing::debug!("playback stopped");
                self.observers.post(snapshot);
            }
        }
        self.observers.flush();
    }

    /// Empty the advisory queue without touching current playback
    pub fn clear_queue(&self) {
        {
            let mut inner = self.lock();
            if inner.state.pending_queue.is_empty() {
                return;
            }
            inner.state.pending_queue.clear();
            self.observers.post(inner.touch());
        }
        self.observers.flush();
    }

    /// How long until a new request could be admitted
    ///
    /// Always zero when rate limiting is disabled.
    #[must_use]
    pub fn time_until_next_admission(&self) -> Duration {
        let now = self.clock.now();
        let inner = self.lock();
        if !inner.rate_limit.enabled {
            return Duration::ZERO;
        }

        inner.state.last_playback_start.map_or(Duration::ZERO, |last| {
            inner
                .rate_limit
                .min_interval()
                .saturating_sub(now.saturating_duration_since(last))
        })
    }

    /// Register an observer, called with a snapshot after every state change
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&PlaybackState) + Send + Sync + 'static,
    {
        let id = self.observers.next_id.fetch_add(1, Ordering::Relaxed);
        let observer: Arc<ObserverFn> = Arc::new(observer);
        self.observers.lock().push((id, observer));
        Subscription {
            observers: Arc::downgrade(&self.observers),
            id,
        }
    }

    /// Current state snapshot
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.lock().state.clone()
    }

    /// Ids currently in the advisory queue, oldest first
    #[must_use]
    pub fn queued(&self) -> Vec<String> {
        self.lock().state.pending_queue.clone()
    }

    #[must_use]
    pub fn rate_limit(&self) -> RateLimitConfig {
        self.lock().rate_limit
    }

    /// Replace the rate-limit configuration; applies from the next request on
    pub fn set_rate_limit(&self, config: RateLimitConfig) {
        self.lock().rate_limit = config;
        tracing::debug!(?config, "rate limit updated");
    }
}

struct SettleGuard<'a> {
    coordinator: &'a PlaybackCoordinator,
    generation: u64,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.settle(self.generation);
    }
}
