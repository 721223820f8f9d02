//! Playback orchestration
//!
//! The single call surface UI components use to start, stop and recover
//! playback. Permission comes from the [`LeaseManager`]; the engine open runs
//! in the background under a per-session [`RetryController`], and outcomes
//! are reported on the [`EventBus`].
//!
//! Lock order is session, then lease. Every play/stop path takes the
//! session lock first, so a stop that starts after a play returned
//! `Started` always sees (and releases) that play's lease.

use crate::error::Error;
use crate::playback::engine::{EngineError, MediaSource, PlayerEngine};
use crate::playback::lease::{Denial, LeaseManager};
use crate::playback::retry::{AttemptOutcome, RetryCallbacks, RetryController, RetryPolicy};
use iptv_common::config::PlaybackSettings;
use iptv_common::events::{DenialReason, EventBus, PlaybackEvent};
use iptv_common::time::{duration_ms, Clock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Immediate answer to a play request
///
/// `Started` means the lease is held and the open is underway; whether the
/// open finally succeeds arrives later as `PlaybackStarted` or
/// `PlaybackFailed` on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayResult {
    Started,
    /// Another surface is streaming; offer the user a force-play
    DeniedByLease,
    /// A recent stop is still cooling down
    DeniedByCooldown,
}

impl PlayResult {
    pub fn is_denied(&self) -> bool {
        !matches!(self, PlayResult::Started)
    }
}

struct ActiveSession {
    owner_id: String,
    source: MediaSource,
    retry: RetryController,
}

/// Coordinates lease policy, the player engine and automatic retry
pub struct PlaybackCoordinator {
    leases: Arc<LeaseManager>,
    engine: Arc<dyn PlayerEngine>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    retry_policy: RetryPolicy,
    release_cooldown: Duration,
    runtime: Handle,
    session: Mutex<Option<ActiveSession>>,
}

impl PlaybackCoordinator {
    /// Create a coordinator that runs opens on the current Tokio runtime
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime. Once constructed, the
    /// play/stop methods may be called from any thread.
    pub fn new(
        leases: Arc<LeaseManager>,
        engine: Arc<dyn PlayerEngine>,
        clock: Arc<dyn Clock>,
        settings: &PlaybackSettings,
    ) -> Self {
        Self {
            leases,
            engine,
            clock,
            events: EventBus::default(),
            retry_policy: RetryPolicy::from(settings),
            release_cooldown: settings.release_cooldown(),
            runtime: Handle::current(),
            session: Mutex::new(None),
        }
    }

    /// Publish on a shared bus instead of a private one
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn leases(&self) -> &Arc<LeaseManager> {
        &self.leases
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask to play `source` for `owner_id`
    ///
    /// Never blocks on the engine: the lease decision is synchronous and the
    /// open runs in the background with automatic retries.
    pub fn request_play(&self, owner_id: &str, source: MediaSource) -> PlayResult {
        let mut session = self.lock_session();

        match self.leases.acquire(owner_id) {
            Ok(()) => {
                self.begin_session(&mut session, owner_id, source);
                PlayResult::Started
            }
            Err(Denial::Cooldown { remaining_ms }) => {
                info!(owner_id, remaining_ms, "Play denied: cooldown active");
                self.emit_denied(owner_id, DenialReason::Cooldown, remaining_ms);
                PlayResult::DeniedByCooldown
            }
            Err(Denial::HeldBy { holder }) => {
                info!(owner_id, holder = %holder, "Play denied: another surface is streaming");
                self.emit_denied(owner_id, DenialReason::LeaseHeld, 0);
                PlayResult::DeniedByLease
            }
        }
    }

    /// Take over playback for `owner_id`, stopping whoever holds it
    pub fn force_play(&self, owner_id: &str, source: MediaSource) -> PlayResult {
        let mut session = self.lock_session();
        self.leases.force_acquire(owner_id);
        self.begin_session(&mut session, owner_id, source);
        PlayResult::Started
    }

    /// Stop playback and release the lease with the configured cooldown
    ///
    /// Idempotent; returns whether a lease was released.
    pub fn stop_all(&self, owner_id: &str) -> bool {
        self.stop_all_with_cooldown(owner_id, self.release_cooldown)
    }

    /// Stop playback and release the lease with an explicit cooldown (zero allowed)
    pub fn stop_all_with_cooldown(&self, owner_id: &str, cooldown: Duration) -> bool {
        let mut session = self.lock_session();

        let owns_session = session
            .as_ref()
            .is_some_and(|active| active.owner_id == owner_id);
        if owns_session {
            if let Some(active) = session.take() {
                active.retry.cancel_retry();
            }
            self.engine.stop();
        }

        let released = self.leases.release(owner_id, cooldown);
        if owns_session || released {
            info!(owner_id, cooldown_ms = duration_ms(cooldown), "Playback stopped");
            self.events.emit_lossy(PlaybackEvent::PlaybackStopped {
                owner_id: owner_id.to_string(),
                cooldown_ms: duration_ms(cooldown),
                timestamp: self.clock.now(),
            });
        } else {
            debug!(owner_id, "Stop ignored: nothing playing for owner");
        }
        released
    }

    /// Engine failure callback (decode/network error after open)
    ///
    /// Retries the last source through the session's own controller; the
    /// lease is already held so no new acquisition happens. Returns whether
    /// a retry sequence was started.
    pub fn on_engine_error(&self, engine_error: EngineError) -> bool {
        let session = self.lock_session();
        let Some(active) = session.as_ref() else {
            debug!(error = %engine_error, "Engine error with no active session; ignored");
            return false;
        };

        if !self.leases.has_lease(&active.owner_id) {
            warn!(
                owner_id = %active.owner_id,
                error = %engine_error,
                "Engine error after lease was lost; not retrying"
            );
            return false;
        }

        if !engine_error.is_transient() {
            let err = Error::from(engine_error);
            error!(owner_id = %active.owner_id, error = %err, "Unrecoverable engine failure");
            active.retry.cancel_retry();
            self.events.emit_lossy(PlaybackEvent::PlaybackFailed {
                owner_id: active.owner_id.clone(),
                source: active.source.url.clone(),
                attempts: 0,
                last_error: Some(err.to_string()),
                timestamp: self.clock.now(),
            });
            return false;
        }

        warn!(
            owner_id = %active.owner_id,
            source = %active.source,
            error = %engine_error,
            "Engine failure; retrying same source"
        );
        self.launch(&active.retry, &active.owner_id, &active.source);
        true
    }

    /// Manual retry after a terminal failure
    ///
    /// Re-opens the last source with a fresh retry sequence if `owner_id`
    /// still owns the session and the lease.
    pub fn retry_now(&self, owner_id: &str) -> bool {
        let session = self.lock_session();
        match session.as_ref() {
            Some(active) if active.owner_id == owner_id && self.leases.has_lease(owner_id) => {
                info!(owner_id, source = %active.source, "Manual retry requested");
                self.launch(&active.retry, &active.owner_id, &active.source);
                true
            }
            _ => {
                debug!(owner_id, "Manual retry ignored: no session for owner");
                false
            }
        }
    }

    /// Owner of the current session, if any
    pub fn active_owner(&self) -> Option<String> {
        self.lock_session()
            .as_ref()
            .map(|active| active.owner_id.clone())
    }

    /// Source of the current session, if any
    pub fn current_source(&self) -> Option<MediaSource> {
        self.lock_session()
            .as_ref()
            .map(|active| active.source.clone())
    }

    /// Whether an open sequence is in progress
    pub fn is_retrying(&self) -> bool {
        self.lock_session()
            .as_ref()
            .is_some_and(|active| active.retry.is_retrying())
    }

    fn begin_session(
        &self,
        session: &mut Option<ActiveSession>,
        owner_id: &str,
        source: MediaSource,
    ) {
        if let Some(previous) = session.take() {
            previous.retry.cancel_retry();
            if previous.owner_id != owner_id {
                info!(
                    owner_id,
                    previous = %previous.owner_id,
                    "Displacing active playback session"
                );
            }
            self.engine.stop();
        }

        info!(owner_id, source = %source, "Starting playback");
        let retry = RetryController::with_runtime(self.retry_policy, self.runtime.clone());
        self.launch(&retry, owner_id, &source);
        *session = Some(ActiveSession {
            owner_id: owner_id.to_string(),
            source,
            retry,
        });
    }

    /// Start (or restart) the open sequence for `source` on `retry`
    fn launch(&self, retry: &RetryController, owner_id: &str, source: &MediaSource) {
        let last_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let attempts_made = Arc::new(AtomicU32::new(0));

        let action = {
            let engine = Arc::clone(&self.engine);
            let source = source.clone();
            let last_error = Arc::clone(&last_error);
            let owner_id = owner_id.to_string();
            move || {
                let engine = Arc::clone(&engine);
                let source = source.clone();
                let last_error = Arc::clone(&last_error);
                let owner_id = owner_id.clone();
                async move {
                    match engine.open(&source).await {
                        Ok(()) => AttemptOutcome::Succeeded,
                        Err(e) => {
                            let outcome = if e.is_transient() {
                                warn!(owner_id = %owner_id, source = %source, error = %e, "Open failed");
                                AttemptOutcome::Failed
                            } else {
                                error!(owner_id = %owner_id, source = %source, error = %e, "Open failed permanently");
                                AttemptOutcome::Aborted
                            };
                            *last_error.lock().unwrap_or_else(PoisonError::into_inner) =
                                Some(e.to_string());
                            outcome
                        }
                    }
                }
            }
        };

        let callbacks = {
            let on_attempt = {
                let events = self.events.clone();
                let clock = Arc::clone(&self.clock);
                let owner_id = owner_id.to_string();
                let url = source.url.clone();
                let attempts_made = Arc::clone(&attempts_made);
                move |attempt: u32, max_attempts: u32| {
                    attempts_made.store(attempt, Ordering::Relaxed);
                    events.emit_lossy(PlaybackEvent::RetryAttempt {
                        owner_id: owner_id.clone(),
                        source: url.clone(),
                        attempt,
                        max_attempts,
                        timestamp: clock.now(),
                    });
                }
            };
            let on_success = {
                let events = self.events.clone();
                let clock = Arc::clone(&self.clock);
                let owner_id = owner_id.to_string();
                let url = source.url.clone();
                move || {
                    info!(owner_id = %owner_id, source = %url, "Playback started");
                    events.emit_lossy(PlaybackEvent::PlaybackStarted {
                        owner_id: owner_id.clone(),
                        source: url.clone(),
                        timestamp: clock.now(),
                    });
                }
            };
            let on_failed = {
                let events = self.events.clone();
                let clock = Arc::clone(&self.clock);
                let owner_id = owner_id.to_string();
                let url = source.url.clone();
                move || {
                    let attempts = attempts_made.load(Ordering::Relaxed);
                    let err = Error::RetryExhausted {
                        source_url: url.clone(),
                        attempts,
                    };
                    error!(owner_id = %owner_id, error = %err, "Playback failed");
                    let last_error = last_error
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    events.emit_lossy(PlaybackEvent::PlaybackFailed {
                        owner_id: owner_id.clone(),
                        source: url.clone(),
                        attempts,
                        last_error,
                        timestamp: clock.now(),
                    });
                }
            };
            RetryCallbacks::new()
                .on_attempt(on_attempt)
                .on_success(on_success)
                .on_failed(on_failed)
        };

        retry.start_retry(action, callbacks);
    }

    fn emit_denied(&self, owner_id: &str, reason: DenialReason, remaining_ms: u64) {
        self.events.emit_lossy(PlaybackEvent::LeaseDenied {
            owner_id: owner_id.to_string(),
            reason,
            remaining_ms,
            timestamp: self.clock.now(),
        });
    }
}
