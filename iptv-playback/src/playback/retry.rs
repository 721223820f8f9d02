//! Bounded exponential-backoff retry
//!
//! State machine: `Idle -> Attempting(n) -> {Succeeded | Attempting(n+1) | Exhausted}`.
//! Succeeded, Exhausted and Cancelled all return the controller to Idle.
//!
//! The loop runs as a spawned task. The backoff sleep and the in-flight
//! attempt are both raced against a cancellation token, so cancelling never
//! leaves a timer behind and never fires a success/failure callback.

use futures::FutureExt;
use iptv_common::config::PlaybackSettings;
use iptv_common::time::duration_ms;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Retry ceiling and first backoff delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    /// Wait after the first failure; doubles after each further failure
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base_delay * 2^(attempt-1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(1000))
    }
}

impl From<&PlaybackSettings> for RetryPolicy {
    fn from(settings: &PlaybackSettings) -> Self {
        Self::new(settings.max_retry_attempts, settings.base_retry_delay())
    }
}

/// Result of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    /// Retry after the backoff delay, if attempts remain
    Failed,
    /// Give up now; reported like exhaustion
    Aborted,
}

impl From<bool> for AttemptOutcome {
    fn from(ok: bool) -> Self {
        if ok {
            AttemptOutcome::Succeeded
        } else {
            AttemptOutcome::Failed
        }
    }
}

impl<E> From<Result<(), E>> for AttemptOutcome {
    fn from(result: Result<(), E>) -> Self {
        result.is_ok().into()
    }
}

type AttemptCallback = Box<dyn Fn(u32, u32) + Send + Sync>;
type DoneCallback = Box<dyn Fn() + Send + Sync>;

/// Progress callbacks for one retry sequence
///
/// None of them fire after the sequence is cancelled or superseded.
#[derive(Default)]
pub struct RetryCallbacks {
    on_attempt: Option<AttemptCallback>,
    on_success: Option<DoneCallback>,
    on_failed: Option<DoneCallback>,
}

impl RetryCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called before each attempt with `(attempt, max_attempts)`
    pub fn on_attempt(mut self, f: impl Fn(u32, u32) + Send + Sync + 'static) -> Self {
        self.on_attempt = Some(Box::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Called once when attempts are exhausted or an attempt aborts
    pub fn on_failed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_failed = Some(Box::new(f));
        self
    }

    fn attempt(&self, attempt: u32, max_attempts: u32) {
        if let Some(f) = &self.on_attempt {
            guarded("on_attempt", || f(attempt, max_attempts));
        }
    }

    fn success(&self) {
        if let Some(f) = &self.on_success {
            guarded("on_success", || f());
        }
    }

    fn failed(&self) {
        if let Some(f) = &self.on_failed {
            guarded("on_failed", || f());
        }
    }
}

/// Run a caller callback; a panic is logged and swallowed so the loop keeps its state
fn guarded(name: &'static str, f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(callback = name, "Retry callback panicked");
    }
}

/// The one active sequence of a controller
struct RetrySession {
    generation: u64,
    attempt: u32,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RetrySession {
    fn cancel(self) {
        self.cancel.cancel();
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

#[derive(Default)]
struct RetryShared {
    session: Option<RetrySession>,
    generation: u64,
}

fn lock(shared: &Mutex<RetryShared>) -> MutexGuard<'_, RetryShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Retries a fallible async action with exponential backoff
///
/// One controller runs at most one sequence; starting a new one cancels the
/// previous. Give each playback attempt its own controller.
pub struct RetryController {
    policy: RetryPolicy,
    shared: Arc<Mutex<RetryShared>>,
    runtime: Handle,
}

impl RetryController {
    /// Create a controller that spawns on the current Tokio runtime
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime; use
    /// [`RetryController::with_runtime`] from other threads.
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_runtime(policy, Handle::current())
    }

    /// Create a controller that spawns on `runtime`
    ///
    /// [`RetryController::start_retry`] may then be called from any thread.
    pub fn with_runtime(policy: RetryPolicy, runtime: Handle) -> Self {
        Self {
            policy,
            shared: Arc::new(Mutex::new(RetryShared::default())),
            runtime,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Start a retry sequence, cancelling any sequence already running
    ///
    /// `action` is invoked once per attempt. A panic inside the attempt is
    /// caught and counted as a failed attempt.
    pub fn start_retry<F, Fut, O>(&self, action: F, callbacks: RetryCallbacks)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = O> + Send + 'static,
        O: Into<AttemptOutcome> + Send + 'static,
    {
        let mut shared = lock(&self.shared);
        let previous = shared.session.take();

        shared.generation += 1;
        let generation = shared.generation;
        let cancel = CancellationToken::new();

        // The task blocks on this lock before touching the session, so the
        // handle is always stored before the task can clear the session.
        let task = self.runtime.spawn(run_sequence(
            Arc::clone(&self.shared),
            generation,
            cancel.clone(),
            self.policy,
            action,
            callbacks,
        ));

        shared.session = Some(RetrySession {
            generation,
            attempt: 0,
            cancel,
            task: Some(task),
        });
        drop(shared);

        if let Some(previous) = previous {
            debug!(
                generation = previous.generation,
                attempt = previous.attempt,
                "Cancelling previous retry sequence"
            );
            previous.cancel();
        }
    }

    /// Cancel the running sequence; returns whether one was running
    ///
    /// Neither success nor failure callbacks fire for a cancelled sequence.
    pub fn cancel_retry(&self) -> bool {
        let session = lock(&self.shared).session.take();
        match session {
            Some(session) => {
                info!(
                    generation = session.generation,
                    attempt = session.attempt,
                    "Retry sequence cancelled"
                );
                session.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_retrying(&self) -> bool {
        lock(&self.shared).session.is_some()
    }

    /// Attempt number in progress (0 when idle)
    pub fn current_attempt(&self) -> u32 {
        lock(&self.shared)
            .session
            .as_ref()
            .map(|session| session.attempt)
            .unwrap_or(0)
    }
}

impl Drop for RetryController {
    fn drop(&mut self) {
        let session = lock(&self.shared).session.take();
        if let Some(session) = session {
            session.cancel();
        }
    }
}

/// Returns the controller to Idle if the task ends without reaching `finish`
///
/// Covers a task that unwinds. A cancelled or superseded sequence no longer
/// owns the session, so the generation check makes this a no-op for it.
struct SessionReset {
    shared: Arc<Mutex<RetryShared>>,
    generation: u64,
}

impl Drop for SessionReset {
    fn drop(&mut self) {
        let mut guard = lock(&self.shared);
        if matches!(&guard.session, Some(session) if session.generation == self.generation) {
            guard.session = None;
        }
    }
}

/// Record the attempt number; false if this sequence is no longer current
fn begin_attempt(shared: &Mutex<RetryShared>, generation: u64, attempt: u32) -> bool {
    match lock(shared).session.as_mut() {
        Some(session) if session.generation == generation => {
            session.attempt = attempt;
            true
        }
        _ => false,
    }
}

/// Return to Idle; false if the sequence was cancelled or superseded meanwhile
fn finish(shared: &Mutex<RetryShared>, generation: u64, cancel: &CancellationToken) -> bool {
    let mut guard = lock(shared);
    let current = matches!(&guard.session, Some(session) if session.generation == generation);
    if !current || cancel.is_cancelled() {
        return false;
    }
    guard.session = None;
    true
}

async fn run_sequence<F, Fut, O>(
    shared: Arc<Mutex<RetryShared>>,
    generation: u64,
    cancel: CancellationToken,
    policy: RetryPolicy,
    mut action: F,
    callbacks: RetryCallbacks,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: Into<AttemptOutcome> + Send + 'static,
{
    let max_attempts = policy.max_attempts;
    let _reset = SessionReset {
        shared: Arc::clone(&shared),
        generation,
    };

    for attempt in 1..=max_attempts {
        if !begin_attempt(&shared, generation, attempt) {
            return;
        }
        debug!(attempt, max_attempts, "Retry attempt starting");
        callbacks.attempt(attempt, max_attempts);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            // The closure call itself sits inside the guarded future
            result = AssertUnwindSafe(async { action().await }).catch_unwind() => match result {
                Ok(outcome) => outcome.into(),
                Err(_) => {
                    warn!(attempt, "Retry action panicked; counting as failed attempt");
                    AttemptOutcome::Failed
                }
            },
        };

        match outcome {
            AttemptOutcome::Succeeded => {
                if finish(&shared, generation, &cancel) {
                    info!(attempt, max_attempts, "Retry sequence succeeded");
                    callbacks.success();
                }
                return;
            }
            AttemptOutcome::Aborted => {
                warn!(attempt, max_attempts, "Retry sequence aborted by action");
                break;
            }
            AttemptOutcome::Failed => {}
        }

        if attempt < max_attempts {
            let delay = policy.delay_for(attempt);
            debug!(attempt, delay_ms = duration_ms(delay), "Attempt failed, backing off");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    if finish(&shared, generation, &cancel) {
        warn!(max_attempts, "Retry attempts exhausted");
        callbacks.failed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_delays_double() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .map(|attempt| policy.delay_for(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn test_delay_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1));
        assert_eq!(policy.delay_for(64), Duration::MAX);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = PlaybackSettings {
            max_retry_attempts: 3,
            base_retry_delay_ms: 250,
            release_cooldown_ms: 0,
        };
        assert_eq!(
            RetryPolicy::from(&settings),
            RetryPolicy::new(3, Duration::from_millis(250))
        );
    }

    #[test]
    fn test_outcome_conversions() {
        assert_eq!(AttemptOutcome::from(true), AttemptOutcome::Succeeded);
        assert_eq!(AttemptOutcome::from(false), AttemptOutcome::Failed);
        assert_eq!(
            AttemptOutcome::from(Err::<(), _>("timeout")),
            AttemptOutcome::Failed
        );
        assert_eq!(AttemptOutcome::from(Ok::<(), String>(())), AttemptOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_idle_controller_queries() {
        let controller = RetryController::new(RetryPolicy::default());
        assert!(!controller.is_retrying());
        assert_eq!(controller.current_attempt(), 0);
        assert!(!controller.cancel_retry());
    }
}
