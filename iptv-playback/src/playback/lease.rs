//! Exclusive playback lease
//!
//! Enforces the single-connection policy: at most one owner (full screen
//! player, picture-in-picture, channel preview) may stream at a time. A
//! release may install a cooldown window during which nobody can acquire,
//! which absorbs rapid close/re-open cycles that would otherwise
//! double-initialize hardware decoders.
//!
//! Lease state and the cooldown window live behind one mutex, so every
//! decision is made against a consistent snapshot of both.

use chrono::{DateTime, Utc};
use iptv_common::time::{add_duration, duration_ms, elapsed_ms, Clock};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// Current holder of the playback permission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseState {
    None,
    Acquired {
        owner_id: String,
        acquired_at: DateTime<Utc>,
    },
}

/// Window after a release during which every acquisition fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownWindow {
    pub until: DateTime<Utc>,
}

/// Reason an acquisition was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// A cooldown window is open; applies to every owner
    Cooldown { remaining_ms: u64 },
    /// Another owner holds the lease
    HeldBy { holder: String },
}

#[derive(Debug)]
struct LeaseInner {
    state: LeaseState,
    cooldown: Option<CooldownWindow>,
}

impl LeaseInner {
    fn cooldown_remaining_ms(&self, now: DateTime<Utc>) -> u64 {
        self.cooldown
            .map(|window| elapsed_ms(now, window.until))
            .unwrap_or(0)
    }
}

/// Owner of the single global playback permission
///
/// Construct one per process at the composition root and share it by `Arc`.
pub struct LeaseManager {
    inner: Mutex<LeaseInner>,
    clock: Arc<dyn Clock>,
}

impl LeaseManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(LeaseInner {
                state: LeaseState::None,
                cooldown: None,
            }),
            clock,
        }
    }

    // Every critical section leaves the state consistent, so a poisoned
    // lock still guards valid data.
    fn lock(&self) -> MutexGuard<'_, LeaseInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the lease, reporting why it was refused
    ///
    /// Cooldown is checked before ownership, so an open window refuses even
    /// the previous holder. Re-acquiring a lease already held by `owner_id`
    /// succeeds and leaves `acquired_at` untouched.
    pub fn acquire(&self, owner_id: &str) -> Result<(), Denial> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let remaining_ms = inner.cooldown_remaining_ms(now);
        if remaining_ms > 0 {
            debug!(owner_id, remaining_ms, "Lease denied: cooldown active");
            return Err(Denial::Cooldown { remaining_ms });
        }

        match &inner.state {
            LeaseState::Acquired { owner_id: holder, .. } if holder == owner_id => Ok(()),
            LeaseState::Acquired { owner_id: holder, .. } => {
                debug!(owner_id, holder = %holder, "Lease denied: held by another owner");
                Err(Denial::HeldBy {
                    holder: holder.clone(),
                })
            }
            LeaseState::None => {
                inner.state = LeaseState::Acquired {
                    owner_id: owner_id.to_string(),
                    acquired_at: now,
                };
                info!(owner_id, "Lease acquired");
                Ok(())
            }
        }
    }

    /// Acquire the lease if it is free or already ours and no cooldown is open
    pub fn try_acquire(&self, owner_id: &str) -> bool {
        self.acquire(owner_id).is_ok()
    }

    /// Take the lease unconditionally, ignoring any holder and any cooldown
    ///
    /// Used when the user confirms "stop the current session, play this instead".
    pub fn force_acquire(&self, owner_id: &str) {
        let now = self.clock.now();
        let mut inner = self.lock();

        if let LeaseState::Acquired { owner_id: previous, .. } = &inner.state {
            if previous != owner_id {
                info!(owner_id, previous = %previous, "Lease forcibly taken over");
            }
        }
        inner.state = LeaseState::Acquired {
            owner_id: owner_id.to_string(),
            acquired_at: now,
        };
    }

    /// Release the lease held by `owner_id`, optionally opening a cooldown
    ///
    /// A stale owner cannot release someone else's lease; the call is a
    /// no-op unless `owner_id` is the current holder. Returns whether the
    /// lease was released.
    pub fn release(&self, owner_id: &str, cooldown: Duration) -> bool {
        let now = self.clock.now();
        let mut inner = self.lock();

        match &inner.state {
            LeaseState::Acquired { owner_id: holder, .. } if holder == owner_id => {}
            _ => {
                debug!(owner_id, "Release ignored: lease not held by owner");
                return false;
            }
        }

        inner.state = LeaseState::None;
        if !cooldown.is_zero() {
            inner.cooldown = Some(CooldownWindow {
                until: add_duration(now, cooldown),
            });
        }
        info!(owner_id, cooldown_ms = duration_ms(cooldown), "Lease released");
        true
    }

    /// Whether `owner_id` currently holds the lease
    pub fn has_lease(&self, owner_id: &str) -> bool {
        matches!(&self.lock().state, LeaseState::Acquired { owner_id: holder, .. } if holder == owner_id)
    }

    /// Milliseconds until the cooldown window closes (0 when none is open)
    pub fn cooldown_remaining_ms(&self) -> u64 {
        let now = self.clock.now();
        self.lock().cooldown_remaining_ms(now)
    }

    /// Run `operation` only if the lease can be acquired
    ///
    /// The lease is NOT released afterwards; playback sessions hold it until
    /// an explicit [`LeaseManager::release`].
    pub fn with_lease<R>(&self, owner_id: &str, operation: impl FnOnce() -> R) -> Option<R> {
        if self.try_acquire(owner_id) {
            Some(operation())
        } else {
            None
        }
    }

    /// Current holder, if any
    pub fn current_holder(&self) -> Option<String> {
        match &self.lock().state {
            LeaseState::Acquired { owner_id, .. } => Some(owner_id.clone()),
            LeaseState::None => None,
        }
    }

    /// Snapshot of the lease state
    pub fn state(&self) -> LeaseState {
        self.lock().state.clone()
    }
}
