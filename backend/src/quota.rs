//! Per-identity request quotas over two sliding windows.
//!
//! Each identity keeps the timestamps of its admitted requests for the last
//! 24 hours. A request is allowed when fewer than `per_minute` of them fall in
//! the trailing minute and fewer than `per_day` remain in total. Rejected
//! requests are never recorded.
//!
//! The ledger holds one mutex per identity inside a [`DashMap`]; the map's
//! shard lock is only held long enough to clone the identity's `Arc`, so
//! callers with different identities never wait on each other's windows.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Length of the short window in seconds.
pub const MINUTE_WINDOW_SECS: i64 = 60;
/// Length of the long window in seconds; also how long any event is retained.
pub const DAY_WINDOW_SECS: i64 = 24 * 60 * 60;

fn minute_window() -> TimeDelta {
    TimeDelta::seconds(MINUTE_WINDOW_SECS)
}

fn day_window() -> TimeDelta {
    TimeDelta::seconds(DAY_WINDOW_SECS)
}

/// Which window rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitWindow {
    Minute,
    Day,
}

impl LimitWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitWindow::Minute => crate::metrics::LIMIT_MINUTE,
            LimitWindow::Day => crate::metrics::LIMIT_DAY,
        }
    }
}

/// Usage counters reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub requests_last_minute: u32,
    pub requests_today: u32,
    pub limit_per_minute: u32,
    pub limit_per_day: u32,
    pub remaining_minute: u32,
    pub remaining_day: u32,
}

/// A rejected quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub window: LimitWindow,
    pub limit: u32,
    pub retry_after: Duration,
}

/// Result of [`QuotaLedger::check_and_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOutcome {
    Allowed(UsageStats),
    Limited(RateLimited),
}

/// Configured caps.
#[derive(Debug, Clone, Copy)]
pub struct QuotaLimits {
    pub per_minute: u32,
    pub per_day: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            per_minute: 10,
            per_day: 100,
        }
    }
}

/// Request history of one identity, oldest first.
#[derive(Debug, Default)]
struct IdentityWindow {
    events: VecDeque<DateTime<Utc>>,
    /// Set when the eviction sweep removed this window from the map.
    retired: bool,
}

impl IdentityWindow {
    /// Drop events that are no longer inside the day window.
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - day_window();
        while let Some(&front) = self.events.front() {
            if front <= cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns (events in the last minute, events in the last day).
    fn counts(&self, now: DateTime<Utc>) -> (u32, u32) {
        let cutoff = now - minute_window();
        // Events are sorted, so the minute window is a suffix.
        let minute = self.events.iter().rev().take_while(|&&ts| ts > cutoff).count();
        (minute as u32, self.events.len() as u32)
    }

    fn push(&mut self, now: DateTime<Utc>) {
        // Clock steps backwards must not break the ordering invariant.
        let ts = match self.events.back() {
            Some(&last) if last > now => last,
            _ => now,
        };
        self.events.push_back(ts);
    }
}

/// Sliding-window quota ledger keyed by identity.
pub struct QuotaLedger {
    limits: QuotaLimits,
    windows: DashMap<String, Arc<Mutex<IdentityWindow>>>,
}

impl QuotaLedger {
    pub fn new(limits: QuotaLimits) -> Self {
        Self {
            limits,
            windows: DashMap::new(),
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    /// Check both windows for `identity` and record the request if allowed.
    ///
    /// The minute window is checked first, so a request over both caps is
    /// reported as a minute violation.
    pub fn check_and_record(&self, identity: &str, now: DateTime<Utc>) -> QuotaOutcome {
        self.with_window(identity, |window| {
            window.prune(now);
            let (minute, day) = window.counts(now);

            if minute >= self.limits.per_minute {
                return QuotaOutcome::Limited(RateLimited {
                    window: LimitWindow::Minute,
                    limit: self.limits.per_minute,
                    retry_after: Duration::from_secs(MINUTE_WINDOW_SECS as u64),
                });
            }

            if day >= self.limits.per_day {
                return QuotaOutcome::Limited(RateLimited {
                    window: LimitWindow::Day,
                    limit: self.limits.per_day,
                    retry_after: day_retry_after(window.events.front().copied(), now),
                });
            }

            window.push(now);
            QuotaOutcome::Allowed(self.stats(minute + 1, day + 1))
        })
    }

    /// Current usage for `identity` without recording anything.
    pub fn peek_usage(&self, identity: &str, now: DateTime<Utc>) -> UsageStats {
        let Some(entry) = self.windows.get(identity).map(|e| Arc::clone(e.value())) else {
            return self.stats(0, 0);
        };

        let mut window = lock(&entry);
        window.prune(now);
        let (minute, day) = window.counts(now);
        self.stats(minute, day)
    }

    /// Remove identities whose history is empty once pruned at `now`.
    ///
    /// Returns the number of identities removed.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, entry| {
            // A window that is busy right now is by definition not idle.
            let Ok(mut window) = entry.try_lock() else {
                return true;
            };
            window.prune(now);
            if window.events.is_empty() {
                window.retired = true;
                false
            } else {
                true
            }
        });
        before.saturating_sub(self.windows.len())
    }

    /// Number of identities currently holding a window.
    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }

    /// Periodically run [`QuotaLedger::evict_idle`] on the current runtime.
    pub fn spawn_eviction(
        self: Arc<Self>,
        interval: Duration,
        metrics: Arc<crate::metrics::Metrics>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let removed = self.evict_idle(Utc::now());
                metrics.tracked_identities.set(self.tracked_identities() as i64);
                if removed > 0 {
                    tracing::debug!(removed, "Evicted idle quota windows");
                }
            }
        })
    }

    /// Run `f` on the live window of `identity`, creating it if needed.
    fn with_window<T>(&self, identity: &str, f: impl Fn(&mut IdentityWindow) -> T) -> T {
        loop {
            let entry = Arc::clone(
                self.windows
                    .entry(identity.to_owned())
                    .or_default()
                    .value(),
            );
            let mut window = lock(&entry);
            // Lost a race with the eviction sweep; look the identity up again.
            if window.retired {
                continue;
            }
            return f(&mut window);
        }
    }

    fn stats(&self, minute: u32, day: u32) -> UsageStats {
        UsageStats {
            requests_last_minute: minute,
            requests_today: day,
            limit_per_minute: self.limits.per_minute,
            limit_per_day: self.limits.per_day,
            remaining_minute: self.limits.per_minute.saturating_sub(minute),
            remaining_day: self.limits.per_day.saturating_sub(day),
        }
    }
}

/// Time until `oldest` leaves the day window, rounded up to whole seconds.
fn day_retry_after(oldest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    let Some(oldest) = oldest else {
        // per_day == 0: nothing will ever leave the window.
        return Duration::from_secs(DAY_WINDOW_SECS as u64);
    };
    let remaining = (oldest + day_window() - now).num_milliseconds().max(0) as u64;
    Duration::from_secs(remaining.div_ceil(1000).max(1))
}

/// A panic while holding a window leaves valid timestamps behind, so keep using it.
fn lock(entry: &Mutex<IdentityWindow>) -> MutexGuard<'_, IdentityWindow> {
    entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
