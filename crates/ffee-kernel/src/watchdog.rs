//! Silence detection for telemetry channels.
//!
//! * [`SilenceWatchdog`] – the two-stage ACTIVE → SOFT_TIMEOUT →
//!   HARD_SHUTDOWN machine of the primary telemetry channel.
//! * [`StalenessTracker`] – one staleness flag per auxiliary channel.
//!
//! Both take the current [`Instant`] as an argument instead of reading the
//! clock, so callers decide what "now" is and tests can use synthetic time.

use std::time::{Duration, Instant};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Liveness of the primary telemetry channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    /// Silent for at least the soft threshold.
    SoftTimeout,
    /// Silent for at least the hard threshold.
    HardShutdown,
}

/// A transition that must be reported exactly once per silence episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceTransition {
    SoftTimeout,
    HardShutdown,
}

// ────────────────────────────────────────────────────────────────────────────
// SilenceWatchdog
// ────────────────────────────────────────────────────────────────────────────

/// Tracks the time since the last frame and reports each threshold crossing
/// once.  A new frame ends the episode and re-arms both thresholds.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use ffee_kernel::watchdog::{SilenceTransition, SilenceWatchdog};
///
/// let start = Instant::now();
/// let mut wd = SilenceWatchdog::new(Duration::from_secs(6), Duration::from_secs(10), start);
///
/// assert!(wd.check(start + Duration::from_secs(5)).is_empty());
/// assert_eq!(wd.check(start + Duration::from_secs(6)), vec![SilenceTransition::SoftTimeout]);
/// assert!(wd.check(start + Duration::from_secs(7)).is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct SilenceWatchdog {
    soft: Duration,
    hard: Duration,
    last_frame: Instant,
    timeout_reported: bool,
    shutdown_reported: bool,
}

impl SilenceWatchdog {
    /// Start a watchdog whose silence episode begins at `now`.
    pub fn new(soft: Duration, hard: Duration, now: Instant) -> Self {
        Self {
            soft,
            hard,
            last_frame: now,
            timeout_reported: false,
            shutdown_reported: false,
        }
    }

    /// A frame arrived: back to [`Liveness::Active`], both flags cleared.
    pub fn frame_received(&mut self, now: Instant) {
        self.last_frame = now;
        self.timeout_reported = false;
        self.shutdown_reported = false;
    }

    /// Transitions crossed since the last call, soft before hard.
    pub fn check(&mut self, now: Instant) -> Vec<SilenceTransition> {
        let silent = self.silence(now);
        let mut crossed = Vec::new();
        if silent >= self.soft && !self.timeout_reported {
            self.timeout_reported = true;
            crossed.push(SilenceTransition::SoftTimeout);
        }
        if silent >= self.hard && !self.shutdown_reported {
            self.shutdown_reported = true;
            crossed.push(SilenceTransition::HardShutdown);
        }
        crossed
    }

    /// Liveness as of the last [`SilenceWatchdog::check`].
    pub fn liveness(&self) -> Liveness {
        if self.shutdown_reported {
            Liveness::HardShutdown
        } else if self.timeout_reported {
            Liveness::SoftTimeout
        } else {
            Liveness::Active
        }
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_frame)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// StalenessTracker
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ChannelEntry {
    name: String,
    interval: Duration,
    last_received: Instant,
    /// `None` until the first frame or timeout.
    active: Option<bool>,
}

/// Per-channel liveness for the auxiliary services.
///
/// Both [`StalenessTracker::received`] and [`StalenessTracker::check`] only
/// report changes, so an indicator is emitted once per transition.
#[derive(Debug, Default, Clone)]
pub struct StalenessTracker {
    channels: Vec<ChannelEntry>,
}

impl StalenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `name`.  Its staleness clock starts at `now`.  Re-registering
    /// resets the entry.
    pub fn register(&mut self, name: &str, interval: Duration, now: Instant) {
        let entry = ChannelEntry {
            name: name.to_string(),
            interval,
            last_received: now,
            active: None,
        };
        match self.channels.iter_mut().find(|c| c.name == name) {
            Some(existing) => *existing = entry,
            None => self.channels.push(entry),
        }
    }

    /// Record data on `name`.  Returns `true` if the channel just became
    /// active (first frame, or first frame after a timeout).
    pub fn received(&mut self, name: &str, now: Instant) -> bool {
        let Some(entry) = self.channels.iter_mut().find(|c| c.name == name) else {
            return false;
        };
        entry.last_received = now;
        let became_active = entry.active != Some(true);
        entry.active = Some(true);
        became_active
    }

    /// Names of channels that went stale since the last call, in
    /// registration order.  A stale channel is not reported again until it
    /// has received data.
    pub fn check(&mut self, now: Instant) -> Vec<String> {
        self.channels
            .iter_mut()
            .filter(|c| c.active != Some(false))
            .filter(|c| now.saturating_duration_since(c.last_received) > c.interval)
            .map(|c| {
                c.active = Some(false);
                c.name.clone()
            })
            .collect()
    }

    /// `Some(true)` for active, `Some(false)` for timed out, `None` if not
    /// yet known or not registered.
    pub fn is_active(&self, name: &str) -> Option<bool> {
        self.channels
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.active)
    }

    pub fn is_timed_out(&self, name: &str) -> bool {
        self.is_active(name) == Some(false)
    }
}
