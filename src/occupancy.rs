// ============================================================================
// OCCUPANCY MONITOR
// ============================================================================
// Classifies the connection load on a monitored port as normal or under
// sustained attack.
//
// === WHY A DWELL TIME? ===
// A single high sample cannot distinguish an attack from a burst:
// - A popular page being shared spikes occupancy for seconds
// - A slow-connection attack holds occupancy high for minutes
//
// The attack window answers this with a threshold-and-dwell rule: the
// verdict flips to UNDER_ATTACK only after occupancy has exceeded the
// threshold continuously for the full dwell time. The rule is strict, not
// averaged: one sample at or below the threshold ends the excursion and a
// later excursion dwells from zero.
//
// === CAPABILITY BOUNDARY ===
// The one external dependency, "current established-connection count for
// port P", sits behind the ConnectionCounter trait. The state machine is
// deterministic and fully testable against a substitutable fake counter;
// only ProcTcpCounter touches the kernel table.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::count_established_to_port;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const DEFAULT_MONITORED_PORT: u16 = 8080;

/// Concurrent established connections that signal a possible attack.
///
/// Occupancy must exceed (strictly) this count for an excursion to open.
pub const DEFAULT_THRESHOLD: usize = 200;

/// Seconds the excursion must persist before the verdict flips.
pub const DEFAULT_DWELL_SECS: u64 = 30;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Startup-fixed monitor configuration. Not runtime-mutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub monitored_port: u16,
    pub threshold: usize,
    pub dwell_secs: u64,
}

impl MonitorConfig {
    /// Reject invalid configuration before any sampling activity begins.
    pub fn validate(&self) -> Result<(), String> {
        if self.monitored_port == 0 {
            return Err("Monitored port must be non-zero".to_owned());
        }
        if self.threshold == 0 {
            return Err("Connection threshold must be at least 1".to_owned());
        }
        if self.dwell_secs == 0 {
            return Err("Dwell time must be at least 1 second".to_owned());
        }
        Ok(())
    }
}

// ============================================================================
// VERDICT
// ============================================================================

/// The monitor's determination for one sample. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Normal,
    UnderAttack,
}

// ============================================================================
// ATTACK WINDOW
// ============================================================================

/// Hysteresis state: how long has occupancy exceeded the threshold
/// continuously.
///
/// Invariant: `window_start` is Some exactly when the most recent evaluated
/// sample exceeded the threshold. Any sample at or below the threshold
/// clears it; there is no tolerance for brief dips.
#[derive(Debug)]
pub struct AttackWindow {
    threshold: usize,
    dwell: Duration,
    window_start: Option<Instant>,
}

impl AttackWindow {
    #[must_use]
    pub fn new(threshold: usize, dwell: Duration) -> Self {
        AttackWindow {
            threshold,
            dwell,
            window_start: None,
        }
    }

    /// Advance the state machine with one sample and derive the verdict.
    ///
    /// === STATE MACHINE ===
    /// Three effective states over the continuous excursion:
    /// - NOT_EXCEEDING: window_start is None
    /// - EXCEEDING_BUT_WAITING: window_start set, elapsed < dwell
    /// - EXCEEDING_AND_CONFIRMED: window_start set, elapsed >= dwell
    ///
    /// Confirmation is reachable only by uninterrupted residence in the
    /// waiting state; a single non-exceeding sample forces an immediate
    /// return to NOT_EXCEEDING.
    pub fn evaluate(&mut self, count: usize, now: Instant) -> Verdict {
        if count > self.threshold {
            // First exceeding sample opens the excursion
            let start = *self.window_start.get_or_insert(now);
            if now.duration_since(start) >= self.dwell {
                Verdict::UnderAttack
            } else {
                Verdict::Normal
            }
        } else {
            // Strict continuity: the excursion ends here. A later one
            // dwells from zero, never resuming this countdown.
            self.window_start = None;
            Verdict::Normal
        }
    }

    /// How long the current excursion has lasted, if one is open.
    #[must_use]
    pub fn exceeded_for(&self, now: Instant) -> Option<Duration> {
        self.window_start.map(|start| now.duration_since(start))
    }
}

// ============================================================================
// CONNECTION COUNTER BOUNDARY
// ============================================================================

/// The monitor's single external capability: established-connection count
/// for the monitored port.
///
/// A failed count must surface as Err, never as zero. Silently mapping a
/// sampling failure to "0 connections" would clear an in-progress attack
/// window.
pub trait ConnectionCounter: Send + Sync {
    fn established_count(&self) -> Result<usize, String>;
}

/// Production counter backed by the kernel TCP tables.
pub struct ProcTcpCounter {
    port: u16,
}

impl ProcTcpCounter {
    #[must_use]
    pub fn new(port: u16) -> Self {
        ProcTcpCounter { port }
    }
}

impl ConnectionCounter for ProcTcpCounter {
    fn established_count(&self) -> Result<usize, String> {
        count_established_to_port(self.port)
    }
}

// ============================================================================
// STATUS REPORT
// ============================================================================

/// One sample-and-evaluate outcome, serialized for callers.
///
/// What a caller does with NORMAL vs UNDER_ATTACK (reveal a secret, refuse
/// service, page someone) is outside this component's contract.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub timestamp: u64, // unix millis at evaluation time
    pub port: u16,
    pub established: usize,
    pub threshold: usize,
    pub dwell_seconds: u64,
    /// Seconds the current excursion has lasted, when one is open.
    pub exceeded_for_seconds: Option<u64>,
    pub verdict: Verdict,
}

// ============================================================================
// OCCUPANCY MONITOR
// ============================================================================

/// The detector component: a counter, a window, and a lock.
pub struct OccupancyMonitor {
    config: MonitorConfig,
    counter: Box<dyn ConnectionCounter>,
    window: Mutex<AttackWindow>,
}

impl OccupancyMonitor {
    /// Build a monitor over an arbitrary counter (tests substitute a fake).
    pub fn new(config: MonitorConfig, counter: Box<dyn ConnectionCounter>) -> Result<Self, String> {
        config.validate()?;
        let window = AttackWindow::new(config.threshold, Duration::from_secs(config.dwell_secs));
        Ok(OccupancyMonitor {
            config,
            counter,
            window: Mutex::new(window),
        })
    }

    /// Build a monitor sampling the kernel TCP tables.
    pub fn with_proc_counter(config: MonitorConfig) -> Result<Self, String> {
        let counter = Box::new(ProcTcpCounter::new(config.monitored_port));
        OccupancyMonitor::new(config, counter)
    }

    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Sample and evaluate: the single query operation.
    pub fn check(&self) -> Result<StatusReport, String> {
        self.check_at(Instant::now())
    }

    /// Deterministic core of `check`, with the clock supplied by the caller.
    ///
    /// === ATOMICITY ===
    /// The lock is held across sample and evaluate, so concurrent callers
    /// observe the pair as one step: counts are applied to the window in
    /// the order they were taken, and no observation is lost or
    /// double-counted. Sampling is one bounded /proc read, so the critical
    /// section stays short.
    ///
    /// A sampling failure returns Err before the window is touched: an
    /// in-progress excursion survives the failed sample unchanged, and the
    /// next successful sample is evaluated as if the failure never happened.
    pub fn check_at(&self, now: Instant) -> Result<StatusReport, String> {
        let mut window = self.window.lock();

        let count = self.counter.established_count()?;
        let verdict = window.evaluate(count, now);
        let exceeded_for_seconds = window.exceeded_for(now).map(|d| d.as_secs());

        Ok(StatusReport {
            timestamp: unix_millis(),
            port: self.config.monitored_port,
            established: count,
            threshold: self.config.threshold,
            dwell_seconds: self.config.dwell_secs,
            exceeded_for_seconds,
            verdict,
        })
    }
}

/// Wall-clock timestamp for response bodies (millisecond precision).
fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
