//! CPU/GPU correlation cadence
//!
//! The tracker only decides *when* a correlation point is due. Translating
//! GPU timestamps into CPU time happens offline in the reader.

use nix::time::{clock_gettime, ClockId};
use oatrace_shared::{CorrelationPoint, CpuTimestamp, OaError};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// CPU clock the correlation timestamps are taken from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationClock {
    Boot,
    #[default]
    Mono,
    MonoRaw,
}

impl CorrelationClock {
    fn clock_id(self) -> ClockId {
        match self {
            CorrelationClock::Boot => ClockId::CLOCK_BOOTTIME,
            CorrelationClock::Mono => ClockId::CLOCK_MONOTONIC,
            CorrelationClock::MonoRaw => ClockId::CLOCK_MONOTONIC_RAW,
        }
    }

    /// Current time of this clock in nanoseconds.
    pub fn now_ns(self) -> Result<CpuTimestamp, OaError> {
        let ts = clock_gettime(self.clock_id()).map_err(std::io::Error::from)?;
        Ok(ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64)
    }
}

impl std::str::FromStr for CorrelationClock {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "boot" => Ok(CorrelationClock::Boot),
            "mono" => Ok(CorrelationClock::Mono),
            "mono_raw" | "mono-raw" => Ok(CorrelationClock::MonoRaw),
            _ => anyhow::bail!("Invalid correlation clock: {}", s),
        }
    }
}

impl std::fmt::Display for CorrelationClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CorrelationClock::Boot => "boot",
            CorrelationClock::Mono => "mono",
            CorrelationClock::MonoRaw => "mono_raw",
        };
        write!(f, "{}", s)
    }
}

/// Schedules periodic correlation points.
#[derive(Debug)]
pub struct CorrelationTracker {
    period: Duration,
    slack: Duration,
    next_deadline: Instant,
    last: Option<CorrelationPoint>,
    count: u64,
}

impl CorrelationTracker {
    pub fn new(period: Duration, slack: Duration, now: Instant) -> Self {
        Self {
            period,
            slack,
            next_deadline: now + period,
            last: None,
            count: 0,
        }
    }

    /// True once the deadline is within `slack` of `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        now + self.slack >= self.next_deadline
    }

    /// Time left before the next point is due.
    pub fn time_until_due(&self, now: Instant) -> Duration {
        self.next_deadline.saturating_duration_since(now)
    }

    /// Records a sampled point and schedules the next one one period later.
    pub fn record(&mut self, point: CorrelationPoint, now: Instant) {
        self.last = Some(point);
        self.count += 1;
        self.next_deadline = now + self.period;
    }

    pub fn last(&self) -> Option<CorrelationPoint> {
        self.last
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
