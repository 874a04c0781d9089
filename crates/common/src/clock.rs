//! # Period Clock
//!
//! Maps wall time onto the protocol's monotonically increasing period
//! index. The clock is the only time source the ledgers consult, and it
//! is read-only to them: every public operation reads the current period
//! once at entry and never observes time advancing mid-operation.
//!
//! Two implementations are provided behind the [`PeriodClock`] trait:
//!
//! - [`SystemPeriodClock`]: derives the period from `SystemTime::now()`
//!   relative to a genesis timestamp, at a fixed number of seconds per
//!   period.
//! - [`ManualClock`]: a test double whose period is set explicitly,
//!   used by every deterministic test in the workspace.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::Period;

/// Read-only source of the current protocol period.
///
/// Implementations must be monotone: successive calls never return a
/// smaller period.
pub trait PeriodClock: Send + Sync {
    /// The period containing "now".
    fn current_period(&self) -> Period;
}

/// Wall-clock backed period source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemPeriodClock {
    /// Unix timestamp (seconds) at which period 0 began.
    pub genesis_timestamp: u64,
    /// Fixed duration of one period, in seconds. Never zero.
    pub seconds_per_period: u64,
}

impl SystemPeriodClock {
    pub fn new(genesis_timestamp: u64, seconds_per_period: u64) -> Self {
        Self {
            genesis_timestamp,
            seconds_per_period: seconds_per_period.max(1),
        }
    }

    /// Period containing the given unix timestamp. Timestamps before
    /// genesis map to period 0.
    pub fn period_at(&self, unix_timestamp: u64) -> Period {
        unix_timestamp.saturating_sub(self.genesis_timestamp) / self.seconds_per_period
    }
}

impl PeriodClock for SystemPeriodClock {
    fn current_period(&self) -> Period {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.period_at(now)
    }
}

/// Manually driven period source for tests.
///
/// Mirrors the protocol's "time travel" testing style: tests advance
/// the period explicitly between operations instead of sleeping.
#[derive(Debug, Default)]
pub struct ManualClock {
    period: RwLock<Period>,
}

impl ManualClock {
    pub fn new(period: Period) -> Self {
        Self {
            period: RwLock::new(period),
        }
    }

    /// Sets the current period. Panics if the clock would move backward.
    pub fn set(&self, period: Period) {
        let mut current = self.period.write();
        assert!(period >= *current, "ManualClock cannot move backward");
        *current = period;
    }

    /// Advances the clock by `periods`.
    pub fn advance(&self, periods: u64) {
        let mut current = self.period.write();
        *current += periods;
    }
}

impl PeriodClock for ManualClock {
    fn current_period(&self) -> Period {
        *self.period.read()
    }
}
