//! # Protocol Configuration
//!
//! Staking bounds and the reward-rate curve, grouped in one serde
//! config struct with protocol defaults. The reward curve is
//! deliberately a configuration artifact, not a hard-coded formula:
//! every mint computation goes through [`StakingConfig::period_reward`].

use serde::{Deserialize, Serialize};

use crate::types::Period;

/// Default lower bound on a single locked amount.
pub const DEFAULT_MIN_ALLOWABLE_LOCKED: u128 = 100;

/// Default upper bound on a single locked amount.
pub const DEFAULT_MAX_ALLOWABLE_LOCKED: u128 = 2_000;

/// Default minimum lock duration, in periods.
pub const DEFAULT_MIN_LOCKED_PERIODS: Period = 2;

/// Default divisor of the reward curve.
pub const DEFAULT_MINING_COEFFICIENT: u128 = 8_000;

/// Default base coefficient of the reward curve.
pub const DEFAULT_LOCKED_PERIODS_COEFFICIENT: u128 = 4;

/// Default cap on the duration bonus of the reward curve.
pub const DEFAULT_REWARDED_PERIODS: Period = 4;

/// Staking ledger configuration: deposit bounds plus the decaying
/// reward-rate curve.
///
/// The per-period reward for a sub-stake is
///
/// ```text
/// locked * (locked_periods_coefficient + min(remaining, rewarded_periods))
/// ────────────────────────────────────────────────────────────────────────
///                         mining_coefficient
/// ```
///
/// where `remaining` is the number of periods the sub-stake stays locked
/// after the rewarded period. Longer remaining commitments earn more,
/// flattening out at `rewarded_periods` — the decay knob the deployer
/// tunes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingConfig {
    /// Smallest amount a single deposit/lock may cover.
    pub min_allowable_locked: u128,
    /// Largest amount a single deposit/lock may cover.
    pub max_allowable_locked: u128,
    /// Shortest accepted lock duration.
    pub min_locked_periods: Period,
    /// Reward curve divisor. Never zero.
    pub mining_coefficient: u128,
    /// Reward curve base coefficient.
    pub locked_periods_coefficient: u128,
    /// Cap on the remaining-duration bonus.
    pub rewarded_periods: Period,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            min_allowable_locked: DEFAULT_MIN_ALLOWABLE_LOCKED,
            max_allowable_locked: DEFAULT_MAX_ALLOWABLE_LOCKED,
            min_locked_periods: DEFAULT_MIN_LOCKED_PERIODS,
            mining_coefficient: DEFAULT_MINING_COEFFICIENT,
            locked_periods_coefficient: DEFAULT_LOCKED_PERIODS_COEFFICIENT,
            rewarded_periods: DEFAULT_REWARDED_PERIODS,
        }
    }
}

impl StakingConfig {
    /// Reward minted for one sub-stake over one period.
    ///
    /// Pure function of the configuration; integer arithmetic only,
    /// truncating division.
    #[must_use]
    pub fn period_reward(&self, locked_value: u128, remaining_periods: Period) -> u128 {
        if self.mining_coefficient == 0 {
            return 0;
        }
        let bonus = remaining_periods.min(self.rewarded_periods) as u128;
        locked_value * (self.locked_periods_coefficient + bonus) / self.mining_coefficient
    }
}
