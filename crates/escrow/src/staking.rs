//! # Staking Ledger
//!
//! Owns each staker's deposited value, its decomposition into
//! sub-stakes with independent lock windows, per-staker activity
//! confirmations, and reward minting from a shared inflation pool.
//!
//! ## Lifecycle
//!
//! 1. The creator funds the reward pool and calls
//!    [`StakingLedger::initialize`]; deposits are rejected before that.
//! 2. Stakers deposit tokens, locking them from the next period for a
//!    chosen duration. A deposit creates one [`SubStake`]; sub-stakes
//!    can later be split with [`StakingLedger::divide_stake`] to
//!    schedule partial unlocks at different horizons.
//! 3. Each period a staker confirms activity for the *next* period
//!    (two-slot forward commitment). Confirmed periods that have
//!    elapsed are minted into reward via [`StakingLedger::mint`].
//! 4. Unlocked value is withdrawn with [`StakingLedger::withdraw`];
//!    locked principal is never withdrawable.
//!
//! ## Accounting invariant
//!
//! The escrow's token balance always equals the sum of all staker
//! values plus the remaining reward pool. Minting moves value from the
//! pool into a staker's account without touching the token ledger;
//! only deposits and withdrawals cross the token boundary.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use tenure_common::{Address, EscrowError, Period, PeriodClock, StakingConfig, TokenLedger};

/// One independently scheduled locked-value interval.
///
/// Contributes `locked_value` to the owner's locked total for every
/// period in `[first_period, last_period]` inclusive, zero outside.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubStake {
    pub locked_value: u128,
    pub first_period: Period,
    pub last_period: Period,
}

impl SubStake {
    /// Whether this sub-stake is locked during `period`.
    pub fn covers(&self, period: Period) -> bool {
        self.first_period <= period && period <= self.last_period
    }
}

/// Ledger entry for one staker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerAccount {
    /// Total deposited plus minted value, minus withdrawals. Always at
    /// least the locked amount of any single period.
    pub value: u128,
    pub sub_stakes: Vec<SubStake>,
    /// Forward activity commitments: the next one or two periods the
    /// staker has declared it will serve. Slot 1 always holds the
    /// earlier period.
    pub confirmed_period_1: Option<Period>,
    pub confirmed_period_2: Option<Period>,
    /// Most recent period already minted for.
    pub last_active_period: Period,
    /// Every period the staker ever committed to. This is the history
    /// the policy escrow consults to decide whether a fee period was
    /// served.
    activity_log: BTreeSet<Period>,
}

impl StakerAccount {
    /// Locked amount during `period`.
    pub fn locked_at(&self, period: Period) -> u128 {
        self.sub_stakes
            .iter()
            .filter(|s| s.covers(period))
            .map(|s| s.locked_value)
            .sum()
    }

    /// Maximum locked amount over all periods in `[from, to]`.
    ///
    /// The locked total only changes at sub-stake boundaries, so the
    /// maximum is attained at `from` or at some sub-stake's
    /// `first_period` inside the window.
    fn max_locked_in(&self, from: Period, to: Period) -> u128 {
        if from > to {
            return 0;
        }
        let mut max = self.locked_at(from);
        for s in &self.sub_stakes {
            if s.first_period > from && s.first_period <= to {
                max = max.max(self.locked_at(s.first_period));
            }
        }
        max
    }

    /// Maximum locked amount from `from` onward.
    fn max_locked_from(&self, from: Period) -> u128 {
        let horizon = self
            .sub_stakes
            .iter()
            .map(|s| s.last_period)
            .max()
            .unwrap_or(from);
        self.max_locked_in(from, horizon.max(from))
    }

    pub fn was_confirmed(&self, period: Period) -> bool {
        self.activity_log.contains(&period)
    }
}

/// The staking side of the escrow.
pub struct StakingLedger {
    config: StakingConfig,
    clock: Arc<dyn PeriodClock>,
    token: Arc<dyn TokenLedger>,
    /// Token account held by this ledger.
    escrow_address: Address,
    /// Deployer role: may initialize and bulk pre-deposit.
    creator: Address,
    initialized: bool,
    reward_pool: u128,
    stakers: HashMap<Address, StakerAccount>,
    /// Confirmation history of stakers whose accounts were destroyed.
    /// The policy escrow settles fee periods lazily, so periods a
    /// staker served must stay answerable after it exits.
    retired_activity: HashMap<Address, BTreeSet<Period>>,
}

impl StakingLedger {
    pub fn new(
        config: StakingConfig,
        clock: Arc<dyn PeriodClock>,
        token: Arc<dyn TokenLedger>,
        escrow_address: Address,
        creator: Address,
    ) -> Self {
        Self {
            config,
            clock,
            token,
            escrow_address,
            creator,
            initialized: false,
            reward_pool: 0,
            stakers: HashMap::new(),
            retired_activity: HashMap::new(),
        }
    }

    // ──────────────────────────────────────────────────────────────────
    // Lifecycle
    // ──────────────────────────────────────────────────────────────────

    /// Funds the reward pool from the creator's balance and opens the
    /// ledger for deposits. Creator-only, once.
    pub fn initialize(&mut self, caller: &Address, reward_funding: u128) -> tenure_common::Result<()> {
        if *caller != self.creator {
            return Err(EscrowError::Forbidden {
                role: "escrow creator".to_string(),
            });
        }
        if self.initialized {
            return Err(EscrowError::Duplicate {
                what: "escrow initialization".to_string(),
            });
        }
        self.token
            .transfer_from(&self.escrow_address, caller, &self.escrow_address, reward_funding)?;
        self.reward_pool = reward_funding;
        self.initialized = true;
        info!(reward_funding, "staking ledger initialized");
        Ok(())
    }

    // ──────────────────────────────────────────────────────────────────
    // Deposits and locking
    // ──────────────────────────────────────────────────────────────────

    /// Transfers `value` tokens in and locks them from the next period
    /// for `periods` periods.
    pub fn deposit(
        &mut self,
        caller: &Address,
        value: u128,
        periods: Period,
    ) -> tenure_common::Result<()> {
        if !self.initialized {
            return Err(EscrowError::Uninitialized);
        }
        self.check_lock_bounds("deposit value", value, periods)?;
        let current = self.clock.current_period();
        self.token
            .transfer_from(&self.escrow_address, caller, &self.escrow_address, value)?;
        let account = self.stakers.entry(*caller).or_default();
        account.value += value;
        account.sub_stakes.push(SubStake {
            locked_value: value,
            first_period: current + 1,
            last_period: current + periods,
        });
        info!(staker = %caller, value, periods, "deposit");
        Ok(())
    }

    /// Privileged bulk initializer for accounts with no prior stake.
    /// The creator pays for every entry; per-entry bounds match
    /// [`StakingLedger::deposit`]. All entries are validated before any
    /// state changes.
    pub fn pre_deposit(
        &mut self,
        caller: &Address,
        owners: &[Address],
        values: &[u128],
        periods: &[Period],
    ) -> tenure_common::Result<()> {
        if !self.initialized {
            return Err(EscrowError::Uninitialized);
        }
        if *caller != self.creator {
            return Err(EscrowError::Forbidden {
                role: "escrow creator".to_string(),
            });
        }
        if owners.is_empty() || owners.len() != values.len() || owners.len() != periods.len() {
            return Err(EscrowError::Range {
                quantity: "pre-deposit entry count".to_string(),
                actual: values.len().min(periods.len()) as u128,
                min: owners.len().max(1) as u128,
                max: owners.len().max(1) as u128,
            });
        }
        for (i, owner) in owners.iter().enumerate() {
            if self.stakers.contains_key(owner) || owners[..i].contains(owner) {
                return Err(EscrowError::Duplicate {
                    what: format!("staker account {}", owner),
                });
            }
            self.check_lock_bounds("pre-deposit value", values[i], periods[i])?;
        }
        let total: u128 = values.iter().sum();
        let current = self.clock.current_period();
        self.token
            .transfer_from(&self.escrow_address, caller, &self.escrow_address, total)?;
        for (owner, (value, lock_periods)) in owners.iter().zip(values.iter().zip(periods.iter())) {
            let account = self.stakers.entry(*owner).or_default();
            account.value = *value;
            account.sub_stakes.push(SubStake {
                locked_value: *value,
                first_period: current + 1,
                last_period: current + lock_periods,
            });
        }
        info!(entries = owners.len(), total, "pre-deposit");
        Ok(())
    }

    /// Locks `value` of the caller's already-deposited, currently
    /// unlocked tokens for `periods` periods. No token transfer.
    pub fn lock(
        &mut self,
        caller: &Address,
        value: u128,
        periods: Period,
    ) -> tenure_common::Result<()> {
        if !self.stakers.contains_key(caller) {
            return Err(EscrowError::NotFound {
                what: format!("staker account {}", caller),
            });
        }
        self.check_lock_bounds("lock value", value, periods)?;
        let current = self.clock.current_period();
        let account = self
            .stakers
            .get_mut(caller)
            .ok_or_else(|| EscrowError::NotFound {
                what: format!("staker account {}", caller),
            })?;
        let first = current + 1;
        let last = current + periods;
        // The same tokens cannot back two overlapping locks: at every
        // period of the new window, existing locks plus the new value
        // must fit inside the account's total value.
        let peak = account.max_locked_in(first, last);
        let available = account.value.saturating_sub(peak);
        if value > available {
            return Err(EscrowError::InsufficientBalance {
                requested: value,
                available,
            });
        }
        account.sub_stakes.push(SubStake {
            locked_value: value,
            first_period: first,
            last_period: last,
        });
        info!(staker = %caller, value, periods, "lock");
        Ok(())
    }

    /// Splits the sub-stake matching `(old_value, old_last_period)`
    /// into two: the original shrinks by `new_value`, and a new
    /// sub-stake of `new_value` runs `new_periods` past the original
    /// horizon. Per-period locked totals are preserved up to
    /// `old_last_period`.
    pub fn divide_stake(
        &mut self,
        caller: &Address,
        old_value: u128,
        old_last_period: Period,
        new_value: u128,
        new_periods: Period,
    ) -> tenure_common::Result<()> {
        if new_periods == 0 {
            return Err(EscrowError::Range {
                quantity: "division periods".to_string(),
                actual: 0,
                min: 1,
                max: u64::MAX as u128,
            });
        }
        let min = self.config.min_allowable_locked;
        if new_value < min || new_value >= old_value {
            return Err(EscrowError::Range {
                quantity: "division value".to_string(),
                actual: new_value,
                min,
                max: old_value.saturating_sub(1),
            });
        }
        if old_value - new_value < min {
            return Err(EscrowError::Range {
                quantity: "remaining sub-stake value".to_string(),
                actual: old_value - new_value,
                min,
                max: old_value,
            });
        }
        let current = self.clock.current_period();
        let account = self
            .stakers
            .get_mut(caller)
            .ok_or_else(|| EscrowError::NotFound {
                what: format!("staker account {}", caller),
            })?;
        let index = account
            .sub_stakes
            .iter()
            .position(|s| {
                s.locked_value == old_value
                    && s.last_period == old_last_period
                    && s.last_period > current
            })
            .ok_or_else(|| EscrowError::NotFound {
                what: "sub-stake".to_string(),
            })?;
        let first_period = account.sub_stakes[index].first_period;
        account.sub_stakes[index].locked_value -= new_value;
        account.sub_stakes.push(SubStake {
            locked_value: new_value,
            first_period,
            last_period: old_last_period + new_periods,
        });
        info!(staker = %caller, old_value, new_value, new_periods, "sub-stake divided");
        Ok(())
    }

    // ──────────────────────────────────────────────────────────────────
    // Activity and minting
    // ──────────────────────────────────────────────────────────────────

    /// Commits the caller to serving the next period. Idempotent within
    /// a period. Requires a non-zero lock covering the next period.
    ///
    /// Elapsed confirmed periods are minted first, so a confirmation
    /// slot is always free for the new commitment.
    pub fn confirm_activity(&mut self, caller: &Address) -> tenure_common::Result<()> {
        if !self.stakers.contains_key(caller) {
            return Err(EscrowError::NotFound {
                what: format!("staker account {}", caller),
            });
        }
        self.mint_elapsed(caller);
        let current = self.clock.current_period();
        let next = current + 1;
        let account = match self.stakers.get_mut(caller) {
            Some(account) => account,
            None => {
                return Err(EscrowError::NotFound {
                    what: format!("staker account {}", caller),
                })
            }
        };
        let locked = account.locked_at(next);
        if locked == 0 {
            return Err(EscrowError::InsufficientBalance {
                requested: 1,
                available: 0,
            });
        }
        if account.confirmed_period_1 == Some(next) || account.confirmed_period_2 == Some(next) {
            debug!(staker = %caller, period = next, "activity already confirmed");
            return Ok(());
        }
        if account.confirmed_period_1.is_none() {
            account.confirmed_period_1 = Some(next);
        } else {
            account.confirmed_period_2 = Some(next);
        }
        // Keep slot 1 the earlier commitment.
        if let (Some(p1), Some(p2)) = (account.confirmed_period_1, account.confirmed_period_2) {
            if p1 > p2 {
                account.confirmed_period_1 = Some(p2);
                account.confirmed_period_2 = Some(p1);
            }
        }
        account.activity_log.insert(next);
        info!(staker = %caller, period = next, "activity confirmed");
        Ok(())
    }

    /// Mints reward for every confirmed period that has elapsed.
    /// Silent no-op when there is nothing new to mint.
    pub fn mint(&mut self, caller: &Address) -> tenure_common::Result<()> {
        if !self.stakers.contains_key(caller) {
            return Err(EscrowError::NotFound {
                what: format!("staker account {}", caller),
            });
        }
        self.mint_elapsed(caller);
        Ok(())
    }

    /// Processes the caller's confirmation slots strictly before the
    /// current period: credits the curve reward for each, debits the
    /// pool, advances `last_active_period`, and frees the slots.
    fn mint_elapsed(&mut self, owner: &Address) {
        let current = self.clock.current_period();
        let config = self.config.clone();
        let account = match self.stakers.get_mut(owner) {
            Some(account) => account,
            None => return,
        };
        let mut elapsed: Vec<Period> = [account.confirmed_period_1, account.confirmed_period_2]
            .into_iter()
            .flatten()
            .filter(|p| *p < current)
            .collect();
        elapsed.sort_unstable();
        if elapsed.is_empty() {
            return;
        }
        let mut minted_total: u128 = 0;
        for period in &elapsed {
            let reward: u128 = account
                .sub_stakes
                .iter()
                .filter(|s| s.covers(*period))
                .map(|s| config.period_reward(s.locked_value, s.last_period - period))
                .sum();
            let reward = reward.min(self.reward_pool);
            account.value += reward;
            self.reward_pool -= reward;
            minted_total += reward;
            account.last_active_period = account.last_active_period.max(*period);
        }
        // Free the processed slots, keeping any future commitment in slot 1.
        let remaining: Vec<Period> = [account.confirmed_period_1, account.confirmed_period_2]
            .into_iter()
            .flatten()
            .filter(|p| *p >= current)
            .collect();
        account.confirmed_period_1 = remaining.first().copied();
        account.confirmed_period_2 = remaining.get(1).copied();
        if minted_total > 0 {
            info!(staker = %owner, minted = minted_total, periods = elapsed.len(), "reward minted");
        }
    }

    // ──────────────────────────────────────────────────────────────────
    // Withdrawal
    // ──────────────────────────────────────────────────────────────────

    /// Pays out `value` of the caller's unlocked balance. Locked
    /// principal — the maximum locked amount over the current and all
    /// future periods — can never be withdrawn.
    pub fn withdraw(&mut self, caller: &Address, value: u128) -> tenure_common::Result<()> {
        let current = self.clock.current_period();
        let account = self
            .stakers
            .get_mut(caller)
            .ok_or_else(|| EscrowError::NotFound {
                what: format!("staker account {}", caller),
            })?;
        let locked = account.max_locked_from(current);
        let available = account.value.saturating_sub(locked);
        if value > available {
            return Err(EscrowError::InsufficientBalance {
                requested: value,
                available,
            });
        }
        account.value -= value;
        account.sub_stakes.retain(|s| s.last_period >= current);
        let destroyed = account.value == 0 && account.sub_stakes.is_empty();
        if destroyed {
            if let Some(account) = self.stakers.remove(caller) {
                if !account.activity_log.is_empty() {
                    self.retired_activity
                        .entry(*caller)
                        .or_default()
                        .extend(account.activity_log);
                }
            }
        }
        info!(staker = %caller, value, destroyed, "withdraw");
        // Outbound transfer strictly after bookkeeping.
        self.token.transfer(&self.escrow_address, caller, value)?;
        Ok(())
    }

    // ──────────────────────────────────────────────────────────────────
    // Queries
    // ──────────────────────────────────────────────────────────────────

    /// Locked amount of `owner` at `periods_from_now` periods in the
    /// future (0 = the current period). Pure query, any offset.
    pub fn get_locked_tokens(&self, owner: &Address, periods_from_now: Period) -> u128 {
        let period = self.clock.current_period() + periods_from_now;
        self.stakers
            .get(owner)
            .map(|account| account.locked_at(period))
            .unwrap_or(0)
    }

    pub fn staker_info(&self, owner: &Address) -> Option<&StakerAccount> {
        self.stakers.get(owner)
    }

    /// Whether `owner` committed to serving `period`. This is the
    /// signal the policy escrow reads to classify fee periods as
    /// served or unserved, and it stays answerable after the owner's
    /// account is destroyed.
    pub fn was_confirmed(&self, owner: &Address, period: Period) -> bool {
        if let Some(account) = self.stakers.get(owner) {
            if account.was_confirmed(period) {
                return true;
            }
        }
        self.retired_activity
            .get(owner)
            .map(|log| log.contains(&period))
            .unwrap_or(false)
    }

    /// Sum of every staker's locked amount at the given offset.
    pub fn total_locked_at(&self, periods_from_now: Period) -> u128 {
        let period = self.clock.current_period() + periods_from_now;
        self.stakers.values().map(|a| a.locked_at(period)).sum()
    }

    /// Sum of every staker's account value.
    pub fn total_staked(&self) -> u128 {
        self.stakers.values().map(|a| a.value).sum()
    }

    pub fn reward_pool(&self) -> u128 {
        self.reward_pool
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn escrow_address(&self) -> &Address {
        &self.escrow_address
    }

    pub fn config(&self) -> &StakingConfig {
        &self.config
    }

    // ──────────────────────────────────────────────────────────────────
    // Internal
    // ──────────────────────────────────────────────────────────────────

    fn check_lock_bounds(
        &self,
        quantity: &str,
        value: u128,
        periods: Period,
    ) -> tenure_common::Result<()> {
        if value < self.config.min_allowable_locked || value > self.config.max_allowable_locked {
            return Err(EscrowError::Range {
                quantity: quantity.to_string(),
                actual: value,
                min: self.config.min_allowable_locked,
                max: self.config.max_allowable_locked,
            });
        }
        if periods < self.config.min_locked_periods {
            return Err(EscrowError::Range {
                quantity: "lock periods".to_string(),
                actual: periods as u128,
                min: self.config.min_locked_periods as u128,
                max: u64::MAX as u128,
            });
        }
        Ok(())
    }
}
