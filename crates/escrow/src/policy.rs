//! # Policy Escrow
//!
//! Holds client pre-payments for per-period service and settles them
//! against the staking ledger's activity record. A policy buys the same
//! service window from one or more nodes; each (policy, node) pair is
//! one [`PolicyArrangement`].
//!
//! Settlement is lazy. No balance moves when a period elapses; instead,
//! every operation that needs up-to-date figures first accrues the
//! affected arrangements, classifying each elapsed period as served
//! (the node confirmed activity for it, fee goes to the node) or
//! unserved (fee becomes refundable to the policy owner). Only fully
//! elapsed periods are classified; the current period is never settled
//! early.
//!
//! The one-time first-period reward follows the same rule: it is
//! credited to the node together with its first served period, and
//! becomes refundable if the arrangement ends without a single served
//! period.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use tenure_common::{Address, EscrowError, Period, PeriodClock, PolicyId, TokenLedger};

use crate::staking::StakingLedger;

/// One node's share of a policy: a paid service window plus the
/// running settlement state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyArrangement {
    pub node: Address,
    pub rate_per_period: u128,
    /// One-time bonus attached to the first served period.
    pub first_period_reward: u128,
    /// First paid period (inclusive).
    pub start_period: Period,
    /// Last paid period (inclusive).
    pub last_period: Period,
    pub disabled: bool,
    /// Last period already classified as served or unserved. Periods in
    /// `(accrued_through, last_period]` still hold undistributed value.
    pub accrued_through: Period,
    /// Whether the first-period reward has been routed, either to the
    /// node or into the refundable pot.
    pub first_reward_settled: bool,
    /// Value owed back to the policy owner, collected from unserved
    /// periods and not yet paid out.
    pub refundable: u128,
}

impl PolicyArrangement {
    /// Undistributed value still held for this arrangement, refundable
    /// pot included.
    pub fn remaining_value(&self) -> u128 {
        let mut value = self.refundable;
        if !self.disabled {
            value += self.rate_per_period * (self.last_period - self.accrued_through) as u128;
            if !self.first_reward_settled {
                value += self.first_period_reward;
            }
        }
        value
    }
}

/// A client's pre-paid service contract across a set of nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub owner: Address,
    pub arrangements: Vec<PolicyArrangement>,
}

/// Per-node balance of accrued, not yet withdrawn service fees.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRewardAccount {
    pub accrued_reward: u128,
    pub last_credited_period: Period,
}

/// The fee side of the escrow.
///
/// Reads activity from a shared [`StakingLedger`] and moves tokens
/// through its own escrow account, separate from the staking pool.
pub struct PolicyEscrow {
    clock: Arc<dyn PeriodClock>,
    token: Arc<dyn TokenLedger>,
    /// Token account held by this escrow.
    escrow_address: Address,
    staking: Arc<RwLock<StakingLedger>>,
    policies: HashMap<PolicyId, Policy>,
    node_rewards: HashMap<Address, NodeRewardAccount>,
}

/// Classifies every fully elapsed, unclassified period of one
/// arrangement. Served fees land in the node's reward account,
/// unserved fees in the arrangement's refundable pot.
fn accrue_arrangement(
    staking: &StakingLedger,
    node_rewards: &mut HashMap<Address, NodeRewardAccount>,
    arrangement: &mut PolicyArrangement,
    now: Period,
) {
    if arrangement.disabled {
        return;
    }
    let through = arrangement.last_period.min(now.saturating_sub(1));
    while arrangement.accrued_through < through {
        let period = arrangement.accrued_through + 1;
        if staking.was_confirmed(&arrangement.node, period) {
            let mut credit = arrangement.rate_per_period;
            if !arrangement.first_reward_settled {
                credit += arrangement.first_period_reward;
                arrangement.first_reward_settled = true;
            }
            let account = node_rewards.entry(arrangement.node).or_default();
            account.accrued_reward += credit;
            account.last_credited_period = period;
            debug!(node = %arrangement.node, period, credit, "period served");
        } else {
            arrangement.refundable += arrangement.rate_per_period;
            debug!(node = %arrangement.node, period, "period unserved");
        }
        arrangement.accrued_through = period;
    }
    // The window fully elapsed without one served period: the first
    // reward goes back to the owner.
    if arrangement.accrued_through >= arrangement.last_period && !arrangement.first_reward_settled {
        arrangement.refundable += arrangement.first_period_reward;
        arrangement.first_reward_settled = true;
    }
}

impl PolicyEscrow {
    pub fn new(
        clock: Arc<dyn PeriodClock>,
        token: Arc<dyn TokenLedger>,
        escrow_address: Address,
        staking: Arc<RwLock<StakingLedger>>,
    ) -> Self {
        Self {
            clock,
            token,
            escrow_address,
            staking,
            policies: HashMap::new(),
            node_rewards: HashMap::new(),
        }
    }

    // ──────────────────────────────────────────────────────────────────
    // Policy lifecycle
    // ──────────────────────────────────────────────────────────────────

    /// Creates a policy covering `periods` periods starting next period,
    /// with one arrangement per node. Collects the full pre-payment,
    /// `nodes.len() * (rate * periods + first_reward)`, from the caller
    /// up front.
    pub fn create_policy(
        &mut self,
        caller: &Address,
        id: PolicyId,
        rate_per_period: u128,
        first_period_reward: u128,
        periods: Period,
        nodes: &[Address],
    ) -> tenure_common::Result<()> {
        if self.policies.contains_key(&id) {
            return Err(EscrowError::Duplicate {
                what: format!("policy {}", id),
            });
        }
        if nodes.is_empty() {
            return Err(EscrowError::Range {
                quantity: "policy node count".to_string(),
                actual: 0,
                min: 1,
                max: u128::MAX,
            });
        }
        if periods == 0 {
            return Err(EscrowError::Range {
                quantity: "policy periods".to_string(),
                actual: 0,
                min: 1,
                max: u64::MAX as u128,
            });
        }
        {
            let staking = self.staking.read();
            for (i, node) in nodes.iter().enumerate() {
                if nodes[..i].contains(node) {
                    return Err(EscrowError::Duplicate {
                        what: format!("arrangement for node {}", node),
                    });
                }
                if staking.staker_info(node).is_none() {
                    return Err(EscrowError::NotFound {
                        what: format!("staker account {}", node),
                    });
                }
            }
        }
        let per_node = rate_per_period
            .checked_mul(periods as u128)
            .and_then(|v| v.checked_add(first_period_reward))
            .ok_or_else(|| EscrowError::Range {
                quantity: "policy value".to_string(),
                actual: u128::MAX,
                min: 0,
                max: u128::MAX,
            })?;
        let total = per_node
            .checked_mul(nodes.len() as u128)
            .ok_or_else(|| EscrowError::Range {
                quantity: "policy value".to_string(),
                actual: u128::MAX,
                min: 0,
                max: u128::MAX,
            })?;
        let current = self.clock.current_period();
        self.token
            .transfer_from(&self.escrow_address, caller, &self.escrow_address, total)?;
        let arrangements = nodes
            .iter()
            .map(|node| PolicyArrangement {
                node: *node,
                rate_per_period,
                first_period_reward,
                start_period: current + 1,
                last_period: current + periods,
                disabled: false,
                accrued_through: current,
                first_reward_settled: false,
                refundable: 0,
            })
            .collect();
        self.policies.insert(
            id,
            Policy {
                id,
                owner: *caller,
                arrangements,
            },
        );
        info!(policy = %id, owner = %caller, nodes = nodes.len(), total, "policy created");
        Ok(())
    }

    /// Revokes every enabled arrangement of the policy and refunds all
    /// undistributed value, unaccrued periods and the unsettled first
    /// reward included. Already-accrued node rewards are untouched.
    pub fn revoke_policy(
        &mut self,
        caller: &Address,
        id: &PolicyId,
    ) -> tenure_common::Result<u128> {
        let now = self.clock.current_period();
        let staking = self.staking.read();
        let policy = self.policies.get_mut(id).ok_or_else(|| EscrowError::NotFound {
            what: format!("policy {}", id),
        })?;
        if policy.owner != *caller {
            return Err(EscrowError::Forbidden {
                role: "policy owner".to_string(),
            });
        }
        if policy.arrangements.iter().all(|a| a.disabled) {
            return Err(EscrowError::AlreadyDisabled {
                what: format!("policy {}", id),
            });
        }
        let mut refund = 0u128;
        for arrangement in &mut policy.arrangements {
            if arrangement.disabled {
                continue;
            }
            accrue_arrangement(&staking, &mut self.node_rewards, arrangement, now);
            refund += revoke_one(arrangement);
        }
        drop(staking);
        info!(policy = %id, refund, "policy revoked");
        // Outbound transfer strictly after bookkeeping.
        self.token.transfer(&self.escrow_address, caller, refund)?;
        Ok(refund)
    }

    /// Revokes a single node's arrangement, leaving the policy's other
    /// arrangements running.
    pub fn revoke_arrangement(
        &mut self,
        caller: &Address,
        id: &PolicyId,
        node: &Address,
    ) -> tenure_common::Result<u128> {
        let now = self.clock.current_period();
        let staking = self.staking.read();
        let policy = self.policies.get_mut(id).ok_or_else(|| EscrowError::NotFound {
            what: format!("policy {}", id),
        })?;
        if policy.owner != *caller {
            return Err(EscrowError::Forbidden {
                role: "policy owner".to_string(),
            });
        }
        let arrangement = policy
            .arrangements
            .iter_mut()
            .find(|a| a.node == *node)
            .ok_or_else(|| EscrowError::NotFound {
                what: format!("arrangement for node {}", node),
            })?;
        if arrangement.disabled {
            return Err(EscrowError::AlreadyDisabled {
                what: format!("arrangement for node {}", node),
            });
        }
        accrue_arrangement(&staking, &mut self.node_rewards, arrangement, now);
        let refund = revoke_one(arrangement);
        drop(staking);
        info!(policy = %id, node = %node, refund, "arrangement revoked");
        self.token.transfer(&self.escrow_address, caller, refund)?;
        Ok(refund)
    }

    /// Pays out the value of already-elapsed unserved periods across
    /// the whole policy. Arrangements keep running; a zero refund is a
    /// successful no-op.
    pub fn refund(&mut self, caller: &Address, id: &PolicyId) -> tenure_common::Result<u128> {
        let now = self.clock.current_period();
        let staking = self.staking.read();
        let policy = self.policies.get_mut(id).ok_or_else(|| EscrowError::NotFound {
            what: format!("policy {}", id),
        })?;
        if policy.owner != *caller {
            return Err(EscrowError::Forbidden {
                role: "policy owner".to_string(),
            });
        }
        let mut refund = 0u128;
        for arrangement in &mut policy.arrangements {
            accrue_arrangement(&staking, &mut self.node_rewards, arrangement, now);
            refund += arrangement.refundable;
            arrangement.refundable = 0;
        }
        drop(staking);
        if refund == 0 {
            debug!(policy = %id, "nothing to refund");
            return Ok(0);
        }
        info!(policy = %id, refund, "policy refunded");
        self.token.transfer(&self.escrow_address, caller, refund)?;
        Ok(refund)
    }

    // ──────────────────────────────────────────────────────────────────
    // Node side
    // ──────────────────────────────────────────────────────────────────

    /// Accrues every arrangement naming the caller and pays out the
    /// node's full reward balance. A zero balance is a successful no-op.
    pub fn withdraw_reward(&mut self, caller: &Address) -> tenure_common::Result<u128> {
        let now = self.clock.current_period();
        {
            let staking = self.staking.read();
            for policy in self.policies.values_mut() {
                for arrangement in policy
                    .arrangements
                    .iter_mut()
                    .filter(|a| a.node == *caller)
                {
                    accrue_arrangement(&staking, &mut self.node_rewards, arrangement, now);
                }
            }
        }
        let amount = match self.node_rewards.get_mut(caller) {
            Some(account) if account.accrued_reward > 0 => {
                let amount = account.accrued_reward;
                account.accrued_reward = 0;
                amount
            }
            _ => {
                debug!(node = %caller, "no reward to withdraw");
                return Ok(0);
            }
        };
        info!(node = %caller, amount, "node reward withdrawn");
        self.token.transfer(&self.escrow_address, caller, amount)?;
        Ok(amount)
    }

    // ──────────────────────────────────────────────────────────────────
    // Queries
    // ──────────────────────────────────────────────────────────────────

    pub fn policy(&self, id: &PolicyId) -> Option<&Policy> {
        self.policies.get(id)
    }

    pub fn arrangement(&self, id: &PolicyId, node: &Address) -> Option<&PolicyArrangement> {
        self.policies
            .get(id)?
            .arrangements
            .iter()
            .find(|a| a.node == *node)
    }

    pub fn node_reward(&self, node: &Address) -> u128 {
        self.node_rewards
            .get(node)
            .map(|a| a.accrued_reward)
            .unwrap_or(0)
    }

    /// Combined per-period fee rate the node currently earns across all
    /// enabled arrangements whose window covers the current period.
    /// Computed from live arrangements, not stored.
    pub fn node_fee_rate(&self, node: &Address) -> u128 {
        let current = self.clock.current_period();
        self.policies
            .values()
            .flat_map(|p| p.arrangements.iter())
            .filter(|a| {
                a.node == *node
                    && !a.disabled
                    && a.start_period <= current
                    && current <= a.last_period
            })
            .map(|a| a.rate_per_period)
            .sum()
    }

    /// Everything this escrow still owes: undistributed arrangement
    /// value, refundable pots, and accrued node rewards. Equals the
    /// escrow's token balance at all times.
    pub fn total_liabilities(&self) -> u128 {
        let arrangements: u128 = self
            .policies
            .values()
            .flat_map(|p| p.arrangements.iter())
            .map(PolicyArrangement::remaining_value)
            .sum();
        let rewards: u128 = self.node_rewards.values().map(|a| a.accrued_reward).sum();
        arrangements + rewards
    }

    pub fn escrow_address(&self) -> &Address {
        &self.escrow_address
    }
}

/// Disables one accrued arrangement and returns the amount owed back to
/// the owner: the refundable pot, all unaccrued periods, and the first
/// reward when no period was ever served.
fn revoke_one(arrangement: &mut PolicyArrangement) -> u128 {
    let refund = arrangement.remaining_value();
    arrangement.disabled = true;
    arrangement.refundable = 0;
    arrangement.accrued_through = arrangement.last_period;
    arrangement.first_reward_settled = true;
    refund
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenure_common::{InMemoryToken, ManualClock, StakingConfig};

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    const CREATOR: u8 = 0x01;
    const NODE_A: u8 = 0x02;
    const NODE_B: u8 = 0x03;
    const OWNER: u8 = 0x0A;
    const STAKING_ESCROW: u8 = 0xEE;
    const POLICY_ESCROW: u8 = 0xFE;

    const RATE: u128 = 200;
    const FIRST_REWARD: u128 = 44;

    struct Harness {
        clock: Arc<ManualClock>,
        token: Arc<InMemoryToken>,
        staking: Arc<RwLock<StakingLedger>>,
        escrow: PolicyEscrow,
    }

    /// Clock at period 10; nodes A and B staked 1000 for 10 periods;
    /// the policy owner holds 100_000 approved tokens.
    fn setup() -> Harness {
        let clock = Arc::new(ManualClock::new(10));
        let token = Arc::new(InMemoryToken::new(addr(CREATOR), 2_000_000_000));
        let mut staking = StakingLedger::new(
            StakingConfig::default(),
            clock.clone() as Arc<dyn PeriodClock>,
            token.clone() as Arc<dyn TokenLedger>,
            addr(STAKING_ESCROW),
            addr(CREATOR),
        );
        token
            .approve(&addr(CREATOR), &addr(STAKING_ESCROW), u128::MAX)
            .expect("approve creator");
        staking
            .initialize(&addr(CREATOR), 1_000_000_000)
            .expect("initialize");
        for node in [NODE_A, NODE_B] {
            token
                .transfer(&addr(CREATOR), &addr(node), 10_000)
                .expect("fund node");
            token
                .approve(&addr(node), &addr(STAKING_ESCROW), 10_000)
                .expect("approve node");
            staking.deposit(&addr(node), 1000, 10).expect("deposit");
        }
        token
            .transfer(&addr(CREATOR), &addr(OWNER), 100_000)
            .expect("fund owner");
        token
            .approve(&addr(OWNER), &addr(POLICY_ESCROW), 100_000)
            .expect("approve owner");
        let staking = Arc::new(RwLock::new(staking));
        let escrow = PolicyEscrow::new(
            clock.clone() as Arc<dyn PeriodClock>,
            token.clone() as Arc<dyn TokenLedger>,
            addr(POLICY_ESCROW),
            staking.clone(),
        );
        Harness {
            clock,
            token,
            staking,
            escrow,
        }
    }

    fn assert_conserved(h: &Harness) {
        assert_eq!(
            h.token.balance_of(&addr(POLICY_ESCROW)),
            h.escrow.total_liabilities(),
            "escrow balance must equal outstanding liabilities"
        );
    }

    fn pid(label: &str) -> PolicyId {
        PolicyId::derive(label.as_bytes())
    }

    // ──────────────────────────────────────────────────────────────────
    // CREATION
    // ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_create_collects_full_prepayment() {
        let mut h = setup();
        h.escrow
            .create_policy(
                &addr(OWNER),
                pid("p1"),
                RATE,
                FIRST_REWARD,
                5,
                &[addr(NODE_A), addr(NODE_B)],
            )
            .expect("create");
        let cost = 2 * (RATE * 5 + FIRST_REWARD);
        assert_eq!(h.token.balance_of(&addr(OWNER)), 100_000 - cost);
        assert_eq!(h.token.balance_of(&addr(POLICY_ESCROW)), cost);
        let policy = h.escrow.policy(&pid("p1")).unwrap();
        assert_eq!(policy.owner, addr(OWNER));
        assert_eq!(policy.arrangements.len(), 2);
        assert_eq!(policy.arrangements[0].start_period, 11);
        assert_eq!(policy.arrangements[0].last_period, 15);
        assert_conserved(&h);
    }

    #[test]
    fn test_create_duplicate_id_rejected() {
        let mut h = setup();
        h.escrow
            .create_policy(&addr(OWNER), pid("p1"), RATE, 0, 3, &[addr(NODE_A)])
            .expect("create");
        assert!(matches!(
            h.escrow
                .create_policy(&addr(OWNER), pid("p1"), RATE, 0, 3, &[addr(NODE_B)])
                .unwrap_err(),
            EscrowError::Duplicate { .. }
        ));
    }

    #[test]
    fn test_create_rejects_empty_or_zero() {
        let mut h = setup();
        assert!(matches!(
            h.escrow
                .create_policy(&addr(OWNER), pid("p1"), RATE, 0, 3, &[])
                .unwrap_err(),
            EscrowError::Range { .. }
        ));
        assert!(matches!(
            h.escrow
                .create_policy(&addr(OWNER), pid("p1"), RATE, 0, 0, &[addr(NODE_A)])
                .unwrap_err(),
            EscrowError::Range { .. }
        ));
    }

    #[test]
    fn test_create_requires_staked_node() {
        let mut h = setup();
        assert!(matches!(
            h.escrow
                .create_policy(&addr(OWNER), pid("p1"), RATE, 0, 3, &[addr(0x77)])
                .unwrap_err(),
            EscrowError::NotFound { .. }
        ));
        // Nothing was collected by the failed attempt.
        assert_eq!(h.token.balance_of(&addr(OWNER)), 100_000);
    }

    #[test]
    fn test_create_rejects_repeated_node() {
        let mut h = setup();
        assert!(matches!(
            h.escrow
                .create_policy(
                    &addr(OWNER),
                    pid("p1"),
                    RATE,
                    0,
                    3,
                    &[addr(NODE_A), addr(NODE_A)],
                )
                .unwrap_err(),
            EscrowError::Duplicate { .. }
        ));
    }

    #[test]
    fn test_create_rejects_overflowing_value() {
        let mut h = setup();
        assert!(matches!(
            h.escrow
                .create_policy(&addr(OWNER), pid("p1"), u128::MAX, 0, 2, &[addr(NODE_A)])
                .unwrap_err(),
            EscrowError::Range { .. }
        ));
    }

    // ──────────────────────────────────────────────────────────────────
    // ACCRUAL AND NODE REWARD
    // ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_served_periods_credit_node() {
        let mut h = setup();
        h.escrow
            .create_policy(&addr(OWNER), pid("p1"), RATE, FIRST_REWARD, 3, &[addr(NODE_A)])
            .expect("create");
        // Serve all three paid periods 11..=13.
        for _ in 0..3 {
            h.staking
                .write()
                .confirm_activity(&addr(NODE_A))
                .expect("confirm");
            h.clock.advance(1);
        }
        h.clock.advance(1); // now 14, the whole window elapsed
        let paid = h.escrow.withdraw_reward(&addr(NODE_A)).expect("withdraw");
        assert_eq!(paid, 3 * RATE + FIRST_REWARD);
        assert_eq!(h.escrow.node_reward(&addr(NODE_A)), 0);
        // Nothing refundable for a fully served window.
        assert_eq!(h.escrow.refund(&addr(OWNER), &pid("p1")).expect("refund"), 0);
        assert_conserved(&h);
    }

    #[test]
    fn test_unserved_periods_refund_owner() {
        let mut h = setup();
        h.escrow
            .create_policy(&addr(OWNER), pid("p1"), RATE, FIRST_REWARD, 3, &[addr(NODE_A)])
            .expect("create");
        // Node never confirms. Let the whole window elapse.
        h.clock.advance(5);
        let refunded = h.escrow.refund(&addr(OWNER), &pid("p1")).expect("refund");
        // All three periods plus the never-earned first reward.
        assert_eq!(refunded, 3 * RATE + FIRST_REWARD);
        assert_eq!(h.escrow.withdraw_reward(&addr(NODE_A)).expect("withdraw"), 0);
        assert_eq!(h.token.balance_of(&addr(POLICY_ESCROW)), 0);
        assert_conserved(&h);
    }

    #[test]
    fn test_mixed_service_splits_value() {
        let mut h = setup();
        h.escrow
            .create_policy(&addr(OWNER), pid("p1"), RATE, FIRST_REWARD, 3, &[addr(NODE_A)])
            .expect("create");
        // Serve only period 11, then go dark.
        h.staking
            .write()
            .confirm_activity(&addr(NODE_A))
            .expect("confirm");
        h.clock.advance(5);
        let paid = h.escrow.withdraw_reward(&addr(NODE_A)).expect("withdraw");
        assert_eq!(paid, RATE + FIRST_REWARD);
        let refunded = h.escrow.refund(&addr(OWNER), &pid("p1")).expect("refund");
        assert_eq!(refunded, 2 * RATE);
        assert_eq!(h.token.balance_of(&addr(POLICY_ESCROW)), 0);
        assert_conserved(&h);
    }

    #[test]
    fn test_current_period_never_settled_early() {
        let mut h = setup();
        h.escrow
            .create_policy(&addr(OWNER), pid("p1"), RATE, FIRST_REWARD, 3, &[addr(NODE_A)])
            .expect("create");
        h.staking
            .write()
            .confirm_activity(&addr(NODE_A))
            .expect("confirm");
        h.clock.advance(1); // now 11: period 11 is current, not elapsed
        assert_eq!(h.escrow.withdraw_reward(&addr(NODE_A)).expect("withdraw"), 0);
        assert_eq!(h.escrow.refund(&addr(OWNER), &pid("p1")).expect("refund"), 0);
        h.clock.advance(1); // now 12: period 11 elapsed and was served
        let paid = h.escrow.withdraw_reward(&addr(NODE_A)).expect("withdraw");
        assert_eq!(paid, RATE + FIRST_REWARD);
        assert_conserved(&h);
    }

    // ──────────────────────────────────────────────────────────────────
    // REVOCATION
    // ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_immediate_revoke_refunds_everything() {
        let mut h = setup();
        h.escrow
            .create_policy(
                &addr(OWNER),
                pid("p1"),
                RATE,
                FIRST_REWARD,
                5,
                &[addr(NODE_A), addr(NODE_B)],
            )
            .expect("create");
        let balance_before = h.token.balance_of(&addr(OWNER));
        let refund = h
            .escrow
            .revoke_policy(&addr(OWNER), &pid("p1"))
            .expect("revoke");
        // No period elapsed, no service rendered: the full pre-payment
        // comes back, first rewards included.
        assert_eq!(refund, 2 * (RATE * 5 + FIRST_REWARD));
        assert_eq!(h.token.balance_of(&addr(OWNER)), balance_before + refund);
        assert_eq!(h.token.balance_of(&addr(POLICY_ESCROW)), 0);
        assert_conserved(&h);
    }

    #[test]
    fn test_revoke_after_service_keeps_node_reward() {
        let mut h = setup();
        h.escrow
            .create_policy(&addr(OWNER), pid("p1"), RATE, FIRST_REWARD, 5, &[addr(NODE_A)])
            .expect("create");
        // Serve period 11 only.
        h.staking
            .write()
            .confirm_activity(&addr(NODE_A))
            .expect("confirm");
        h.clock.advance(2); // now 12
        let refund = h
            .escrow
            .revoke_policy(&addr(OWNER), &pid("p1"))
            .expect("revoke");
        // Periods 12..=15 were still unaccrued; 11 was served and stays
        // with the node.
        assert_eq!(refund, 4 * RATE);
        let paid = h.escrow.withdraw_reward(&addr(NODE_A)).expect("withdraw");
        assert_eq!(paid, RATE + FIRST_REWARD);
        assert_eq!(h.token.balance_of(&addr(POLICY_ESCROW)), 0);
        assert_conserved(&h);
    }

    #[test]
    fn test_revoke_non_owner_forbidden() {
        let mut h = setup();
        h.escrow
            .create_policy(&addr(OWNER), pid("p1"), RATE, 0, 3, &[addr(NODE_A)])
            .expect("create");
        assert!(matches!(
            h.escrow.revoke_policy(&addr(NODE_A), &pid("p1")).unwrap_err(),
            EscrowError::Forbidden { .. }
        ));
    }

    #[test]
    fn test_double_revoke_already_disabled() {
        let mut h = setup();
        h.escrow
            .create_policy(&addr(OWNER), pid("p1"), RATE, 0, 3, &[addr(NODE_A)])
            .expect("create");
        h.escrow
            .revoke_policy(&addr(OWNER), &pid("p1"))
            .expect("revoke");
        assert!(matches!(
            h.escrow.revoke_policy(&addr(OWNER), &pid("p1")).unwrap_err(),
            EscrowError::AlreadyDisabled { .. }
        ));
    }

    #[test]
    fn test_revoke_unknown_policy_not_found() {
        let mut h = setup();
        assert!(matches!(
            h.escrow.revoke_policy(&addr(OWNER), &pid("nope")).unwrap_err(),
            EscrowError::NotFound { .. }
        ));
    }

    #[test]
    fn test_revoke_single_arrangement_leaves_others() {
        let mut h = setup();
        h.escrow
            .create_policy(
                &addr(OWNER),
                pid("p1"),
                RATE,
                FIRST_REWARD,
                5,
                &[addr(NODE_A), addr(NODE_B)],
            )
            .expect("create");
        let refund = h
            .escrow
            .revoke_arrangement(&addr(OWNER), &pid("p1"), &addr(NODE_A))
            .expect("revoke one");
        assert_eq!(refund, RATE * 5 + FIRST_REWARD);
        // Node B's arrangement keeps running and earning.
        h.staking
            .write()
            .confirm_activity(&addr(NODE_B))
            .expect("confirm");
        h.clock.advance(2);
        let paid = h.escrow.withdraw_reward(&addr(NODE_B)).expect("withdraw");
        assert_eq!(paid, RATE + FIRST_REWARD);
        // Revoking A again is rejected.
        assert!(matches!(
            h.escrow
                .revoke_arrangement(&addr(OWNER), &pid("p1"), &addr(NODE_A))
                .unwrap_err(),
            EscrowError::AlreadyDisabled { .. }
        ));
        assert_conserved(&h);
    }

    // ──────────────────────────────────────────────────────────────────
    // QUERIES
    // ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_node_fee_rate_tracks_enabled_windows() {
        let mut h = setup();
        assert_eq!(h.escrow.node_fee_rate(&addr(NODE_A)), 0);
        h.escrow
            .create_policy(&addr(OWNER), pid("p1"), RATE, 0, 3, &[addr(NODE_A)])
            .expect("create p1");
        h.escrow
            .create_policy(&addr(OWNER), pid("p2"), 50, 0, 5, &[addr(NODE_A)])
            .expect("create p2");
        // Windows start next period.
        assert_eq!(h.escrow.node_fee_rate(&addr(NODE_A)), 0);
        h.clock.advance(1);
        assert_eq!(h.escrow.node_fee_rate(&addr(NODE_A)), RATE + 50);
        h.clock.advance(3); // now 14: p1 (through 13) expired, p2 runs to 15
        assert_eq!(h.escrow.node_fee_rate(&addr(NODE_A)), 50);
        h.escrow
            .revoke_policy(&addr(OWNER), &pid("p2"))
            .expect("revoke");
        assert_eq!(h.escrow.node_fee_rate(&addr(NODE_A)), 0);
    }

    #[test]
    fn test_policy_state_serde_roundtrip() {
        let mut h = setup();
        h.escrow
            .create_policy(&addr(OWNER), pid("p1"), RATE, FIRST_REWARD, 3, &[addr(NODE_A)])
            .expect("create");
        let policy = h.escrow.policy(&pid("p1")).unwrap();
        let json = serde_json::to_string(policy).expect("serialize");
        let back: Policy = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(&back, policy);
    }

    #[test]
    fn test_refund_is_repeat_safe() {
        let mut h = setup();
        h.escrow
            .create_policy(&addr(OWNER), pid("p1"), RATE, 0, 3, &[addr(NODE_A)])
            .expect("create");
        h.clock.advance(2);
        let first = h.escrow.refund(&addr(OWNER), &pid("p1")).expect("refund");
        assert_eq!(first, RATE); // period 11 elapsed unserved
        let second = h.escrow.refund(&addr(OWNER), &pid("p1")).expect("refund");
        assert_eq!(second, 0);
        assert_conserved(&h);
    }
}
