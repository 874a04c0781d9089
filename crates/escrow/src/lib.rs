//! # Tenure Escrow Crate
//!
//! The dual accounting engine of the tenure protocol:
//!
//! - [`staking`]: the staking ledger. Node operators lock tokens for a
//!   chosen duration, confirm continued activity period by period, and
//!   mint inflationary rewards from a shared pool.
//! - [`policy`]: the policy escrow. Clients pre-pay nodes for ongoing
//!   service; nodes earn each period's fee only by proven activity, and
//!   unserved value flows back to the client.
//!
//! Both ledgers read time exclusively through
//! [`tenure_common::PeriodClock`] and move tokens exclusively through
//! [`tenure_common::TokenLedger`]. Every public operation is atomic:
//! all fallible checks precede the first state write, and outbound
//! token transfers are sequenced after all internal bookkeeping.

pub mod policy;
pub mod staking;

pub use policy::{NodeRewardAccount, Policy, PolicyArrangement, PolicyEscrow};
pub use staking::{StakerAccount, StakingLedger, SubStake};
