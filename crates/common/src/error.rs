//! # Escrow Error Types
//!
//! Defines the error enum shared by the staking ledger and the policy
//! escrow. `EscrowError` is the public error contract for every
//! protocol entry point, consumed by node operators, policy owners and
//! tooling.
//!
//! ## Overview
//!
//! Every operation that can fail produces a specific `EscrowError`
//! variant. The variants are non-overlapping:
//!
//! | Category | Variants |
//! |----------|----------|
//! | Lifecycle | `Uninitialized` |
//! | Bounds | `Range` |
//! | Balance | `InsufficientBalance` |
//! | Identity | `Duplicate`, `NotFound` |
//! | Authorization | `Forbidden` |
//! | State machine | `AlreadyDisabled` |
//!
//! All failures are synchronous, atomic rejections: an operation that
//! returns an error has made no state change. The explicitly idempotent
//! no-ops (mint with nothing to mint, zero-balance withdraw or refund,
//! repeated activity confirmation within a period) return `Ok` instead.
//!
//! ## Display Messages
//!
//! All `Display` messages are deterministic, operator-friendly, and
//! contain no internal debug formatting.
//!
//! ## Safety Properties
//!
//! - `EscrowError` is a value type: `Clone`, `Debug`, `PartialEq`, `Eq`.
//! - Implements `std::fmt::Display` and `std::error::Error`.
//! - No `thiserror`, `anyhow`, or implicit error wrapping.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error type for staking ledger and policy escrow operations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowError {
    /// Operation attempted before the reward pool was funded and the
    /// ledger initialized.
    Uninitialized,

    /// A value or period count is outside the configured bounds.
    Range {
        /// Which quantity violated its bounds.
        quantity: String,
        /// The offending value.
        actual: u128,
        /// Lowest acceptable value (inclusive).
        min: u128,
        /// Highest acceptable value (inclusive).
        max: u128,
    },

    /// A withdraw, lock or transfer exceeds the available balance.
    InsufficientBalance {
        /// Amount the caller asked for.
        requested: u128,
        /// Amount actually available.
        available: u128,
    },

    /// Re-creating an entity that already exists (staker account,
    /// policy id, double initialization).
    Duplicate {
        /// Human-readable name of the colliding entity.
        what: String,
    },

    /// The caller lacks the role the operation requires (creator,
    /// policy owner, or account owner).
    Forbidden {
        /// The role that would have been required.
        role: String,
    },

    /// Revoking an arrangement or policy that is already disabled.
    AlreadyDisabled {
        /// Human-readable name of the disabled entity.
        what: String,
    },

    /// Referencing a nonexistent account, sub-stake, policy or
    /// arrangement.
    NotFound {
        /// Human-readable name of the missing entity.
        what: String,
    },
}

impl fmt::Display for EscrowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscrowError::Uninitialized => {
                write!(f, "escrow is not initialized: reward pool not funded")
            }
            EscrowError::Range {
                quantity,
                actual,
                min,
                max,
            } => {
                write!(
                    f,
                    "{} out of range: got {}, allowed [{}, {}]",
                    quantity, actual, min, max
                )
            }
            EscrowError::InsufficientBalance {
                requested,
                available,
            } => {
                write!(
                    f,
                    "insufficient balance: requested {}, available {}",
                    requested, available
                )
            }
            EscrowError::Duplicate { what } => {
                write!(f, "already exists: {}", what)
            }
            EscrowError::Forbidden { role } => {
                write!(f, "caller lacks required role: {}", role)
            }
            EscrowError::AlreadyDisabled { what } => {
                write!(f, "already disabled: {}", what)
            }
            EscrowError::NotFound { what } => {
                write!(f, "not found: {}", what)
            }
        }
    }
}

impl std::error::Error for EscrowError {}
