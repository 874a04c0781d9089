//! # Token Ledger
//!
//! External fungible-token collaborator of the escrow protocol. The
//! staking ledger and the policy escrow only ever touch token balances
//! through the [`TokenLedger`] trait: plain transfers, delegated
//! (approve / transfer-from) transfers, and balance queries. The ledger
//! is assumed correct and atomic; it carries no escrow semantics.
//!
//! [`InMemoryToken`] is the reference implementation used by every test
//! in the workspace. It enforces balances and allowances and nothing
//! else.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::error::EscrowError;
use crate::types::Address;

/// Balance-transfer surface the escrow depends on.
///
/// Every method is atomic: it either fully applies or leaves the ledger
/// untouched. A shortfall in balance or allowance surfaces as
/// [`EscrowError::InsufficientBalance`].
pub trait TokenLedger: Send + Sync {
    fn total_supply(&self) -> u128;

    fn balance_of(&self, owner: &Address) -> u128;

    /// Moves `value` from `from` to `to`.
    fn transfer(&self, from: &Address, to: &Address, value: u128) -> crate::Result<()>;

    /// Lets `spender` move up to `value` out of `owner`'s balance.
    /// Overwrites any previous allowance.
    fn approve(&self, owner: &Address, spender: &Address, value: u128) -> crate::Result<()>;

    fn allowance(&self, owner: &Address, spender: &Address) -> u128;

    /// Moves `value` from `from` to `to` on behalf of `spender`,
    /// consuming allowance.
    fn transfer_from(
        &self,
        spender: &Address,
        from: &Address,
        to: &Address,
        value: u128,
    ) -> crate::Result<()>;
}

#[derive(Default)]
struct TokenState {
    total_supply: u128,
    balances: HashMap<Address, u128>,
    allowances: HashMap<(Address, Address), u128>,
}

/// In-memory reference token ledger.
///
/// The full initial supply is credited to the deployer at construction.
pub struct InMemoryToken {
    state: RwLock<TokenState>,
}

impl InMemoryToken {
    pub fn new(deployer: Address, initial_supply: u128) -> Self {
        let mut balances = HashMap::new();
        balances.insert(deployer, initial_supply);
        Self {
            state: RwLock::new(TokenState {
                total_supply: initial_supply,
                balances,
                allowances: HashMap::new(),
            }),
        }
    }
}

impl TokenLedger for InMemoryToken {
    fn total_supply(&self) -> u128 {
        self.state.read().total_supply
    }

    fn balance_of(&self, owner: &Address) -> u128 {
        self.state.read().balances.get(owner).copied().unwrap_or(0)
    }

    fn transfer(&self, from: &Address, to: &Address, value: u128) -> crate::Result<()> {
        let mut state = self.state.write();
        let from_balance = state.balances.get(from).copied().unwrap_or(0);
        if from_balance < value {
            return Err(EscrowError::InsufficientBalance {
                requested: value,
                available: from_balance,
            });
        }
        state.balances.insert(*from, from_balance - value);
        let to_balance = state.balances.entry(*to).or_insert(0);
        *to_balance = to_balance.saturating_add(value);
        debug!(%from, %to, value, "token transfer");
        Ok(())
    }

    fn approve(&self, owner: &Address, spender: &Address, value: u128) -> crate::Result<()> {
        let mut state = self.state.write();
        state.allowances.insert((*owner, *spender), value);
        Ok(())
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> u128 {
        self.state
            .read()
            .allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or(0)
    }

    fn transfer_from(
        &self,
        spender: &Address,
        from: &Address,
        to: &Address,
        value: u128,
    ) -> crate::Result<()> {
        let mut state = self.state.write();
        let allowed = state
            .allowances
            .get(&(*from, *spender))
            .copied()
            .unwrap_or(0);
        if allowed < value {
            return Err(EscrowError::InsufficientBalance {
                requested: value,
                available: allowed,
            });
        }
        let from_balance = state.balances.get(from).copied().unwrap_or(0);
        if from_balance < value {
            return Err(EscrowError::InsufficientBalance {
                requested: value,
                available: from_balance,
            });
        }
        state.allowances.insert((*from, *spender), allowed - value);
        state.balances.insert(*from, from_balance - value);
        let to_balance = state.balances.entry(*to).or_insert(0);
        *to_balance = to_balance.saturating_add(value);
        debug!(%spender, %from, %to, value, "delegated token transfer");
        Ok(())
    }
}
