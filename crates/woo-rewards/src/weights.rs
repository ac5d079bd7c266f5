// crates/woo-rewards/src/weights.rs
//
// Stake weights read by the rewarders.
//
// Simple rewarders and the MP rewarder do not own principal; they read it
// through `StakeWeights`. The staking manager's `BalanceBook` is the
// canonical implementation:
//
//   totalBalance(user) = wooBalance(user) + mpBalance(user)
//
// so earned multiplier points raise a user's weight in every other reward
// stream.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use woo_core::error::StakingError;
use woo_core::types::{Address, Amount};

/// Read-only view of staked principal and multiplier points.
pub trait StakeWeights {
    fn woo_balance(&self, user: &Address) -> Amount;

    fn mp_balance(&self, user: &Address) -> Amount;

    fn woo_total_balance(&self) -> Amount;

    fn mp_total_balance(&self) -> Amount;

    /// Weight of `user` in the simple rewarders.
    fn total_balance_of(&self, user: &Address) -> Amount {
        self.woo_balance(user).saturating_add(self.mp_balance(user))
    }

    /// Pool weight of the simple rewarders.
    fn total_balance(&self) -> Amount {
        self.woo_total_balance().saturating_add(self.mp_total_balance())
    }
}

/// Per-user staked WOO and multiplier points with running totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceBook {
    woo: BTreeMap<Address, Amount>,
    mp: BTreeMap<Address, Amount>,
    woo_total: Amount,
    mp_total: Amount,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_woo(&mut self, user: Address, amount: Amount) {
        *self.woo.entry(user).or_insert(0) += amount;
        self.woo_total += amount;
    }

    /// Remove staked WOO.
    ///
    /// # Errors
    /// `InsufficientBalance` if `amount` exceeds the user's stake.
    pub fn sub_woo(&mut self, user: Address, amount: Amount) -> Result<(), StakingError> {
        let available = self.woo_balance(&user);
        if amount > available {
            return Err(StakingError::InsufficientBalance {
                needed: amount,
                available,
            });
        }
        self.woo.insert(user, available - amount);
        self.woo_total -= amount;
        Ok(())
    }

    pub fn add_mp(&mut self, user: Address, amount: Amount) {
        *self.mp.entry(user).or_insert(0) += amount;
        self.mp_total += amount;
    }

    /// Burn multiplier points, clamped to the user's balance. Returns the
    /// amount actually burned.
    pub fn burn_mp(&mut self, user: Address, amount: Amount) -> Amount {
        let available = self.mp_balance(&user);
        let burned = amount.min(available);
        self.mp.insert(user, available - burned);
        self.mp_total -= burned;
        burned
    }

    /// Users with a non-zero WOO or MP balance, in address order.
    pub fn users(&self) -> Vec<Address> {
        let mut users: Vec<Address> = self
            .woo
            .iter()
            .chain(self.mp.iter())
            .filter(|(_, amount)| **amount > 0)
            .map(|(user, _)| *user)
            .collect();
        users.sort();
        users.dedup();
        users
    }

    /// Rebuild a book from per-user `(woo, mp)` balances.
    pub fn from_balances(entries: impl IntoIterator<Item = (Address, Amount, Amount)>) -> Self {
        let mut book = Self::new();
        for (user, woo, mp) in entries {
            book.add_woo(user, woo);
            book.add_mp(user, mp);
        }
        book
    }
}

impl StakeWeights for BalanceBook {
    fn woo_balance(&self, user: &Address) -> Amount {
        self.woo.get(user).copied().unwrap_or(0)
    }

    fn mp_balance(&self, user: &Address) -> Amount {
        self.mp.get(user).copied().unwrap_or(0)
    }

    fn woo_total_balance(&self) -> Amount {
        self.woo_total
    }

    fn mp_total_balance(&self) -> Amount {
        self.mp_total
    }
}
