// crates/woo-rewards/src/simple_rewarder.rs
//
// Simple (fixed-rate) rewarder: per-block linear emission shared by
// externally supplied weight.
//
//   accTokenPerShare += rewardPerBlock * blocks * PRECISION / totalBalance()
//   pending(user)     = totalBalance(user) * accTokenPerShare / PRECISION - rewardDebt + carry
//
// Weight is read through `StakeWeights`, never owned. When the pool weight
// is zero at a checkpoint the interval is forfeited: `lastRewardBlock`
// still advances and the tokens of that interval are never emitted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use woo_core::access::AccessControl;
use woo_core::error::StakingError;
use woo_core::math::{mul_div, mul_div_amount, to_amount, PRECISION, U256};
use woo_core::types::{Address, Amount, BlockNumber, TokenId};

use crate::weights::StakeWeights;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleUserInfo {
    /// `weight * accTokenPerShare / PRECISION` at the last checkpoint.
    pub reward_debt: U256,
    /// Realized but unclaimed rewards.
    pub carry: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleRewarder {
    acl: AccessControl,
    /// Vault address rewards are paid from.
    vault: Address,
    reward_token: TokenId,
    reward_per_block: Amount,
    acc_token_per_share: U256,
    last_reward_block: BlockNumber,
    users: BTreeMap<Address, SimpleUserInfo>,
}

impl SimpleRewarder {
    pub fn new(
        owner: Address,
        vault: Address,
        reward_token: TokenId,
        reward_per_block: Amount,
        start_block: BlockNumber,
    ) -> Self {
        Self {
            acl: AccessControl::new(owner),
            vault,
            reward_token,
            reward_per_block,
            acc_token_per_share: U256::zero(),
            last_reward_block: start_block,
            users: BTreeMap::new(),
        }
    }

    pub fn acl_mut(&mut self) -> &mut AccessControl {
        &mut self.acl
    }

    pub fn vault(&self) -> Address {
        self.vault
    }

    pub fn reward_token(&self) -> TokenId {
        self.reward_token
    }

    pub fn reward_per_block(&self) -> Amount {
        self.reward_per_block
    }

    pub fn acc_token_per_share(&self) -> U256 {
        self.acc_token_per_share
    }

    pub fn last_reward_block(&self) -> BlockNumber {
        self.last_reward_block
    }

    pub fn user_info(&self, user: &Address) -> Option<&SimpleUserInfo> {
        self.users.get(user)
    }

    fn acc_at(&self, weights: &dyn StakeWeights, block: BlockNumber) -> Result<U256, StakingError> {
        if block <= self.last_reward_block {
            return Ok(self.acc_token_per_share);
        }
        let total = weights.total_balance();
        if total == 0 {
            return Ok(self.acc_token_per_share);
        }
        let blocks = (block - self.last_reward_block) as Amount;
        let emitted = mul_div_amount(self.reward_per_block, blocks, 1)?;
        let delta = mul_div(U256::from(emitted), U256::from(PRECISION), U256::from(total))?;
        Ok(self.acc_token_per_share.saturating_add(delta))
    }

    fn share_of(weight: Amount, acc: U256) -> Result<U256, StakingError> {
        mul_div(U256::from(weight), acc, U256::from(PRECISION))
    }

    /// Advance the accumulator to `block`.
    pub fn update_reward(&mut self, weights: &dyn StakeWeights, block: BlockNumber) -> Result<(), StakingError> {
        if block <= self.last_reward_block {
            return Ok(());
        }
        if weights.total_balance() == 0 {
            tracing::warn!(
                "simple rewarder {}: no weight staked, forfeiting blocks {}..{}",
                self.vault,
                self.last_reward_block,
                block
            );
        }
        self.acc_token_per_share = self.acc_at(weights, block)?;
        self.last_reward_block = block;
        Ok(())
    }

    /// Checkpoint and realize `user`'s share into its carry.
    pub fn update_reward_for_user(
        &mut self,
        user: Address,
        weights: &dyn StakeWeights,
        block: BlockNumber,
    ) -> Result<(), StakingError> {
        self.update_reward(weights, block)?;
        let share = Self::share_of(weights.total_balance_of(&user), self.acc_token_per_share)?;
        let entry = self.users.entry(user).or_default();
        let gained = to_amount(share.saturating_sub(entry.reward_debt))?;
        entry.carry += gained;
        entry.reward_debt = share;
        Ok(())
    }

    /// Reset `user`'s debt to its current weight. Called after the weight
    /// changed, following `update_reward_for_user` at the same block.
    pub fn clear_reward_to_debt(&mut self, user: Address, weights: &dyn StakeWeights) -> Result<(), StakingError> {
        let share = Self::share_of(weights.total_balance_of(&user), self.acc_token_per_share)?;
        self.users.entry(user).or_default().reward_debt = share;
        Ok(())
    }

    pub fn pending_reward(
        &self,
        user: &Address,
        weights: &dyn StakeWeights,
        block: BlockNumber,
    ) -> Result<Amount, StakingError> {
        let acc = self.acc_at(weights, block)?;
        let share = Self::share_of(weights.total_balance_of(user), acc)?;
        let default = SimpleUserInfo::default();
        let info = self.users.get(user).unwrap_or(&default);
        Ok(info.carry + to_amount(share.saturating_sub(info.reward_debt))?)
    }

    /// Emission since the last checkpoint across the whole pool.
    pub fn all_pending_reward(&self, block: BlockNumber) -> Result<Amount, StakingError> {
        let blocks = block.saturating_sub(self.last_reward_block) as Amount;
        mul_div_amount(self.reward_per_block, blocks, 1)
    }

    /// Realize and hand out `user`'s rewards. The caller pays the amount
    /// from `vault()` through the token ledger.
    pub fn claim(&mut self, user: Address, weights: &dyn StakeWeights, block: BlockNumber) -> Result<Amount, StakingError> {
        self.update_reward_for_user(user, weights, block)?;
        let entry = self.users.entry(user).or_default();
        let amount = entry.carry;
        entry.carry = 0;
        if amount > 0 {
            tracing::debug!(
                "simple rewarder {}: {} claimed {} of {}",
                self.vault,
                user,
                amount,
                self.reward_token
            );
        }
        Ok(amount)
    }

    /// Change the emission rate for future blocks. Admin only.
    pub fn set_reward_per_block(
        &mut self,
        caller: &Address,
        reward_per_block: Amount,
        weights: &dyn StakeWeights,
        block: BlockNumber,
    ) -> Result<(), StakingError> {
        self.acl.require_admin(caller)?;
        self.update_reward(weights, block)?;
        self.reward_per_block = reward_per_block;
        tracing::info!(
            "simple rewarder {}: reward per block set to {}",
            self.vault,
            reward_per_block
        );
        Ok(())
    }
}
