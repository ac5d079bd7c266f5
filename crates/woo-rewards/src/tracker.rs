// crates/woo-rewards/src/tracker.rs
//
// Reward tracker: a weighted ledger that converts deposited principal into
// proportional claims on one or more reward streams.
//
// Each tracker is also a receipt-token ledger. Staking mints receipts to
// the account; unstaking burns them. A downstream tracker can take the
// receipts of an upstream tracker as its own deposit token, holding them
// in custody at its own address (sWoo -> sbWoo -> sbfWoo). While staked
// downstream those receipts may only move through registered handlers.
//
// Accrual per reward token:
//
//   cumulativeRewardPerToken += distributed * TRACKER_PRECISION / totalPrincipal
//   claimable(account)       += principal * (cumulative - account.rewardDebt) / TRACKER_PRECISION
//
// Every mutation checkpoints the account before the balance change.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use woo_core::access::{AccessControl, HandlerSet};
use woo_core::error::StakingError;
use woo_core::math::{accrued, mul_div, mul_div_amount, TRACKER_PRECISION, U256};
use woo_core::types::{Address, Amount, Timestamp, TokenId};

use crate::distributor::RewardDistributor;

/// Actions restricted to handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyFlags {
    /// Receipt transfers only through handlers.
    pub transfer: bool,
    /// Stake/unstake only through handlers.
    pub staking: bool,
    /// Claims only through handlers.
    pub claiming: bool,
    /// Claimed rewards are restaked downstream rather than paid out.
    pub external_rewarding: bool,
}

/// Where a claimed reward goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimDestination {
    /// Pay the reward token to this address.
    Transfer(Address),
    /// Bookkeeping only; the caller stakes the reward into a downstream
    /// tracker.
    Restake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedReward {
    pub token: TokenId,
    pub amount: Amount,
    pub destination: ClaimDestination,
}

/// Per-account ledger entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerAccount {
    /// Staked amount that earns rewards.
    pub principal: Amount,
    /// Receipt tokens held (may sit elsewhere while staked downstream).
    pub receipts: Amount,
    pub deposit_balances: BTreeMap<TokenId, Amount>,
    /// Cumulative reward per token at the last checkpoint.
    pub reward_debt: BTreeMap<TokenId, U256>,
    pub claimable: BTreeMap<TokenId, Amount>,
    pub cumulative_rewards: BTreeMap<TokenId, Amount>,
    /// Principal averaged over the rewards it earned.
    pub average_staked_amount: BTreeMap<TokenId, Amount>,
}

/// Tracker-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerGlobal {
    pub id: Address,
    pub name: String,
    pub acl: AccessControl,
    pub handlers: HandlerSet,
    pub privacy: PrivacyFlags,
    pub deposit_tokens: BTreeSet<TokenId>,
    pub total_principal: Amount,
    pub total_receipts: Amount,
    pub total_deposit_supply: BTreeMap<TokenId, Amount>,
    pub cumulative_reward_per_token: BTreeMap<TokenId, U256>,
    pub last_checkpoint_time: Timestamp,
    pub distributors: BTreeMap<TokenId, RewardDistributor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardTracker {
    global: TrackerGlobal,
    accounts: BTreeMap<Address, TrackerAccount>,
}

impl RewardTracker {
    /// New tracker living at `id`. Receipts staked into this tracker from
    /// upstream are held at `id`.
    pub fn new(id: Address, name: impl Into<String>, owner: Address) -> Self {
        Self {
            global: TrackerGlobal {
                id,
                name: name.into(),
                acl: AccessControl::new(owner),
                handlers: HandlerSet::new(),
                privacy: PrivacyFlags::default(),
                deposit_tokens: BTreeSet::new(),
                total_principal: 0,
                total_receipts: 0,
                total_deposit_supply: BTreeMap::new(),
                cumulative_reward_per_token: BTreeMap::new(),
                last_checkpoint_time: 0,
                distributors: BTreeMap::new(),
            },
            accounts: BTreeMap::new(),
        }
    }

    /// Rebuild a tracker from persisted parts.
    pub fn from_parts(global: TrackerGlobal, accounts: BTreeMap<Address, TrackerAccount>) -> Self {
        Self { global, accounts }
    }

    pub fn id(&self) -> Address {
        self.global.id
    }

    pub fn name(&self) -> &str {
        &self.global.name
    }

    pub fn global(&self) -> &TrackerGlobal {
        &self.global
    }

    pub fn accounts(&self) -> &BTreeMap<Address, TrackerAccount> {
        &self.accounts
    }

    pub fn account(&self, who: &Address) -> Option<&TrackerAccount> {
        self.accounts.get(who)
    }

    // --- configuration -------------------------------------------------

    pub fn set_handler(&mut self, caller: &Address, who: Address, enabled: bool) -> Result<(), StakingError> {
        self.global.acl.require_admin(caller)?;
        self.global.handlers.set(who, enabled);
        tracing::info!("{}: handler {} set to {}", self.global.name, who, enabled);
        Ok(())
    }

    pub fn set_privacy(&mut self, caller: &Address, flags: PrivacyFlags) -> Result<(), StakingError> {
        self.global.acl.require_admin(caller)?;
        self.global.privacy = flags;
        tracing::info!("{}: privacy flags set to {:?}", self.global.name, flags);
        Ok(())
    }

    pub fn set_deposit_token(&mut self, caller: &Address, token: TokenId, enabled: bool) -> Result<(), StakingError> {
        self.global.acl.require_admin(caller)?;
        if enabled {
            self.global.deposit_tokens.insert(token);
        } else {
            self.global.deposit_tokens.remove(&token);
        }
        Ok(())
    }

    /// Attach a reward stream. One distributor per reward token.
    pub fn add_reward_stream(&mut self, caller: &Address, distributor: RewardDistributor) -> Result<(), StakingError> {
        self.global.acl.require_admin(caller)?;
        let token = distributor.reward_token();
        if self.global.distributors.contains_key(&token) {
            return Err(StakingError::InvalidConfiguration(format!(
                "{} already has a reward stream for {}",
                self.global.name, token
            )));
        }
        self.global.distributors.insert(token, distributor);
        self.global.cumulative_reward_per_token.entry(token).or_insert_with(U256::zero);
        Ok(())
    }

    pub fn distributor(&self, token: &TokenId) -> Option<&RewardDistributor> {
        self.global.distributors.get(token)
    }

    fn distributor_mut(&mut self, token: &TokenId) -> Result<&mut RewardDistributor, StakingError> {
        let name = &self.global.name;
        self.global
            .distributors
            .get_mut(token)
            .ok_or_else(|| StakingError::NotFound(format!("{} has no reward stream for {}", name, token)))
    }

    /// Add reward tokens to a stream's reserve.
    pub fn fund(&mut self, token: &TokenId, amount: Amount) -> Result<(), StakingError> {
        self.distributor_mut(token)?.fund(amount);
        Ok(())
    }

    pub fn update_last_distribution_time(
        &mut self,
        caller: &Address,
        token: &TokenId,
        now: Timestamp,
    ) -> Result<(), StakingError> {
        self.global.acl.require_admin(caller)?;
        self.distributor_mut(token)?.update_last_distribution_time(caller, now)
    }

    /// Change a stream's emission rate, checkpointing the tracker first.
    pub fn set_tokens_per_interval(
        &mut self,
        caller: &Address,
        token: &TokenId,
        tokens_per_interval: Amount,
        now: Timestamp,
    ) -> Result<(), StakingError> {
        self.global.acl.require_admin(caller)?;
        if self.distributor_mut(token)?.last_distribution_time().is_none() {
            return Err(StakingError::InvalidConfiguration(format!(
                "{}: reward stream {} is not checkpointed",
                self.global.name, token
            )));
        }
        self.update_rewards(now)?;
        self.distributor_mut(token)?
            .set_tokens_per_interval(caller, tokens_per_interval, now)
    }

    pub fn set_bonus_multiplier(
        &mut self,
        caller: &Address,
        token: &TokenId,
        bps: u32,
        now: Timestamp,
    ) -> Result<(), StakingError> {
        self.global.acl.require_admin(caller)?;
        self.update_rewards(now)?;
        self.distributor_mut(token)?.set_bonus_multiplier(caller, bps, now)
    }

    // --- accrual -------------------------------------------------------

    /// Pull distributor output into the cumulative reward per token.
    ///
    /// With no principal staked the distributors are advanced without
    /// releasing anything, so the first staker is not credited for the
    /// empty interval.
    pub fn update_rewards(&mut self, now: Timestamp) -> Result<(), StakingError> {
        let total = self.global.total_principal;
        for (token, distributor) in self.global.distributors.iter_mut() {
            if total == 0 {
                distributor.skip(now);
                continue;
            }
            let reward = distributor.distribute(now)?;
            if reward == 0 {
                continue;
            }
            let delta = mul_div(U256::from(reward), U256::from(TRACKER_PRECISION), U256::from(total))?;
            let cumulative = self
                .global
                .cumulative_reward_per_token
                .entry(*token)
                .or_insert_with(U256::zero);
            *cumulative = cumulative.saturating_add(delta);
            tracing::debug!(
                "{}: distributed {} of {} over principal {}",
                self.global.name,
                reward,
                token,
                total
            );
        }
        self.global.last_checkpoint_time = self.global.last_checkpoint_time.max(now);
        Ok(())
    }

    /// Checkpoint the tracker, then realize `account`'s share into its
    /// claimable balance.
    pub fn update_account(&mut self, account: Address, now: Timestamp) -> Result<(), StakingError> {
        self.update_rewards(now)?;
        let entry = self.accounts.entry(account).or_default();
        for (token, cumulative) in self.global.cumulative_reward_per_token.iter() {
            let previous = entry.reward_debt.get(token).copied().unwrap_or_default();
            let reward = accrued(entry.principal, *cumulative, previous, TRACKER_PRECISION)?;
            entry.reward_debt.insert(*token, *cumulative);
            if reward == 0 {
                continue;
            }
            *entry.claimable.entry(*token).or_insert(0) += reward;

            let previous_cumulative = entry.cumulative_rewards.get(token).copied().unwrap_or(0);
            let next_cumulative = previous_cumulative + reward;
            let previous_average = entry.average_staked_amount.get(token).copied().unwrap_or(0);
            let average = mul_div_amount(previous_average, previous_cumulative, next_cumulative)?
                + mul_div_amount(entry.principal, reward, next_cumulative)?;
            entry.average_staked_amount.insert(*token, average);
            entry.cumulative_rewards.insert(*token, next_cumulative);
        }
        Ok(())
    }

    // --- staking -------------------------------------------------------

    fn require_staking_allowed(&self, caller: &Address, payer: &Address, receiver: &Address) -> Result<(), StakingError> {
        if self.global.handlers.contains(caller) {
            return Ok(());
        }
        if self.global.privacy.staking {
            return Err(StakingError::Unauthorized(format!(
                "{}: staking is restricted to handlers",
                self.global.name
            )));
        }
        if caller != payer || caller != receiver {
            return Err(StakingError::Unauthorized(format!(
                "{}: {} may not stake on behalf of {}",
                self.global.name, caller, receiver
            )));
        }
        Ok(())
    }

    /// Stake `amount` of `deposit_token` paid by `payer` for `receiver`.
    ///
    /// The token movement itself is the caller's concern; the tracker only
    /// books principal and mints receipts.
    pub fn stake(
        &mut self,
        caller: &Address,
        payer: Address,
        receiver: Address,
        deposit_token: TokenId,
        amount: Amount,
        now: Timestamp,
    ) -> Result<(), StakingError> {
        self.require_staking_allowed(caller, &payer, &receiver)?;
        if amount == 0 {
            return Err(StakingError::InvalidInput("stake amount must be positive".to_string()));
        }
        if !self.global.deposit_tokens.contains(&deposit_token) {
            return Err(StakingError::InvalidInput(format!(
                "{}: {} is not a deposit token",
                self.global.name, deposit_token
            )));
        }

        self.update_account(receiver, now)?;

        let entry = self.accounts.entry(receiver).or_default();
        entry.principal += amount;
        entry.receipts += amount;
        *entry.deposit_balances.entry(deposit_token).or_insert(0) += amount;
        self.global.total_principal += amount;
        self.global.total_receipts += amount;
        *self
            .global
            .total_deposit_supply
            .entry(deposit_token)
            .or_insert(0) += amount;
        tracing::debug!(
            "{}: {} staked {} of {} for {}",
            self.global.name,
            payer,
            amount,
            deposit_token,
            receiver
        );
        Ok(())
    }

    /// Unstake `amount` of `deposit_token` from `account`, burning receipts.
    pub fn unstake(
        &mut self,
        caller: &Address,
        account: Address,
        deposit_token: TokenId,
        amount: Amount,
        now: Timestamp,
    ) -> Result<(), StakingError> {
        self.require_staking_allowed(caller, &account, &account)?;
        if amount == 0 {
            return Err(StakingError::InvalidInput("unstake amount must be positive".to_string()));
        }
        if !self.global.deposit_tokens.contains(&deposit_token) {
            return Err(StakingError::InvalidInput(format!(
                "{}: {} is not a deposit token",
                self.global.name, deposit_token
            )));
        }
        let principal = self.staked_amount(&account);
        let deposited = self.deposit_balance(&account, &deposit_token);
        let receipts = self.receipt_balance(&account);
        let available = principal.min(deposited).min(receipts);
        if amount > available {
            return Err(StakingError::InsufficientBalance {
                needed: amount,
                available,
            });
        }

        self.update_account(account, now)?;

        let entry = self.accounts.entry(account).or_default();
        entry.principal -= amount;
        entry.receipts -= amount;
        *entry.deposit_balances.entry(deposit_token).or_insert(0) -= amount;
        self.global.total_principal -= amount;
        self.global.total_receipts -= amount;
        *self
            .global
            .total_deposit_supply
            .entry(deposit_token)
            .or_insert(0) -= amount;
        tracing::debug!(
            "{}: {} unstaked {} of {}",
            self.global.name,
            account,
            amount,
            deposit_token
        );
        Ok(())
    }

    /// Move receipt tokens. Only handlers may move receipts they do not
    /// own, and only handlers may move any receipts in private transfer
    /// mode.
    pub fn transfer(&mut self, caller: &Address, from: Address, to: Address, amount: Amount) -> Result<(), StakingError> {
        let is_handler = self.global.handlers.contains(caller);
        if !is_handler && (self.global.privacy.transfer || *caller != from) {
            return Err(StakingError::Unauthorized(format!(
                "{}: {} may not transfer receipts of {}",
                self.global.name, caller, from
            )));
        }
        let available = self.receipt_balance(&from);
        if amount > available {
            return Err(StakingError::InsufficientBalance {
                needed: amount,
                available,
            });
        }
        self.accounts.entry(from).or_default().receipts -= amount;
        self.accounts.entry(to).or_default().receipts += amount;
        Ok(())
    }

    // --- claiming ------------------------------------------------------

    /// Claimable amount of `token` for `account` as of `now`. Pure read.
    pub fn claimable(&self, account: &Address, token: &TokenId, now: Timestamp) -> Result<Amount, StakingError> {
        let default = TrackerAccount::default();
        let entry = self.accounts.get(account).unwrap_or(&default);
        let mut cumulative = self
            .global
            .cumulative_reward_per_token
            .get(token)
            .copied()
            .unwrap_or_default();
        let total = self.global.total_principal;
        if total > 0 {
            if let Some(distributor) = self.global.distributors.get(token) {
                let pending = distributor.pending_distribution(now)?;
                cumulative = cumulative.saturating_add(mul_div(
                    U256::from(pending),
                    U256::from(TRACKER_PRECISION),
                    U256::from(total),
                )?);
            }
        }
        let previous = entry.reward_debt.get(token).copied().unwrap_or_default();
        let fresh = accrued(entry.principal, cumulative, previous, TRACKER_PRECISION)?;
        Ok(entry.claimable.get(token).copied().unwrap_or(0) + fresh)
    }

    /// Realize every claimable reward of `account`.
    ///
    /// Returns one entry per reward token with a non-zero claim. Paying out
    /// `Transfer` entries is the caller's job.
    pub fn claim(
        &mut self,
        caller: &Address,
        account: Address,
        receiver: Address,
        now: Timestamp,
    ) -> Result<Vec<ClaimedReward>, StakingError> {
        let is_handler = self.global.handlers.contains(caller);
        if !is_handler && (self.global.privacy.claiming || *caller != account) {
            return Err(StakingError::Unauthorized(format!(
                "{}: {} may not claim for {}",
                self.global.name, caller, account
            )));
        }

        self.update_account(account, now)?;

        let destination = if self.global.privacy.external_rewarding {
            ClaimDestination::Restake
        } else {
            ClaimDestination::Transfer(receiver)
        };
        let entry = self.accounts.entry(account).or_default();
        let mut claimed = Vec::new();
        for (token, amount) in entry.claimable.iter_mut() {
            if *amount == 0 {
                continue;
            }
            claimed.push(ClaimedReward {
                token: *token,
                amount: *amount,
                destination,
            });
            *amount = 0;
        }
        for reward in &claimed {
            tracing::debug!(
                "{}: {} claimed {} of {}",
                self.global.name,
                account,
                reward.amount,
                reward.token
            );
        }
        Ok(claimed)
    }

    // --- reads ---------------------------------------------------------

    pub fn staked_amount(&self, account: &Address) -> Amount {
        self.accounts.get(account).map(|a| a.principal).unwrap_or(0)
    }

    pub fn receipt_balance(&self, account: &Address) -> Amount {
        self.accounts.get(account).map(|a| a.receipts).unwrap_or(0)
    }

    pub fn deposit_balance(&self, account: &Address, token: &TokenId) -> Amount {
        self.accounts
            .get(account)
            .and_then(|a| a.deposit_balances.get(token).copied())
            .unwrap_or(0)
    }

    pub fn total_principal(&self) -> Amount {
        self.global.total_principal
    }

    pub fn total_receipts(&self) -> Amount {
        self.global.total_receipts
    }

    pub fn cumulative_reward_per_token(&self, token: &TokenId) -> U256 {
        self.global
            .cumulative_reward_per_token
            .get(token)
            .copied()
            .unwrap_or_default()
    }

    pub fn cumulative_rewards(&self, account: &Address, token: &TokenId) -> Amount {
        self.accounts
            .get(account)
            .and_then(|a| a.cumulative_rewards.get(token).copied())
            .unwrap_or(0)
    }

    pub fn average_staked_amount(&self, account: &Address, token: &TokenId) -> Amount {
        self.accounts
            .get(account)
            .and_then(|a| a.average_staked_amount.get(token).copied())
            .unwrap_or(0)
    }

    pub fn reward_tokens(&self) -> Vec<TokenId> {
        self.global.distributors.keys().copied().collect()
    }

    pub fn is_handler(&self, who: &Address) -> bool {
        self.global.handlers.contains(who)
    }

    pub fn privacy(&self) -> PrivacyFlags {
        self.global.privacy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ADMIN: Address = Address::from_low_u8(1);
    const ALICE: Address = Address::from_low_u8(2);
    const BOB: Address = Address::from_low_u8(3);
    const ROUTER: Address = Address::from_low_u8(4);
    const TRACKER: Address = Address::from_low_u8(0x40);
    const WOO: TokenId = Address::from_low_u8(0x10);
    const ES_WOO: TokenId = Address::from_low_u8(0x11);

    const T0: Timestamp = 1_000;

    fn tracker(rate: Amount) -> RewardTracker {
        let mut t = RewardTracker::new(TRACKER, "sWoo", ADMIN);
        t.set_deposit_token(&ADMIN, WOO, true).unwrap();
        t.set_handler(&ADMIN, ROUTER, true).unwrap();
        t.add_reward_stream(&ADMIN, RewardDistributor::linear(ADMIN, ES_WOO))
            .unwrap();
        t.fund(&ES_WOO, 1_000_000_000).unwrap();
        t.update_last_distribution_time(&ADMIN, &ES_WOO, T0).unwrap();
        t.set_tokens_per_interval(&ADMIN, &ES_WOO, rate, T0).unwrap();
        t
    }

    #[test]
    fn test_stake_and_unstake_bookkeeping() {
        let mut t = tracker(0);
        t.stake(&ALICE, ALICE, ALICE, WOO, 100, T0).unwrap();
        assert_eq!(t.staked_amount(&ALICE), 100);
        assert_eq!(t.receipt_balance(&ALICE), 100);
        assert_eq!(t.deposit_balance(&ALICE, &WOO), 100);
        t.unstake(&ALICE, ALICE, WOO, 40, T0).unwrap();
        assert_eq!(t.staked_amount(&ALICE), 60);
        assert_eq!(t.total_principal(), 60);
        assert_eq!(t.total_receipts(), 60);
    }

    #[test]
    fn test_unstake_insufficient_balance() {
        let mut t = tracker(0);
        t.stake(&ALICE, ALICE, ALICE, WOO, 10, T0).unwrap();
        let err = t.unstake(&ALICE, ALICE, WOO, 11, T0).unwrap_err();
        assert_eq!(
            err,
            StakingError::InsufficientBalance {
                needed: 11,
                available: 10
            }
        );
        assert_eq!(t.staked_amount(&ALICE), 10);
    }

    #[test]
    fn test_rejects_unknown_deposit_token() {
        let mut t = tracker(0);
        assert!(matches!(
            t.stake(&ALICE, ALICE, ALICE, ES_WOO, 10, T0),
            Err(StakingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rewards_proportional_to_principal() {
        let mut t = tracker(3);
        t.stake(&ALICE, ALICE, ALICE, WOO, 100, T0).unwrap();
        t.stake(&BOB, BOB, BOB, WOO, 200, T0).unwrap();
        let alice = t.claimable(&ALICE, &ES_WOO, T0 + 10).unwrap();
        let bob = t.claimable(&BOB, &ES_WOO, T0 + 10).unwrap();
        assert_eq!(alice, 10);
        assert_eq!(bob, 2 * alice);
    }

    #[test]
    fn test_accrue_before_mutate() {
        let mut t = tracker(10);
        t.stake(&ALICE, ALICE, ALICE, WOO, 100, T0).unwrap();
        // Bob joins after 10s: Alice keeps the first 100 alone.
        t.stake(&BOB, BOB, BOB, WOO, 100, T0 + 10).unwrap();
        assert_eq!(t.claimable(&ALICE, &ES_WOO, T0 + 20).unwrap(), 150);
        assert_eq!(t.claimable(&BOB, &ES_WOO, T0 + 20).unwrap(), 50);
    }

    #[test]
    fn test_empty_interval_is_not_credited() {
        let mut t = tracker(10);
        t.stake(&ALICE, ALICE, ALICE, WOO, 100, T0 + 50).unwrap();
        assert_eq!(t.claimable(&ALICE, &ES_WOO, T0 + 50).unwrap(), 0);
        assert_eq!(t.claimable(&ALICE, &ES_WOO, T0 + 51).unwrap(), 10);
    }

    #[test]
    fn test_claim_transfers_and_resets() {
        let mut t = tracker(10);
        t.stake(&ALICE, ALICE, ALICE, WOO, 100, T0).unwrap();
        let claimed = t.claim(&ALICE, ALICE, BOB, T0 + 5).unwrap();
        assert_eq!(
            claimed,
            vec![ClaimedReward {
                token: ES_WOO,
                amount: 50,
                destination: ClaimDestination::Transfer(BOB),
            }]
        );
        assert_eq!(t.claimable(&ALICE, &ES_WOO, T0 + 5).unwrap(), 0);
        assert_eq!(t.cumulative_rewards(&ALICE, &ES_WOO), 50);
        assert_eq!(t.average_staked_amount(&ALICE, &ES_WOO), 100);
    }

    #[test]
    fn test_external_rewarding_restakes() {
        let mut t = tracker(10);
        t.set_privacy(
            &ADMIN,
            PrivacyFlags {
                external_rewarding: true,
                ..PrivacyFlags::default()
            },
        )
        .unwrap();
        t.stake(&ALICE, ALICE, ALICE, WOO, 100, T0).unwrap();
        let claimed = t.claim(&ALICE, ALICE, ALICE, T0 + 1).unwrap();
        assert_eq!(claimed[0].destination, ClaimDestination::Restake);
    }

    #[test]
    fn test_private_staking_requires_handler() {
        let mut t = tracker(0);
        t.set_privacy(
            &ADMIN,
            PrivacyFlags {
                staking: true,
                claiming: true,
                ..PrivacyFlags::default()
            },
        )
        .unwrap();
        assert!(matches!(
            t.stake(&ALICE, ALICE, ALICE, WOO, 10, T0),
            Err(StakingError::Unauthorized(_))
        ));
        t.stake(&ROUTER, ALICE, ALICE, WOO, 10, T0).unwrap();
        assert!(t.claim(&ALICE, ALICE, ALICE, T0).is_err());
        assert!(t.claim(&ROUTER, ALICE, ALICE, T0).is_ok());
    }

    #[test]
    fn test_stake_for_other_requires_handler() {
        let mut t = tracker(0);
        assert!(t.stake(&ALICE, ALICE, BOB, WOO, 10, T0).is_err());
        assert!(t.stake(&ROUTER, ALICE, BOB, WOO, 10, T0).is_ok());
        assert_eq!(t.staked_amount(&BOB), 10);
    }

    #[test]
    fn test_private_transfer_mode() {
        let mut t = tracker(0);
        t.stake(&ALICE, ALICE, ALICE, WOO, 10, T0).unwrap();
        t.transfer(&ALICE, ALICE, BOB, 4).unwrap();
        assert_eq!(t.receipt_balance(&BOB), 4);
        // Principal stays with the staker.
        assert_eq!(t.staked_amount(&ALICE), 10);

        t.set_privacy(
            &ADMIN,
            PrivacyFlags {
                transfer: true,
                ..PrivacyFlags::default()
            },
        )
        .unwrap();
        assert!(t.transfer(&ALICE, ALICE, BOB, 1).is_err());
        t.transfer(&ROUTER, ALICE, TRACKER, 6).unwrap();
        assert_eq!(t.receipt_balance(&TRACKER), 6);
        assert!(matches!(
            t.transfer(&ROUTER, ALICE, BOB, 1),
            Err(StakingError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_set_tokens_per_interval_checkpoints() {
        let mut t = tracker(10);
        t.stake(&ALICE, ALICE, ALICE, WOO, 100, T0).unwrap();
        t.set_tokens_per_interval(&ADMIN, &ES_WOO, 1, T0 + 10).unwrap();
        assert_eq!(t.claimable(&ALICE, &ES_WOO, T0 + 20).unwrap(), 110);
    }

    #[test]
    fn test_set_rate_requires_checkpoint() {
        let mut t = RewardTracker::new(TRACKER, "sWoo", ADMIN);
        t.add_reward_stream(&ADMIN, RewardDistributor::linear(ADMIN, ES_WOO))
            .unwrap();
        assert!(matches!(
            t.set_tokens_per_interval(&ADMIN, &ES_WOO, 1, T0),
            Err(StakingError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_duplicate_reward_stream_rejected() {
        let mut t = tracker(0);
        assert!(t
            .add_reward_stream(&ADMIN, RewardDistributor::linear(ADMIN, ES_WOO))
            .is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Stake(u8, u128),
        Unstake(u8, u128),
        Claim(u8),
        Wait(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..3, 1u128..1_000_000).prop_map(|(u, a)| Op::Stake(u, a)),
            (0u8..3, 1u128..1_000_000).prop_map(|(u, a)| Op::Unstake(u, a)),
            (0u8..3).prop_map(Op::Claim),
            (0u64..1_000).prop_map(Op::Wait),
        ]
    }

    proptest! {
        #[test]
        fn prop_ledger_invariants(ops in proptest::collection::vec(op(), 1..60)) {
            let mut t = tracker(7);
            let users = [ALICE, BOB, Address::from_low_u8(5)];
            let mut now = T0;
            let mut claimed_total = 0u128;
            let mut last_cumulative = U256::zero();
            for op in ops {
                match op {
                    Op::Stake(u, a) => {
                        let who = users[u as usize];
                        t.stake(&who, who, who, WOO, a, now).unwrap();
                    }
                    Op::Unstake(u, a) => {
                        let who = users[u as usize];
                        let _ = t.unstake(&who, who, WOO, a, now);
                    }
                    Op::Claim(u) => {
                        let who = users[u as usize];
                        for c in t.claim(&who, who, who, now).unwrap() {
                            claimed_total += c.amount;
                        }
                    }
                    Op::Wait(s) => now += s,
                }
                let sum: u128 = t.accounts().values().map(|a| a.principal).sum();
                prop_assert_eq!(sum, t.total_principal());
                let cumulative = t.cumulative_reward_per_token(&ES_WOO);
                prop_assert!(cumulative >= last_cumulative);
                last_cumulative = cumulative;
            }
            let mut pending = 0u128;
            for who in users.iter() {
                pending += t.claimable(who, &ES_WOO, now).unwrap();
            }
            let distributed = 1_000_000_000 - t.distributor(&ES_WOO).unwrap().reserve()
                + t.distributor(&ES_WOO).unwrap().pending_distribution(now).unwrap();
            prop_assert!(claimed_total + pending <= distributed);
        }
    }
}
