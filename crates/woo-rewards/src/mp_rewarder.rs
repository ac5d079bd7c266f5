// crates/woo-rewards/src/mp_rewarder.rs
//
// Multiplier-point rewarder.
//
// Multiplier points accrue continuously at a fixed rate per unit of
// weight, expressed in basis points of weight per year:
//
//   accPointPerWeight(t) += rate * elapsed * PRECISION / (10_000 * SECONDS_PER_YEAR)
//   weight(user)          = wooBalance(user) * ratio(user) / 10_000
//
// The ratio comes from the `RewardBooster`. Because the rate is per unit
// of weight, the accumulator is a function of time alone; the rate history
// is kept so that its value at any past second can be reconstructed. That
// is what lets an NFT override be split exactly at its expiry without a
// call at that moment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use woo_core::access::AccessControl;
use woo_core::error::StakingError;
use woo_core::math::{accrued, mul_div, BPS_DIVISOR, PRECISION, SECONDS_PER_YEAR, U256};
use woo_core::types::{Address, Amount, Timestamp};

use crate::booster::RewardBooster;

/// A period during which the rate was constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct RateSegment {
    start: Timestamp,
    acc_at_start: U256,
    rate_bps: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpUserInfo {
    /// Staked WOO at the last checkpoint.
    pub stake: Amount,
    /// Accumulator value at the last checkpoint.
    pub reward_debt: U256,
    pub checkpoint: Timestamp,
    /// Realized but unclaimed points.
    pub pending: Amount,
    pub last_claim: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpRewarder {
    acl: AccessControl,
    segments: Vec<RateSegment>,
    acc_point_per_weight: U256,
    last_reward_ts: Timestamp,
    users: BTreeMap<Address, MpUserInfo>,
}

impl MpRewarder {
    pub fn new(owner: Address, reward_rate_bps: Amount, now: Timestamp) -> Self {
        Self {
            acl: AccessControl::new(owner),
            segments: vec![RateSegment {
                start: now,
                acc_at_start: U256::zero(),
                rate_bps: reward_rate_bps,
            }],
            acc_point_per_weight: U256::zero(),
            last_reward_ts: now,
            users: BTreeMap::new(),
        }
    }

    pub fn acl_mut(&mut self) -> &mut AccessControl {
        &mut self.acl
    }

    pub fn reward_rate(&self) -> Amount {
        self.segments.last().map(|s| s.rate_bps).unwrap_or(0)
    }

    pub fn acc_point_per_weight(&self) -> U256 {
        self.acc_point_per_weight
    }

    pub fn last_reward_ts(&self) -> Timestamp {
        self.last_reward_ts
    }

    pub fn user_info(&self, user: &Address) -> Option<&MpUserInfo> {
        self.users.get(user)
    }

    pub fn user_addresses(&self) -> Vec<Address> {
        self.users.keys().copied().collect()
    }

    /// Accumulator value at time `t`.
    pub fn acc_at(&self, t: Timestamp) -> Result<U256, StakingError> {
        let idx = self.segments.partition_point(|s| s.start <= t);
        let segment = match idx.checked_sub(1).and_then(|i| self.segments.get(i)) {
            Some(segment) => segment,
            None => return Ok(self.segments.first().map(|s| s.acc_at_start).unwrap_or_default()),
        };
        let elapsed = t - segment.start;
        let gained = mul_div(
            U256::from(segment.rate_bps) * U256::from(elapsed),
            U256::from(PRECISION),
            U256::from(BPS_DIVISOR) * U256::from(SECONDS_PER_YEAR),
        )?;
        Ok(segment.acc_at_start.saturating_add(gained))
    }

    /// Advance the global accumulator to `now`.
    pub fn update_reward(&mut self, now: Timestamp) -> Result<(), StakingError> {
        if now <= self.last_reward_ts {
            return Ok(());
        }
        self.acc_point_per_weight = self.acc_at(now)?.max(self.acc_point_per_weight);
        self.last_reward_ts = now;
        Ok(())
    }

    /// Change the rate for future accrual. Admin only.
    pub fn set_reward_rate(&mut self, caller: &Address, rate_bps: Amount, now: Timestamp) -> Result<(), StakingError> {
        self.acl.require_admin(caller)?;
        let last_start = self.segments.last().map(|s| s.start).unwrap_or(0);
        if now < last_start {
            return Err(StakingError::InvalidInput(format!(
                "rate change at {} precedes the current rate period starting at {}",
                now, last_start
            )));
        }
        self.update_reward(now)?;
        let acc = self.acc_at(now)?;
        match self.segments.last_mut() {
            Some(segment) if segment.start == now => segment.rate_bps = rate_bps,
            _ => self.segments.push(RateSegment {
                start: now,
                acc_at_start: acc,
                rate_bps,
            }),
        }
        tracing::info!("mp rewarder: reward rate set to {} bps/year", rate_bps);
        Ok(())
    }

    /// Points earned by `info` between its checkpoint and `now`.
    ///
    /// An override that expired inside the window splits it: the part up
    /// to the expiry accrues at the overridden ratio, the rest at the plain
    /// ratio.
    fn accrue(
        &self,
        user: &Address,
        info: &MpUserInfo,
        booster: &RewardBooster,
        now: Timestamp,
    ) -> Result<Amount, StakingError> {
        if info.stake == 0 || now <= info.checkpoint {
            return Ok(0);
        }
        let acc_now = self.acc_at(now)?;
        let from = info.checkpoint;
        match booster.override_of(user) {
            Some(o) if o.expiry >= from && o.expiry < now => {
                let acc_expiry = self.acc_at(o.expiry)?;
                let boosted = booster.weight_at(user, info.stake, from)?;
                let plain = booster.weight_at(user, info.stake, now)?;
                Ok(accrued(boosted, acc_expiry, info.reward_debt, PRECISION)?
                    + accrued(plain, acc_now, acc_expiry, PRECISION)?)
            }
            _ => {
                let weight = booster.weight_at(user, info.stake, from)?;
                accrued(weight, acc_now, info.reward_debt, PRECISION)
            }
        }
    }

    /// Current weight of `user`.
    pub fn weight_of(&self, user: &Address, booster: &RewardBooster, now: Timestamp) -> Result<Amount, StakingError> {
        let stake = self.users.get(user).map(|u| u.stake).unwrap_or(0);
        booster.weight_at(user, stake, now)
    }

    pub fn pending_reward(&self, user: &Address, booster: &RewardBooster, now: Timestamp) -> Result<Amount, StakingError> {
        match self.users.get(user) {
            Some(info) => Ok(info.pending + self.accrue(user, info, booster, now)?),
            None => Ok(0),
        }
    }

    /// Pending points across every user.
    pub fn all_pending_reward(&self, booster: &RewardBooster, now: Timestamp) -> Result<Amount, StakingError> {
        let mut total: Amount = 0;
        for (user, info) in &self.users {
            total = total.saturating_add(info.pending + self.accrue(user, info, booster, now)?);
        }
        Ok(total)
    }

    /// Realize `user`'s accrual into pending and move the checkpoint to
    /// `now`. The cached stake is left unchanged.
    pub fn update_reward_for_user(
        &mut self,
        user: Address,
        booster: &RewardBooster,
        now: Timestamp,
    ) -> Result<(), StakingError> {
        self.update_reward(now)?;
        let info = self.users.get(&user).cloned().unwrap_or_default();
        let gained = self.accrue(&user, &info, booster, now)?;
        let acc = self.acc_at(now)?;
        let entry = self.users.entry(user).or_default();
        entry.pending += gained;
        entry.reward_debt = acc;
        entry.checkpoint = now;
        Ok(())
    }

    /// Refresh the cached stake and reset the debt to the current
    /// accumulator. Must follow `update_reward_for_user` at the same `now`.
    pub fn clear_reward_to_debt(&mut self, user: Address, stake: Amount, now: Timestamp) -> Result<(), StakingError> {
        let acc = self.acc_at(now)?;
        let entry = self.users.entry(user).or_default();
        entry.stake = stake;
        entry.reward_debt = acc;
        entry.checkpoint = now;
        Ok(())
    }

    /// Checkpoint then set a new stake in one step.
    pub fn sync_user(
        &mut self,
        user: Address,
        stake: Amount,
        booster: &RewardBooster,
        now: Timestamp,
    ) -> Result<(), StakingError> {
        self.update_reward_for_user(user, booster, now)?;
        self.clear_reward_to_debt(user, stake, now)
    }

    /// Realize and hand out everything pending for `user`. The caller
    /// credits the points to the user's MP balance.
    pub fn claim(&mut self, user: Address, booster: &RewardBooster, now: Timestamp) -> Result<Amount, StakingError> {
        self.update_reward_for_user(user, booster, now)?;
        let entry = self.users.entry(user).or_default();
        let amount = entry.pending;
        entry.pending = 0;
        entry.last_claim = now;
        if amount > 0 {
            tracing::debug!("mp rewarder: {} claimed {} points", user, amount);
        }
        Ok(amount)
    }
}
