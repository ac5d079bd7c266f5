// crates/woo-rewards/src/distributor.rs
//
// Reward distributor: how many reward tokens unlock per second for one
// reward stream of a tracker.
//
//   Linear: tokensPerInterval * elapsed
//   Bonus:  tokensPerInterval * elapsed * bonusMultiplierBps / 10_000
//
// Output is capped by the reserve the distributor holds. Rate changes
// bank whatever was pending under the old rate, so already-elapsed time is
// never repriced.

use serde::{Deserialize, Serialize};

use woo_core::access::AccessControl;
use woo_core::error::StakingError;
use woo_core::math::{mul_div_amount, BPS_DIVISOR};
use woo_core::types::{Address, Amount, Timestamp, TokenId};

/// Emission curve of a distributor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Emission {
    Linear,
    Bonus { bonus_multiplier_bps: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardDistributor {
    acl: AccessControl,
    reward_token: TokenId,
    emission: Emission,
    tokens_per_interval: Amount,
    /// `None` until an admin initialises the checkpoint.
    last_distribution_time: Option<Timestamp>,
    reserve: Amount,
    /// Output accrued under a previous rate and not yet distributed.
    banked: Amount,
}

impl RewardDistributor {
    pub fn linear(owner: Address, reward_token: TokenId) -> Self {
        Self::with_emission(owner, reward_token, Emission::Linear)
    }

    pub fn bonus(owner: Address, reward_token: TokenId, bonus_multiplier_bps: u32) -> Self {
        Self::with_emission(owner, reward_token, Emission::Bonus { bonus_multiplier_bps })
    }

    fn with_emission(owner: Address, reward_token: TokenId, emission: Emission) -> Self {
        Self {
            acl: AccessControl::new(owner),
            reward_token,
            emission,
            tokens_per_interval: 0,
            last_distribution_time: None,
            reserve: 0,
            banked: 0,
        }
    }

    pub fn reward_token(&self) -> TokenId {
        self.reward_token
    }

    pub fn emission(&self) -> Emission {
        self.emission
    }

    pub fn tokens_per_interval(&self) -> Amount {
        self.tokens_per_interval
    }

    pub fn last_distribution_time(&self) -> Option<Timestamp> {
        self.last_distribution_time
    }

    pub fn reserve(&self) -> Amount {
        self.reserve
    }

    pub fn acl_mut(&mut self) -> &mut AccessControl {
        &mut self.acl
    }

    /// Add reward tokens to the reserve.
    pub fn fund(&mut self, amount: Amount) {
        self.reserve = self.reserve.saturating_add(amount);
    }

    /// Tokens unlocked since the last checkpoint, capped by the reserve.
    ///
    /// Zero (not an error) when uninitialised, when the rate is zero, or
    /// when no time has elapsed.
    pub fn pending_distribution(&self, now: Timestamp) -> Result<Amount, StakingError> {
        let fresh = match self.last_distribution_time {
            Some(last) if now > last && self.tokens_per_interval > 0 => {
                let elapsed = (now - last) as Amount;
                let linear = mul_div_amount(self.tokens_per_interval, elapsed, 1)?;
                match self.emission {
                    Emission::Linear => linear,
                    Emission::Bonus { bonus_multiplier_bps } => {
                        mul_div_amount(linear, bonus_multiplier_bps as Amount, BPS_DIVISOR)?
                    }
                }
            }
            _ => 0,
        };
        Ok(self.banked.saturating_add(fresh).min(self.reserve))
    }

    /// Release the pending output and advance the checkpoint to `now`.
    pub fn distribute(&mut self, now: Timestamp) -> Result<Amount, StakingError> {
        let amount = self.pending_distribution(now)?;
        self.advance(now);
        self.banked = 0;
        self.reserve -= amount;
        Ok(amount)
    }

    /// Advance the checkpoint without releasing anything. The skipped
    /// output stays in the reserve.
    pub fn skip(&mut self, now: Timestamp) {
        if self.advance(now) {
            tracing::warn!(
                "distributor for {} skipped an interval with no stakers",
                self.reward_token
            );
        }
    }

    fn advance(&mut self, now: Timestamp) -> bool {
        match self.last_distribution_time {
            Some(last) if now > last => {
                self.last_distribution_time = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Initialise (or reset) the distribution checkpoint. Admin only.
    pub fn update_last_distribution_time(&mut self, caller: &Address, now: Timestamp) -> Result<(), StakingError> {
        self.acl.require_admin(caller)?;
        self.last_distribution_time = Some(now);
        Ok(())
    }

    /// Change the emission rate for future intervals. Admin only.
    ///
    /// # Errors
    /// `InvalidConfiguration` if the checkpoint was never initialised.
    pub fn set_tokens_per_interval(
        &mut self,
        caller: &Address,
        tokens_per_interval: Amount,
        now: Timestamp,
    ) -> Result<(), StakingError> {
        self.acl.require_admin(caller)?;
        self.bank(now)?;
        self.tokens_per_interval = tokens_per_interval;
        tracing::info!(
            "distributor for {} set tokens_per_interval to {}",
            self.reward_token,
            tokens_per_interval
        );
        Ok(())
    }

    /// Change the bonus multiplier for future intervals. Admin only; bonus
    /// distributors only.
    pub fn set_bonus_multiplier(&mut self, caller: &Address, bps: u32, now: Timestamp) -> Result<(), StakingError> {
        self.acl.require_admin(caller)?;
        if !matches!(self.emission, Emission::Bonus { .. }) {
            return Err(StakingError::InvalidConfiguration(format!(
                "distributor for {} has no bonus multiplier",
                self.reward_token
            )));
        }
        self.bank(now)?;
        self.emission = Emission::Bonus { bonus_multiplier_bps: bps };
        tracing::info!("distributor for {} set bonus multiplier to {} bps", self.reward_token, bps);
        Ok(())
    }

    fn bank(&mut self, now: Timestamp) -> Result<(), StakingError> {
        if self.last_distribution_time.is_none() {
            return Err(StakingError::InvalidConfiguration(format!(
                "distributor for {} has no distribution checkpoint",
                self.reward_token
            )));
        }
        self.banked = self.pending_distribution(now)?;
        self.advance(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ADMIN: Address = Address::from_low_u8(1);
    const MALLORY: Address = Address::from_low_u8(9);
    const ES_WOO: TokenId = Address::from_low_u8(0x20);

    fn started(rate: Amount, reserve: Amount) -> RewardDistributor {
        let mut d = RewardDistributor::linear(ADMIN, ES_WOO);
        d.fund(reserve);
        d.update_last_distribution_time(&ADMIN, 1_000).unwrap();
        d.set_tokens_per_interval(&ADMIN, rate, 1_000).unwrap();
        d
    }

    #[test]
    fn test_linear_pending() {
        let d = started(5, 1_000_000);
        assert_eq!(d.pending_distribution(1_000).unwrap(), 0);
        assert_eq!(d.pending_distribution(1_010).unwrap(), 50);
    }

    #[test]
    fn test_bonus_multiplier() {
        let mut d = RewardDistributor::bonus(ADMIN, ES_WOO, 5_000);
        d.fund(1_000_000);
        d.update_last_distribution_time(&ADMIN, 0).unwrap();
        d.set_tokens_per_interval(&ADMIN, 100, 0).unwrap();
        assert_eq!(d.pending_distribution(10).unwrap(), 500);
    }

    #[test]
    fn test_distribute_advances_and_debits_reserve() {
        let mut d = started(5, 1_000);
        assert_eq!(d.distribute(1_010).unwrap(), 50);
        assert_eq!(d.reserve(), 950);
        assert_eq!(d.last_distribution_time(), Some(1_010));
        assert_eq!(d.distribute(1_010).unwrap(), 0);
    }

    #[test]
    fn test_capped_by_reserve() {
        let mut d = started(100, 250);
        assert_eq!(d.distribute(1_010).unwrap(), 250);
        assert_eq!(d.reserve(), 0);
        assert_eq!(d.distribute(1_020).unwrap(), 0);
    }

    #[test]
    fn test_uninitialised_setter_rejected() {
        let mut d = RewardDistributor::linear(ADMIN, ES_WOO);
        assert!(matches!(
            d.set_tokens_per_interval(&ADMIN, 1, 0),
            Err(StakingError::InvalidConfiguration(_))
        ));
        assert_eq!(d.pending_distribution(100).unwrap(), 0);
    }

    #[test]
    fn test_setters_require_admin() {
        let mut d = started(1, 10);
        assert!(matches!(
            d.set_tokens_per_interval(&MALLORY, 2, 1_001),
            Err(StakingError::Unauthorized(_))
        ));
        assert!(d.update_last_distribution_time(&MALLORY, 5).is_err());
    }

    #[test]
    fn test_rate_change_not_retroactive() {
        let mut d = started(10, 1_000_000);
        // 10 seconds at rate 10, then 10 seconds at rate 1.
        d.set_tokens_per_interval(&ADMIN, 1, 1_010).unwrap();
        assert_eq!(d.pending_distribution(1_020).unwrap(), 110);
        assert_eq!(d.distribute(1_020).unwrap(), 110);
    }

    #[test]
    fn test_linear_has_no_bonus_multiplier() {
        let mut d = started(1, 10);
        assert!(d.set_bonus_multiplier(&ADMIN, 1_000, 1_001).is_err());
    }

    #[test]
    fn test_skip_keeps_reserve() {
        let mut d = started(10, 1_000);
        d.skip(1_050);
        assert_eq!(d.reserve(), 1_000);
        assert_eq!(d.pending_distribution(1_050).unwrap(), 0);
        assert_eq!(d.pending_distribution(1_051).unwrap(), 10);
    }

    proptest! {
        #[test]
        fn prop_never_distributes_more_than_funded(
            reserve in 0u128..1_000_000,
            rate in 0u128..10_000,
            steps in proptest::collection::vec(0u64..100, 1..30),
        ) {
            let mut d = started(rate, reserve);
            let mut now = 1_000;
            let mut total = 0;
            for step in steps {
                now += step;
                total += d.distribute(now).unwrap();
            }
            prop_assert!(total <= reserve);
            prop_assert_eq!(total + d.reserve(), reserve);
        }
    }
}
