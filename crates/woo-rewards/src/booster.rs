// crates/woo-rewards/src/booster.rs
//
// Reward booster: per-user ratio applied to stake weight in the MP
// rewarder.
//
//   boosted(user) = compoundOptIn[user] && !manualOverride[user]
//   ratio(user)   = boosted ? boostRatio : baseRatio
//
// A time-limited override (from a consumed boost NFT) multiplies the ratio
// until its expiry and then lapses on its own. Every flag change first
// checkpoints the user in the MP rewarder under the old ratio, so ratio
// changes only ever affect future accrual.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use woo_core::access::AccessControl;
use woo_core::error::StakingError;
use woo_core::math::{mul_div_amount, BPS_DIVISOR};
use woo_core::types::{Address, Amount, Timestamp};

use crate::mp_rewarder::MpRewarder;
use crate::weights::StakeWeights;

/// Ratio of a user who is not boosted (1.0x).
pub const BASE_RATIO_BPS: u32 = 10_000;

/// Ratio of a boosted user (1.5x).
pub const DEFAULT_BOOST_RATIO_BPS: u32 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostOverride {
    pub multiplier_bps: u32,
    /// Last second at which the override applies.
    pub expiry: Timestamp,
}

/// Full decision trail behind a user's ratio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostRatioDetail {
    pub user: Address,
    pub compound_opt_in: bool,
    pub manual_override: bool,
    pub boosted: bool,
    pub ratio_bps: u32,
    pub active_override: Option<BoostOverride>,
    pub effective_ratio_bps: Amount,
}

/// Everything the booster stores about one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoosterRecord {
    pub compound_opt_in: bool,
    pub manual_override: bool,
    pub boost_override: Option<BoostOverride>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardBooster {
    acl: AccessControl,
    base_ratio_bps: u32,
    boost_ratio_bps: u32,
    compound_opt_in: BTreeMap<Address, bool>,
    manual_override: BTreeMap<Address, bool>,
    overrides: BTreeMap<Address, BoostOverride>,
}

impl RewardBooster {
    pub fn new(owner: Address) -> Self {
        Self::with_ratio(owner, DEFAULT_BOOST_RATIO_BPS)
    }

    pub fn with_ratio(owner: Address, boost_ratio_bps: u32) -> Self {
        Self {
            acl: AccessControl::new(owner),
            base_ratio_bps: BASE_RATIO_BPS,
            boost_ratio_bps,
            compound_opt_in: BTreeMap::new(),
            manual_override: BTreeMap::new(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn acl_mut(&mut self) -> &mut AccessControl {
        &mut self.acl
    }

    pub fn boost_ratio_bps(&self) -> u32 {
        self.boost_ratio_bps
    }

    /// Per-user records, for storage one row per user.
    pub fn records(&self) -> BTreeMap<Address, BoosterRecord> {
        let mut records: BTreeMap<Address, BoosterRecord> = BTreeMap::new();
        for (user, flag) in &self.compound_opt_in {
            records.entry(*user).or_default().compound_opt_in = *flag;
        }
        for (user, flag) in &self.manual_override {
            records.entry(*user).or_default().manual_override = *flag;
        }
        for (user, o) in &self.overrides {
            records.entry(*user).or_default().boost_override = Some(*o);
        }
        records.retain(|_, record| *record != BoosterRecord::default());
        records
    }

    /// Copy of the configuration with no per-user state.
    pub fn without_users(&self) -> Self {
        Self {
            compound_opt_in: BTreeMap::new(),
            manual_override: BTreeMap::new(),
            overrides: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Reinstate one user's persisted record.
    pub fn insert_record(&mut self, user: Address, record: BoosterRecord) {
        if record.compound_opt_in {
            self.compound_opt_in.insert(user, true);
        }
        if record.manual_override {
            self.manual_override.insert(user, true);
        }
        if let Some(o) = record.boost_override {
            self.overrides.insert(user, o);
        }
    }

    pub fn is_boosted(&self, user: &Address) -> bool {
        let opted_in = self.compound_opt_in.get(user).copied().unwrap_or(false);
        let excluded = self.manual_override.get(user).copied().unwrap_or(false);
        opted_in && !excluded
    }

    /// Ratio from the opt-in and override flags, ignoring any NFT boost.
    pub fn ratio_of(&self, user: &Address) -> u32 {
        if self.is_boosted(user) {
            self.boost_ratio_bps
        } else {
            self.base_ratio_bps
        }
    }

    pub fn override_of(&self, user: &Address) -> Option<BoostOverride> {
        self.overrides.get(user).copied()
    }

    /// Effective ratio at time `t`, including an NFT override that has not
    /// yet expired.
    pub fn ratio_at(&self, user: &Address, t: Timestamp) -> Result<Amount, StakingError> {
        let ratio = self.ratio_of(user) as Amount;
        match self.overrides.get(user) {
            Some(o) if t <= o.expiry => mul_div_amount(ratio, o.multiplier_bps as Amount, BPS_DIVISOR),
            _ => Ok(ratio),
        }
    }

    /// `stake * ratio_at(t) / 10_000`.
    pub fn weight_at(&self, user: &Address, stake: Amount, t: Timestamp) -> Result<Amount, StakingError> {
        mul_div_amount(stake, self.ratio_at(user, t)?, BPS_DIVISOR)
    }

    /// Batched admin update of the opt-in and manual override flags.
    ///
    /// Each user is checkpointed in `mp` under the old ratio before the
    /// flags change.
    #[allow(clippy::too_many_arguments)]
    pub fn set_user_ratios(
        &mut self,
        caller: &Address,
        mp: &mut MpRewarder,
        weights: &dyn StakeWeights,
        users: &[Address],
        compound_opt_in: &[bool],
        manual_override: &[bool],
        now: Timestamp,
    ) -> Result<(), StakingError> {
        self.acl.require_admin(caller)?;
        if users.len() != compound_opt_in.len() || users.len() != manual_override.len() {
            return Err(StakingError::InvalidInput(format!(
                "set_user_ratios: {} users, {} opt-in flags, {} override flags",
                users.len(),
                compound_opt_in.len(),
                manual_override.len()
            )));
        }
        for ((user, opt_in), manual) in users.iter().zip(compound_opt_in).zip(manual_override) {
            mp.update_reward_for_user(*user, self, now)?;
            self.compound_opt_in.insert(*user, *opt_in);
            self.manual_override.insert(*user, *manual);
            mp.clear_reward_to_debt(*user, weights.woo_balance(user), now)?;
            tracing::info!(
                "booster: {} opt_in={} manual_override={} ratio={}",
                user,
                opt_in,
                manual,
                self.ratio_of(user)
            );
        }
        Ok(())
    }

    /// Record a change of auto-compounding membership.
    ///
    /// Called by the owner of the compounding registry whenever a user
    /// joins or leaves it.
    pub fn sync_compound_opt_in(
        &mut self,
        user: Address,
        opted_in: bool,
        mp: &mut MpRewarder,
        weights: &dyn StakeWeights,
        now: Timestamp,
    ) -> Result<(), StakingError> {
        mp.update_reward_for_user(user, self, now)?;
        self.compound_opt_in.insert(user, opted_in);
        mp.clear_reward_to_debt(user, weights.woo_balance(&user), now)
    }

    /// Reject a boost override that would have no effect.
    pub fn validate_override(multiplier_bps: u32, duration_secs: u64) -> Result<(), StakingError> {
        if multiplier_bps == 0 || duration_secs == 0 {
            return Err(StakingError::InvalidInput(
                "boost override needs a positive multiplier and duration".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply a time-limited multiplier on top of the user's ratio. A newer
    /// override replaces an older one.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_override(
        &mut self,
        user: Address,
        multiplier_bps: u32,
        duration_secs: u64,
        mp: &mut MpRewarder,
        weights: &dyn StakeWeights,
        now: Timestamp,
    ) -> Result<BoostOverride, StakingError> {
        Self::validate_override(multiplier_bps, duration_secs)?;
        mp.update_reward_for_user(user, self, now)?;
        let boost = BoostOverride {
            multiplier_bps,
            expiry: now.saturating_add(duration_secs),
        };
        self.overrides.insert(user, boost);
        mp.clear_reward_to_debt(user, weights.woo_balance(&user), now)?;
        tracing::info!(
            "booster: {} override {} bps until {}",
            user,
            multiplier_bps,
            boost.expiry
        );
        Ok(boost)
    }

    /// Change the boosted ratio for every boosted user. Admin only.
    pub fn set_boost_ratio(
        &mut self,
        caller: &Address,
        boost_ratio_bps: u32,
        mp: &mut MpRewarder,
        weights: &dyn StakeWeights,
        now: Timestamp,
    ) -> Result<(), StakingError> {
        self.acl.require_admin(caller)?;
        if boost_ratio_bps == 0 {
            return Err(StakingError::InvalidInput("boost ratio must be positive".to_string()));
        }
        let users = mp.user_addresses();
        for user in &users {
            mp.update_reward_for_user(*user, self, now)?;
        }
        self.boost_ratio_bps = boost_ratio_bps;
        for user in &users {
            mp.clear_reward_to_debt(*user, weights.woo_balance(user), now)?;
        }
        tracing::info!("booster: boost ratio set to {} bps", boost_ratio_bps);
        Ok(())
    }

    pub fn user_boost_ratio_detail(&self, user: &Address, now: Timestamp) -> Result<BoostRatioDetail, StakingError> {
        Ok(BoostRatioDetail {
            user: *user,
            compound_opt_in: self.compound_opt_in.get(user).copied().unwrap_or(false),
            manual_override: self.manual_override.get(user).copied().unwrap_or(false),
            boosted: self.is_boosted(user),
            ratio_bps: self.ratio_of(user),
            active_override: self.override_of(user).filter(|o| now <= o.expiry),
            effective_ratio_bps: self.ratio_at(user, now)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::BalanceBook;
    use woo_core::types::ONE_TOKEN;

    const ADMIN: Address = Address::from_low_u8(1);
    const ALICE: Address = Address::from_low_u8(2);
    const T0: Timestamp = 1_000;

    fn setup() -> (RewardBooster, MpRewarder, BalanceBook) {
        let booster = RewardBooster::new(ADMIN);
        // 1% of weight per second.
        let mp = MpRewarder::new(ADMIN, 3_153_600_000, T0);
        let mut book = BalanceBook::new();
        book.add_woo(ALICE, 1_000 * ONE_TOKEN);
        (booster, mp, book)
    }

    #[test]
    fn test_boosted_requires_opt_in_and_no_override() {
        let (mut booster, mut mp, book) = setup();
        assert!(!booster.is_boosted(&ALICE));
        booster
            .set_user_ratios(&ADMIN, &mut mp, &book, &[ALICE], &[true], &[false], T0)
            .unwrap();
        assert!(booster.is_boosted(&ALICE));
        assert_eq!(booster.ratio_of(&ALICE), 15_000);
        booster
            .set_user_ratios(&ADMIN, &mut mp, &book, &[ALICE], &[true], &[true], T0)
            .unwrap();
        assert!(!booster.is_boosted(&ALICE));
        assert_eq!(booster.ratio_of(&ALICE), 10_000);
    }

    #[test]
    fn test_set_user_ratios_validates() {
        let (mut booster, mut mp, book) = setup();
        assert!(matches!(
            booster.set_user_ratios(&ALICE, &mut mp, &book, &[ALICE], &[true], &[false], T0),
            Err(StakingError::Unauthorized(_))
        ));
        assert!(matches!(
            booster.set_user_ratios(&ADMIN, &mut mp, &book, &[ALICE], &[true, false], &[false], T0),
            Err(StakingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_override_multiplies_until_expiry() {
        let (mut booster, mut mp, book) = setup();
        booster
            .sync_compound_opt_in(ALICE, true, &mut mp, &book, T0)
            .unwrap();
        booster
            .apply_override(ALICE, 20_000, 100, &mut mp, &book, T0)
            .unwrap();
        assert_eq!(booster.ratio_at(&ALICE, T0 + 100).unwrap(), 30_000);
        assert_eq!(booster.ratio_at(&ALICE, T0 + 101).unwrap(), 15_000);

        let detail = booster.user_boost_ratio_detail(&ALICE, T0 + 50).unwrap();
        assert!(detail.compound_opt_in);
        assert!(detail.boosted);
        assert_eq!(detail.active_override.map(|o| o.expiry), Some(T0 + 100));
        assert_eq!(detail.effective_ratio_bps, 30_000);

        let lapsed = booster.user_boost_ratio_detail(&ALICE, T0 + 500).unwrap();
        assert_eq!(lapsed.active_override, None);
        assert_eq!(lapsed.effective_ratio_bps, 15_000);
    }

    #[test]
    fn test_override_rejects_zero() {
        let (mut booster, mut mp, book) = setup();
        assert!(booster
            .apply_override(ALICE, 0, 100, &mut mp, &book, T0)
            .is_err());
    }

    #[test]
    fn test_weight_at() {
        let (mut booster, mut mp, book) = setup();
        booster
            .sync_compound_opt_in(ALICE, true, &mut mp, &book, T0)
            .unwrap();
        assert_eq!(booster.weight_at(&ALICE, 1_000, T0).unwrap(), 1_500);
    }

    #[test]
    fn test_set_boost_ratio_is_prospective() {
        let (mut booster, mut mp, book) = setup();
        booster
            .sync_compound_opt_in(ALICE, true, &mut mp, &book, T0)
            .unwrap();
        let before = mp.pending_reward(&ALICE, &booster, T0 + 1_000).unwrap();
        booster
            .set_boost_ratio(&ADMIN, 30_000, &mut mp, &book, T0 + 1_000)
            .unwrap();
        assert_eq!(mp.pending_reward(&ALICE, &booster, T0 + 1_000).unwrap(), before);
        let after = mp.pending_reward(&ALICE, &booster, T0 + 2_000).unwrap();
        assert_eq!(before, 15_000 * ONE_TOKEN);
        assert_eq!(after - before, 2 * before);
    }
}
