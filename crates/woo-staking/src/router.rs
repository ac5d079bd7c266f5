// crates/woo-staking/src/router.rs
//
// Reward router over the three-tier tracker pipeline.
//
//   sWoo   deposits WOO and esWOO                 emits esWOO
//   sbWoo  deposits sWoo receipts                 emits bnWOO (restaked, never paid out)
//   sbfWoo deposits sbWoo receipts and bnWOO      emits the fee token
//
// Principal flows sWoo -> sbWoo -> sbfWoo; each downstream tracker takes
// custody of the upstream receipts at its own address. The router is a
// handler on all three trackers and the only way in or out while the
// trackers run in private mode.
//
// Every operation stages copies of the three trackers, computes the
// token movements it implies, performs them through the ledger, and only
// then commits the copies.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use woo_core::clock::Clock;
use woo_core::error::StakingError;
use woo_core::math::mul_div_amount;
use woo_core::traits::TokenLedger;
use woo_core::types::{Address, Amount, Timestamp, TokenId};
use woo_rewards::{ClaimDestination, PrivacyFlags, RewardDistributor, RewardTracker};

use crate::settlement::Settlement;

/// One tracker of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    /// sWoo
    Staked,
    /// sbWoo
    Bonus,
    /// sbfWoo
    Fee,
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Handler identity of the router on every tracker.
    pub address: Address,
    pub owner: Address,
    pub woo_token: TokenId,
    pub es_woo_token: TokenId,
    pub bn_woo_token: TokenId,
    pub fee_token: TokenId,
    pub staked_tracker: Address,
    pub bonus_tracker: Address,
    pub fee_tracker: Address,
    pub bonus_multiplier_bps: u32,
    pub external_call_timeout: Duration,
}

/// Rewards restaked by one `compound` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterCompounded {
    pub es_woo: Amount,
    pub bn_woo: Amount,
}

#[derive(Debug, Clone, Copy)]
struct Movement {
    token: TokenId,
    from: Address,
    to: Address,
    amount: Amount,
}

struct Pipeline {
    staked: RewardTracker,
    bonus: RewardTracker,
    fee: RewardTracker,
}

impl Pipeline {
    /// Stake `amount` of `token` into sWoo and carry the receipts down to
    /// sbfWoo.
    fn stake_through(
        &mut self,
        cfg: &RouterConfig,
        user: Address,
        token: TokenId,
        amount: Amount,
        now: Timestamp,
    ) -> Result<(), StakingError> {
        let router = &cfg.address;
        self.staked.stake(router, user, user, token, amount, now)?;
        self.staked.transfer(router, user, cfg.bonus_tracker, amount)?;
        self.bonus.stake(router, user, user, cfg.staked_tracker, amount, now)?;
        self.bonus.transfer(router, user, cfg.fee_tracker, amount)?;
        self.fee.stake(router, user, user, cfg.bonus_tracker, amount, now)
    }

    /// Reverse of `stake_through`. Staked bnWOO is burned in proportion
    /// to the principal leaving; returns the bnWOO burned.
    fn unstake_through(
        &mut self,
        cfg: &RouterConfig,
        user: Address,
        token: TokenId,
        amount: Amount,
        now: Timestamp,
    ) -> Result<Amount, StakingError> {
        let router = &cfg.address;
        let balance = self.staked.staked_amount(&user);
        let deposited = self.staked.deposit_balance(&user, &token);
        if amount > deposited {
            return Err(StakingError::InsufficientBalance {
                needed: amount,
                available: deposited,
            });
        }

        self.fee.unstake(router, user, cfg.bonus_tracker, amount, now)?;
        self.bonus.transfer(router, cfg.fee_tracker, user, amount)?;
        self.bonus.unstake(router, user, cfg.staked_tracker, amount, now)?;
        self.staked.transfer(router, cfg.bonus_tracker, user, amount)?;
        self.staked.unstake(router, user, token, amount, now)?;

        let staked_bn = self.fee.deposit_balance(&user, &cfg.bn_woo_token);
        if staked_bn == 0 || balance == 0 {
            return Ok(0);
        }
        let burn = mul_div_amount(staked_bn, amount, balance)?;
        if burn > 0 {
            self.fee.unstake(router, user, cfg.bn_woo_token, burn, now)?;
        }
        Ok(burn)
    }
}

pub struct RewardRouter {
    config: RouterConfig,
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn TokenLedger>,
    staked: Mutex<RewardTracker>,
    bonus: Mutex<RewardTracker>,
    fee: Mutex<RewardTracker>,
}

impl RewardRouter {
    /// Build the three trackers, owned by `config.owner`, with the router
    /// registered as their handler.
    pub fn new(config: RouterConfig, clock: Arc<dyn Clock>, ledger: Arc<dyn TokenLedger>) -> Result<Self, StakingError> {
        let owner = config.owner;

        let mut staked = RewardTracker::new(config.staked_tracker, "sWoo", owner);
        staked.set_deposit_token(&owner, config.woo_token, true)?;
        staked.set_deposit_token(&owner, config.es_woo_token, true)?;
        staked.add_reward_stream(&owner, RewardDistributor::linear(owner, config.es_woo_token))?;

        let mut bonus = RewardTracker::new(config.bonus_tracker, "sbWoo", owner);
        bonus.set_deposit_token(&owner, config.staked_tracker, true)?;
        bonus.add_reward_stream(
            &owner,
            RewardDistributor::bonus(owner, config.bn_woo_token, config.bonus_multiplier_bps),
        )?;

        let mut fee = RewardTracker::new(config.fee_tracker, "sbfWoo", owner);
        fee.set_deposit_token(&owner, config.bonus_tracker, true)?;
        fee.set_deposit_token(&owner, config.bn_woo_token, true)?;
        fee.add_reward_stream(&owner, RewardDistributor::linear(owner, config.fee_token))?;

        for (tracker, external_rewarding) in [(&mut staked, false), (&mut bonus, true), (&mut fee, false)] {
            tracker.set_handler(&owner, config.address, true)?;
            tracker.set_privacy(
                &owner,
                PrivacyFlags {
                    transfer: true,
                    staking: true,
                    claiming: true,
                    external_rewarding,
                },
            )?;
        }

        Ok(Self {
            config,
            clock,
            ledger,
            staked: Mutex::new(staked),
            bonus: Mutex::new(bonus),
            fee: Mutex::new(fee),
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn tracker_of(&self, tier: Tier) -> (&Mutex<RewardTracker>, TokenId) {
        match tier {
            Tier::Staked => (&self.staked, self.config.es_woo_token),
            Tier::Bonus => (&self.bonus, self.config.bn_woo_token),
            Tier::Fee => (&self.fee, self.config.fee_token),
        }
    }

    /// Run `f` against staged copies of the pipeline, perform the token
    /// movements it returns, then commit.
    async fn run<T, F>(&self, f: F) -> Result<T, StakingError>
    where
        F: FnOnce(&mut Pipeline, Timestamp) -> Result<(T, Vec<Movement>), StakingError>,
    {
        let mut staked = self.staked.lock().await;
        let mut bonus = self.bonus.lock().await;
        let mut fee = self.fee.lock().await;
        let now = self.clock.now();

        let mut pipeline = Pipeline {
            staked: staked.clone(),
            bonus: bonus.clone(),
            fee: fee.clone(),
        };
        let (out, movements) = f(&mut pipeline, now)?;

        let mut settlement = Settlement::new(self.ledger.clone(), self.config.external_call_timeout);
        for m in &movements {
            if let Err(e) = settlement.transfer(m.token, m.from, m.to, m.amount).await {
                settlement.rollback().await;
                tracing::warn!("router: operation rolled back: {}", e);
                return Err(e);
            }
        }
        settlement.commit();
        *staked = pipeline.staked;
        *bonus = pipeline.bonus;
        *fee = pipeline.fee;
        Ok(out)
    }

    // ---------------------------------------------------------------
    // Reward streams
    // ---------------------------------------------------------------

    /// Start emission of `tier`'s reward stream from now. Owner/admin only.
    pub async fn start_stream(&self, caller: &Address, tier: Tier) -> Result<(), StakingError> {
        let (tracker, token) = self.tracker_of(tier);
        let now = self.clock.now();
        tracker.lock().await.update_last_distribution_time(caller, &token, now)
    }

    pub async fn set_tokens_per_interval(&self, caller: &Address, tier: Tier, rate: Amount) -> Result<(), StakingError> {
        let (tracker, token) = self.tracker_of(tier);
        let now = self.clock.now();
        tracker.lock().await.set_tokens_per_interval(caller, &token, rate, now)
    }

    pub async fn set_bonus_multiplier(&self, caller: &Address, bps: u32) -> Result<(), StakingError> {
        let now = self.clock.now();
        let token = self.config.bn_woo_token;
        self.bonus.lock().await.set_bonus_multiplier(caller, &token, bps, now)
    }

    /// Add `amount` to `tier`'s reward reserve. esWOO and fee-token
    /// reserves are paid by `payer` into the tracker's address; bnWOO is
    /// bookkeeping only.
    pub async fn fund_stream(&self, payer: Address, tier: Tier, amount: Amount) -> Result<(), StakingError> {
        let (tracker, token) = self.tracker_of(tier);
        let mut tracker = tracker.lock().await;
        let mut settlement = Settlement::new(self.ledger.clone(), self.config.external_call_timeout);
        if tier != Tier::Bonus {
            settlement.transfer(token, payer, tracker.id(), amount).await?;
        }
        if let Err(e) = tracker.fund(&token, amount) {
            settlement.rollback().await;
            return Err(e);
        }
        settlement.commit();
        tracing::info!("router: {} funded {} with {} of {}", payer, tracker.name(), amount, token);
        Ok(())
    }

    // ---------------------------------------------------------------
    // User operations
    // ---------------------------------------------------------------

    pub async fn stake_woo(&self, user: Address, amount: Amount) -> Result<(), StakingError> {
        let cfg = &self.config;
        self.run(|p, now| {
            p.stake_through(cfg, user, cfg.woo_token, amount, now)?;
            let pay = Movement {
                token: cfg.woo_token,
                from: user,
                to: cfg.staked_tracker,
                amount,
            };
            Ok(((), vec![pay]))
        })
        .await?;
        tracing::info!("router: {} staked {} WOO", user, amount);
        Ok(())
    }

    pub async fn stake_es_woo(&self, user: Address, amount: Amount) -> Result<(), StakingError> {
        let cfg = &self.config;
        self.run(|p, now| {
            p.stake_through(cfg, user, cfg.es_woo_token, amount, now)?;
            let pay = Movement {
                token: cfg.es_woo_token,
                from: user,
                to: cfg.staked_tracker,
                amount,
            };
            Ok(((), vec![pay]))
        })
        .await?;
        tracing::info!("router: {} staked {} esWOO", user, amount);
        Ok(())
    }

    /// Withdraw `amount` of WOO. Returns the bnWOO burned with it.
    pub async fn unstake_woo(&self, user: Address, amount: Amount) -> Result<Amount, StakingError> {
        self.unstake_token(user, self.config.woo_token, amount).await
    }

    pub async fn unstake_es_woo(&self, user: Address, amount: Amount) -> Result<Amount, StakingError> {
        self.unstake_token(user, self.config.es_woo_token, amount).await
    }

    async fn unstake_token(&self, user: Address, token: TokenId, amount: Amount) -> Result<Amount, StakingError> {
        let cfg = &self.config;
        let burned = self
            .run(|p, now| {
                let burned = p.unstake_through(cfg, user, token, amount, now)?;
                let pay = Movement {
                    token,
                    from: cfg.staked_tracker,
                    to: user,
                    amount,
                };
                Ok((burned, vec![pay]))
            })
            .await?;
        tracing::info!("router: {} unstaked {} of {} (burned {} bnWOO)", user, amount, token, burned);
        Ok(burned)
    }

    /// Pay the fee token and esWOO earned by `user` to `receiver`.
    pub async fn claim(&self, user: Address, receiver: Address) -> Result<Vec<(TokenId, Amount)>, StakingError> {
        let cfg = &self.config;
        self.run(|p, now| {
            let mut paid = Vec::new();
            let mut movements = Vec::new();
            for (tracker, source) in [(&mut p.fee, cfg.fee_tracker), (&mut p.staked, cfg.staked_tracker)] {
                for reward in tracker.claim(&cfg.address, user, receiver, now)? {
                    if let ClaimDestination::Transfer(to) = reward.destination {
                        movements.push(Movement {
                            token: reward.token,
                            from: source,
                            to,
                            amount: reward.amount,
                        });
                        paid.push((reward.token, reward.amount));
                    }
                }
            }
            Ok((paid, movements))
        })
        .await
    }

    /// Restake earned esWOO through the pipeline and stake earned bnWOO
    /// into sbfWoo.
    pub async fn compound(&self, user: Address) -> Result<RouterCompounded, StakingError> {
        let cfg = &self.config;
        let done = self
            .run(|p, now| {
                let mut done = RouterCompounded::default();
                let es: Amount = p
                    .staked
                    .claim(&cfg.address, user, user, now)?
                    .iter()
                    .filter(|r| r.token == cfg.es_woo_token)
                    .map(|r| r.amount)
                    .sum();
                if es > 0 {
                    // The esWOO reserve and esWOO deposits both sit at sWoo.
                    p.stake_through(cfg, user, cfg.es_woo_token, es, now)?;
                    done.es_woo = es;
                }
                let bn: Amount = p
                    .bonus
                    .claim(&cfg.address, user, user, now)?
                    .iter()
                    .filter(|r| r.token == cfg.bn_woo_token)
                    .map(|r| r.amount)
                    .sum();
                if bn > 0 {
                    p.fee.stake(&cfg.address, user, user, cfg.bn_woo_token, bn, now)?;
                    done.bn_woo = bn;
                }
                Ok((done, Vec::new()))
            })
            .await?;
        tracing::debug!(
            "router: compounded {} esWOO and {} bnWOO for {}",
            done.es_woo,
            done.bn_woo,
            user
        );
        Ok(done)
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    pub async fn staked_amount(&self, tier: Tier, user: &Address) -> Amount {
        self.tracker_of(tier).0.lock().await.staked_amount(user)
    }

    pub async fn claimable(&self, tier: Tier, user: &Address) -> Result<Amount, StakingError> {
        let (tracker, token) = self.tracker_of(tier);
        let now = self.clock.now();
        tracker.lock().await.claimable(user, &token, now)
    }

    pub async fn staked_bn_woo(&self, user: &Address) -> Amount {
        self.fee
            .lock()
            .await
            .deposit_balance(user, &self.config.bn_woo_token)
    }

    pub async fn tracker(&self, tier: Tier) -> RewardTracker {
        self.tracker_of(tier).0.lock().await.clone()
    }

    /// Replace `tier`'s tracker with a persisted copy. The copy must live
    /// at the address configured for that tier.
    pub async fn restore_tracker(&self, tier: Tier, tracker: RewardTracker) -> Result<(), StakingError> {
        let expected = match tier {
            Tier::Staked => self.config.staked_tracker,
            Tier::Bonus => self.config.bonus_tracker,
            Tier::Fee => self.config.fee_tracker,
        };
        if tracker.id() != expected {
            return Err(StakingError::InvalidConfiguration(format!(
                "tracker {} cannot replace {:?} tracker {}",
                tracker.id(),
                tier,
                expected
            )));
        }
        *self.tracker_of(tier).0.lock().await = tracker;
        tracing::info!("router: {:?} tracker restored", tier);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use woo_core::clock::ManualClock;
    use woo_core::memory::InMemoryLedger;
    use woo_core::types::ONE_TOKEN;

    const OWNER: Address = Address::from_low_u8(1);
    const ALICE: Address = Address::from_low_u8(2);
    const BOB: Address = Address::from_low_u8(3);
    const ROUTER: Address = Address::from_low_u8(0x40);
    const WOO: TokenId = Address::from_low_u8(0x10);
    const ES_WOO: TokenId = Address::from_low_u8(0x12);
    const BN_WOO: TokenId = Address::from_low_u8(0x13);
    const USDC: TokenId = Address::from_low_u8(0x11);

    async fn setup() -> (Arc<ManualClock>, InMemoryLedger, RewardRouter) {
        let clock = Arc::new(ManualClock::default());
        let ledger = InMemoryLedger::new();
        let router = RewardRouter::new(
            RouterConfig {
                address: ROUTER,
                owner: OWNER,
                woo_token: WOO,
                es_woo_token: ES_WOO,
                bn_woo_token: BN_WOO,
                fee_token: USDC,
                staked_tracker: Address::from_low_u8(0x41),
                bonus_tracker: Address::from_low_u8(0x42),
                fee_tracker: Address::from_low_u8(0x43),
                bonus_multiplier_bps: 10_000,
                external_call_timeout: Duration::from_secs(1),
            },
            clock.clone(),
            Arc::new(ledger.clone()),
        )
        .unwrap();

        ledger.mint(ES_WOO, OWNER, 1_000_000 * ONE_TOKEN).await.unwrap();
        ledger.mint(USDC, OWNER, 1_000_000 * ONE_TOKEN).await.unwrap();
        ledger.mint(WOO, ALICE, 1_000 * ONE_TOKEN).await.unwrap();
        ledger.mint(WOO, BOB, 1_000 * ONE_TOKEN).await.unwrap();
        for tier in [Tier::Staked, Tier::Bonus, Tier::Fee] {
            router.fund_stream(OWNER, tier, 1_000_000 * ONE_TOKEN).await.unwrap();
            router.start_stream(&OWNER, tier).await.unwrap();
            router.set_tokens_per_interval(&OWNER, tier, ONE_TOKEN).await.unwrap();
        }
        (clock, ledger, router)
    }

    #[tokio::test]
    async fn test_stake_flows_through_pipeline() {
        let (_clock, ledger, router) = setup().await;
        router.stake_woo(ALICE, 100 * ONE_TOKEN).await.unwrap();
        for tier in [Tier::Staked, Tier::Bonus, Tier::Fee] {
            assert_eq!(router.staked_amount(tier, &ALICE).await, 100 * ONE_TOKEN);
        }
        assert_eq!(ledger.balance_of(WOO, ALICE).await.unwrap(), 900 * ONE_TOKEN);
        let bonus = router.tracker(Tier::Bonus).await;
        assert_eq!(bonus.receipt_balance(&Address::from_low_u8(0x43)), 100 * ONE_TOKEN);
    }

    #[tokio::test]
    async fn test_fee_rewards_proportional_and_claimable() {
        let (clock, ledger, router) = setup().await;
        router.stake_woo(ALICE, 200 * ONE_TOKEN).await.unwrap();
        router.stake_woo(BOB, 100 * ONE_TOKEN).await.unwrap();
        clock.advance(30);

        assert_eq!(router.claimable(Tier::Fee, &ALICE).await.unwrap(), 20 * ONE_TOKEN);
        assert_eq!(router.claimable(Tier::Fee, &BOB).await.unwrap(), 10 * ONE_TOKEN);

        let paid = router.claim(ALICE, ALICE).await.unwrap();
        assert!(paid.contains(&(USDC, 20 * ONE_TOKEN)));
        assert!(paid.contains(&(ES_WOO, 20 * ONE_TOKEN)));
        assert_eq!(ledger.balance_of(USDC, ALICE).await.unwrap(), 20 * ONE_TOKEN);
        assert_eq!(ledger.balance_of(ES_WOO, ALICE).await.unwrap(), 20 * ONE_TOKEN);
        assert_eq!(router.claimable(Tier::Fee, &ALICE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_compound_then_unstake_burns_bn_woo() {
        let (clock, ledger, router) = setup().await;
        router.stake_woo(ALICE, 100 * ONE_TOKEN).await.unwrap();
        clock.advance(10);

        let done = router.compound(ALICE).await.unwrap();
        assert_eq!(done.es_woo, 10 * ONE_TOKEN);
        assert_eq!(done.bn_woo, 10 * ONE_TOKEN);
        assert_eq!(router.staked_amount(Tier::Staked, &ALICE).await, 110 * ONE_TOKEN);
        assert_eq!(router.staked_bn_woo(&ALICE).await, 10 * ONE_TOKEN);
        assert_eq!(router.staked_amount(Tier::Fee, &ALICE).await, 120 * ONE_TOKEN);

        let burned = router.unstake_woo(ALICE, 55 * ONE_TOKEN).await.unwrap();
        assert_eq!(burned, 5 * ONE_TOKEN);
        assert_eq!(router.staked_bn_woo(&ALICE).await, 5 * ONE_TOKEN);
        assert_eq!(router.staked_amount(Tier::Staked, &ALICE).await, 55 * ONE_TOKEN);
        assert_eq!(ledger.balance_of(WOO, ALICE).await.unwrap(), 955 * ONE_TOKEN);
    }

    #[tokio::test]
    async fn test_failed_transfer_leaves_trackers_untouched() {
        let (clock, ledger, router) = setup().await;
        assert!(router.stake_woo(ALICE, 2_000 * ONE_TOKEN).await.is_err());
        assert_eq!(router.staked_amount(Tier::Staked, &ALICE).await, 0);
        assert_eq!(router.tracker(Tier::Fee).await.total_principal(), 0);

        router.stake_woo(ALICE, 100 * ONE_TOKEN).await.unwrap();
        clock.advance(10);
        ledger.set_failing(true);
        assert!(router.claim(ALICE, ALICE).await.is_err());
        ledger.set_failing(false);
        assert_eq!(router.claimable(Tier::Fee, &ALICE).await.unwrap(), 10 * ONE_TOKEN);
    }

    #[tokio::test]
    async fn test_unstake_more_than_deposited() {
        let (_clock, _ledger, router) = setup().await;
        router.stake_woo(ALICE, 10 * ONE_TOKEN).await.unwrap();
        assert!(matches!(
            router.unstake_es_woo(ALICE, ONE_TOKEN).await,
            Err(StakingError::InsufficientBalance { .. })
        ));
        assert!(matches!(
            router.unstake_woo(ALICE, 11 * ONE_TOKEN).await,
            Err(StakingError::InsufficientBalance { .. })
        ));
    }

    #[tokio::test]
    async fn test_trackers_reject_direct_staking() {
        let (_clock, _ledger, router) = setup().await;
        let mut staked = router.tracker(Tier::Staked).await;
        let now = 1_700_000_000;
        assert!(matches!(
            staked.stake(&ALICE, ALICE, ALICE, WOO, ONE_TOKEN, now),
            Err(StakingError::Unauthorized(_))
        ));
    }
}
