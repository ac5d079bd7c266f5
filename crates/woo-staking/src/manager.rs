// crates/woo-staking/src/manager.rs
//
// Staking manager: the accounting hub for staked WOO and multiplier points.
//
// Holds the balance book, the MP rewarder with its booster, the ordered
// registry of simple rewarders and the auto-compounding registry. Every
// balance change checkpoints the user in every rewarder under the old
// weight, applies the change, then resets the user's debts under the new
// weight.
//
// Locks are always taken in this order (any subsequence is fine):
//
//   state -> mp -> rewarder registry -> each rewarder (registration order) -> compounder
//
// Operations that move tokens run their accounting on staged copies and
// commit them only after every ledger call and swap succeeded; the token
// movements are journaled and compensated on failure.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, RwLock};

use woo_core::access::AccessControl;
use woo_core::clock::Clock;
use woo_core::error::StakingError;
use woo_core::math::mul_div_amount;
use woo_core::traits::{BoostSource, SwapOracle, TokenLedger};
use woo_core::types::{Address, Amount, BlockNumber, Timestamp, TokenId};
use woo_rewards::{
    BalanceBook, BoostOverride, BoostRatioDetail, Compounder, MpRewarder, RewardBooster, SimpleRewarder,
    StakeWeights, DEFAULT_BOOST_RATIO_BPS, DEFAULT_COOLDOWN_SECS,
};

use crate::settlement::{bounded, Settlement};

/// MP emission of 100% of weight per year.
pub const DEFAULT_MP_REWARD_RATE_BPS: Amount = 10_000;

pub const DEFAULT_EXTERNAL_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Identity the manager uses towards the components it owns.
    pub address: Address,
    pub owner: Address,
    pub woo_token: TokenId,
    /// Ledger account holding staked and compounded WOO.
    pub woo_vault: Address,
    pub mp_reward_rate_bps: Amount,
    pub boost_ratio_bps: u32,
    pub compound_cooldown_secs: u64,
    pub external_call_timeout: Duration,
}

impl ManagerConfig {
    pub fn new(address: Address, owner: Address, woo_token: TokenId, woo_vault: Address) -> Self {
        Self {
            address,
            owner,
            woo_token,
            woo_vault,
            mp_reward_rate_bps: DEFAULT_MP_REWARD_RATE_BPS,
            boost_ratio_bps: DEFAULT_BOOST_RATIO_BPS,
            compound_cooldown_secs: DEFAULT_COOLDOWN_SECS,
            external_call_timeout: DEFAULT_EXTERNAL_CALL_TIMEOUT,
        }
    }
}

/// `pendingRewards(user)`: MP plus every simple rewarder in registration
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRewards {
    pub mp: Amount,
    pub tokens: Vec<TokenId>,
    pub amounts: Vec<Amount>,
}

/// Outcome of one compounding run for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compounded {
    /// Multiplier points credited.
    pub mp: Amount,
    /// WOO restaked from swapped rewards.
    pub woo: Amount,
}

/// Per-user results of a compounder batch.
#[derive(Debug, Clone, Default)]
pub struct CompoundReport {
    pub compounded: Vec<(Address, Compounded)>,
    pub failed: Vec<(Address, StakingError)>,
}

/// Serializable copy of everything the manager owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    pub acl: AccessControl,
    pub book: BalanceBook,
    pub mp_rewarder: MpRewarder,
    pub booster: RewardBooster,
    pub rewarders: Vec<SimpleRewarder>,
    pub compounder: Compounder,
}

#[derive(Debug, Clone)]
struct ManagerState {
    acl: AccessControl,
    book: BalanceBook,
}

#[derive(Debug, Clone)]
struct MpState {
    rewarder: MpRewarder,
    booster: RewardBooster,
}

#[derive(Debug, Clone, Copy)]
struct Payout {
    vault: Address,
    token: TokenId,
    amount: Amount,
}

/// Mutable view over the manager's books, either live (behind the guards)
/// or staged.
struct Books<'a> {
    state: &'a mut ManagerState,
    mp: &'a mut MpState,
    rewarders: Vec<&'a mut SimpleRewarder>,
}

impl Books<'_> {
    /// Realize `user`'s accrual everywhere under the current weights.
    fn checkpoint(&mut self, user: Address, now: Timestamp, block: BlockNumber) -> Result<(), StakingError> {
        let MpState { rewarder, booster } = &mut *self.mp;
        rewarder.update_reward_for_user(user, booster, now)?;
        for r in self.rewarders.iter_mut() {
            r.update_reward_for_user(user, &self.state.book, block)?;
        }
        Ok(())
    }

    /// Reset `user`'s debts to the current weights.
    fn reset_debts(&mut self, user: Address, now: Timestamp) -> Result<(), StakingError> {
        let stake = self.state.book.woo_balance(&user);
        self.mp.rewarder.clear_reward_to_debt(user, stake, now)?;
        for r in self.rewarders.iter_mut() {
            r.clear_reward_to_debt(user, &self.state.book)?;
        }
        Ok(())
    }

    fn compound_mp(&mut self, user: Address, now: Timestamp, block: BlockNumber) -> Result<Amount, StakingError> {
        self.checkpoint(user, now, block)?;
        let MpState { rewarder, booster } = &mut *self.mp;
        let points = rewarder.claim(user, booster, now)?;
        if points > 0 {
            self.state.book.add_mp(user, points);
        }
        self.reset_debts(user, now)?;
        Ok(points)
    }

    fn stake(&mut self, user: Address, amount: Amount, now: Timestamp, block: BlockNumber) -> Result<(), StakingError> {
        self.compound_mp(user, now, block)?;
        self.state.book.add_woo(user, amount);
        self.reset_debts(user, now)
    }

    /// Returns the MP burned alongside the principal.
    fn unstake(&mut self, user: Address, amount: Amount, now: Timestamp, block: BlockNumber) -> Result<Amount, StakingError> {
        let available = self.state.book.woo_balance(&user);
        if amount > available {
            return Err(StakingError::InsufficientBalance {
                needed: amount,
                available,
            });
        }
        self.compound_mp(user, now, block)?;
        let burn = mul_div_amount(self.state.book.mp_balance(&user), amount, available)?;
        self.state.book.sub_woo(user, amount)?;
        let burned = self.state.book.burn_mp(user, burn);
        self.reset_debts(user, now)?;
        Ok(burned)
    }

    fn claim_rewards(&mut self, user: Address, block: BlockNumber) -> Result<Vec<Payout>, StakingError> {
        let mut payouts = Vec::with_capacity(self.rewarders.len());
        for r in self.rewarders.iter_mut() {
            let amount = r.claim(user, &self.state.book, block)?;
            payouts.push(Payout {
                vault: r.vault(),
                token: r.reward_token(),
                amount,
            });
        }
        Ok(payouts)
    }
}

struct Staged {
    state: ManagerState,
    mp: MpState,
    rewarders: Vec<SimpleRewarder>,
}

impl Staged {
    fn capture(state: &ManagerState, mp: &MpState, guards: &[MutexGuard<'_, SimpleRewarder>]) -> Self {
        Self {
            state: state.clone(),
            mp: mp.clone(),
            rewarders: guards.iter().map(|g| (**g).clone()).collect(),
        }
    }

    fn books(&mut self) -> Books<'_> {
        Books {
            state: &mut self.state,
            mp: &mut self.mp,
            rewarders: self.rewarders.iter_mut().collect(),
        }
    }

    fn commit(self, state: &mut ManagerState, mp: &mut MpState, guards: &mut [MutexGuard<'_, SimpleRewarder>]) {
        *state = self.state;
        *mp = self.mp;
        for (guard, rewarder) in guards.iter_mut().zip(self.rewarders) {
            **guard = rewarder;
        }
    }
}

fn live<'a>(
    state: &'a mut ManagerState,
    mp: &'a mut MpState,
    guards: &'a mut [MutexGuard<'_, SimpleRewarder>],
) -> Books<'a> {
    Books {
        state,
        mp,
        rewarders: guards.iter_mut().map(|g| &mut **g).collect(),
    }
}

async fn lock_all(registry: &[Arc<Mutex<SimpleRewarder>>]) -> Vec<MutexGuard<'_, SimpleRewarder>> {
    let mut guards = Vec::with_capacity(registry.len());
    for rewarder in registry {
        guards.push(rewarder.lock().await);
    }
    guards
}

fn require_self_or_admin(acl: &AccessControl, caller: &Address, user: &Address) -> Result<(), StakingError> {
    if caller == user {
        Ok(())
    } else {
        acl.require_admin(caller)
    }
}

fn require_positive(amount: Amount, what: &str) -> Result<(), StakingError> {
    if amount == 0 {
        return Err(StakingError::InvalidInput(format!("{} amount must be positive", what)));
    }
    Ok(())
}

pub struct StakingManager {
    config: ManagerConfig,
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn TokenLedger>,
    swap: Arc<dyn SwapOracle>,
    boost_source: Option<Arc<dyn BoostSource>>,
    state: Mutex<ManagerState>,
    mp: Mutex<MpState>,
    rewarders: RwLock<Vec<Arc<Mutex<SimpleRewarder>>>>,
    compounder: Mutex<Compounder>,
}

impl StakingManager {
    pub fn new(
        config: ManagerConfig,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn TokenLedger>,
        swap: Arc<dyn SwapOracle>,
    ) -> Self {
        let now = clock.now();
        let mp = MpState {
            rewarder: MpRewarder::new(config.address, config.mp_reward_rate_bps, now),
            booster: RewardBooster::with_ratio(config.address, config.boost_ratio_bps),
        };
        let compounder = Compounder::with_cooldown(config.address, config.compound_cooldown_secs);
        let state = ManagerState {
            acl: AccessControl::new(config.owner),
            book: BalanceBook::new(),
        };
        Self {
            config,
            clock,
            ledger,
            swap,
            boost_source: None,
            state: Mutex::new(state),
            mp: Mutex::new(mp),
            rewarders: RwLock::new(Vec::new()),
            compounder: Mutex::new(compounder),
        }
    }

    pub fn with_boost_source(mut self, source: Arc<dyn BoostSource>) -> Self {
        self.boost_source = Some(source);
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn address(&self) -> Address {
        self.config.address
    }

    pub fn woo_token(&self) -> TokenId {
        self.config.woo_token
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn ledger(&self) -> Arc<dyn TokenLedger> {
        self.ledger.clone()
    }

    // ---------------------------------------------------------------
    // Access control
    // ---------------------------------------------------------------

    /// Grant or revoke admin rights (entry points such as the local staking
    /// contract and the bridge controller are admins). Owner only.
    pub async fn set_admin(&self, caller: &Address, who: Address, enabled: bool) -> Result<(), StakingError> {
        self.state.lock().await.acl.set_admin(caller, who, enabled)
    }

    pub async fn is_admin(&self, who: &Address) -> bool {
        self.state.lock().await.acl.is_admin(who)
    }

    // ---------------------------------------------------------------
    // Staking
    // ---------------------------------------------------------------

    /// Credit `amount` of staked WOO to `user`. Accrued MP is compounded
    /// first so the deposit does not dilute it. Admin only; the WOO itself
    /// is custodied by the calling entry point.
    pub async fn stake_woo(&self, caller: &Address, user: Address, amount: Amount) -> Result<(), StakingError> {
        require_positive(amount, "stake")?;
        let mut state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        let mut mp = self.mp.lock().await;
        let registry = self.rewarders.read().await;
        let mut guards = lock_all(&registry).await;
        let now = self.clock.now();
        let block = self.clock.block_number();

        live(&mut state, &mut mp, &mut guards).stake(user, amount, now, block)?;
        tracing::debug!(
            "manager: {} staked {} (balance {})",
            user,
            amount,
            state.book.woo_balance(&user)
        );
        Ok(())
    }

    /// Credit several stakes at once. Either every entry is applied or the
    /// books are left untouched. Admin only.
    pub async fn stake_woo_batch(&self, caller: &Address, entries: &[(Address, Amount)]) -> Result<(), StakingError> {
        let mut state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        let mut mp = self.mp.lock().await;
        let registry = self.rewarders.read().await;
        let mut guards = lock_all(&registry).await;
        let now = self.clock.now();
        let block = self.clock.block_number();

        let mut staged = Staged::capture(&state, &mp, &guards);
        for (user, amount) in entries {
            require_positive(*amount, "stake")?;
            staged.books().stake(*user, *amount, now, block)?;
        }
        staged.commit(&mut state, &mut mp, &mut guards);
        tracing::debug!("manager: staked a batch of {} entries", entries.len());
        Ok(())
    }

    /// Debit `amount` of staked WOO from `user`, burning MP in proportion.
    /// Returns the MP burned. Admin only.
    pub async fn unstake_woo(&self, caller: &Address, user: Address, amount: Amount) -> Result<Amount, StakingError> {
        require_positive(amount, "unstake")?;
        let mut state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        let mut mp = self.mp.lock().await;
        let registry = self.rewarders.read().await;
        let mut guards = lock_all(&registry).await;
        let now = self.clock.now();
        let block = self.clock.block_number();

        let burned = live(&mut state, &mut mp, &mut guards).unstake(user, amount, now, block)?;
        tracing::debug!("manager: {} unstaked {} (burned {} MP)", user, amount, burned);
        Ok(burned)
    }

    pub async fn pending_rewards(&self, user: &Address) -> Result<PendingRewards, StakingError> {
        let state = self.state.lock().await;
        let mp = self.mp.lock().await;
        let registry = self.rewarders.read().await;
        let guards = lock_all(&registry).await;
        let now = self.clock.now();
        let block = self.clock.block_number();

        let mut pending = PendingRewards {
            mp: mp.rewarder.pending_reward(user, &mp.booster, now)?,
            tokens: Vec::with_capacity(guards.len()),
            amounts: Vec::with_capacity(guards.len()),
        };
        for r in &guards {
            pending.tokens.push(r.reward_token());
            pending.amounts.push(r.pending_reward(user, &state.book, block)?);
        }
        Ok(pending)
    }

    /// Pay every simple-rewarder reward to `user`. Users enrolled in
    /// auto-compounding are rejected with `StillCompounding`.
    pub async fn claim_rewards(&self, caller: &Address, user: Address) -> Result<Vec<(TokenId, Amount)>, StakingError> {
        let mut state = self.state.lock().await;
        require_self_or_admin(&state.acl, caller, &user)?;
        let mut mp = self.mp.lock().await;
        let registry = self.rewarders.read().await;
        let mut guards = lock_all(&registry).await;
        let compounder = self.compounder.lock().await;
        if compounder.contains(&user) {
            return Err(StakingError::StillCompounding(user));
        }
        let block = self.clock.block_number();

        let mut staged = Staged::capture(&state, &mp, &guards);
        let payouts = staged.books().claim_rewards(user, block)?;

        let mut settlement = Settlement::new(self.ledger.clone(), self.config.external_call_timeout);
        let paid: Result<(), StakingError> = async {
            for p in &payouts {
                settlement.transfer(p.token, p.vault, user, p.amount).await?;
            }
            Ok(())
        }
        .await;
        if let Err(e) = paid {
            settlement.rollback().await;
            tracing::warn!("manager: claim for {} rolled back: {}", user, e);
            return Err(e);
        }
        settlement.commit();
        staged.commit(&mut state, &mut mp, &mut guards);
        Ok(payouts.iter().map(|p| (p.token, p.amount)).collect())
    }

    /// Turn accrued MP into MP balance. Returns the points credited.
    pub async fn compound_mp(&self, caller: &Address, user: Address) -> Result<Amount, StakingError> {
        let mut state = self.state.lock().await;
        require_self_or_admin(&state.acl, caller, &user)?;
        let mut mp = self.mp.lock().await;
        let registry = self.rewarders.read().await;
        let mut guards = lock_all(&registry).await;
        let now = self.clock.now();
        let block = self.clock.block_number();

        let points = live(&mut state, &mut mp, &mut guards).compound_mp(user, now, block)?;
        if points > 0 {
            tracing::debug!("manager: compounded {} MP for {}", points, user);
        }
        Ok(points)
    }

    /// Claim every simple-rewarder reward, swap it into WOO and restake it.
    /// Returns the WOO restaked.
    pub async fn compound_rewards(&self, caller: &Address, user: Address) -> Result<Amount, StakingError> {
        Ok(self.compound_inner(caller, user, false).await?.woo)
    }

    /// `compound_mp` plus `compound_rewards` as one all-or-nothing unit.
    pub async fn compound_all(&self, caller: &Address, user: Address) -> Result<Compounded, StakingError> {
        self.compound_inner(caller, user, true).await
    }

    async fn compound_inner(&self, caller: &Address, user: Address, with_mp: bool) -> Result<Compounded, StakingError> {
        let mut state = self.state.lock().await;
        require_self_or_admin(&state.acl, caller, &user)?;
        let mut mp = self.mp.lock().await;
        let registry = self.rewarders.read().await;
        let mut guards = lock_all(&registry).await;
        let now = self.clock.now();
        let block = self.clock.block_number();

        let mut staged = Staged::capture(&state, &mp, &guards);
        let mp_points = if with_mp {
            staged.books().compound_mp(user, now, block)?
        } else {
            0
        };
        let payouts = staged.books().claim_rewards(user, block)?;

        let woo_token = self.config.woo_token;
        let woo_vault = self.config.woo_vault;
        let mut settlement = Settlement::new(self.ledger.clone(), self.config.external_call_timeout)
            .with_swap(self.swap.clone());
        let swapped: Result<Amount, StakingError> = async {
            let mut total: Amount = 0;
            for p in payouts.iter().filter(|p| p.amount > 0) {
                settlement.transfer(p.token, p.vault, woo_vault, p.amount).await?;
                let out = settlement.swap(p.token, woo_token, p.amount, woo_vault).await?;
                total = total.saturating_add(out);
            }
            Ok(total)
        }
        .await;
        let restaked = swapped.and_then(|total| {
            if total > 0 {
                staged.books().stake(user, total, now, block)?;
            }
            Ok(total)
        });
        let restaked = match restaked {
            Ok(total) => total,
            Err(e) => {
                settlement.rollback().await;
                tracing::warn!("manager: compounding for {} rolled back: {}", user, e);
                return Err(e);
            }
        };
        settlement.commit();
        staged.commit(&mut state, &mut mp, &mut guards);
        if restaked > 0 || mp_points > 0 {
            tracing::debug!(
                "manager: compounded {} for {} ({} MP)",
                restaked,
                user,
                mp_points
            );
        }
        Ok(Compounded {
            mp: mp_points,
            woo: restaked,
        })
    }

    // ---------------------------------------------------------------
    // Auto-compounding membership
    // ---------------------------------------------------------------

    /// Enroll `user` in auto-compounding and boost their MP rate. Returns
    /// `false` if already enrolled.
    pub async fn join_compounder(&self, caller: &Address, user: Address) -> Result<bool, StakingError> {
        let state = self.state.lock().await;
        require_self_or_admin(&state.acl, caller, &user)?;
        let mut mp = self.mp.lock().await;
        let mut compounder = self.compounder.lock().await;
        let now = self.clock.now();
        Self::enroll(&state, &mut mp, &mut compounder, user, now)
    }

    /// Enroll several users. Admin only. Returns the newly enrolled ones.
    pub async fn join_compounder_batch(&self, caller: &Address, users: &[Address]) -> Result<Vec<Address>, StakingError> {
        let state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        let mut mp = self.mp.lock().await;
        let mut compounder = self.compounder.lock().await;
        let now = self.clock.now();
        let mut added = Vec::new();
        for user in users {
            if Self::enroll(&state, &mut mp, &mut compounder, *user, now)? {
                added.push(*user);
            }
        }
        Ok(added)
    }

    fn enroll(
        state: &ManagerState,
        mp: &mut MpState,
        compounder: &mut Compounder,
        user: Address,
        now: Timestamp,
    ) -> Result<bool, StakingError> {
        if compounder.contains(&user) {
            return Ok(false);
        }
        let MpState { rewarder, booster } = mp;
        booster.sync_compound_opt_in(user, true, rewarder, &state.book, now)?;
        Ok(compounder.add_user(user, now))
    }

    /// Leave auto-compounding once the cooldown since joining has elapsed.
    pub async fn leave_compounder(&self, caller: &Address, user: Address) -> Result<(), StakingError> {
        let state = self.state.lock().await;
        require_self_or_admin(&state.acl, caller, &user)?;
        let mut mp = self.mp.lock().await;
        let mut compounder = self.compounder.lock().await;
        let now = self.clock.now();

        let until = compounder
            .cooldown_until(&user)
            .ok_or_else(|| StakingError::NotFound(format!("{} is not enrolled in compounding", user)))?;
        if now < until {
            return Err(StakingError::StillInCooldown { user, until });
        }
        let MpState { rewarder, booster } = &mut *mp;
        booster.sync_compound_opt_in(user, false, rewarder, &state.book, now)?;
        compounder.remove_user(user, now)
    }

    /// Remove users regardless of cooldown. Admin only. Returns the ones
    /// that were enrolled.
    pub async fn remove_from_compounder(&self, caller: &Address, users: &[Address]) -> Result<Vec<Address>, StakingError> {
        let state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        let mut mp = self.mp.lock().await;
        let mut compounder = self.compounder.lock().await;
        let now = self.clock.now();

        let MpState { rewarder, booster } = &mut *mp;
        for user in users.iter().filter(|u| compounder.contains(u)) {
            booster.sync_compound_opt_in(*user, false, rewarder, &state.book, now)?;
        }
        compounder.remove_users(&self.config.address, users)
    }

    pub async fn set_compound_cooldown(&self, caller: &Address, secs: u64) -> Result<(), StakingError> {
        self.state.lock().await.acl.require_admin(caller)?;
        self.compounder
            .lock()
            .await
            .set_cooldown_duration(&self.config.address, secs)
    }

    pub async fn is_compounding(&self, user: &Address) -> bool {
        self.compounder.lock().await.contains(user)
    }

    pub async fn compounder_users(&self) -> Vec<Address> {
        self.compounder.lock().await.all_users()
    }

    pub async fn compounder_cooldown_until(&self, user: &Address) -> Option<Timestamp> {
        self.compounder.lock().await.cooldown_until(user)
    }

    /// Run `compound_all` for the members at positions `start..end`. Each
    /// member is its own unit; failures are reported, not propagated.
    pub async fn compound(&self, caller: &Address, start: usize, end: usize) -> Result<CompoundReport, StakingError> {
        self.state.lock().await.acl.require_admin(caller)?;
        let users = self.compounder.lock().await.users_range(start, end);
        Ok(self.compound_users(caller, users).await)
    }

    /// Run `compound_all` for every member.
    pub async fn compound_all_users(&self, caller: &Address) -> Result<CompoundReport, StakingError> {
        self.state.lock().await.acl.require_admin(caller)?;
        let users = self.compounder.lock().await.all_users();
        Ok(self.compound_users(caller, users).await)
    }

    async fn compound_users(&self, caller: &Address, users: Vec<Address>) -> CompoundReport {
        let mut report = CompoundReport::default();
        for user in users {
            match self.compound_inner(caller, user, true).await {
                Ok(done) => report.compounded.push((user, done)),
                Err(e) => {
                    tracing::warn!("manager: auto-compound failed for {}: {}", user, e);
                    report.failed.push((user, e));
                }
            }
        }
        report
    }

    // ---------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------

    /// Register a simple rewarder paying `reward_token` from `vault`,
    /// emitting from the current block. Admin only.
    pub async fn add_rewarder(
        &self,
        caller: &Address,
        vault: Address,
        reward_token: TokenId,
        reward_per_block: Amount,
    ) -> Result<(), StakingError> {
        let state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        let mut registry = self.rewarders.write().await;
        for existing in registry.iter() {
            if existing.lock().await.vault() == vault {
                return Err(StakingError::InvalidConfiguration(format!(
                    "rewarder with vault {} already registered",
                    vault
                )));
            }
        }
        let block = self.clock.block_number();
        registry.push(Arc::new(Mutex::new(SimpleRewarder::new(
            self.config.address,
            vault,
            reward_token,
            reward_per_block,
            block,
        ))));
        tracing::info!(
            "manager: added rewarder {} paying {} ({} per block)",
            vault,
            reward_token,
            reward_per_block
        );
        Ok(())
    }

    /// Unregister the rewarder paying from `vault`. Its unclaimed rewards
    /// are no longer reachable through the manager. Admin only.
    pub async fn remove_rewarder(&self, caller: &Address, vault: &Address) -> Result<SimpleRewarder, StakingError> {
        let state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        let mut registry = self.rewarders.write().await;
        let mut index = None;
        for (i, existing) in registry.iter().enumerate() {
            if existing.lock().await.vault() == *vault {
                index = Some(i);
                break;
            }
        }
        let index = index.ok_or_else(|| StakingError::NotFound(format!("rewarder {}", vault)))?;
        let removed = registry.remove(index);
        let rewarder = removed.lock().await.clone();
        tracing::info!("manager: removed rewarder {}", vault);
        Ok(rewarder)
    }

    pub async fn rewarder(&self, vault: &Address) -> Option<SimpleRewarder> {
        let registry = self.rewarders.read().await;
        for r in registry.iter() {
            let r = r.lock().await;
            if r.vault() == *vault {
                return Some(r.clone());
            }
        }
        None
    }

    /// Vault and reward token of each rewarder, in registration order.
    pub async fn rewarders(&self) -> Vec<(Address, TokenId)> {
        let registry = self.rewarders.read().await;
        let mut out = Vec::with_capacity(registry.len());
        for r in registry.iter() {
            let r = r.lock().await;
            out.push((r.vault(), r.reward_token()));
        }
        out
    }

    pub async fn set_reward_per_block(&self, caller: &Address, vault: &Address, reward_per_block: Amount) -> Result<(), StakingError> {
        let state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        let registry = self.rewarders.read().await;
        let block = self.clock.block_number();
        for r in registry.iter() {
            let mut r = r.lock().await;
            if r.vault() == *vault {
                return r.set_reward_per_block(&self.config.address, reward_per_block, &state.book, block);
            }
        }
        Err(StakingError::NotFound(format!("rewarder {}", vault)))
    }

    pub async fn set_mp_reward_rate(&self, caller: &Address, rate_bps: Amount) -> Result<(), StakingError> {
        let state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        let mut mp = self.mp.lock().await;
        let now = self.clock.now();
        mp.rewarder.set_reward_rate(&self.config.address, rate_bps, now)
    }

    pub async fn mp_reward_rate(&self) -> Amount {
        self.mp.lock().await.rewarder.reward_rate()
    }

    pub async fn set_boost_ratio(&self, caller: &Address, boost_ratio_bps: u32) -> Result<(), StakingError> {
        let state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        let mut mp = self.mp.lock().await;
        let now = self.clock.now();
        let MpState { rewarder, booster } = &mut *mp;
        booster.set_boost_ratio(&self.config.address, boost_ratio_bps, rewarder, &state.book, now)
    }

    /// Batched opt-in / manual override update. Admin only.
    pub async fn set_user_ratios(
        &self,
        caller: &Address,
        users: &[Address],
        compound_opt_in: &[bool],
        manual_override: &[bool],
    ) -> Result<(), StakingError> {
        let state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        let mut mp = self.mp.lock().await;
        let now = self.clock.now();
        let MpState { rewarder, booster } = &mut *mp;
        booster.set_user_ratios(
            &self.config.address,
            rewarder,
            &state.book,
            users,
            compound_opt_in,
            manual_override,
            now,
        )
    }

    /// Consume boost token `token_id` owned by `user` and apply its
    /// time-limited multiplier. A token whose grant would be rejected is
    /// left unconsumed.
    pub async fn apply_nft_boost(&self, caller: &Address, user: Address, token_id: u64) -> Result<BoostOverride, StakingError> {
        {
            let state = self.state.lock().await;
            require_self_or_admin(&state.acl, caller, &user)?;
        }
        let source = self
            .boost_source
            .clone()
            .ok_or_else(|| StakingError::InvalidConfiguration("no boost source configured".to_string()))?;
        let timeout = self.config.external_call_timeout;
        let (multiplier_bps, duration_secs) =
            bounded(timeout, "boost source", source.grant_of(user, token_id)).await?;
        RewardBooster::validate_override(multiplier_bps, duration_secs)?;
        let (multiplier_bps, duration_secs) =
            bounded(timeout, "boost source", source.consume(user, token_id)).await?;

        let state = self.state.lock().await;
        let mut mp = self.mp.lock().await;
        let now = self.clock.now();
        let MpState { rewarder, booster } = &mut *mp;
        booster.apply_override(user, multiplier_bps, duration_secs, rewarder, &state.book, now)
    }

    pub async fn boost_ratio_detail(&self, user: &Address) -> Result<BoostRatioDetail, StakingError> {
        let mp = self.mp.lock().await;
        mp.booster.user_boost_ratio_detail(user, self.clock.now())
    }

    /// Current MP weight of `user` (stake times effective ratio).
    pub async fn mp_weight(&self, user: &Address) -> Result<Amount, StakingError> {
        let mp = self.mp.lock().await;
        mp.rewarder.weight_of(user, &mp.booster, self.clock.now())
    }

    // ---------------------------------------------------------------
    // Balances
    // ---------------------------------------------------------------

    pub async fn woo_balance(&self, user: &Address) -> Amount {
        self.state.lock().await.book.woo_balance(user)
    }

    pub async fn mp_balance(&self, user: &Address) -> Amount {
        self.state.lock().await.book.mp_balance(user)
    }

    pub async fn woo_total_balance(&self) -> Amount {
        self.state.lock().await.book.woo_total_balance()
    }

    pub async fn mp_total_balance(&self) -> Amount {
        self.state.lock().await.book.mp_total_balance()
    }

    pub async fn total_balance(&self) -> Amount {
        self.state.lock().await.book.total_balance()
    }

    pub async fn total_balance_of(&self, user: &Address) -> Amount {
        self.state.lock().await.book.total_balance_of(user)
    }

    // ---------------------------------------------------------------
    // Snapshots
    // ---------------------------------------------------------------

    pub async fn snapshot(&self) -> ManagerSnapshot {
        let state = self.state.lock().await;
        let mp = self.mp.lock().await;
        let registry = self.rewarders.read().await;
        let guards = lock_all(&registry).await;
        let compounder = self.compounder.lock().await;
        ManagerSnapshot {
            acl: state.acl.clone(),
            book: state.book.clone(),
            mp_rewarder: mp.rewarder.clone(),
            booster: mp.booster.clone(),
            rewarders: guards.iter().map(|g| (**g).clone()).collect(),
            compounder: compounder.clone(),
        }
    }

    /// Replace all accounting state with `snapshot`.
    pub async fn restore(&self, snapshot: ManagerSnapshot) {
        let mut state = self.state.lock().await;
        let mut mp = self.mp.lock().await;
        let mut registry = self.rewarders.write().await;
        let mut compounder = self.compounder.lock().await;
        state.acl = snapshot.acl;
        state.book = snapshot.book;
        mp.rewarder = snapshot.mp_rewarder;
        mp.booster = snapshot.booster;
        *registry = snapshot
            .rewarders
            .into_iter()
            .map(|r| Arc::new(Mutex::new(r)))
            .collect();
        *compounder = snapshot.compounder;
        tracing::info!(
            "manager: restored {} stakers, {} rewarders, {} compounding users",
            state.book.users().len(),
            registry.len(),
            compounder.len()
        );
    }
}
