// crates/woo-store/tests/persistence.rs
//
// A staking manager and a reward router written to the store and reloaded
// into fresh instances behave as before.

use std::sync::Arc;

use woo_core::clock::{Clock, ManualClock};
use woo_core::memory::{FixedPriceOracle, InMemoryLedger};
use woo_core::traits::{StateStore, TokenLedger};
use woo_core::types::{Address, TokenId, ONE_TOKEN};
use woo_staking::{ManagerConfig, RewardRouter, RouterConfig, StakingManager, Tier, DEFAULT_EXTERNAL_CALL_TIMEOUT};
use woo_store::{keys, persist_manager, persist_router, reload_manager, reload_router, MemoryStore};

const OWNER: Address = Address::from_low_u8(1);
const ALICE: Address = Address::from_low_u8(2);
const BOB: Address = Address::from_low_u8(3);
const MANAGER: Address = Address::from_low_u8(0x20);
const WOO_VAULT: Address = Address::from_low_u8(0x21);
const USDC_VAULT: Address = Address::from_low_u8(0x31);
const ROUTER: Address = Address::from_low_u8(0x60);
const WOO: TokenId = Address::from_low_u8(0x10);
const USDC: TokenId = Address::from_low_u8(0x11);
const ES_WOO: TokenId = Address::from_low_u8(0x12);
const BN_WOO: TokenId = Address::from_low_u8(0x13);
const FEE: TokenId = Address::from_low_u8(0x14);

fn manager(clock: Arc<ManualClock>, ledger: &InMemoryLedger) -> StakingManager {
    StakingManager::new(
        ManagerConfig::new(MANAGER, OWNER, WOO, WOO_VAULT),
        clock,
        Arc::new(ledger.clone()),
        Arc::new(FixedPriceOracle::new(ledger.clone())),
    )
}

#[tokio::test]
async fn test_manager_survives_save_and_reload() {
    let clock = Arc::new(ManualClock::default());
    let ledger = InMemoryLedger::new();
    let original = manager(clock.clone(), &ledger);
    original.add_rewarder(&OWNER, USDC_VAULT, USDC, ONE_TOKEN).await.unwrap();
    original.stake_woo(&OWNER, ALICE, 100 * ONE_TOKEN).await.unwrap();
    original.stake_woo(&OWNER, BOB, 50 * ONE_TOKEN).await.unwrap();
    original.join_compounder(&ALICE, ALICE).await.unwrap();
    clock.advance(86_400);
    clock.mine(5);
    original.compound_mp(&BOB, BOB).await.unwrap();

    let store = MemoryStore::new();
    persist_manager(&store, &original).await.unwrap();
    assert_eq!(store.scan_prefix(keys::MANAGER_BALANCE_PREFIX).await.unwrap().len(), 2);
    assert_eq!(store.scan_prefix(keys::COMPOUNDER_PREFIX).await.unwrap().len(), 1);
    assert_eq!(store.scan_prefix(keys::BOOSTER_PREFIX).await.unwrap().len(), 1);

    let reloaded = manager(clock.clone(), &ledger);
    assert!(reload_manager(&store, &reloaded).await.unwrap());

    for user in [ALICE, BOB] {
        assert_eq!(reloaded.woo_balance(&user).await, original.woo_balance(&user).await);
        assert_eq!(reloaded.mp_balance(&user).await, original.mp_balance(&user).await);
        assert_eq!(
            reloaded.pending_rewards(&user).await.unwrap(),
            original.pending_rewards(&user).await.unwrap()
        );
        assert_eq!(reloaded.mp_weight(&user).await.unwrap(), original.mp_weight(&user).await.unwrap());
    }
    assert!(reloaded.mp_balance(&BOB).await > 0);
    assert_eq!(reloaded.compounder_users().await, vec![ALICE]);
    assert_eq!(
        reloaded.compounder_cooldown_until(&ALICE).await,
        original.compounder_cooldown_until(&ALICE).await
    );
    assert_eq!(reloaded.rewarders().await, vec![(USDC_VAULT, USDC)]);
    assert_eq!(reloaded.total_balance().await, original.total_balance().await);
}

#[tokio::test]
async fn test_save_drops_users_who_left() {
    let clock = Arc::new(ManualClock::default());
    let ledger = InMemoryLedger::new();
    let m = manager(clock.clone(), &ledger);
    m.stake_woo(&OWNER, ALICE, ONE_TOKEN).await.unwrap();
    m.join_compounder(&OWNER, ALICE).await.unwrap();

    let store = MemoryStore::new();
    persist_manager(&store, &m).await.unwrap();
    m.remove_from_compounder(&OWNER, &[ALICE]).await.unwrap();
    m.unstake_woo(&OWNER, ALICE, ONE_TOKEN).await.unwrap();
    persist_manager(&store, &m).await.unwrap();

    assert!(store.scan_prefix(keys::MANAGER_BALANCE_PREFIX).await.unwrap().is_empty());
    assert!(store.scan_prefix(keys::COMPOUNDER_PREFIX).await.unwrap().is_empty());
    assert!(store.scan_prefix(keys::BOOSTER_PREFIX).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_store_leaves_manager_untouched() {
    let clock = Arc::new(ManualClock::default());
    let ledger = InMemoryLedger::new();
    let m = manager(clock, &ledger);
    m.stake_woo(&OWNER, ALICE, ONE_TOKEN).await.unwrap();
    assert!(!reload_manager(&MemoryStore::new(), &m).await.unwrap());
    assert_eq!(m.woo_balance(&ALICE).await, ONE_TOKEN);
}

fn router_config() -> RouterConfig {
    RouterConfig {
        address: ROUTER,
        owner: OWNER,
        woo_token: WOO,
        es_woo_token: ES_WOO,
        bn_woo_token: BN_WOO,
        fee_token: FEE,
        staked_tracker: Address::from_low_u8(0x61),
        bonus_tracker: Address::from_low_u8(0x62),
        fee_tracker: Address::from_low_u8(0x63),
        bonus_multiplier_bps: 10_000,
        external_call_timeout: DEFAULT_EXTERNAL_CALL_TIMEOUT,
    }
}

#[tokio::test]
async fn test_router_trackers_reload() {
    let clock = Arc::new(ManualClock::default());
    let ledger = InMemoryLedger::new();
    ledger.mint(WOO, ALICE, 100 * ONE_TOKEN).await.unwrap();
    let router = RewardRouter::new(router_config(), clock.clone(), Arc::new(ledger.clone())).unwrap();
    router.stake_woo(ALICE, 60 * ONE_TOKEN).await.unwrap();

    let store = MemoryStore::new();
    persist_router(&store, &router).await.unwrap();
    assert!(store
        .get(&keys::tracker_global(&Address::from_low_u8(0x62)))
        .await
        .unwrap()
        .is_some());

    let fresh = RewardRouter::new(router_config(), clock.clone(), Arc::new(ledger.clone())).unwrap();
    assert_eq!(reload_router(&store, &fresh).await.unwrap(), 3);
    for tier in [Tier::Staked, Tier::Bonus, Tier::Fee] {
        assert_eq!(fresh.tracker(tier).await, router.tracker(tier).await);
        assert_eq!(fresh.staked_amount(tier, &ALICE).await, 60 * ONE_TOKEN);
    }
    assert!(clock.now() > 0);
}
