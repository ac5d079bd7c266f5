// crates/woo-store/src/snapshot.rs
//
// Writing and reloading engine state under the key layout in `keys.rs`.
//
// Per-user state is written one record per user; each save first removes
// the records under the prefixes it owns so users who left do not linger.
// Values are JSON.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use woo_bridge::{ControllerState, ProxyState};
use woo_core::access::AccessControl;
use woo_core::error::StakingError;
use woo_core::traits::StateStore;
use woo_core::memory::InMemoryLedger;
use woo_core::types::{Address, Amount, DomainId, TokenId};
use woo_rewards::{
    BalanceBook, BoosterRecord, Compounder, MemberRecord, MpRewarder, RewardBooster, RewardDistributor,
    RewardTracker, SimpleRewarder, StakeWeights, TrackerAccount, TrackerGlobal,
};
use woo_staking::{ManagerSnapshot, RewardRouter, StakingLocal, StakingManager, Tier};

use crate::keys;

/// `manager:global`: everything of the manager that is not per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManagerGlobalRecord {
    acl: AccessControl,
    mp_rewarder: MpRewarder,
    rewarders: Vec<SimpleRewarder>,
    booster: RewardBooster,
    compounder: Compounder,
}

/// `ledger:{name}:balance:{token}:{owner}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LedgerRecord {
    token: TokenId,
    owner: Address,
    amount: Amount,
}

/// `manager:balance:{addr}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BalanceRecord {
    woo: Amount,
    mp: Amount,
}

async fn put_json<T: Serialize>(store: &dyn StateStore, key: &str, value: &T) -> Result<(), StakingError> {
    store.put(key, serde_json::to_vec(value)?).await
}

async fn get_json<T: DeserializeOwned>(store: &dyn StateStore, key: &str) -> Result<Option<T>, StakingError> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Every record under `prefix` keyed by the address that ends its key.
async fn scan_by_address<T: DeserializeOwned>(
    store: &dyn StateStore,
    prefix: &str,
) -> Result<Vec<(Address, T)>, StakingError> {
    let mut out = Vec::new();
    for (key, bytes) in store.scan_prefix(prefix).await? {
        out.push((keys::address_suffix(&key, prefix)?, serde_json::from_slice(&bytes)?));
    }
    Ok(out)
}

async fn clear_prefix(store: &dyn StateStore, prefix: &str) -> Result<usize, StakingError> {
    let stale = store.scan_prefix(prefix).await?;
    for (key, _) in &stale {
        store.delete(key).await?;
    }
    Ok(stale.len())
}

// ---------------------------------------------------------------
// Staking manager
// ---------------------------------------------------------------

pub async fn save_manager(store: &dyn StateStore, snapshot: &ManagerSnapshot) -> Result<(), StakingError> {
    for prefix in [keys::MANAGER_BALANCE_PREFIX, keys::BOOSTER_PREFIX, keys::COMPOUNDER_PREFIX] {
        clear_prefix(store, prefix).await?;
    }

    let global = ManagerGlobalRecord {
        acl: snapshot.acl.clone(),
        mp_rewarder: snapshot.mp_rewarder.clone(),
        rewarders: snapshot.rewarders.clone(),
        booster: snapshot.booster.without_users(),
        compounder: snapshot.compounder.without_members(),
    };
    put_json(store, keys::MANAGER_GLOBAL, &global).await?;

    let users = snapshot.book.users();
    for user in &users {
        let record = BalanceRecord {
            woo: snapshot.book.woo_balance(user),
            mp: snapshot.book.mp_balance(user),
        };
        put_json(store, &keys::manager_balance(user), &record).await?;
    }
    for (user, record) in snapshot.booster.records() {
        put_json(store, &keys::booster(&user), &record).await?;
    }
    for (user, record) in snapshot.compounder.member_records() {
        put_json(store, &keys::compounder(&user), &record).await?;
    }
    debug!("store: manager saved ({} balances)", users.len());
    Ok(())
}

/// `None` if no manager was ever saved.
pub async fn load_manager(store: &dyn StateStore) -> Result<Option<ManagerSnapshot>, StakingError> {
    let Some(global) = get_json::<ManagerGlobalRecord>(store, keys::MANAGER_GLOBAL).await? else {
        return Ok(None);
    };

    let balances: Vec<(Address, BalanceRecord)> = scan_by_address(store, keys::MANAGER_BALANCE_PREFIX).await?;
    let book = BalanceBook::from_balances(balances.into_iter().map(|(user, b)| (user, b.woo, b.mp)));

    let mut booster = global.booster;
    for (user, record) in scan_by_address::<BoosterRecord>(store, keys::BOOSTER_PREFIX).await? {
        booster.insert_record(user, record);
    }

    let mut compounder = global.compounder;
    compounder.restore_members(scan_by_address::<MemberRecord>(store, keys::COMPOUNDER_PREFIX).await?);

    Ok(Some(ManagerSnapshot {
        acl: global.acl,
        book,
        mp_rewarder: global.mp_rewarder,
        booster,
        rewarders: global.rewarders,
        compounder,
    }))
}

pub async fn persist_manager(store: &dyn StateStore, manager: &StakingManager) -> Result<(), StakingError> {
    save_manager(store, &manager.snapshot().await).await
}

/// Restore `manager` from the store. Returns `false` if nothing was saved.
pub async fn reload_manager(store: &dyn StateStore, manager: &StakingManager) -> Result<bool, StakingError> {
    match load_manager(store).await? {
        Some(snapshot) => {
            manager.restore(snapshot).await;
            info!("store: manager reloaded");
            Ok(true)
        }
        None => Ok(false),
    }
}

// ---------------------------------------------------------------
// Local entry point and simulated ledgers
// ---------------------------------------------------------------

pub async fn save_local(store: &dyn StateStore, local: &StakingLocal) -> Result<(), StakingError> {
    clear_prefix(store, keys::LOCAL_BALANCE_PREFIX).await?;
    let balances = local.custody_balances().await;
    for (user, amount) in &balances {
        put_json(store, &keys::local_balance(user), amount).await?;
    }
    debug!("store: local custody saved ({} users)", balances.len());
    Ok(())
}

/// Returns how many custody balances were restored.
pub async fn reload_local(store: &dyn StateStore, local: &StakingLocal) -> Result<usize, StakingError> {
    let balances: Vec<(Address, Amount)> = scan_by_address(store, keys::LOCAL_BALANCE_PREFIX).await?;
    let restored = balances.len();
    local.restore_custody(balances).await;
    Ok(restored)
}

pub async fn save_ledger(store: &dyn StateStore, name: &str, ledger: &InMemoryLedger) -> Result<(), StakingError> {
    clear_prefix(store, &keys::ledger_balance_prefix(name)).await?;
    let entries = ledger.entries().await;
    for (token, owner, amount) in &entries {
        let record = LedgerRecord {
            token: *token,
            owner: *owner,
            amount: *amount,
        };
        put_json(store, &keys::ledger_balance(name, token, owner), &record).await?;
    }
    put_json(store, &keys::ledger_head(name), &entries.len()).await?;
    debug!("store: ledger {} saved ({} balances)", name, entries.len());
    Ok(())
}

/// Restore `ledger` from the store. Returns `false` if it was never saved.
pub async fn reload_ledger(store: &dyn StateStore, name: &str, ledger: &InMemoryLedger) -> Result<bool, StakingError> {
    if store.get(&keys::ledger_head(name)).await?.is_none() {
        return Ok(false);
    }
    let mut entries = Vec::new();
    for (_, bytes) in store.scan_prefix(&keys::ledger_balance_prefix(name)).await? {
        let record: LedgerRecord = serde_json::from_slice(&bytes)?;
        entries.push((record.token, record.owner, record.amount));
    }
    ledger.restore(entries).await;
    info!("store: ledger {} reloaded", name);
    Ok(true)
}

// ---------------------------------------------------------------
// Reward trackers
// ---------------------------------------------------------------

pub async fn save_tracker(store: &dyn StateStore, tracker: &RewardTracker) -> Result<(), StakingError> {
    let id = tracker.id();
    clear_prefix(store, &keys::tracker_account_prefix(&id)).await?;
    clear_prefix(store, &keys::distributor_prefix(&id)).await?;

    let mut global = tracker.global().clone();
    let distributors = std::mem::take(&mut global.distributors);
    put_json(store, &keys::tracker_global(&id), &global).await?;
    for (token, distributor) in &distributors {
        put_json(store, &keys::distributor(&id, token), distributor).await?;
    }
    for (account, entry) in tracker.accounts() {
        put_json(store, &keys::tracker_account(&id, account), entry).await?;
    }
    debug!("store: tracker {} saved ({} accounts)", tracker.name(), tracker.accounts().len());
    Ok(())
}

pub async fn load_tracker(store: &dyn StateStore, id: &Address) -> Result<Option<RewardTracker>, StakingError> {
    let Some(mut global) = get_json::<TrackerGlobal>(store, &keys::tracker_global(id)).await? else {
        return Ok(None);
    };
    let distributors: Vec<(Address, RewardDistributor)> =
        scan_by_address(store, &keys::distributor_prefix(id)).await?;
    global.distributors = distributors.into_iter().collect();
    let accounts: BTreeMap<Address, TrackerAccount> = scan_by_address(store, &keys::tracker_account_prefix(id))
        .await?
        .into_iter()
        .collect();
    Ok(Some(RewardTracker::from_parts(global, accounts)))
}

pub async fn persist_router(store: &dyn StateStore, router: &RewardRouter) -> Result<(), StakingError> {
    for tier in [Tier::Staked, Tier::Bonus, Tier::Fee] {
        save_tracker(store, &router.tracker(tier).await).await?;
    }
    Ok(())
}

/// Restore every tracker of `router` that was saved. Returns how many were.
pub async fn reload_router(store: &dyn StateStore, router: &RewardRouter) -> Result<usize, StakingError> {
    let mut restored = 0;
    for tier in [Tier::Staked, Tier::Bonus, Tier::Fee] {
        let id = router.tracker(tier).await.id();
        if let Some(tracker) = load_tracker(store, &id).await? {
            router.restore_tracker(tier, tracker).await?;
            restored += 1;
        }
    }
    Ok(restored)
}

// ---------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------

/// Applied nonces are append-only, so they are written but never cleared.
pub async fn save_controller(store: &dyn StateStore, state: &ControllerState) -> Result<(), StakingError> {
    let mut head = state.clone();
    let applied = std::mem::take(&mut head.applied);
    put_json(store, keys::BRIDGE_CONTROLLER, &head).await?;
    for (domain, nonce) in &applied {
        let key = keys::bridge_nonce(*domain, *nonce);
        if store.get(&key).await?.is_none() {
            put_json(store, &key, &true).await?;
        }
    }
    Ok(())
}

pub async fn load_controller(store: &dyn StateStore) -> Result<Option<ControllerState>, StakingError> {
    let Some(mut state) = get_json::<ControllerState>(store, keys::BRIDGE_CONTROLLER).await? else {
        return Ok(None);
    };
    for (key, _) in store.scan_prefix(keys::BRIDGE_NONCE_PREFIX).await? {
        state.applied.insert(keys::parse_bridge_nonce(&key)?);
    }
    Ok(Some(state))
}

pub async fn save_proxy(store: &dyn StateStore, domain: DomainId, state: &ProxyState) -> Result<(), StakingError> {
    put_json(store, &keys::bridge_proxy(domain), state).await
}

pub async fn load_proxy(store: &dyn StateStore, domain: DomainId) -> Result<Option<ProxyState>, StakingError> {
    get_json(store, &keys::bridge_proxy(domain)).await
}
