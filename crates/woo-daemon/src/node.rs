// crates/woo-daemon/src/node.rs
//
// Wiring of the simulated domains.
//
// The home domain runs the staking manager, the local entry point and the
// bridge controller over an in-memory ledger and a fixed-price swap oracle.
// Each configured remote domain gets its own ledger and a bridge proxy. All
// domains share one in-memory transport. Persisted state, the simulated
// ledgers included, is reloaded at startup when the store has any.

use std::sync::Arc;

use woo_bridge::{BridgeController, BridgeProxy, ControllerConfig, InMemoryTransport, ProxyConfig};
use woo_core::clock::{Clock, ManualClock};
use woo_core::error::StakingError;
use woo_core::math::PRECISION;
use woo_core::memory::{FixedPriceOracle, InMemoryLedger};
use woo_core::traits::{StateStore, TokenLedger};
use woo_core::types::{DomainId, Timestamp};
use woo_staking::{ManagerConfig, StakingLocal, StakingManager};
use woo_store::{
    load_controller, load_proxy, persist_manager, reload_ledger, reload_local, reload_manager, save_controller,
    save_ledger, save_local, save_proxy, MemoryStore,
};

use crate::config::{expand_tilde, price_units, DaemonConfig};

pub struct RemoteDomain {
    pub domain: DomainId,
    pub ledger: InMemoryLedger,
    pub proxy: Arc<BridgeProxy>,
}

pub struct HomeNode {
    pub config: DaemonConfig,
    pub clock: Arc<ManualClock>,
    pub ledger: InMemoryLedger,
    pub manager: Arc<StakingManager>,
    pub local: Arc<StakingLocal>,
    pub controller: Arc<BridgeController>,
    pub transport: InMemoryTransport,
    pub remotes: Vec<RemoteDomain>,
    pub store: Arc<dyn StateStore>,
}

const HOME_LEDGER: &str = "home";

fn remote_ledger_name(domain: DomainId) -> String {
    format!("remote-{}", domain)
}

/// Current wall-clock second.
pub fn wall_clock_now() -> Timestamp {
    chrono::Utc::now().timestamp().max(0) as Timestamp
}

fn open_store(config: &DaemonConfig) -> Result<Arc<dyn StateStore>, Box<dyn std::error::Error>> {
    match config.storage.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "rocksdb")]
        "rocksdb" => {
            let path = format!("{}/state", expand_tilde(&config.data_dir));
            std::fs::create_dir_all(&path)?;
            let store = woo_store::RocksStore::open(&path)?;
            tracing::info!("State store opened at {}", path);
            Ok(Arc::new(store))
        }
        other => Err(format!(
            "storage backend '{}' is not available in this build (data dir {})",
            other,
            expand_tilde(&config.data_dir)
        )
        .into()),
    }
}

impl HomeNode {
    pub async fn build(config: DaemonConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = open_store(&config)?;
        Self::build_with_store(config, store).await
    }

    /// Wire the domains over an already opened store.
    pub async fn build_with_store(
        config: DaemonConfig,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;
        let m = &config.manager;
        let owner = m.owner;
        let timeout = m.external_call_timeout();

        let clock = Arc::new(ManualClock::new(wall_clock_now()));
        let ledger = InMemoryLedger::new();
        let oracle = FixedPriceOracle::new(ledger.clone());
        oracle.set_price(m.woo_token, PRECISION).await;
        for (token, price) in &config.prices {
            let units = price_units(*price).ok_or_else(|| format!("unusable price for {}", token))?;
            oracle.set_price(*token, units).await;
        }

        let mut manager_config = ManagerConfig::new(m.address, owner, m.woo_token, m.woo_vault);
        manager_config.mp_reward_rate_bps = m.mp_reward_rate_bps;
        manager_config.boost_ratio_bps = m.boost_ratio_bps;
        manager_config.compound_cooldown_secs = m.compound_cooldown_secs;
        manager_config.external_call_timeout = timeout;
        let manager = Arc::new(StakingManager::new(
            manager_config,
            clock.clone(),
            Arc::new(ledger.clone()),
            Arc::new(oracle),
        ));

        if reload_ledger(store.as_ref(), HOME_LEDGER, &ledger).await? {
            tracing::info!("Home ledger restored from store");
        } else {
            for rewarder in &config.rewarders {
                ledger.mint(rewarder.token, rewarder.vault, rewarder.funding_units()).await?;
            }
        }
        if reload_manager(store.as_ref(), &manager).await? {
            tracing::info!("Staking manager restored from store");
        } else {
            for rewarder in &config.rewarders {
                manager
                    .add_rewarder(&owner, rewarder.vault, rewarder.token, rewarder.reward_per_block_units())
                    .await?;
            }
        }

        let bridge = &config.bridge;
        manager.set_admin(&owner, m.local_address, true).await?;
        manager.set_admin(&owner, bridge.controller_address, true).await?;
        let local = Arc::new(StakingLocal::new(m.local_address, manager.clone()));
        let custodied = reload_local(store.as_ref(), &local).await?;
        if custodied > 0 {
            tracing::info!("Local custody restored for {} user(s)", custodied);
        }

        let transport = InMemoryTransport::new();
        let mut controller_config = ControllerConfig::new(bridge.controller_address, owner, bridge.home_domain);
        controller_config.external_call_timeout = timeout;
        let controller = Arc::new(BridgeController::new(
            controller_config,
            manager.clone(),
            Arc::new(transport.clone()),
        ));
        if let Some(state) = load_controller(store.as_ref()).await? {
            controller.restore(state).await;
        }
        transport.register(bridge.home_domain, controller.clone()).await;

        let mut remotes = Vec::with_capacity(bridge.remotes.len());
        for remote in &bridge.remotes {
            controller
                .set_trusted_remote(&owner, remote.domain, remote.proxy_address)
                .await?;
            let remote_ledger = InMemoryLedger::new();
            reload_ledger(store.as_ref(), &remote_ledger_name(remote.domain), &remote_ledger).await?;
            let mut proxy_config = ProxyConfig::new(
                remote.proxy_address,
                owner,
                remote.domain,
                bridge.home_domain,
                m.woo_token,
                remote.proxy_address,
            );
            proxy_config.external_call_timeout = timeout;
            let proxy = Arc::new(BridgeProxy::new(
                proxy_config,
                Arc::new(remote_ledger.clone()),
                Arc::new(transport.clone()),
            ));
            if let Some(state) = load_proxy(store.as_ref(), remote.domain).await? {
                proxy.restore(state).await;
            }
            proxy.set_controller(&owner, remote.controller_address).await?;
            transport.register(remote.domain, proxy.clone()).await;
            tracing::info!("Remote domain {} wired (proxy {})", remote.domain, remote.proxy_address);
            remotes.push(RemoteDomain {
                domain: remote.domain,
                ledger: remote_ledger,
                proxy,
            });
        }

        tracing::info!(
            "Home domain {} ready at block {} with {} rewarder(s) and {} remote(s)",
            bridge.home_domain,
            clock.block_number(),
            manager.rewarders().await.len(),
            remotes.len()
        );

        Ok(Self {
            config,
            clock,
            ledger,
            manager,
            local,
            controller,
            transport,
            remotes,
            store,
        })
    }

    /// Write manager, custody, bridge and ledger state to the store.
    pub async fn persist(&self) -> Result<(), StakingError> {
        let store = self.store.as_ref();
        persist_manager(store, &self.manager).await?;
        save_local(store, &self.local).await?;
        save_ledger(store, HOME_LEDGER, &self.ledger).await?;
        save_controller(store, &self.controller.snapshot().await).await?;
        for remote in &self.remotes {
            save_proxy(store, remote.domain, &remote.proxy.snapshot().await).await?;
            save_ledger(store, &remote_ledger_name(remote.domain), &remote.ledger).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RemoteSection, RewarderSection};
    use woo_core::types::{Address, ONE_TOKEN};

    const ALICE: Address = Address::from_low_u8(2);

    fn config() -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.rewarders.push(RewarderSection {
            token: Address::from_low_u8(0x11),
            vault: Address::from_low_u8(0x31),
            reward_per_block: 1,
            funding: 1_000,
        });
        config.prices.insert(Address::from_low_u8(0x11), 2.0);
        config.bridge.remotes.push(RemoteSection {
            domain: 112,
            proxy_address: Address::from_low_u8(0x40),
            controller_address: config.bridge.controller_address,
        });
        config
    }

    #[tokio::test]
    async fn test_build_wires_local_and_bridge() {
        let node = HomeNode::build(config()).await.unwrap();
        assert_eq!(node.manager.rewarders().await.len(), 1);
        let woo = node.config.manager.woo_token;

        node.ledger.mint(woo, ALICE, 10 * ONE_TOKEN).await.unwrap();
        node.local.stake(ALICE, 10 * ONE_TOKEN).await.unwrap();

        let remote = &node.remotes[0];
        remote.ledger.mint(woo, ALICE, 5 * ONE_TOKEN).await.unwrap();
        remote.proxy.stake(ALICE, 5 * ONE_TOKEN).await.unwrap();
        node.transport.deliver_until_idle(4).await;

        assert_eq!(node.manager.woo_balance(&ALICE).await, 15 * ONE_TOKEN);
        assert_eq!(remote.proxy.synced_balance_of(&ALICE).await, Some(15 * ONE_TOKEN));
    }

    #[tokio::test]
    async fn test_persist_writes_every_component() {
        let node = HomeNode::build(config()).await.unwrap();
        node.persist().await.unwrap();
        let store = node.store.as_ref();
        assert!(store.get(woo_store::keys::MANAGER_GLOBAL).await.unwrap().is_some());
        assert!(store.get(woo_store::keys::BRIDGE_CONTROLLER).await.unwrap().is_some());
        assert!(store.get(&woo_store::keys::bridge_proxy(112)).await.unwrap().is_some());
        assert!(store.get(&woo_store::keys::ledger_head(HOME_LEDGER)).await.unwrap().is_some());
        assert!(store
            .get(&woo_store::keys::ledger_head(&remote_ledger_name(112)))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_restart_keeps_vaults_behind_stakes() {
        let node = HomeNode::build(config()).await.unwrap();
        let woo = node.config.manager.woo_token;
        let woo_vault = node.config.manager.woo_vault;
        let rewarder_vault = Address::from_low_u8(0x31);
        let funding = node.ledger.balance_of(Address::from_low_u8(0x11), rewarder_vault).await.unwrap();
        node.ledger.mint(woo, ALICE, 10 * ONE_TOKEN).await.unwrap();
        node.local.stake(ALICE, 10 * ONE_TOKEN).await.unwrap();
        let remote = &node.remotes[0];
        remote.ledger.mint(woo, ALICE, 5 * ONE_TOKEN).await.unwrap();
        remote.proxy.stake(ALICE, 5 * ONE_TOKEN).await.unwrap();
        node.transport.deliver_until_idle(4).await;
        node.persist().await.unwrap();

        let restarted = HomeNode::build_with_store(config(), node.store.clone()).await.unwrap();
        assert_eq!(restarted.manager.woo_balance(&ALICE).await, 15 * ONE_TOKEN);
        assert_eq!(restarted.local.balance_of(&ALICE).await, 10 * ONE_TOKEN);
        assert_eq!(restarted.ledger.balance_of(woo, woo_vault).await.unwrap(), 10 * ONE_TOKEN);
        // Rewarder vaults are not funded a second time.
        assert_eq!(
            restarted
                .ledger
                .balance_of(Address::from_low_u8(0x11), rewarder_vault)
                .await
                .unwrap(),
            funding
        );
        let proxy_vault = restarted.remotes[0].ledger.balance_of(woo, Address::from_low_u8(0x40)).await.unwrap();
        assert_eq!(proxy_vault, 5 * ONE_TOKEN);

        assert_eq!(restarted.local.unstake_all(ALICE).await.unwrap(), 10 * ONE_TOKEN);
        assert_eq!(restarted.ledger.balance_of(woo, ALICE).await.unwrap(), 10 * ONE_TOKEN);
        assert_eq!(restarted.manager.woo_balance(&ALICE).await, 5 * ONE_TOKEN);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut bad = config();
        bad.storage = "postgres".to_string();
        assert!(HomeNode::build(bad).await.is_err());
    }
}
