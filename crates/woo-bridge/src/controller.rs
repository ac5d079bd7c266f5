// crates/woo-bridge/src/controller.rs
//
// Home-domain end of the staking bridge.
//
// Accepts instructions only from the trusted proxy of each remote domain,
// applies each (domain, nonce) at most once to the staking manager, and
// answers with the user's resulting principal. Inbound messages are
// serialized behind one lock, so a redelivered message always observes the
// outcome of the first delivery.
//
// Each domain's messages are applied in nonce order. A message that runs
// ahead of its predecessor is refused with a retryable error and picked up
// again once the gap is filled. A message the manager rejects for good
// still consumes its nonce, so one bad instruction cannot stall the domain.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use woo_core::access::AccessControl;
use woo_core::error::StakingError;
use woo_core::traits::{MessageHandler, MessageTransport};
use woo_core::types::{Address, Amount, DomainId, Nonce};
use woo_staking::{bounded, StakingManager, DEFAULT_EXTERNAL_CALL_TIMEOUT};

use crate::message::{CrossDomainMessage, StakeOp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Identity used as sender of replies and as admin of the manager.
    pub address: Address,
    pub owner: Address,
    pub home_domain: DomainId,
    pub external_call_timeout: Duration,
}

impl ControllerConfig {
    pub fn new(address: Address, owner: Address, home_domain: DomainId) -> Self {
        Self {
            address,
            owner,
            home_domain,
            external_call_timeout: DEFAULT_EXTERNAL_CALL_TIMEOUT,
        }
    }
}

/// Persistent controller state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerState {
    pub acl: AccessControl,
    /// Trusted proxy address per remote domain.
    pub trusted: BTreeMap<DomainId, Address>,
    /// Every (source domain, nonce) already applied.
    pub applied: BTreeSet<(DomainId, Nonce)>,
    /// Next nonce expected from each source domain.
    #[serde(default)]
    pub next_inbound: BTreeMap<DomainId, Nonce>,
    /// Next nonce for replies, per destination domain.
    pub next_nonce: BTreeMap<DomainId, Nonce>,
}

impl ControllerState {
    pub fn new(owner: Address) -> Self {
        Self {
            acl: AccessControl::new(owner),
            trusted: BTreeMap::new(),
            applied: BTreeSet::new(),
            next_inbound: BTreeMap::new(),
            next_nonce: BTreeMap::new(),
        }
    }

    /// Next nonce to apply from `domain`. State saved before inbound
    /// ordering was tracked falls back to the highest applied nonce.
    pub fn expected_nonce(&self, domain: DomainId) -> Nonce {
        if let Some(next) = self.next_inbound.get(&domain) {
            return *next;
        }
        self.applied
            .range((domain, Nonce::MIN)..=(domain, Nonce::MAX))
            .next_back()
            .map(|(_, nonce)| nonce + 1)
            .unwrap_or(1)
    }
}

pub struct BridgeController {
    config: ControllerConfig,
    manager: Arc<StakingManager>,
    transport: Arc<dyn MessageTransport>,
    state: Mutex<ControllerState>,
}

impl BridgeController {
    /// The controller must also be made an admin of `manager` by its owner.
    pub fn new(config: ControllerConfig, manager: Arc<StakingManager>, transport: Arc<dyn MessageTransport>) -> Self {
        let state = ControllerState::new(config.owner);
        Self {
            config,
            manager,
            transport,
            state: Mutex::new(state),
        }
    }

    pub fn address(&self) -> Address {
        self.config.address
    }

    pub fn home_domain(&self) -> DomainId {
        self.config.home_domain
    }

    /// Trust `remote` as the only sender for `domain`. Admin only.
    pub async fn set_trusted_remote(&self, caller: &Address, domain: DomainId, remote: Address) -> Result<(), StakingError> {
        let mut state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        if domain == self.config.home_domain {
            return Err(StakingError::InvalidConfiguration(format!(
                "domain {} is the home domain",
                domain
            )));
        }
        state.trusted.insert(domain, remote);
        info!("controller: trusted remote for domain {} set to {}", domain, remote);
        Ok(())
    }

    pub async fn remove_trusted_remote(&self, caller: &Address, domain: DomainId) -> Result<(), StakingError> {
        let mut state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        state
            .trusted
            .remove(&domain)
            .ok_or_else(|| StakingError::NotFound(format!("no trusted remote for domain {}", domain)))?;
        info!("controller: trusted remote for domain {} removed", domain);
        Ok(())
    }

    pub async fn trusted_remote(&self, domain: DomainId) -> Option<Address> {
        self.state.lock().await.trusted.get(&domain).copied()
    }

    pub async fn is_applied(&self, domain: DomainId, nonce: Nonce) -> bool {
        self.state.lock().await.applied.contains(&(domain, nonce))
    }

    pub async fn snapshot(&self) -> ControllerState {
        self.state.lock().await.clone()
    }

    pub async fn restore(&self, state: ControllerState) {
        *self.state.lock().await = state;
        info!("controller: state restored");
    }

    async fn apply(&self, op: &StakeOp) -> Result<(), StakingError> {
        let me = self.config.address;
        match *op {
            StakeOp::Stake { user, amount } => self.manager.stake_woo(&me, user, amount).await,
            StakeOp::Unstake { user, amount } => self.manager.unstake_woo(&me, user, amount).await.map(|_| ()),
            StakeOp::Compound { user } => self.manager.compound_all(&me, user).await.map(|_| ()),
            StakeOp::SyncBalance { .. } => Err(StakingError::InvalidInput(
                "balance sync is only accepted by proxies".to_string(),
            )),
        }
    }

    /// Report `user`'s principal back to `dest`. An undelivered report is
    /// superseded by the next one, so failure is logged, not propagated.
    async fn reply(&self, state: &mut ControllerState, dest: DomainId, user: Address, amount: Amount) {
        let nonce = state.next_nonce.get(&dest).copied().unwrap_or(1);
        let message = CrossDomainMessage {
            source_domain: self.config.home_domain,
            dest_domain: dest,
            sender: self.config.address,
            nonce,
            payload: StakeOp::SyncBalance { user, amount },
        };
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!("controller: failed to encode balance sync: {}", e);
                return;
            }
        };
        let sent = bounded(
            self.config.external_call_timeout,
            "bridge reply",
            self.transport
                .send(self.config.home_domain, self.config.address, dest, payload),
        )
        .await;
        match sent {
            Ok(()) => {
                state.next_nonce.insert(dest, nonce + 1);
            }
            Err(e) => warn!("controller: balance sync for {} to domain {} not sent: {}", user, dest, e),
        }
    }
}

#[async_trait]
impl MessageHandler for BridgeController {
    async fn on_receive(&self, source: DomainId, sender: Address, payload: &[u8]) -> Result<(), StakingError> {
        let mut state = self.state.lock().await;
        if state.trusted.get(&source) != Some(&sender) {
            warn!("controller: untrusted sender {} for domain {}", sender, source);
            return Err(StakingError::UntrustedSender { domain: source, sender });
        }

        let message = CrossDomainMessage::decode(payload)?;
        message.check_route(source, sender, self.config.home_domain)?;
        let expected = state.expected_nonce(source);
        if message.nonce < expected || state.applied.contains(&(source, message.nonce)) {
            debug!("controller: duplicate message {}:{} ignored", source, message.nonce);
            return Ok(());
        }
        if message.nonce > expected {
            debug!(
                "controller: message {}:{} held back until {} is applied",
                source, message.nonce, expected
            );
            return Err(StakingError::OutOfOrder {
                domain: source,
                expected,
                received: message.nonce,
            });
        }

        let user = message.payload.user();
        let outcome = self.apply(&message.payload).await;
        match &outcome {
            Ok(()) => {
                state.applied.insert((source, message.nonce));
                info!(
                    "controller: applied {} for {} from domain {} (nonce {})",
                    message.payload.kind(),
                    user,
                    source,
                    message.nonce
                );
            }
            Err(e) if e.is_retryable() => return Err(e.clone()),
            Err(e) => error!(
                "controller: {} for {} from domain {} (nonce {}) rejected: {}",
                message.payload.kind(),
                user,
                source,
                message.nonce,
                e
            ),
        }
        state.next_inbound.insert(source, expected + 1);

        let balance = self.manager.woo_balance(&user).await;
        self.reply(&mut state, source, user, balance).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use woo_core::clock::ManualClock;
    use woo_core::memory::{FixedPriceOracle, InMemoryLedger};
    use woo_core::types::{TokenId, ONE_TOKEN};
    use woo_staking::ManagerConfig;

    const OWNER: Address = Address::from_low_u8(1);
    const ALICE: Address = Address::from_low_u8(2);
    const MANAGER: Address = Address::from_low_u8(0x20);
    const WOO_VAULT: Address = Address::from_low_u8(0x21);
    const CONTROLLER: Address = Address::from_low_u8(0x30);
    const PROXY: Address = Address::from_low_u8(0x40);
    const WOO: TokenId = Address::from_low_u8(0x10);

    async fn setup() -> (InMemoryTransport, Arc<StakingManager>, BridgeController) {
        let ledger = InMemoryLedger::new();
        let manager = Arc::new(StakingManager::new(
            ManagerConfig::new(MANAGER, OWNER, WOO, WOO_VAULT),
            Arc::new(ManualClock::default()),
            Arc::new(ledger.clone()),
            Arc::new(FixedPriceOracle::new(ledger)),
        ));
        manager.set_admin(&OWNER, CONTROLLER, true).await.unwrap();
        let transport = InMemoryTransport::new();
        let controller = BridgeController::new(
            ControllerConfig::new(CONTROLLER, OWNER, 110),
            manager.clone(),
            Arc::new(transport.clone()),
        );
        controller.set_trusted_remote(&OWNER, 112, PROXY).await.unwrap();
        (transport, manager, controller)
    }

    fn stake(nonce: Nonce, amount: Amount) -> Vec<u8> {
        CrossDomainMessage {
            source_domain: 112,
            dest_domain: 110,
            sender: PROXY,
            nonce,
            payload: StakeOp::Stake { user: ALICE, amount },
        }
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn test_trusted_remote_is_admin_only() {
        let (_transport, _manager, controller) = setup().await;
        assert!(matches!(
            controller.set_trusted_remote(&ALICE, 113, ALICE).await,
            Err(StakingError::Unauthorized(_))
        ));
        assert!(controller.set_trusted_remote(&OWNER, 110, PROXY).await.is_err());
        assert_eq!(controller.trusted_remote(112).await, Some(PROXY));
    }

    #[tokio::test]
    async fn test_apply_once_and_reply() {
        let (transport, manager, controller) = setup().await;
        controller.on_receive(112, PROXY, &stake(1, 5 * ONE_TOKEN)).await.unwrap();
        controller.on_receive(112, PROXY, &stake(1, 5 * ONE_TOKEN)).await.unwrap();
        assert_eq!(manager.woo_balance(&ALICE).await, 5 * ONE_TOKEN);
        assert!(controller.is_applied(112, 1).await);

        let queued = transport.queued().await;
        assert_eq!(queued.len(), 1);
        let reply = CrossDomainMessage::decode(&queued[0].payload).unwrap();
        assert_eq!(reply.dest_domain, 112);
        assert_eq!(
            reply.payload,
            StakeOp::SyncBalance {
                user: ALICE,
                amount: 5 * ONE_TOKEN
            }
        );
    }

    #[tokio::test]
    async fn test_untrusted_sender_changes_nothing() {
        let (transport, manager, controller) = setup().await;
        let err = controller.on_receive(112, ALICE, &stake(1, ONE_TOKEN)).await.unwrap_err();
        assert_eq!(err, StakingError::UntrustedSender { domain: 112, sender: ALICE });
        let err = controller.on_receive(113, PROXY, &stake(1, ONE_TOKEN)).await.unwrap_err();
        assert!(matches!(err, StakingError::UntrustedSender { domain: 113, .. }));
        assert_eq!(manager.woo_balance(&ALICE).await, 0);
        assert_eq!(transport.pending().await, 0);
    }

    fn unstake(nonce: Nonce, amount: Amount) -> Vec<u8> {
        CrossDomainMessage {
            source_domain: 112,
            dest_domain: 110,
            sender: PROXY,
            nonce,
            payload: StakeOp::Unstake { user: ALICE, amount },
        }
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn test_rejected_message_consumes_its_nonce() {
        let (transport, manager, controller) = setup().await;
        assert!(matches!(
            controller.on_receive(112, PROXY, &unstake(1, ONE_TOKEN)).await,
            Err(StakingError::InsufficientBalance { .. })
        ));
        assert!(!controller.is_applied(112, 1).await);
        // The proxy still hears the unchanged principal.
        let queued = transport.queued().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(
            CrossDomainMessage::decode(&queued[0].payload).unwrap().payload,
            StakeOp::SyncBalance { user: ALICE, amount: 0 }
        );

        // Redelivery of the rejected message is a no-op.
        controller.on_receive(112, PROXY, &unstake(1, ONE_TOKEN)).await.unwrap();
        controller.on_receive(112, PROXY, &stake(2, ONE_TOKEN)).await.unwrap();
        assert_eq!(manager.woo_balance(&ALICE).await, ONE_TOKEN);
        assert!(controller.is_applied(112, 2).await);
    }

    #[tokio::test]
    async fn test_early_nonce_waits_for_predecessor() {
        let (_transport, manager, controller) = setup().await;
        let err = controller
            .on_receive(112, PROXY, &unstake(2, ONE_TOKEN))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StakingError::OutOfOrder {
                domain: 112,
                expected: 1,
                received: 2
            }
        );
        assert!(err.is_retryable());
        assert!(!controller.is_applied(112, 2).await);

        controller.on_receive(112, PROXY, &stake(1, 3 * ONE_TOKEN)).await.unwrap();
        controller.on_receive(112, PROXY, &unstake(2, ONE_TOKEN)).await.unwrap();
        assert_eq!(manager.woo_balance(&ALICE).await, 2 * ONE_TOKEN);
        assert_eq!(controller.snapshot().await.expected_nonce(112), 3);
    }

    #[tokio::test]
    async fn test_snapshot_survives_json() {
        let (_transport, _manager, controller) = setup().await;
        controller.on_receive(112, PROXY, &stake(1, ONE_TOKEN)).await.unwrap();
        let json = serde_json::to_string(&controller.snapshot().await).unwrap();
        let state: ControllerState = serde_json::from_str(&json).unwrap();
        assert!(state.applied.contains(&(112, 1)));
        assert_eq!(state.next_inbound.get(&112), Some(&2));
        assert_eq!(state.next_nonce.get(&112), Some(&2));
    }

    #[test]
    fn test_expected_nonce_falls_back_to_applied() {
        let mut state = ControllerState::new(OWNER);
        assert_eq!(state.expected_nonce(112), 1);
        state.applied.insert((112, 4));
        state.applied.insert((113, 9));
        assert_eq!(state.expected_nonce(112), 5);
        state.next_inbound.insert(112, 7);
        assert_eq!(state.expected_nonce(112), 7);
    }
}
