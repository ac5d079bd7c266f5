// crates/woo-bridge/src/proxy.rs
//
// Remote-domain end of the staking bridge.
//
// Users stake and unstake WOO against the proxy on their own domain. The
// proxy custodies deposits in its vault and relays each instruction to the
// home controller. A deposit is refunded, or a withdrawal reversed, when
// the message cannot be handed to the transport. Balance reports from the
// controller are recorded per user, newest nonce wins.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use woo_core::access::AccessControl;
use woo_core::error::StakingError;
use woo_core::traits::{MessageHandler, MessageTransport, TokenLedger};
use woo_core::types::{Address, Amount, DomainId, Nonce, TokenId};
use woo_staking::{bounded, Settlement, DEFAULT_EXTERNAL_CALL_TIMEOUT};

use crate::message::{CrossDomainMessage, StakeOp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Identity used as message sender; must be the controller's trusted
    /// remote for `domain`.
    pub address: Address,
    pub owner: Address,
    pub domain: DomainId,
    pub home_domain: DomainId,
    pub woo_token: TokenId,
    /// Ledger account holding deposited WOO.
    pub vault: Address,
    pub external_call_timeout: Duration,
}

impl ProxyConfig {
    pub fn new(
        address: Address,
        owner: Address,
        domain: DomainId,
        home_domain: DomainId,
        woo_token: TokenId,
        vault: Address,
    ) -> Self {
        Self {
            address,
            owner,
            domain,
            home_domain,
            woo_token,
            vault,
            external_call_timeout: DEFAULT_EXTERNAL_CALL_TIMEOUT,
        }
    }
}

/// A balance reported by the home controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedBalance {
    pub amount: Amount,
    pub nonce: Nonce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyState {
    pub acl: AccessControl,
    /// Trusted controller on the home domain.
    pub controller: Option<Address>,
    pub next_nonce: Nonce,
    /// WOO custodied here per user.
    pub balances: BTreeMap<Address, Amount>,
    pub synced: BTreeMap<Address, SyncedBalance>,
}

impl ProxyState {
    pub fn new(owner: Address) -> Self {
        Self {
            acl: AccessControl::new(owner),
            controller: None,
            next_nonce: 1,
            balances: BTreeMap::new(),
            synced: BTreeMap::new(),
        }
    }
}

pub struct BridgeProxy {
    config: ProxyConfig,
    ledger: Arc<dyn TokenLedger>,
    transport: Arc<dyn MessageTransport>,
    state: Mutex<ProxyState>,
}

impl BridgeProxy {
    pub fn new(config: ProxyConfig, ledger: Arc<dyn TokenLedger>, transport: Arc<dyn MessageTransport>) -> Self {
        let state = ProxyState::new(config.owner);
        Self {
            config,
            ledger,
            transport,
            state: Mutex::new(state),
        }
    }

    pub fn address(&self) -> Address {
        self.config.address
    }

    pub fn domain(&self) -> DomainId {
        self.config.domain
    }

    pub async fn set_controller(&self, caller: &Address, controller: Address) -> Result<(), StakingError> {
        let mut state = self.state.lock().await;
        state.acl.require_admin(caller)?;
        state.controller = Some(controller);
        info!("proxy {}: controller set to {}", self.config.domain, controller);
        Ok(())
    }

    /// Deposit `amount` of `user`'s WOO and relay a stake. Returns the nonce
    /// of the relayed message.
    pub async fn stake(&self, user: Address, amount: Amount) -> Result<Nonce, StakingError> {
        if amount == 0 {
            return Err(StakingError::InvalidInput("stake amount must be positive".to_string()));
        }
        let mut state = self.state.lock().await;
        let mut settlement = Settlement::new(self.ledger.clone(), self.config.external_call_timeout);
        settlement
            .transfer(self.config.woo_token, user, self.config.vault, amount)
            .await?;

        let nonce = match self.relay(&state, StakeOp::Stake { user, amount }).await {
            Ok(nonce) => nonce,
            Err(e) => {
                warn!("proxy {}: stake of {} for {} refunded: {}", self.config.domain, amount, user, e);
                settlement.rollback().await;
                return Err(e);
            }
        };
        settlement.commit();
        state.next_nonce += 1;
        *state.balances.entry(user).or_insert(0) += amount;
        info!("proxy {}: {} staked {} (nonce {})", self.config.domain, user, amount, nonce);
        Ok(nonce)
    }

    /// Return `amount` of custodied WOO to `user` and relay an unstake.
    pub async fn unstake(&self, user: Address, amount: Amount) -> Result<Nonce, StakingError> {
        if amount == 0 {
            return Err(StakingError::InvalidInput("unstake amount must be positive".to_string()));
        }
        let mut state = self.state.lock().await;
        let available = state.balances.get(&user).copied().unwrap_or(0);
        if amount > available {
            return Err(StakingError::InsufficientBalance {
                needed: amount,
                available,
            });
        }
        let mut settlement = Settlement::new(self.ledger.clone(), self.config.external_call_timeout);
        settlement
            .transfer(self.config.woo_token, self.config.vault, user, amount)
            .await?;

        let nonce = match self.relay(&state, StakeOp::Unstake { user, amount }).await {
            Ok(nonce) => nonce,
            Err(e) => {
                warn!("proxy {}: unstake of {} for {} reversed: {}", self.config.domain, amount, user, e);
                settlement.rollback().await;
                return Err(e);
            }
        };
        settlement.commit();
        state.next_nonce += 1;
        let remaining = available - amount;
        if remaining == 0 {
            state.balances.remove(&user);
        } else {
            state.balances.insert(user, remaining);
        }
        info!("proxy {}: {} unstaked {} (nonce {})", self.config.domain, user, amount, nonce);
        Ok(nonce)
    }

    /// Withdraw everything `user` deposited here. `None` if nothing was.
    pub async fn unstake_all(&self, user: Address) -> Result<Option<Nonce>, StakingError> {
        let amount = self.balance_of(&user).await;
        if amount == 0 {
            return Ok(None);
        }
        self.unstake(user, amount).await.map(Some)
    }

    /// Ask the home manager to compound `user`'s rewards.
    pub async fn compound(&self, user: Address) -> Result<Nonce, StakingError> {
        let mut state = self.state.lock().await;
        let nonce = self.relay(&state, StakeOp::Compound { user }).await?;
        state.next_nonce += 1;
        debug!("proxy {}: compound for {} relayed (nonce {})", self.config.domain, user, nonce);
        Ok(nonce)
    }

    /// WOO custodied here for `user`.
    pub async fn balance_of(&self, user: &Address) -> Amount {
        self.state.lock().await.balances.get(user).copied().unwrap_or(0)
    }

    /// Last principal the home controller reported for `user`.
    pub async fn synced_balance_of(&self, user: &Address) -> Option<Amount> {
        self.state.lock().await.synced.get(user).map(|s| s.amount)
    }

    pub async fn next_nonce(&self) -> Nonce {
        self.state.lock().await.next_nonce
    }

    pub async fn snapshot(&self) -> ProxyState {
        self.state.lock().await.clone()
    }

    pub async fn restore(&self, state: ProxyState) {
        *self.state.lock().await = state;
        info!("proxy {}: state restored", self.config.domain);
    }

    /// Hand `op` to the transport under the current nonce. The caller
    /// advances the nonce once its own bookkeeping is done.
    async fn relay(&self, state: &ProxyState, op: StakeOp) -> Result<Nonce, StakingError> {
        if state.controller.is_none() {
            return Err(StakingError::InvalidConfiguration(format!(
                "proxy {} has no controller",
                self.config.domain
            )));
        }
        let nonce = state.next_nonce;
        let payload = CrossDomainMessage {
            source_domain: self.config.domain,
            dest_domain: self.config.home_domain,
            sender: self.config.address,
            nonce,
            payload: op,
        }
        .encode()?;
        bounded(
            self.config.external_call_timeout,
            "bridge send",
            self.transport.send(
                self.config.domain,
                self.config.address,
                self.config.home_domain,
                payload,
            ),
        )
        .await?;
        Ok(nonce)
    }
}

#[async_trait]
impl MessageHandler for BridgeProxy {
    async fn on_receive(&self, source: DomainId, sender: Address, payload: &[u8]) -> Result<(), StakingError> {
        let mut state = self.state.lock().await;
        if source != self.config.home_domain || state.controller != Some(sender) {
            warn!("proxy {}: untrusted sender {} for domain {}", self.config.domain, sender, source);
            return Err(StakingError::UntrustedSender { domain: source, sender });
        }
        let message = CrossDomainMessage::decode(payload)?;
        message.check_route(source, sender, self.config.domain)?;

        let StakeOp::SyncBalance { user, amount } = message.payload else {
            return Err(StakingError::InvalidInput(format!(
                "proxy accepts only balance syncs, got {}",
                message.payload.kind()
            )));
        };
        match state.synced.get(&user) {
            Some(prev) if prev.nonce >= message.nonce => {
                debug!("proxy {}: stale balance sync {} for {} ignored", self.config.domain, message.nonce, user);
            }
            _ => {
                state.synced.insert(
                    user,
                    SyncedBalance {
                        amount,
                        nonce: message.nonce,
                    },
                );
                debug!("proxy {}: {} synced at {}", self.config.domain, user, amount);
            }
        }
        Ok(())
    }
}
