// crates/woo-bridge/src/message.rs
//
// Wire model for cross-domain staking messages.
//
// A message names its source and destination domains, the sending bridge
// endpoint, a per-destination nonce, and one staking instruction. Payloads
// travel as JSON bytes.

use serde::{Deserialize, Serialize};

use woo_core::error::StakingError;
use woo_core::types::{Address, Amount, DomainId, Nonce};

/// One staking instruction relayed between domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeOp {
    /// Credit `amount` of WOO principal to `user` on the home manager.
    Stake { user: Address, amount: Amount },
    /// Debit `amount` of WOO principal from `user` on the home manager.
    Unstake { user: Address, amount: Amount },
    /// Home-reported principal of `user` after an applied instruction.
    SyncBalance { user: Address, amount: Amount },
    /// Run the full compound for `user` on the home manager.
    Compound { user: Address },
}

impl StakeOp {
    pub fn user(&self) -> Address {
        match self {
            StakeOp::Stake { user, .. }
            | StakeOp::Unstake { user, .. }
            | StakeOp::SyncBalance { user, .. }
            | StakeOp::Compound { user } => *user,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StakeOp::Stake { .. } => "stake",
            StakeOp::Unstake { .. } => "unstake",
            StakeOp::SyncBalance { .. } => "sync_balance",
            StakeOp::Compound { .. } => "compound",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossDomainMessage {
    pub source_domain: DomainId,
    pub dest_domain: DomainId,
    /// Bridge endpoint that emitted the message on `source_domain`.
    pub sender: Address,
    pub nonce: Nonce,
    pub payload: StakeOp,
}

impl CrossDomainMessage {
    pub fn encode(&self) -> Result<Vec<u8>, StakingError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StakingError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Reject messages whose envelope disagrees with the transport metadata.
    pub fn check_route(&self, source: DomainId, sender: Address, dest: DomainId) -> Result<(), StakingError> {
        if self.source_domain != source || self.sender != sender || self.dest_domain != dest {
            return Err(StakingError::InvalidInput(format!(
                "message {}:{} routed as {} -> {} by {} but claims {} -> {} by {}",
                self.source_domain,
                self.nonce,
                source,
                dest,
                sender,
                self.source_domain,
                self.dest_domain,
                self.sender
            )));
        }
        Ok(())
    }
}
