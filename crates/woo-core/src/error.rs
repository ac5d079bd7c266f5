// crates/woo-core/src/error.rs
//
// Error types for the staking engine.

use thiserror::Error;

use crate::types::{Address, Amount, DomainId, Nonce, Timestamp};

/// Error taxonomy shared by every staking component.
///
/// Authorization and balance errors are raised before any state is touched.
/// External-call failures are retryable from the caller's point of view.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StakingError {
    /// Unstake, transfer, or burn larger than the available balance.
    #[error("Insufficient balance: needed {needed}, available {available}")]
    InsufficientBalance { needed: Amount, available: Amount },

    /// Caller lacks the owner/admin/handler capability, or the action is
    /// disabled by a privacy flag.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Cross-domain message from a sender that is not the trusted remote.
    #[error("Untrusted sender {sender} for domain {domain}")]
    UntrustedSender { domain: DomainId, sender: Address },

    /// Cross-domain message that arrived ahead of an earlier nonce from the
    /// same domain.
    #[error("Message {received} from domain {domain} arrived before {expected}")]
    OutOfOrder { domain: DomainId, expected: Nonce, received: Nonce },

    /// Manual claim attempted by a user enrolled in auto-compounding.
    #[error("User {0} is still enrolled in auto-compounding")]
    StillCompounding(Address),

    /// Compounder exit attempted before the cooldown elapsed.
    #[error("User {user} is still in cooldown until {until}")]
    StillInCooldown { user: Address, until: Timestamp },

    /// Configuration change that cannot be applied in the current state.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Malformed arguments (zero amounts, mismatched batch lengths, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Swap oracle, token ledger, boost source, or transport failure.
    #[error("External call failed: {0}")]
    ExternalCallFailed(String),

    /// External call exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Unknown rewarder, tracker, token, or record.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Key-value store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StakingError {
    /// Whether the initiating side may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StakingError::ExternalCallFailed(_) | StakingError::Timeout(_) | StakingError::OutOfOrder { .. }
        )
    }
}

impl From<serde_json::Error> for StakingError {
    fn from(e: serde_json::Error) -> Self {
        StakingError::Serialization(e.to_string())
    }
}
