// crates/woo-core/src/traits.rs
//
// External collaborators consumed by the staking engine. The engine calls
// these but does not implement them; `memory.rs` provides in-process
// implementations for simulation and tests.

use async_trait::async_trait;

use crate::error::StakingError;
use crate::types::{Address, Amount, DomainId, TokenId};

/// Token balances and transfers.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Move `amount` of `token` from `from` to `to`.
    async fn transfer(&self, token: TokenId, from: Address, to: Address, amount: Amount) -> Result<(), StakingError>;

    async fn balance_of(&self, token: TokenId, owner: Address) -> Result<Amount, StakingError>;

    async fn mint(&self, token: TokenId, to: Address, amount: Amount) -> Result<(), StakingError>;

    async fn burn(&self, token: TokenId, from: Address, amount: Amount) -> Result<(), StakingError>;
}

/// Price/swap venue used when compounding non-staking reward tokens.
///
/// Failure is retryable or abortable; the engine never assumes a price.
#[async_trait]
pub trait SwapOracle: Send + Sync {
    /// Exchange `amount_in` of `token_in` held by `holder` for `token_out`,
    /// credited back to `holder`. Returns the amount received.
    async fn swap(
        &self,
        token_in: TokenId,
        token_out: TokenId,
        amount_in: Amount,
        holder: Address,
    ) -> Result<Amount, StakingError>;
}

/// Source of time-limited boosts (NFTs burned for a multiplier).
#[async_trait]
pub trait BoostSource: Send + Sync {
    /// The `(multiplier_bps, duration_secs)` that consuming `token_id`
    /// would grant `owner`, leaving the token in place.
    async fn grant_of(&self, owner: Address, token_id: u64) -> Result<(u32, u64), StakingError>;

    /// Consume `token_id` owned by `owner`, returning
    /// `(multiplier_bps, duration_secs)`.
    async fn consume(&self, owner: Address, token_id: u64) -> Result<(u32, u64), StakingError>;
}

/// Outbound side of the cross-domain messaging channel.
///
/// Delivery is at-least-once and unordered across domains. An `Err` means
/// the message was not accepted for delivery.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, source: DomainId, sender: Address, dest: DomainId, payload: Vec<u8>) -> Result<(), StakingError>;
}

/// Inbound side: invoked by the transport for every delivered message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_receive(&self, source: DomainId, sender: Address, payload: &[u8]) -> Result<(), StakingError>;
}

/// Flat key-value store for persisted engine state.
///
/// Implemented by woo-store (in-memory and RocksDB backends).
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StakingError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StakingError>;

    async fn delete(&self, key: &str) -> Result<(), StakingError>;

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StakingError>;
}
