// crates/woo-core/src/memory.rs
//
// In-process implementations of the external collaborators.
//
// These back the daemon's simulated domains and the test suites. They obey
// the same contracts as the real collaborators: failures are reported as
// `ExternalCallFailed`, never as panics, and balances never go negative.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StakingError;
use crate::math::{mul_div_amount, PRECISION};
use crate::traits::{BoostSource, SwapOracle, TokenLedger};
use crate::types::{Address, Amount, TokenId};

/// HashMap-backed token ledger.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLedger {
    balances: Arc<RwLock<HashMap<(TokenId, Address), Amount>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent transfer fail (simulates an unavailable ledger).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every non-zero balance as `(token, owner, amount)`, sorted.
    pub async fn entries(&self) -> Vec<(TokenId, Address, Amount)> {
        let mut entries: Vec<(TokenId, Address, Amount)> = self
            .balances
            .read()
            .await
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .map(|((token, owner), amount)| (*token, *owner, *amount))
            .collect();
        entries.sort();
        entries
    }

    /// Replace every balance with `entries`.
    pub async fn restore(&self, entries: impl IntoIterator<Item = (TokenId, Address, Amount)>) {
        let mut balances = self.balances.write().await;
        balances.clear();
        for (token, owner, amount) in entries {
            *balances.entry((token, owner)).or_insert(0) += amount;
        }
    }

    fn check_available(&self) -> Result<(), StakingError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StakingError::ExternalCallFailed("token ledger unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TokenLedger for InMemoryLedger {
    async fn transfer(&self, token: TokenId, from: Address, to: Address, amount: Amount) -> Result<(), StakingError> {
        self.check_available()?;
        if amount == 0 {
            return Ok(());
        }
        let mut balances = self.balances.write().await;
        let available = balances.get(&(token, from)).copied().unwrap_or(0);
        if available < amount {
            return Err(StakingError::ExternalCallFailed(format!(
                "transfer of {} {} from {} exceeds balance {}",
                amount, token, from, available
            )));
        }
        balances.insert((token, from), available - amount);
        *balances.entry((token, to)).or_insert(0) += amount;
        Ok(())
    }

    async fn balance_of(&self, token: TokenId, owner: Address) -> Result<Amount, StakingError> {
        Ok(self.balances.read().await.get(&(token, owner)).copied().unwrap_or(0))
    }

    async fn mint(&self, token: TokenId, to: Address, amount: Amount) -> Result<(), StakingError> {
        self.check_available()?;
        *self.balances.write().await.entry((token, to)).or_insert(0) += amount;
        Ok(())
    }

    async fn burn(&self, token: TokenId, from: Address, amount: Amount) -> Result<(), StakingError> {
        self.check_available()?;
        let mut balances = self.balances.write().await;
        let available = balances.get(&(token, from)).copied().unwrap_or(0);
        if available < amount {
            return Err(StakingError::ExternalCallFailed(format!(
                "burn of {} {} from {} exceeds balance {}",
                amount, token, from, available
            )));
        }
        balances.insert((token, from), available - amount);
        Ok(())
    }
}

/// Swap venue quoting fixed prices (18-decimal, in a common numeraire) and
/// settling on an `InMemoryLedger` by burning the input and minting the
/// output.
#[derive(Debug, Clone)]
pub struct FixedPriceOracle {
    ledger: InMemoryLedger,
    prices: Arc<RwLock<HashMap<TokenId, Amount>>>,
    delay: Option<Duration>,
    failing: Arc<AtomicBool>,
}

impl FixedPriceOracle {
    pub fn new(ledger: InMemoryLedger) -> Self {
        Self {
            ledger,
            prices: Arc::new(RwLock::new(HashMap::new())),
            delay: None,
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sleep before answering (used to exercise caller timeouts).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn set_price(&self, token: TokenId, price: Amount) {
        self.prices.write().await.insert(token, price);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Output amount for a swap without settling it.
    pub async fn quote(&self, token_in: TokenId, token_out: TokenId, amount_in: Amount) -> Result<Amount, StakingError> {
        let prices = self.prices.read().await;
        let price_in = prices
            .get(&token_in)
            .copied()
            .ok_or_else(|| StakingError::ExternalCallFailed(format!("no price for {}", token_in)))?;
        let price_out = prices
            .get(&token_out)
            .copied()
            .filter(|p| *p > 0)
            .ok_or_else(|| StakingError::ExternalCallFailed(format!("no price for {}", token_out)))?;
        mul_div_amount(amount_in, price_in, price_out)
    }
}

#[async_trait]
impl SwapOracle for FixedPriceOracle {
    async fn swap(
        &self,
        token_in: TokenId,
        token_out: TokenId,
        amount_in: Amount,
        holder: Address,
    ) -> Result<Amount, StakingError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StakingError::ExternalCallFailed("swap venue unavailable".to_string()));
        }
        if token_in == token_out {
            return Ok(amount_in);
        }
        let amount_out = self.quote(token_in, token_out, amount_in).await?;
        self.ledger.burn(token_in, holder, amount_in).await?;
        self.ledger.mint(token_out, holder, amount_out).await?;
        tracing::debug!(
            "swapped {} {} -> {} {} for {}",
            amount_in,
            token_in,
            amount_out,
            token_out,
            holder
        );
        Ok(amount_out)
    }
}

/// Price of one whole token expressed at `PRECISION`.
pub fn price(whole: u128, tenths: u128) -> Amount {
    whole * PRECISION + tenths * (PRECISION / 10)
}

/// Boost source backed by a fixed table of token ids. Each id can be
/// consumed once.
#[derive(Debug, Default, Clone)]
pub struct StaticBoostSource {
    table: Arc<RwLock<HashMap<u64, (Address, u32, u64)>>>,
}

impl StaticBoostSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `token_id`, owned by `owner`, granting `multiplier_bps` for
    /// `duration_secs`.
    pub async fn issue(&self, token_id: u64, owner: Address, multiplier_bps: u32, duration_secs: u64) {
        self.table
            .write()
            .await
            .insert(token_id, (owner, multiplier_bps, duration_secs));
    }
}

fn lookup_grant(
    table: &HashMap<u64, (Address, u32, u64)>,
    owner: Address,
    token_id: u64,
) -> Result<(u32, u64), StakingError> {
    match table.get(&token_id) {
        Some((holder, multiplier, duration)) if *holder == owner => Ok((*multiplier, *duration)),
        Some(_) => Err(StakingError::Unauthorized(format!(
            "boost token {} is not owned by {}",
            token_id, owner
        ))),
        None => Err(StakingError::ExternalCallFailed(format!(
            "boost token {} does not exist or was already consumed",
            token_id
        ))),
    }
}

#[async_trait]
impl BoostSource for StaticBoostSource {
    async fn grant_of(&self, owner: Address, token_id: u64) -> Result<(u32, u64), StakingError> {
        lookup_grant(&*self.table.read().await, owner, token_id)
    }

    async fn consume(&self, owner: Address, token_id: u64) -> Result<(u32, u64), StakingError> {
        let mut table = self.table.write().await;
        let grant = lookup_grant(&table, owner, token_id)?;
        table.remove(&token_id);
        Ok(grant)
    }
}
