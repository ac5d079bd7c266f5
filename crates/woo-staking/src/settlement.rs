// crates/woo-staking/src/settlement.rs
//
// Journaled external calls.
//
// Composite operations stage their accounting on copies and only commit
// once every token movement succeeded. The token movements themselves
// cannot be staged, so each successful one is recorded here; if a later
// step fails the journal is unwound in reverse with compensating calls.
// Every call is bounded by a timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use woo_core::error::StakingError;
use woo_core::traits::{SwapOracle, TokenLedger};
use woo_core::types::{Address, Amount, TokenId};

/// Run `fut`, failing with `Timeout` if it does not finish in `timeout`.
pub async fn bounded<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T, StakingError>
where
    F: Future<Output = Result<T, StakingError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StakingError::Timeout(format!(
            "{} did not complete within {:?}",
            what, timeout
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Transfer {
        token: TokenId,
        from: Address,
        to: Address,
        amount: Amount,
    },
    Mint {
        token: TokenId,
        to: Address,
        amount: Amount,
    },
    Burn {
        token: TokenId,
        from: Address,
        amount: Amount,
    },
    Swap {
        token_in: TokenId,
        token_out: TokenId,
        amount_in: Amount,
        amount_out: Amount,
        holder: Address,
    },
}

pub struct Settlement {
    ledger: Arc<dyn TokenLedger>,
    swap: Option<Arc<dyn SwapOracle>>,
    timeout: Duration,
    steps: Vec<Step>,
}

impl Settlement {
    pub fn new(ledger: Arc<dyn TokenLedger>, timeout: Duration) -> Self {
        Self {
            ledger,
            swap: None,
            timeout,
            steps: Vec::new(),
        }
    }

    pub fn with_swap(mut self, swap: Arc<dyn SwapOracle>) -> Self {
        self.swap = Some(swap);
        self
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn transfer(
        &mut self,
        token: TokenId,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), StakingError> {
        if amount == 0 {
            return Ok(());
        }
        bounded(self.timeout, "ledger transfer", self.ledger.transfer(token, from, to, amount)).await?;
        self.steps.push(Step::Transfer {
            token,
            from,
            to,
            amount,
        });
        Ok(())
    }

    pub async fn mint(&mut self, token: TokenId, to: Address, amount: Amount) -> Result<(), StakingError> {
        if amount == 0 {
            return Ok(());
        }
        bounded(self.timeout, "ledger mint", self.ledger.mint(token, to, amount)).await?;
        self.steps.push(Step::Mint { token, to, amount });
        Ok(())
    }

    pub async fn burn(&mut self, token: TokenId, from: Address, amount: Amount) -> Result<(), StakingError> {
        if amount == 0 {
            return Ok(());
        }
        bounded(self.timeout, "ledger burn", self.ledger.burn(token, from, amount)).await?;
        self.steps.push(Step::Burn { token, from, amount });
        Ok(())
    }

    /// Swap `amount_in` held by `holder` into `token_out`. Same-token swaps
    /// are a no-op.
    pub async fn swap(
        &mut self,
        token_in: TokenId,
        token_out: TokenId,
        amount_in: Amount,
        holder: Address,
    ) -> Result<Amount, StakingError> {
        if amount_in == 0 || token_in == token_out {
            return Ok(amount_in);
        }
        let oracle = self
            .swap
            .clone()
            .ok_or_else(|| StakingError::InvalidConfiguration("no swap oracle configured".to_string()))?;
        let amount_out = bounded(
            self.timeout,
            "swap",
            oracle.swap(token_in, token_out, amount_in, holder),
        )
        .await?;
        self.steps.push(Step::Swap {
            token_in,
            token_out,
            amount_in,
            amount_out,
            holder,
        });
        Ok(amount_out)
    }

    /// Keep every recorded movement.
    pub fn commit(self) {
        if !self.steps.is_empty() {
            tracing::debug!("settlement committed {} steps", self.steps.len());
        }
    }

    /// Undo every recorded movement, newest first. Compensation failures
    /// are logged and do not stop the unwind.
    pub async fn rollback(self) {
        for step in self.steps.iter().rev() {
            let result = match step {
                Step::Transfer {
                    token,
                    from,
                    to,
                    amount,
                } => {
                    bounded(
                        self.timeout,
                        "compensating transfer",
                        self.ledger.transfer(*token, *to, *from, *amount),
                    )
                    .await
                }
                Step::Mint { token, to, amount } => {
                    bounded(self.timeout, "compensating burn", self.ledger.burn(*token, *to, *amount)).await
                }
                Step::Burn { token, from, amount } => {
                    bounded(self.timeout, "compensating mint", self.ledger.mint(*token, *from, *amount)).await
                }
                Step::Swap {
                    token_in,
                    token_out,
                    amount_out,
                    holder,
                    ..
                } => match &self.swap {
                    Some(oracle) => bounded(
                        self.timeout,
                        "compensating swap",
                        oracle.swap(*token_out, *token_in, *amount_out, *holder),
                    )
                    .await
                    .map(|_| ()),
                    None => Ok(()),
                },
            };
            if let Err(e) = result {
                tracing::error!("failed to compensate {:?}: {}", step, e);
            }
        }
        if !self.steps.is_empty() {
            tracing::warn!("settlement rolled back {} steps", self.steps.len());
        }
    }
}
