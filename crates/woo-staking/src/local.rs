// crates/woo-staking/src/local.rs
//
// Local staking entry point on the home domain.
//
// Custodies deposited WOO in the manager's WOO vault and forwards the
// accounting to the staking manager, acting as one of its admins. Each
// entry point pairs one token movement with one manager call and undoes
// the movement if the manager rejects the call.
//
// Only WOO deposited here (or compounded through here) can be withdrawn
// here. Stakes credited by other admins, such as the bridge controller,
// are backed by custody elsewhere and never drain this vault.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use woo_core::error::StakingError;
use woo_core::traits::TokenLedger;
use woo_core::types::{Address, Amount, TokenId};

use crate::manager::{Compounded, StakingManager};
use crate::settlement::Settlement;

pub struct StakingLocal {
    /// Identity registered as an admin of the manager.
    address: Address,
    woo_token: TokenId,
    vault: Address,
    manager: Arc<StakingManager>,
    ledger: Arc<dyn TokenLedger>,
    timeout: Duration,
    /// WOO each user holds in the vault through this entry point.
    custody: Mutex<BTreeMap<Address, Amount>>,
}

impl StakingLocal {
    pub fn new(address: Address, manager: Arc<StakingManager>) -> Self {
        let config = manager.config().clone();
        Self {
            address,
            woo_token: config.woo_token,
            vault: config.woo_vault,
            ledger: manager.ledger(),
            timeout: config.external_call_timeout,
            manager,
            custody: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn manager(&self) -> &Arc<StakingManager> {
        &self.manager
    }

    /// Stake `amount` of `user`'s WOO.
    pub async fn stake(&self, user: Address, amount: Amount) -> Result<(), StakingError> {
        self.stake_for(user, user, amount).await
    }

    /// Stake `amount` of `payer`'s WOO on behalf of `user`.
    pub async fn stake_for(&self, payer: Address, user: Address, amount: Amount) -> Result<(), StakingError> {
        if amount == 0 {
            return Err(StakingError::InvalidInput("stake amount must be positive".to_string()));
        }
        let mut custody = self.custody.lock().await;
        let mut settlement = Settlement::new(self.ledger.clone(), self.timeout);
        settlement.transfer(self.woo_token, payer, self.vault, amount).await?;
        if let Err(e) = self.manager.stake_woo(&self.address, user, amount).await {
            settlement.rollback().await;
            return Err(e);
        }
        settlement.commit();
        *custody.entry(user).or_insert(0) += amount;
        tracing::info!("local: {} staked {} for {}", payer, amount, user);
        Ok(())
    }

    /// Stake for several users out of one payment. `total` must equal the
    /// sum of `amounts`. Nothing is staked unless every user is.
    pub async fn stake_for_users(
        &self,
        payer: Address,
        users: &[Address],
        amounts: &[Amount],
        total: Amount,
    ) -> Result<(), StakingError> {
        if users.len() != amounts.len() {
            return Err(StakingError::InvalidInput(format!(
                "stake_for_users: {} users but {} amounts",
                users.len(),
                amounts.len()
            )));
        }
        if amounts.iter().any(|a| *a == 0) {
            return Err(StakingError::InvalidInput("stake amount must be positive".to_string()));
        }
        let sum = amounts
            .iter()
            .try_fold(0 as Amount, |acc, a| acc.checked_add(*a))
            .ok_or_else(|| StakingError::InvalidInput("stake_for_users: amounts overflow".to_string()))?;
        if sum != total {
            return Err(StakingError::InvalidInput(format!(
                "stake_for_users: amounts sum to {} but total is {}",
                sum, total
            )));
        }

        let entries: Vec<(Address, Amount)> = users.iter().copied().zip(amounts.iter().copied()).collect();
        let mut custody = self.custody.lock().await;
        let mut settlement = Settlement::new(self.ledger.clone(), self.timeout);
        settlement.transfer(self.woo_token, payer, self.vault, total).await?;
        if let Err(e) = self.manager.stake_woo_batch(&self.address, &entries).await {
            settlement.rollback().await;
            return Err(e);
        }
        settlement.commit();
        for (user, amount) in entries {
            *custody.entry(user).or_insert(0) += amount;
        }
        tracing::info!("local: {} staked {} for {} users", payer, total, users.len());
        Ok(())
    }

    /// Withdraw `amount` of WOO `user` staked through this entry point.
    /// Returns the MP burned.
    pub async fn unstake(&self, user: Address, amount: Amount) -> Result<Amount, StakingError> {
        if amount == 0 {
            return Err(StakingError::InvalidInput("unstake amount must be positive".to_string()));
        }
        let mut custody = self.custody.lock().await;
        let available = custody.get(&user).copied().unwrap_or(0);
        if amount > available {
            return Err(StakingError::InsufficientBalance {
                needed: amount,
                available,
            });
        }
        let mut settlement = Settlement::new(self.ledger.clone(), self.timeout);
        settlement.transfer(self.woo_token, self.vault, user, amount).await?;
        match self.manager.unstake_woo(&self.address, user, amount).await {
            Ok(burned) => {
                settlement.commit();
                if available == amount {
                    custody.remove(&user);
                } else {
                    custody.insert(user, available - amount);
                }
                tracing::info!("local: {} unstaked {}", user, amount);
                Ok(burned)
            }
            Err(e) => {
                settlement.rollback().await;
                Err(e)
            }
        }
    }

    /// Withdraw everything `user` holds through this entry point. Returns
    /// the amount withdrawn.
    pub async fn unstake_all(&self, user: Address) -> Result<Amount, StakingError> {
        let amount = self.balance_of(&user).await;
        if amount == 0 {
            return Ok(0);
        }
        self.unstake(user, amount).await?;
        Ok(amount)
    }

    pub async fn claim_rewards(&self, user: Address) -> Result<Vec<(TokenId, Amount)>, StakingError> {
        self.manager.claim_rewards(&self.address, user).await
    }

    /// Compound MP and rewards for `user`. The restaked WOO lands in the
    /// vault, so it becomes withdrawable here.
    pub async fn compound_all(&self, user: Address) -> Result<Compounded, StakingError> {
        let mut custody = self.custody.lock().await;
        let compounded = self.manager.compound_all(&self.address, user).await?;
        if compounded.woo > 0 {
            *custody.entry(user).or_insert(0) += compounded.woo;
        }
        Ok(compounded)
    }

    /// WOO `user` can withdraw through this entry point.
    pub async fn balance_of(&self, user: &Address) -> Amount {
        self.custody.lock().await.get(user).copied().unwrap_or(0)
    }

    /// Per-user custody, for persistence.
    pub async fn custody_balances(&self) -> Vec<(Address, Amount)> {
        self.custody
            .lock()
            .await
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .map(|(user, amount)| (*user, *amount))
            .collect()
    }

    /// Replace custody with previously saved balances.
    pub async fn restore_custody(&self, balances: impl IntoIterator<Item = (Address, Amount)>) {
        let mut custody = self.custody.lock().await;
        custody.clear();
        custody.extend(balances.into_iter().filter(|(_, amount)| *amount > 0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerConfig;
    use woo_core::clock::ManualClock;
    use woo_core::memory::{FixedPriceOracle, InMemoryLedger};
    use woo_core::types::ONE_TOKEN;

    const OWNER: Address = Address::from_low_u8(1);
    const ALICE: Address = Address::from_low_u8(2);
    const BOB: Address = Address::from_low_u8(3);
    const LOCAL: Address = Address::from_low_u8(0x22);
    const MANAGER: Address = Address::from_low_u8(0x20);
    const WOO_VAULT: Address = Address::from_low_u8(0x21);
    const WOO: TokenId = Address::from_low_u8(0x10);

    async fn setup() -> (InMemoryLedger, StakingLocal) {
        let ledger = InMemoryLedger::new();
        let manager = Arc::new(StakingManager::new(
            ManagerConfig::new(MANAGER, OWNER, WOO, WOO_VAULT),
            Arc::new(ManualClock::default()),
            Arc::new(ledger.clone()),
            Arc::new(FixedPriceOracle::new(ledger.clone())),
        ));
        manager.set_admin(&OWNER, LOCAL, true).await.unwrap();
        ledger.mint(WOO, ALICE, 100 * ONE_TOKEN).await.unwrap();
        (ledger, StakingLocal::new(LOCAL, manager))
    }

    #[tokio::test]
    async fn test_stake_moves_woo_into_vault() {
        let (ledger, local) = setup().await;
        local.stake(ALICE, 40 * ONE_TOKEN).await.unwrap();
        assert_eq!(local.balance_of(&ALICE).await, 40 * ONE_TOKEN);
        assert_eq!(ledger.balance_of(WOO, ALICE).await.unwrap(), 60 * ONE_TOKEN);
        assert_eq!(ledger.balance_of(WOO, WOO_VAULT).await.unwrap(), 40 * ONE_TOKEN);
    }

    #[tokio::test]
    async fn test_stake_without_funds_changes_nothing() {
        let (_ledger, local) = setup().await;
        assert!(local.stake(BOB, ONE_TOKEN).await.is_err());
        assert_eq!(local.balance_of(&BOB).await, 0);
    }

    #[tokio::test]
    async fn test_stake_for_users_checks_total() {
        let (ledger, local) = setup().await;
        let err = local
            .stake_for_users(ALICE, &[ALICE, BOB], &[ONE_TOKEN, 2 * ONE_TOKEN], 4 * ONE_TOKEN)
            .await
            .unwrap_err();
        assert!(matches!(err, StakingError::InvalidInput(_)));
        assert_eq!(ledger.balance_of(WOO, ALICE).await.unwrap(), 100 * ONE_TOKEN);

        local
            .stake_for_users(ALICE, &[ALICE, BOB], &[ONE_TOKEN, 2 * ONE_TOKEN], 3 * ONE_TOKEN)
            .await
            .unwrap();
        assert_eq!(local.balance_of(&ALICE).await, ONE_TOKEN);
        assert_eq!(local.balance_of(&BOB).await, 2 * ONE_TOKEN);
    }

    #[tokio::test]
    async fn test_unstake_and_unstake_all() {
        let (ledger, local) = setup().await;
        local.stake(ALICE, 30 * ONE_TOKEN).await.unwrap();
        assert!(matches!(
            local.unstake(ALICE, 31 * ONE_TOKEN).await,
            Err(StakingError::InsufficientBalance { .. })
        ));
        local.unstake(ALICE, 10 * ONE_TOKEN).await.unwrap();
        assert_eq!(local.balance_of(&ALICE).await, 20 * ONE_TOKEN);
        assert_eq!(local.unstake_all(ALICE).await.unwrap(), 20 * ONE_TOKEN);
        assert_eq!(local.balance_of(&ALICE).await, 0);
        assert_eq!(ledger.balance_of(WOO, ALICE).await.unwrap(), 100 * ONE_TOKEN);
        assert_eq!(local.unstake_all(ALICE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unstake_only_draws_local_custody() {
        let (ledger, local) = setup().await;
        ledger.mint(WOO, BOB, 50 * ONE_TOKEN).await.unwrap();
        local.stake(BOB, 50 * ONE_TOKEN).await.unwrap();
        // Credited by another admin with no WOO deposited here.
        local.manager().stake_woo(&OWNER, ALICE, 40 * ONE_TOKEN).await.unwrap();
        assert_eq!(local.manager().woo_balance(&ALICE).await, 40 * ONE_TOKEN);
        assert_eq!(local.balance_of(&ALICE).await, 0);

        assert_eq!(
            local.unstake(ALICE, 40 * ONE_TOKEN).await.unwrap_err(),
            StakingError::InsufficientBalance {
                needed: 40 * ONE_TOKEN,
                available: 0
            }
        );
        assert_eq!(local.unstake_all(ALICE).await.unwrap(), 0);
        assert_eq!(ledger.balance_of(WOO, WOO_VAULT).await.unwrap(), 50 * ONE_TOKEN);
        assert_eq!(local.manager().woo_balance(&ALICE).await, 40 * ONE_TOKEN);

        local.stake(ALICE, 10 * ONE_TOKEN).await.unwrap();
        assert!(matches!(
            local.unstake(ALICE, 11 * ONE_TOKEN).await,
            Err(StakingError::InsufficientBalance { .. })
        ));
        assert_eq!(local.unstake_all(ALICE).await.unwrap(), 10 * ONE_TOKEN);
        assert_eq!(local.manager().woo_balance(&ALICE).await, 40 * ONE_TOKEN);
        assert_eq!(ledger.balance_of(WOO, WOO_VAULT).await.unwrap(), 50 * ONE_TOKEN);
    }

    #[tokio::test]
    async fn test_custody_restore() {
        let (_ledger, local) = setup().await;
        local.stake(ALICE, 5 * ONE_TOKEN).await.unwrap();
        let saved = local.custody_balances().await;
        assert_eq!(saved, vec![(ALICE, 5 * ONE_TOKEN)]);

        let (_other_ledger, other) = setup().await;
        other.restore_custody(saved).await;
        assert_eq!(other.balance_of(&ALICE).await, 5 * ONE_TOKEN);
        assert_eq!(other.balance_of(&BOB).await, 0);
    }

    #[tokio::test]
    async fn test_unregistered_entry_point_is_refunded() {
        let (ledger, local) = setup().await;
        local.manager().set_admin(&OWNER, LOCAL, false).await.unwrap();
        assert!(matches!(
            local.stake(ALICE, ONE_TOKEN).await,
            Err(StakingError::Unauthorized(_))
        ));
        assert_eq!(ledger.balance_of(WOO, ALICE).await.unwrap(), 100 * ONE_TOKEN);
    }
}
