// crates/woo-store/src/keys.rs
//
// Key layout of the persisted state.
//
//   tracker:{id}:global            -> tracker-wide state (distributors split out)
//   tracker:{id}:account:{addr}    -> one account of a tracker
//   distributor:{id}:{token}       -> one reward stream of a tracker
//   manager:global                 -> manager configuration and rewarders
//   manager:balance:{addr}         -> staked WOO and MP of one user
//   booster:{addr}                 -> booster flags of one user
//   compounder:{addr}              -> compounder membership of one user
//   bridge:controller              -> controller configuration and nonces
//   bridge:nonce:{domain}:{nonce}  -> one applied inbound message
//   bridge:proxy:{domain}          -> proxy state of one remote domain
//   local:balance:{addr}           -> WOO one user holds through the local entry point
//   ledger:{name}:head             -> marks a saved ledger
//   ledger:{name}:balance:{token}:{owner} -> one token balance of a simulated ledger
//
// Addresses are rendered as 0x-prefixed hex, so keys sort by address.

use std::str::FromStr;

use woo_core::error::StakingError;
use woo_core::types::{Address, DomainId, Nonce, TokenId};

pub const MANAGER_GLOBAL: &str = "manager:global";
pub const MANAGER_BALANCE_PREFIX: &str = "manager:balance:";
pub const BOOSTER_PREFIX: &str = "booster:";
pub const COMPOUNDER_PREFIX: &str = "compounder:";
pub const BRIDGE_CONTROLLER: &str = "bridge:controller";
pub const BRIDGE_NONCE_PREFIX: &str = "bridge:nonce:";
pub const LOCAL_BALANCE_PREFIX: &str = "local:balance:";

pub fn tracker_global(id: &Address) -> String {
    format!("tracker:{}:global", id)
}

pub fn tracker_account_prefix(id: &Address) -> String {
    format!("tracker:{}:account:", id)
}

pub fn tracker_account(id: &Address, account: &Address) -> String {
    format!("{}{}", tracker_account_prefix(id), account)
}

pub fn distributor_prefix(tracker: &Address) -> String {
    format!("distributor:{}:", tracker)
}

pub fn distributor(tracker: &Address, token: &TokenId) -> String {
    format!("{}{}", distributor_prefix(tracker), token)
}

pub fn manager_balance(user: &Address) -> String {
    format!("{}{}", MANAGER_BALANCE_PREFIX, user)
}

pub fn booster(user: &Address) -> String {
    format!("{}{}", BOOSTER_PREFIX, user)
}

pub fn compounder(user: &Address) -> String {
    format!("{}{}", COMPOUNDER_PREFIX, user)
}

pub fn bridge_nonce(domain: DomainId, nonce: Nonce) -> String {
    format!("{}{}:{}", BRIDGE_NONCE_PREFIX, domain, nonce)
}

pub fn bridge_proxy(domain: DomainId) -> String {
    format!("bridge:proxy:{}", domain)
}

pub fn local_balance(user: &Address) -> String {
    format!("{}{}", LOCAL_BALANCE_PREFIX, user)
}

pub fn ledger_head(name: &str) -> String {
    format!("ledger:{}:head", name)
}

pub fn ledger_balance_prefix(name: &str) -> String {
    format!("ledger:{}:balance:", name)
}

pub fn ledger_balance(name: &str, token: &TokenId, owner: &Address) -> String {
    format!("{}{}:{}", ledger_balance_prefix(name), token, owner)
}

/// The address that follows `prefix` in `key`.
pub fn address_suffix(key: &str, prefix: &str) -> Result<Address, StakingError> {
    let suffix = key
        .strip_prefix(prefix)
        .ok_or_else(|| StakingError::Storage(format!("key {} does not start with {}", key, prefix)))?;
    Address::from_str(suffix).map_err(|e| StakingError::Storage(format!("bad address in key {}: {}", key, e)))
}

/// `(domain, nonce)` of a `bridge:nonce:` key.
pub fn parse_bridge_nonce(key: &str) -> Result<(DomainId, Nonce), StakingError> {
    let bad = || StakingError::Storage(format!("malformed bridge nonce key {}", key));
    let rest = key.strip_prefix(BRIDGE_NONCE_PREFIX).ok_or_else(bad)?;
    let (domain, nonce) = rest.split_once(':').ok_or_else(bad)?;
    Ok((
        domain.parse().map_err(|_| bad())?,
        nonce.parse().map_err(|_| bad())?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = Address::from_low_u8(2);
    const TRACKER: Address = Address::from_low_u8(0x50);

    #[test]
    fn test_account_key_round_trips_address() {
        let key = tracker_account(&TRACKER, &ALICE);
        assert!(key.starts_with("tracker:0x"));
        assert!(key.contains(":account:"));
        assert_eq!(address_suffix(&key, &tracker_account_prefix(&TRACKER)).unwrap(), ALICE);
    }

    #[test]
    fn test_bridge_nonce_key() {
        let key = bridge_nonce(112, 42);
        assert_eq!(key, "bridge:nonce:112:42");
        assert_eq!(parse_bridge_nonce(&key).unwrap(), (112, 42));
        assert!(parse_bridge_nonce("bridge:nonce:112").is_err());
        assert!(parse_bridge_nonce("bridge:nonce:x:1").is_err());
    }

    #[test]
    fn test_ledger_keys_stay_under_their_name() {
        let token = Address::from_low_u8(0x10);
        let key = ledger_balance("home", &token, &ALICE);
        assert!(key.starts_with(&ledger_balance_prefix("home")));
        assert!(!key.starts_with(&ledger_balance_prefix("remote-112")));
        assert!(!ledger_head("home").starts_with(&ledger_balance_prefix("home")));
        assert_eq!(address_suffix(&local_balance(&ALICE), LOCAL_BALANCE_PREFIX).unwrap(), ALICE);
    }

    #[test]
    fn test_address_suffix_rejects_garbage() {
        assert!(address_suffix("booster:nope", BOOSTER_PREFIX).is_err());
        assert!(address_suffix("compounder:0x01", BOOSTER_PREFIX).is_err());
    }
}
