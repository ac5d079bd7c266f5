// crates/woo-core/src/access.rs
//
// Capability sets consulted at the top of every mutating call.
//
// Each component owns its own `AccessControl` (owner + admins) and, for
// reward trackers, a `HandlerSet` of principals allowed to bypass the
// privacy flags. Nothing here is global: the caller's address is passed
// into each operation explicitly.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::StakingError;
use crate::types::Address;

/// Owner plus admin allow-list for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    owner: Address,
    admins: BTreeSet<Address>,
}

impl AccessControl {
    /// New capability set. The owner is implicitly an admin.
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            admins: BTreeSet::new(),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn is_admin(&self, who: &Address) -> bool {
        *who == self.owner || self.admins.contains(who)
    }

    /// Grant or revoke admin rights. Owner only.
    pub fn set_admin(&mut self, caller: &Address, who: Address, enabled: bool) -> Result<(), StakingError> {
        self.require_owner(caller)?;
        if enabled {
            self.admins.insert(who);
        } else {
            self.admins.remove(&who);
        }
        tracing::info!("admin {} set to {}", who, enabled);
        Ok(())
    }

    /// Hand the component to a new owner. Owner only.
    pub fn transfer_ownership(&mut self, caller: &Address, new_owner: Address) -> Result<(), StakingError> {
        self.require_owner(caller)?;
        self.owner = new_owner;
        Ok(())
    }

    pub fn require_owner(&self, caller: &Address) -> Result<(), StakingError> {
        if *caller == self.owner {
            Ok(())
        } else {
            Err(StakingError::Unauthorized(format!("{} is not the owner", caller)))
        }
    }

    pub fn require_admin(&self, caller: &Address) -> Result<(), StakingError> {
        if self.is_admin(caller) {
            Ok(())
        } else {
            Err(StakingError::Unauthorized(format!("{} is not an admin", caller)))
        }
    }
}

/// Principals trusted to move a tracker's receipts and to stake/claim on
/// behalf of other accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerSet(BTreeSet<Address>);

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, who: Address, enabled: bool) {
        if enabled {
            self.0.insert(who);
        } else {
            self.0.remove(&who);
        }
    }

    pub fn contains(&self, who: &Address) -> bool {
        self.0.contains(who)
    }

    pub fn require(&self, who: &Address, action: &str) -> Result<(), StakingError> {
        if self.contains(who) {
            Ok(())
        } else {
            Err(StakingError::Unauthorized(format!(
                "{} is not a handler for {}",
                who, action
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: Address = Address::from_low_u8(1);
    const ALICE: Address = Address::from_low_u8(2);

    #[test]
    fn test_owner_is_admin() {
        let acl = AccessControl::new(OWNER);
        assert!(acl.is_admin(&OWNER));
        assert!(!acl.is_admin(&ALICE));
        assert!(acl.require_admin(&ALICE).is_err());
    }

    #[test]
    fn test_set_admin_requires_owner() {
        let mut acl = AccessControl::new(OWNER);
        assert!(matches!(
            acl.set_admin(&ALICE, ALICE, true),
            Err(StakingError::Unauthorized(_))
        ));
        acl.set_admin(&OWNER, ALICE, true).unwrap();
        assert!(acl.is_admin(&ALICE));
        acl.set_admin(&OWNER, ALICE, false).unwrap();
        assert!(!acl.is_admin(&ALICE));
    }

    #[test]
    fn test_transfer_ownership() {
        let mut acl = AccessControl::new(OWNER);
        acl.transfer_ownership(&OWNER, ALICE).unwrap();
        assert_eq!(acl.owner(), ALICE);
        assert!(acl.require_owner(&OWNER).is_err());
    }

    #[test]
    fn test_handler_set() {
        let mut handlers = HandlerSet::new();
        assert!(handlers.require(&ALICE, "transfer").is_err());
        handlers.set(ALICE, true);
        assert!(handlers.require(&ALICE, "transfer").is_ok());
        handlers.set(ALICE, false);
        assert!(!handlers.contains(&ALICE));
    }
}
