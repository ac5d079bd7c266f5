// crates/woo-rewards/src/compounder.rs
//
// Auto-compounding membership registry.
//
// A user is either enrolled here (rewards are compounded for them by the
// periodic job) or claims manually, never both. Leaving by oneself is
// gated by a cooldown measured from the join time; admins may remove users
// at any time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use woo_core::access::AccessControl;
use woo_core::error::StakingError;
use woo_core::types::{Address, Timestamp};

/// Default cooldown: 7 days.
pub const DEFAULT_COOLDOWN_SECS: u64 = 7 * 86_400;

/// One member as persisted: join time and position in join order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub joined_at: Timestamp,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compounder {
    acl: AccessControl,
    cooldown_secs: u64,
    /// Join time per member.
    joined: BTreeMap<Address, Timestamp>,
    /// Members in join order.
    order: Vec<Address>,
}

impl Compounder {
    pub fn new(owner: Address) -> Self {
        Self {
            acl: AccessControl::new(owner),
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            joined: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    pub fn with_cooldown(owner: Address, cooldown_secs: u64) -> Self {
        Self {
            cooldown_secs,
            ..Self::new(owner)
        }
    }

    pub fn acl_mut(&mut self) -> &mut AccessControl {
        &mut self.acl
    }

    pub fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs
    }

    pub fn contains(&self, user: &Address) -> bool {
        self.joined.contains_key(user)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn joined_at(&self, user: &Address) -> Option<Timestamp> {
        self.joined.get(user).copied()
    }

    /// Earliest time `user` may leave on their own.
    pub fn cooldown_until(&self, user: &Address) -> Option<Timestamp> {
        self.joined_at(user)
            .map(|joined| joined.saturating_add(self.cooldown_secs))
    }

    /// All members in join order.
    pub fn all_users(&self) -> Vec<Address> {
        self.order.clone()
    }

    /// Members at positions `start..end` in join order, clamped to the
    /// membership size.
    pub fn users_range(&self, start: usize, end: usize) -> Vec<Address> {
        let end = end.min(self.order.len());
        if start >= end {
            return Vec::new();
        }
        self.order[start..end].to_vec()
    }

    /// Enroll `user`. Returns `false` if already enrolled (the original join
    /// time is kept).
    pub fn add_user(&mut self, user: Address, now: Timestamp) -> bool {
        if self.joined.contains_key(&user) {
            return false;
        }
        self.joined.insert(user, now);
        self.order.push(user);
        tracing::info!("compounder: {} joined at {}", user, now);
        true
    }

    /// Enroll several users. Admin only. Returns the newly enrolled ones.
    pub fn add_users(&mut self, caller: &Address, users: &[Address], now: Timestamp) -> Result<Vec<Address>, StakingError> {
        self.acl.require_admin(caller)?;
        Ok(users
            .iter()
            .filter(|user| self.add_user(**user, now))
            .copied()
            .collect())
    }

    /// Leave on one's own once the cooldown has elapsed.
    pub fn remove_user(&mut self, user: Address, now: Timestamp) -> Result<(), StakingError> {
        let until = self
            .cooldown_until(&user)
            .ok_or_else(|| StakingError::NotFound(format!("{} is not enrolled in compounding", user)))?;
        if now < until {
            return Err(StakingError::StillInCooldown { user, until });
        }
        self.remove(&user);
        Ok(())
    }

    /// Remove several users regardless of cooldown. Admin only. Returns the
    /// ones that were enrolled.
    pub fn remove_users(&mut self, caller: &Address, users: &[Address]) -> Result<Vec<Address>, StakingError> {
        self.acl.require_admin(caller)?;
        Ok(users.iter().filter(|user| self.remove(user)).copied().collect())
    }

    fn remove(&mut self, user: &Address) -> bool {
        if self.joined.remove(user).is_none() {
            return false;
        }
        self.order.retain(|member| member != user);
        tracing::info!("compounder: {} left", user);
        true
    }

    pub fn member_records(&self) -> Vec<(Address, MemberRecord)> {
        self.order
            .iter()
            .enumerate()
            .filter_map(|(position, user)| {
                self.joined
                    .get(user)
                    .map(|joined_at| (*user, MemberRecord { joined_at: *joined_at, position }))
            })
            .collect()
    }

    /// Copy of the configuration with no members.
    pub fn without_members(&self) -> Self {
        Self {
            joined: BTreeMap::new(),
            order: Vec::new(),
            ..self.clone()
        }
    }

    /// Reinstate persisted members, in their recorded join order.
    pub fn restore_members(&mut self, mut members: Vec<(Address, MemberRecord)>) {
        members.sort_by_key(|(user, record)| (record.position, *user));
        for (user, record) in members {
            if self.joined.insert(user, record.joined_at).is_none() {
                self.order.push(user);
            }
        }
    }

    pub fn set_cooldown_duration(&mut self, caller: &Address, secs: u64) -> Result<(), StakingError> {
        self.acl.require_admin(caller)?;
        self.cooldown_secs = secs;
        tracing::info!("compounder: cooldown set to {}s", secs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN: Address = Address::from_low_u8(1);
    const ALICE: Address = Address::from_low_u8(2);
    const BOB: Address = Address::from_low_u8(3);
    const CAROL: Address = Address::from_low_u8(4);
    const T0: Timestamp = 1_000;

    #[test]
    fn test_add_is_idempotent() {
        let mut c = Compounder::new(ADMIN);
        assert!(c.add_user(ALICE, T0));
        assert!(!c.add_user(ALICE, T0 + 50));
        assert_eq!(c.joined_at(&ALICE), Some(T0));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_remove_respects_cooldown() {
        let mut c = Compounder::new(ADMIN);
        c.add_user(ALICE, T0);
        let err = c.remove_user(ALICE, T0 + 10).unwrap_err();
        assert_eq!(
            err,
            StakingError::StillInCooldown {
                user: ALICE,
                until: T0 + DEFAULT_COOLDOWN_SECS
            }
        );
        c.remove_user(ALICE, T0 + DEFAULT_COOLDOWN_SECS).unwrap();
        assert!(!c.contains(&ALICE));
    }

    #[test]
    fn test_remove_unknown_user() {
        let mut c = Compounder::new(ADMIN);
        assert!(matches!(c.remove_user(ALICE, T0), Err(StakingError::NotFound(_))));
    }

    #[test]
    fn test_admin_removal_bypasses_cooldown() {
        let mut c = Compounder::new(ADMIN);
        c.add_users(&ADMIN, &[ALICE, BOB], T0).unwrap();
        assert!(c.remove_users(&ALICE, &[BOB]).is_err());
        assert_eq!(c.remove_users(&ADMIN, &[BOB, CAROL]).unwrap(), vec![BOB]);
        assert_eq!(c.all_users(), vec![ALICE]);
    }

    #[test]
    fn test_join_order_and_ranges() {
        let mut c = Compounder::new(ADMIN);
        c.add_user(CAROL, T0);
        c.add_user(ALICE, T0);
        c.add_user(BOB, T0);
        assert_eq!(c.all_users(), vec![CAROL, ALICE, BOB]);
        assert_eq!(c.users_range(1, 10), vec![ALICE, BOB]);
        assert!(c.users_range(3, 5).is_empty());
    }

    #[test]
    fn test_set_cooldown_duration() {
        let mut c = Compounder::new(ADMIN);
        assert!(c.set_cooldown_duration(&ALICE, 0).is_err());
        c.set_cooldown_duration(&ADMIN, 60).unwrap();
        c.add_user(ALICE, T0);
        assert_eq!(c.cooldown_until(&ALICE), Some(T0 + 60));
    }

    #[test]
    fn test_member_records_keep_join_order() {
        let mut c = Compounder::with_cooldown(ADMIN, 60);
        c.add_user(CAROL, T0);
        c.add_user(ALICE, T0 + 5);
        let records = c.member_records();
        assert_eq!(records[1].1, MemberRecord { joined_at: T0 + 5, position: 1 });

        let mut restored = c.without_members();
        assert!(restored.is_empty());
        restored.restore_members(records.into_iter().rev().collect());
        assert_eq!(restored, c);
    }
}
