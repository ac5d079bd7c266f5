// crates/woo-rewards/src/lib.rs
//
// woo-rewards: the synchronous reward-accounting ledgers of the WOO staking
// engine.
//
// Every component here is a plain owned struct mutated through `&mut self`.
// Time and block height are passed in explicitly; nothing reads a clock or
// takes a lock. Serialization of calls (and the lock order between
// components) is the job of woo-staking.
//
// Accrual is lazy and follows an accrue-before-mutate protocol: each
// mutating call first checkpoints the affected accumulator and account,
// then changes balances or weights.

pub mod booster;
pub mod compounder;
pub mod distributor;
pub mod mp_rewarder;
pub mod simple_rewarder;
pub mod tracker;
pub mod weights;

// Re-export key types for ergonomic access from downstream crates.
pub use booster::{BoostOverride, BoostRatioDetail, BoosterRecord, RewardBooster, DEFAULT_BOOST_RATIO_BPS};
pub use compounder::{Compounder, MemberRecord, DEFAULT_COOLDOWN_SECS};
pub use distributor::{Emission, RewardDistributor};
pub use mp_rewarder::{MpRewarder, MpUserInfo};
pub use simple_rewarder::{SimpleRewarder, SimpleUserInfo};
pub use tracker::{
    ClaimDestination, ClaimedReward, PrivacyFlags, RewardTracker, TrackerAccount, TrackerGlobal,
};
pub use weights::{BalanceBook, StakeWeights};
