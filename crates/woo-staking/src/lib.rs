// crates/woo-staking/src/lib.rs
//
// woo-staking: async orchestration over the accounting components.
//
// The staking manager serializes every balance change behind a fixed lock
// order, the local entry point custodies WOO for it, and the reward router
// drives the sWoo -> sbWoo -> sbfWoo tracker pipeline. Operations that move
// tokens are all-or-nothing through journaled settlements.

pub mod local;
pub mod manager;
pub mod router;
pub mod settlement;

// Re-export key types for ergonomic access from downstream crates.
pub use local::StakingLocal;
pub use manager::{
    CompoundReport, Compounded, ManagerConfig, ManagerSnapshot, PendingRewards, StakingManager,
    DEFAULT_EXTERNAL_CALL_TIMEOUT, DEFAULT_MP_REWARD_RATE_BPS,
};
pub use router::{RewardRouter, RouterCompounded, RouterConfig, Tier};
pub use settlement::{bounded, Settlement};
