// crates/woo-core/src/lib.rs
//
// woo-core: identifiers, fixed-point math, error taxonomy, capability sets,
// clocks, and the external collaborator traits for the WOO staking engine.
//
// This is the leaf crate that all other crates in the workspace depend on.

pub mod access;
pub mod clock;
pub mod error;
pub mod math;
pub mod memory;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic access from downstream crates.
pub use access::{AccessControl, HandlerSet};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StakingError;
pub use math::{BPS_DIVISOR, PRECISION, SECONDS_PER_YEAR, TRACKER_PRECISION, U256};
pub use memory::{FixedPriceOracle, InMemoryLedger, StaticBoostSource};
pub use traits::{BoostSource, MessageHandler, MessageTransport, StateStore, SwapOracle, TokenLedger};
pub use types::{Address, Amount, BlockNumber, DomainId, Nonce, Timestamp, TokenId, ONE_TOKEN};
