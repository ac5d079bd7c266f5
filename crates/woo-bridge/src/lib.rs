// crates/woo-bridge/src/lib.rs
//
// woo-bridge: cross-domain staking bridge for the WOO staking engine.
//
// A proxy on each remote domain custodies deposits and relays staking
// instructions to the controller on the home domain, which applies them to
// the staking manager exactly once per (domain, nonce) and reports balances
// back. The messaging channel itself is abstract; `InMemoryTransport`
// connects simulated domains in-process.

pub mod controller;
pub mod message;
pub mod proxy;
pub mod transport;

// Re-export key types for ergonomic access from downstream crates.
pub use controller::{BridgeController, ControllerConfig, ControllerState};
pub use message::{CrossDomainMessage, StakeOp};
pub use proxy::{BridgeProxy, ProxyConfig, ProxyState, SyncedBalance};
pub use transport::{DeliveryReport, Envelope, InMemoryTransport};
