// crates/woo-store/src/lib.rs
//
// woo-store: persisted state of the WOO staking engine.
//
// Defines the key layout, the in-memory and RocksDB `StateStore` backends,
// and the save/load routines that write manager, tracker, bridge, local
// custody and simulated ledger state one record per account.

pub mod keys;
pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocks;
pub mod snapshot;

// Re-export key types for ergonomic access from downstream crates.
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksStore;
pub use snapshot::{
    load_controller, load_manager, load_proxy, load_tracker, persist_manager, persist_router, reload_ledger,
    reload_local, reload_manager, reload_router, save_controller, save_ledger, save_local, save_manager, save_proxy,
    save_tracker,
};
