// crates/woo-core/src/clock.rs
//
// Time and block-height sources.
//
// Accrual is lazy: every component reads "now" and the current block from a
// `Clock` at the moment of the call. Production wiring uses `SystemClock`;
// tests and simulations drive a `ManualClock` forward explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::{BlockNumber, Timestamp};

/// Source of the current timestamp and block height.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
    fn block_number(&self) -> BlockNumber;
}

/// Wall-clock time; block height derived from a genesis time and a fixed
/// block interval.
#[derive(Debug, Clone)]
pub struct SystemClock {
    genesis: Timestamp,
    block_interval_secs: u64,
}

impl SystemClock {
    pub fn new(genesis: Timestamp, block_interval_secs: u64) -> Self {
        Self {
            genesis,
            block_interval_secs: block_interval_secs.max(1),
        }
    }

    /// Genesis at the current wall-clock second.
    pub fn starting_now(block_interval_secs: u64) -> Self {
        Self::new(chrono::Utc::now().timestamp().max(0) as Timestamp, block_interval_secs)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp().max(0) as Timestamp
    }

    fn block_number(&self) -> BlockNumber {
        self.now().saturating_sub(self.genesis) / self.block_interval_secs
    }
}

/// Manually advanced clock shared between components.
///
/// `mine(n)` produces `n` blocks one second apart, the way a local dev
/// chain does.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
    block: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
            block: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Advance time without producing blocks.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Produce `blocks` blocks, each one second after the previous.
    pub fn mine(&self, blocks: u64) {
        self.block.fetch_add(blocks, Ordering::SeqCst);
        self.now.fetch_add(blocks, Ordering::SeqCst);
    }

    pub fn set_time(&self, ts: Timestamp) {
        self.now.store(ts, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_700_000_000)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }

    fn block_number(&self) -> BlockNumber {
        self.block.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_mine() {
        let clock = ManualClock::new(1_000);
        let start_block = clock.block_number();
        clock.mine(10);
        assert_eq!(clock.now(), 1_010);
        assert_eq!(clock.block_number(), start_block + 10);
    }

    #[test]
    fn test_manual_clock_advance_keeps_block() {
        let clock = ManualClock::new(1_000);
        clock.advance(86_400);
        assert_eq!(clock.now(), 87_400);
        assert_eq!(clock.block_number(), 1);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(0);
        let other = clock.clone();
        other.mine(3);
        assert_eq!(clock.block_number(), 4);
    }

    #[test]
    fn test_system_clock_blocks_from_genesis() {
        let clock = SystemClock::new(0, 12);
        let before = clock.now();
        let block = clock.block_number();
        assert!(block >= before / 12);
        assert!(block <= before / 12 + 1);
    }
}
