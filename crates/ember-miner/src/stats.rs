//! Process-wide miner telemetry.
//!
//! Status RPCs read these counters racily; writers update them under their
//! own locks. Relaxed ordering is sufficient — each counter is independent
//! observational state.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters published by the assembler and the staker.
#[derive(Debug, Default)]
pub struct MinerStats {
    last_block_tx: AtomicU64,
    last_block_size: AtomicU64,
    last_coin_stake_search_interval: AtomicI64,
}

impl MinerStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the shape of the last assembled template.
    pub fn record_template(&self, tx_count: u64, block_size: u64) {
        self.last_block_tx.store(tx_count, Ordering::Relaxed);
        self.last_block_size.store(block_size, Ordering::Relaxed);
    }

    /// Transactions in the last assembled template, excluding the coinbase.
    pub fn last_block_tx(&self) -> u64 {
        self.last_block_tx.load(Ordering::Relaxed)
    }

    /// Serialized size of the last assembled template.
    pub fn last_block_size(&self) -> u64 {
        self.last_block_size.load(Ordering::Relaxed)
    }

    /// Record the gap between consecutive stake searches. A positive value
    /// means the staker is running.
    pub fn set_search_interval(&self, interval: i64) {
        self.last_coin_stake_search_interval
            .store(interval, Ordering::Relaxed);
    }

    /// Clear the stake search interval (staker idle or wallet locked).
    pub fn clear_search_interval(&self) {
        self.set_search_interval(0);
    }

    /// Seconds between the last two stake searches.
    pub fn last_coin_stake_search_interval(&self) -> i64 {
        self.last_coin_stake_search_interval.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed() {
        let stats = MinerStats::new();
        assert_eq!(stats.last_block_tx(), 0);
        assert_eq!(stats.last_block_size(), 0);
        assert_eq!(stats.last_coin_stake_search_interval(), 0);
    }

    #[test]
    fn record_template_updates_both() {
        let stats = MinerStats::new();
        stats.record_template(12, 34_567);
        assert_eq!(stats.last_block_tx(), 12);
        assert_eq!(stats.last_block_size(), 34_567);
    }

    #[test]
    fn search_interval_set_and_clear() {
        let stats = MinerStats::new();
        stats.set_search_interval(16);
        assert_eq!(stats.last_coin_stake_search_interval(), 16);
        stats.clear_search_interval();
        assert_eq!(stats.last_coin_stake_search_interval(), 0);
    }
}
