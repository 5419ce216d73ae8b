//! Trait interfaces between the assembler and its collaborators.
//!
//! These traits define the contracts the miner crate requires:
//! - [`ChainView`] — read-only chain tip, consensus params, difficulty
//! - [`StakeWallet`] — coinstake formation and block signing keys
//! - [`BlockProcessor`] — validation and submission of produced blocks
//! - [`NetStatus`] — peer/sync state the staker gates on
//!
//! Implementations live in the node; they must be internally synchronized
//! and must never acquire the mempool lock, which fixes the global lock
//! order (chain before mempool) structurally.

use crate::crypto::KeyPair;
use crate::error::{BlockRejected, ValidityError, WalletError};
use crate::types::{Block, Hash256, Transaction};

/// A snapshot of the active chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipInfo {
    /// Height of the tip block.
    pub height: u64,
    /// Hash of the tip block header.
    pub hash: Hash256,
    /// Timestamp of the tip block.
    pub time: u64,
    /// Median of the previous 11 block times; the monotone clock used for
    /// lock-time cutoffs and minimum block times.
    pub median_time_past: u64,
}

impl TipInfo {
    /// Earliest timestamp the next block may carry.
    pub fn min_next_block_time(&self) -> u64 {
        self.median_time_past + 1
    }
}

/// Consensus parameters the assembler consults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusParams {
    /// Target seconds between blocks.
    pub target_spacing: u64,
    /// Bitmask quantizing candidate stake timestamps.
    pub stake_timestamp_mask: u64,
    /// Height of the last proof-of-work block.
    pub last_pow_block: u64,
    /// Regtest marker: difficulty is never retargeted for proof-of-stake.
    pub pos_no_retargeting: bool,
    /// Whether the lock-time cutoff is median-time-past (true) or the
    /// draft block time (false).
    pub locktime_uses_mtp: bool,
    /// Deepest reorganization the node follows.
    pub max_reorg_depth: u64,
    /// Seconds a block time may run ahead of the local clock.
    pub max_future_drift: u64,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            target_spacing: TARGET_SPACING,
            stake_timestamp_mask: STAKE_TIMESTAMP_MASK,
            last_pow_block: LAST_POW_BLOCK,
            pos_no_retargeting: false,
            locktime_uses_mtp: true,
            max_reorg_depth: MAX_REORG_DEPTH,
            max_future_drift: MAX_FUTURE_DRIFT,
        }
    }
}

impl ConsensusParams {
    /// Regtest parameters: no stake retargeting, blocks on demand.
    pub fn regtest() -> Self {
        Self {
            pos_no_retargeting: true,
            ..Self::default()
        }
    }

    /// Latest acceptable wall-clock moment for a block stamped `time`.
    pub fn future_drift(&self, time: u64) -> u64 {
        time + self.max_future_drift
    }
}

/// Read-only view of the active chain.
///
/// Implemented by the node over its block index; the assembler holds it
/// for the duration of a template build.
pub trait ChainView: Send + Sync {
    /// The current tip, or `None` before the genesis block is connected.
    fn tip(&self) -> Option<TipInfo>;

    /// Consensus parameters for the active network.
    fn params(&self) -> ConsensusParams;

    /// Network-adjusted wall-clock time in Unix seconds.
    fn adjusted_time(&self) -> u64;

    /// Compact difficulty target required for the block following `tip`.
    fn next_work_required(&self, tip: &TipInfo, proof_of_stake: bool) -> u32;

    /// Check a proof-of-work block candidate against full consensus rules
    /// without connecting it.
    fn test_block_validity(&self, block: &Block) -> Result<(), ValidityError>;

    /// Header version for the block following `tip`, from versionbit
    /// deployment state.
    fn block_version(&self, tip: &TipInfo) -> u32 {
        let _ = tip;
        4
    }
}

/// A coinstake produced by the wallet: the transaction plus the key that
/// controls the staked output, used to sign the block.
pub struct CoinStake {
    /// The coinstake transaction: empty first output, reward outputs after.
    pub tx: Transaction,
    /// Signing key for the block signature.
    pub key: KeyPair,
}

/// Wallet operations the staker depends on.
pub trait StakeWallet: Send + Sync {
    /// Whether the wallet is locked (no signing possible).
    fn is_locked(&self) -> bool;

    /// Whether any mature outputs are available for staking.
    fn have_stakeable_coins(&self) -> bool;

    /// Combined weight of stakeable outputs, for status reporting.
    fn stake_weight(&self) -> u64 {
        0
    }

    /// Try to form a coinstake whose kernel satisfies `bits` at
    /// `search_time`, claiming `fees` on top of the stake reward.
    ///
    /// Returns `Ok(None)` when no eligible kernel exists at this
    /// timestamp — the common case; the staker retries on the next grid
    /// tick.
    fn create_coin_stake(
        &self,
        bits: u32,
        search_time: u64,
        fees: u64,
    ) -> Result<Option<CoinStake>, WalletError>;
}

/// Validation and submission of completed blocks.
pub trait BlockProcessor: Send + Sync {
    /// Validate and connect a new block. `force` requests processing even
    /// when the block was produced locally rather than received from the
    /// network.
    fn process_new_block(&self, block: &Block, force: bool) -> Result<(), BlockRejected>;
}

/// Peer and sync state consulted by the staker before searching.
pub trait NetStatus: Send + Sync {
    /// Number of currently connected peers.
    fn peer_count(&self) -> usize;

    /// Whether the node is still performing initial block download.
    fn is_initial_block_download(&self) -> bool;

    /// Timestamp of the best known header.
    fn best_header_time(&self) -> u64;

    /// Whether the node has at least one connected peer.
    fn is_connected(&self) -> bool {
        self.peer_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockHeader, OutPoint, TxInput, TxOutput};

    struct MockChain {
        tip: TipInfo,
    }

    impl ChainView for MockChain {
        fn tip(&self) -> Option<TipInfo> {
            Some(self.tip)
        }

        fn params(&self) -> ConsensusParams {
            ConsensusParams::regtest()
        }

        fn adjusted_time(&self) -> u64 {
            self.tip.time + 16
        }

        fn next_work_required(&self, _tip: &TipInfo, _proof_of_stake: bool) -> u32 {
            crate::constants::POW_LIMIT_BITS
        }

        fn test_block_validity(&self, _block: &Block) -> Result<(), ValidityError> {
            Ok(())
        }
    }

    struct MockNet {
        peers: usize,
    }

    impl NetStatus for MockNet {
        fn peer_count(&self) -> usize {
            self.peers
        }

        fn is_initial_block_download(&self) -> bool {
            false
        }

        fn best_header_time(&self) -> u64 {
            0
        }
    }

    struct MockProcessor;

    impl BlockProcessor for MockProcessor {
        fn process_new_block(&self, block: &Block, _force: bool) -> Result<(), BlockRejected> {
            if block.transactions.is_empty() {
                return Err(BlockRejected("no coinbase".into()));
            }
            Ok(())
        }
    }

    fn tip() -> TipInfo {
        TipInfo {
            height: 100,
            hash: Hash256([0x42; 32]),
            time: 1_600_000_000,
            median_time_past: 1_599_999_900,
        }
    }

    #[test]
    fn min_next_block_time_is_past_mtp() {
        assert_eq!(tip().min_next_block_time(), 1_599_999_901);
    }

    #[test]
    fn default_params_are_mainnet_shaped() {
        let p = ConsensusParams::default();
        assert!(!p.pos_no_retargeting);
        assert!(p.locktime_uses_mtp);
        assert_eq!(p.stake_timestamp_mask, 0xF);
    }

    #[test]
    fn regtest_params_disable_retargeting() {
        assert!(ConsensusParams::regtest().pos_no_retargeting);
    }

    #[test]
    fn future_drift_window() {
        let p = ConsensusParams::default();
        assert_eq!(p.future_drift(1_600_000_000), 1_600_000_015);
    }

    #[test]
    fn chain_view_is_object_safe() {
        let chain = MockChain { tip: tip() };
        let dyn_chain: &dyn ChainView = &chain;
        assert_eq!(dyn_chain.tip().unwrap().height, 100);
        assert_eq!(dyn_chain.block_version(&tip()), 4);
    }

    #[test]
    fn net_status_is_connected_default() {
        assert!(MockNet { peers: 1 }.is_connected());
        assert!(!MockNet { peers: 0 }.is_connected());
    }

    #[test]
    fn processor_rejects_empty_block() {
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_hash: Hash256::ZERO,
                merkle_root: Hash256::ZERO,
                time: 0,
                bits: 0,
                nonce: 0,
            },
            transactions: vec![],
            signature: vec![],
        };
        assert!(MockProcessor.process_new_block(&block, true).is_err());
    }

    #[test]
    fn processor_accepts_block_with_coinbase() {
        let coinbase = Transaction {
            version: 1,
            time: 0,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                script_sig: vec![],
            }],
            outputs: vec![TxOutput::empty()],
            lock_time: 0,
        };
        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_hash: Hash256::ZERO,
                merkle_root: Hash256::ZERO,
                time: 0,
                bits: 0,
                nonce: 0,
            },
            transactions: vec![coinbase],
            signature: vec![],
        };
        assert!(MockProcessor.process_new_block(&block, true).is_ok());
    }
}
