//! Protocol constants. All monetary values in sparks (1 EMBER = 10^8 sparks).

pub const COIN: u64 = 100_000_000;

/// Consensus cap on serialized block size.
pub const MAX_BLOCK_SIZE: u64 = 1_000_000;

/// Consensus cap on signature operations per block.
pub const MAX_BLOCK_SIGOPS: u32 = (MAX_BLOCK_SIZE / 50) as u32;

/// Default cap on the serialized size of blocks this node creates.
pub const DEFAULT_BLOCK_MAX_SIZE: u64 = 750_000;

/// Default byte budget for the priority-ordered head of the block.
/// Zero disables the priority phase entirely.
pub const DEFAULT_BLOCK_PRIORITY_SIZE: u64 = 0;

/// Default feerate floor for package selection, in sparks per 1000 bytes.
pub const DEFAULT_BLOCK_MIN_TX_FEE: u64 = 1_000;

/// Bytes reserved in every template for the coinbase transaction and
/// header slack.
pub const COINBASE_SIZE_RESERVE: u64 = 1_000;

/// Sigops reserved in every template for the coinbase transaction.
pub const COINBASE_SIGOP_RESERVE: u32 = 100;

/// Upper bound on the coinbase scriptSig after the extra-nonce rewrite.
pub const MAX_COINBASE_SCRIPT_SIG: usize = 100;

/// Marker bytes appended to the coinbase scriptSig by the extra-nonce
/// updater.
pub const COINBASE_FLAGS: &[u8] = b"/ember/";

/// Lock times below this threshold are block heights; at or above it they
/// are Unix timestamps.
pub const LOCKTIME_THRESHOLD: u64 = 500_000_000;

/// Fixed miner reward for proof-of-work blocks.
pub const POW_SUBSIDY: u64 = 10_000 * COIN;

/// Coin-age priority above which a transaction qualifies for free relay:
/// one coin held for 144 blocks, per 250 bytes.
pub const ALLOW_FREE_THRESHOLD: f64 = COIN as f64 * 144.0 / 250.0;

/// A transaction whose coin-age priority exceeds the free-relay threshold
/// may be mined without paying a fee.
pub fn allow_free(priority: f64) -> bool {
    priority > ALLOW_FREE_THRESHOLD
}

/// Target seconds between blocks.
pub const TARGET_SPACING: u64 = 64;

/// Mask applied to candidate stake timestamps; yields a 16-second grid.
pub const STAKE_TIMESTAMP_MASK: u64 = 0xF;

/// Height of the last block that may be proof-of-work.
pub const LAST_POW_BLOCK: u64 = 10_000;

/// Easiest allowed proof-of-work target, in compact form.
pub const POW_LIMIT_BITS: u32 = 0x207f_ffff;

/// Seconds a block timestamp may run ahead of the local clock.
pub const MAX_FUTURE_DRIFT: u64 = 15;

/// Deepest reorganization the node will follow.
pub const MAX_REORG_DEPTH: u64 = 500;

/// Milliseconds the staker sleeps between search iterations.
pub const DEFAULT_MINER_SLEEP_MS: u64 = 500;

/// Staker sleep on regtest; without this a regtest staker produces
/// multiple blocks per second.
pub const REGTEST_MINER_SLEEP_MS: u64 = 30_000;
