//! Miner configuration and the recognized option surface.
//!
//! Options mirror the daemon flags: `--blockmaxsize`, `--blockmintxfee`,
//! `--blockprioritysize`, `--blockversion`, `--printpriority`, and
//! `--staking`. [`MinerArgs`] is the clap-facing form a node binary embeds;
//! [`MinerConfig`] is the validated form the assembler consumes.

use clap::Parser;
use std::fmt;

use ember_core::constants::{
    COIN, DEFAULT_BLOCK_MAX_SIZE, DEFAULT_BLOCK_MIN_TX_FEE, DEFAULT_BLOCK_PRIORITY_SIZE,
    DEFAULT_MINER_SLEEP_MS, MAX_BLOCK_SIZE,
};
use ember_core::error::MinerError;

/// Fee rate in sparks per 1000 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FeeRate {
    per_kb: u64,
}

impl FeeRate {
    /// A fee rate of `per_kb` sparks per 1000 bytes.
    pub const fn per_kb(per_kb: u64) -> Self {
        Self { per_kb }
    }

    /// The fee this rate charges for `size` bytes. Any non-zero rate
    /// charges at least one spark.
    pub fn fee(&self, size: u64) -> u64 {
        let fee = (self.per_kb as u128 * size as u128 / 1000) as u64;
        if fee == 0 && self.per_kb != 0 {
            1
        } else {
            fee
        }
    }

    /// Parse a decimal EMBER amount per kilobyte, e.g. `"0.0001"`.
    pub fn parse(s: &str) -> Result<Self, MinerError> {
        let invalid = || MinerError::ConfigInvalid(format!("invalid fee rate: {s:?}"));
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > 8 {
            return Err(invalid());
        }
        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac_value: u64 = if frac.is_empty() {
            0
        } else {
            let parsed: u64 = frac.parse().map_err(|_| invalid())?;
            parsed * 10u64.pow(8 - frac.len() as u32)
        };
        let per_kb = whole
            .checked_mul(COIN)
            .and_then(|v| v.checked_add(frac_value))
            .ok_or_else(invalid)?;
        Ok(Self { per_kb })
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08} EMBER/kB", self.per_kb / COIN, self.per_kb % COIN)
    }
}

/// Validated miner configuration.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Cap on serialized block size, clamped to
    /// `[1000, MAX_BLOCK_SIZE - 1000]`.
    pub block_max_size: u64,
    /// Feerate floor below which packages are never considered.
    pub block_min_fee_rate: FeeRate,
    /// Bytes reserved for priority-ordered inclusion; 0 disables the
    /// priority phase.
    pub block_priority_size: u64,
    /// Regtest-only override of the header version.
    pub block_version: Option<u32>,
    /// Log per-inclusion fee and priority.
    pub print_priority: bool,
    /// Spawn the staker task.
    pub staking: bool,
    /// Milliseconds the staker sleeps between iterations.
    pub miner_sleep_ms: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            block_max_size: clamp_block_size(DEFAULT_BLOCK_MAX_SIZE),
            block_min_fee_rate: FeeRate::per_kb(DEFAULT_BLOCK_MIN_TX_FEE),
            block_priority_size: DEFAULT_BLOCK_PRIORITY_SIZE,
            block_version: None,
            print_priority: false,
            staking: true,
            miner_sleep_ms: DEFAULT_MINER_SLEEP_MS,
        }
    }
}

impl MinerConfig {
    /// A config with a specific block size cap, clamped to sane bounds.
    pub fn with_block_max_size(mut self, size: u64) -> Self {
        self.block_max_size = clamp_block_size(size);
        self
    }
}

/// Clamp a requested block size cap to `[1000, MAX_BLOCK_SIZE - 1000]`.
fn clamp_block_size(size: u64) -> u64 {
    size.clamp(1000, MAX_BLOCK_SIZE - 1000)
}

/// Command-line arguments recognized by the miner, for embedding in a node
/// binary's clap command.
#[derive(Debug, Parser)]
#[command(name = "ember-miner", about = "Ember block assembler options")]
pub struct MinerArgs {
    /// Cap on the serialized size of created blocks, in bytes.
    #[arg(long = "blockmaxsize", default_value_t = DEFAULT_BLOCK_MAX_SIZE)]
    pub block_max_size: u64,

    /// Feerate floor for package selection, in EMBER per kB (e.g. "0.00001").
    #[arg(long = "blockmintxfee")]
    pub block_min_tx_fee: Option<String>,

    /// Bytes reserved for priority-ordered inclusion; 0 disables.
    #[arg(long = "blockprioritysize", default_value_t = DEFAULT_BLOCK_PRIORITY_SIZE)]
    pub block_priority_size: u64,

    /// Override the block header version (regtest only).
    #[arg(long = "blockversion")]
    pub block_version: Option<u32>,

    /// Log fee and priority for every included transaction.
    #[arg(long = "printpriority", default_value_t = false)]
    pub print_priority: bool,

    /// Run the proof-of-stake staking thread.
    #[arg(long = "staking", default_value_t = true, action = clap::ArgAction::Set)]
    pub staking: bool,
}

impl MinerArgs {
    /// Validate and convert into a [`MinerConfig`].
    pub fn into_config(self) -> Result<MinerConfig, MinerError> {
        let block_min_fee_rate = match self.block_min_tx_fee {
            Some(ref s) => FeeRate::parse(s)?,
            None => FeeRate::per_kb(DEFAULT_BLOCK_MIN_TX_FEE),
        };
        Ok(MinerConfig {
            block_max_size: clamp_block_size(self.block_max_size),
            block_min_fee_rate,
            block_priority_size: self.block_priority_size.min(MAX_BLOCK_SIZE),
            block_version: self.block_version,
            print_priority: self.print_priority,
            staking: self.staking,
            miner_sleep_ms: DEFAULT_MINER_SLEEP_MS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- FeeRate ---

    #[test]
    fn fee_scales_with_size() {
        let rate = FeeRate::per_kb(1_000);
        assert_eq!(rate.fee(1000), 1_000);
        assert_eq!(rate.fee(250), 250);
        assert_eq!(rate.fee(0), 0);
    }

    #[test]
    fn nonzero_rate_charges_at_least_one_spark() {
        let rate = FeeRate::per_kb(1);
        assert_eq!(rate.fee(1), 1);
    }

    #[test]
    fn zero_rate_charges_nothing() {
        assert_eq!(FeeRate::per_kb(0).fee(100_000), 0);
    }

    #[test]
    fn fee_no_overflow_on_large_blocks() {
        let rate = FeeRate::per_kb(u64::MAX / 2);
        // Must not panic.
        let _ = rate.fee(MAX_BLOCK_SIZE);
    }

    #[test]
    fn parse_whole_coins() {
        assert_eq!(FeeRate::parse("1").unwrap(), FeeRate::per_kb(COIN));
    }

    #[test]
    fn parse_decimal() {
        assert_eq!(FeeRate::parse("0.00001").unwrap(), FeeRate::per_kb(1_000));
        assert_eq!(FeeRate::parse("0.5").unwrap(), FeeRate::per_kb(COIN / 2));
        assert_eq!(FeeRate::parse(".25").unwrap(), FeeRate::per_kb(COIN / 4));
    }

    #[test]
    fn parse_rejects_garbage() {
        for s in ["", ".", "abc", "1.2.3", "0.123456789", "1e5", "-1"] {
            assert!(
                matches!(FeeRate::parse(s), Err(MinerError::ConfigInvalid(_))),
                "expected parse failure for {s:?}"
            );
        }
    }

    #[test]
    fn fee_rate_display() {
        assert_eq!(FeeRate::per_kb(1_000).to_string(), "0.00001000 EMBER/kB");
    }

    // --- MinerConfig ---

    #[test]
    fn default_config() {
        let c = MinerConfig::default();
        assert_eq!(c.block_max_size, DEFAULT_BLOCK_MAX_SIZE);
        assert_eq!(c.block_min_fee_rate, FeeRate::per_kb(DEFAULT_BLOCK_MIN_TX_FEE));
        assert_eq!(c.block_priority_size, 0);
        assert!(c.staking);
        assert!(!c.print_priority);
    }

    #[test]
    fn block_size_clamped_low() {
        let c = MinerConfig::default().with_block_max_size(10);
        assert_eq!(c.block_max_size, 1000);
    }

    #[test]
    fn block_size_clamped_high() {
        let c = MinerConfig::default().with_block_max_size(u64::MAX);
        assert_eq!(c.block_max_size, MAX_BLOCK_SIZE - 1000);
    }

    // --- MinerArgs ---

    #[test]
    fn args_defaults_convert() {
        let args = MinerArgs::parse_from(["ember-miner"]);
        let config = args.into_config().unwrap();
        assert_eq!(config.block_max_size, DEFAULT_BLOCK_MAX_SIZE);
        assert!(config.staking);
    }

    #[test]
    fn args_parse_overrides() {
        let args = MinerArgs::parse_from([
            "ember-miner",
            "--blockmaxsize",
            "100000",
            "--blockmintxfee",
            "0.0001",
            "--blockprioritysize",
            "50000",
            "--printpriority",
            "--staking",
            "false",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.block_max_size, 100_000);
        assert_eq!(config.block_min_fee_rate, FeeRate::per_kb(10_000));
        assert_eq!(config.block_priority_size, 50_000);
        assert!(config.print_priority);
        assert!(!config.staking);
    }

    #[test]
    fn bad_fee_arg_is_config_invalid() {
        let args = MinerArgs::parse_from(["ember-miner", "--blockmintxfee", "nonsense"]);
        assert!(matches!(
            args.into_config(),
            Err(MinerError::ConfigInvalid(_))
        ));
    }
}
