//! Proof-of-work block generation driver.
//!
//! Backs the `generatetoaddress`-style RPCs: build a template, walk the
//! header nonce until the hash meets the target or the try budget runs
//! out, submit, repeat. Real deployments only reach this path on regtest
//! and young testnets; the loop still honors shutdown at every boundary.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use ember_core::error::MinerError;
use ember_core::target::Target;
use ember_core::traits::BlockProcessor;
use ember_core::types::Hash256;

use crate::miner::Miner;

impl Miner {
    /// Mine `num_blocks` blocks paying `coinbase_script`, spending at most
    /// `max_tries` hash attempts in total.
    ///
    /// Returns the hashes of the blocks accepted by `processor`. Stops
    /// early without error when the try budget is exhausted or `shutdown`
    /// is raised; a template whose nonce space is exhausted is replaced by
    /// a fresh one (the extra nonce changes the search space) at the same
    /// height. A rejected block aborts with
    /// [`MinerError::BlockRejected`].
    pub fn generate_blocks(
        &self,
        processor: &dyn BlockProcessor,
        num_blocks: u64,
        mut max_tries: u64,
        coinbase_script: &[u8],
        shutdown: &AtomicBool,
    ) -> Result<Vec<Hash256>, MinerError> {
        let tip = self.chain.tip().ok_or(MinerError::TipUnavailable)?;
        let mut height = tip.height;
        let height_end = height + num_blocks;
        let mut hashes = Vec::new();

        while height < height_end && !shutdown.load(Ordering::Relaxed) {
            let mut template = self.create_new_block(coinbase_script, false)?;
            self.increment_extra_nonce(&mut template)?;

            let target = Target::from_compact(template.block.header.bits);
            {
                let header = &mut template.block.header;
                while max_tries > 0
                    && header.nonce < u32::MAX
                    && !target.is_met_by(&header.hash())
                    && !shutdown.load(Ordering::Relaxed)
                {
                    header.nonce += 1;
                    max_tries -= 1;
                }
            }

            if max_tries == 0 || shutdown.load(Ordering::Relaxed) {
                break;
            }
            if template.block.header.nonce == u32::MAX {
                debug!(height = height + 1, "nonce space exhausted, rebuilding template");
                continue;
            }

            processor
                .process_new_block(&template.block, true)
                .map_err(|e| MinerError::BlockRejected(e.to_string()))?;

            height += 1;
            let hash = template.block.header.hash();
            info!(height, %hash, "generated block");
            hashes.push(hash);
        }

        Ok(hashes)
    }
}
