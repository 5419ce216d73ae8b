//! Coinbase extra-nonce rewriting across template regenerations.
//!
//! The proof-of-work driver exhausts the 32-bit header nonce quickly on a
//! fixed template; the extra nonce extends the search space by mutating the
//! coinbase scriptSig, which changes the coinbase txid and thus the merkle
//! root. The counter is tracked per prev-hash: a new tip resets it.

use ember_core::constants::MAX_COINBASE_SCRIPT_SIG;
use ember_core::error::MinerError;
use ember_core::script;
use ember_core::types::Hash256;

use crate::template::BlockTemplate;

/// The `(last_prev_hash, counter)` pair. Owned by the miner service and
/// guarded by its lock; not shared elsewhere.
#[derive(Debug, Default)]
pub struct ExtraNonce {
    last_prev_hash: Hash256,
    counter: u64,
}

impl ExtraNonce {
    /// Fresh state; the counter starts from zero for the first template.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the extra nonce and rewrite the template's coinbase scriptSig
    /// to `height ++ extra_nonce ++ COINBASE_FLAGS`, recomputing the
    /// merkle root. A template on a different prev-hash restarts the
    /// counter at 1.
    ///
    /// Returns the counter value written into the coinbase.
    pub fn increment(&mut self, template: &mut BlockTemplate) -> Result<u64, MinerError> {
        if self.last_prev_hash != template.block.header.prev_hash {
            self.counter = 0;
            self.last_prev_hash = template.block.header.prev_hash;
        }
        self.counter += 1;

        let script_sig = script::coinbase_script_sig(template.height, Some(self.counter));
        debug_assert!(script_sig.len() <= MAX_COINBASE_SCRIPT_SIG);
        template.block.transactions[0].inputs[0].script_sig = script_sig;
        template.refresh_merkle_root()?;
        Ok(self.counter)
    }
}
