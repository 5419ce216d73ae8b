//! Block templates: a block skeleton plus per-transaction bookkeeping.

use ember_core::error::TransactionError;
use ember_core::merkle;
use ember_core::types::{Block, Hash256, Transaction};

/// A candidate block produced by the assembler, ready for proof-of-work
/// hashing or proof-of-stake signing.
///
/// `fees` and `sigops` run parallel to `block.transactions`; the coinbase
/// slot holds the negated fee total. After the builder emits a template
/// only the extra-nonce updater and the stake signer mutate it.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    /// The block skeleton. Coinbase at index 0; coinstake at index 1 once
    /// a stake is signed in.
    pub block: Block,
    /// Per-transaction fees; `fees[0] == -(total_fees)`.
    pub fees: Vec<i64>,
    /// Per-transaction sigop counts.
    pub sigops: Vec<u32>,
    /// Height this template builds on top of the tip.
    pub height: u64,
    /// Sum of fees over all non-coinbase transactions.
    pub total_fees: u64,
}

impl BlockTemplate {
    /// Number of transactions excluding the coinbase (and coinstake).
    pub fn tx_count(&self) -> u64 {
        self.block
            .transactions
            .iter()
            .skip(1)
            .filter(|tx| !tx.is_coin_stake())
            .count() as u64
    }

    /// Append a selected transaction with its bookkeeping.
    pub(crate) fn push(&mut self, tx: Transaction, fee: u64, sigops: u32) {
        self.block.transactions.push(tx);
        self.fees.push(fee as i64);
        self.sigops.push(sigops);
    }

    /// Drop every non-coinbase, non-coinstake transaction timestamped
    /// after `block_time`, keeping the parallel arrays and fee totals
    /// consistent.
    pub(crate) fn evict_after(&mut self, block_time: u64) {
        let mut index = self.block.transactions.len();
        while index > 2 {
            index -= 1;
            if self.block.transactions[index].time > block_time {
                self.block.transactions.remove(index);
                let fee = self.fees.remove(index);
                self.sigops.remove(index);
                self.total_fees = self.total_fees.saturating_sub(fee.max(0) as u64);
            }
        }
        if !self.fees.is_empty() {
            self.fees[0] = -(self.total_fees as i64);
        }
    }

    /// Recompute the merkle root from the current transaction list.
    pub fn refresh_merkle_root(&mut self) -> Result<(), TransactionError> {
        let txids: Vec<Hash256> = self
            .block
            .transactions
            .iter()
            .map(|tx| tx.txid())
            .collect::<Result<_, _>>()?;
        self.block.header.merkle_root = merkle::merkle_root(&txids);
        Ok(())
    }
}
