//! Overlay of mempool entries whose ancestor aggregates are stale.
//!
//! Selection does not remove transactions from the mempool as it places
//! them, so the cached ancestor aggregates of their descendants go stale
//! mid-build. [`ModifiedTxSet`] holds one record per affected descendant
//! with the already-placed ancestors' contributions subtracted, indexed by
//! the same ancestor-feerate ordering the mempool uses.
//!
//! Records live only for the duration of one selection call.

use std::collections::{BTreeSet, HashMap};

use ember_core::mempool::{AncestorScore, EntryId, MempoolEntry};

/// A mempool entry's ancestor aggregates, reduced by whatever ancestors
/// are already in the block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ModifiedEntry {
    pub id: EntryId,
    pub size_with_ancestors: u64,
    pub mod_fees_with_ancestors: i64,
    pub sigops_with_ancestors: u32,
    txid: ember_core::types::Hash256,
}

impl ModifiedEntry {
    fn from_entry(id: EntryId, entry: &MempoolEntry) -> Self {
        Self {
            id,
            size_with_ancestors: entry.size_with_ancestors,
            mod_fees_with_ancestors: entry.mod_fees_with_ancestors,
            sigops_with_ancestors: entry.sigops_with_ancestors,
            txid: entry.txid,
        }
    }

    pub fn score(&self) -> AncestorScore {
        AncestorScore {
            mod_fees: self.mod_fees_with_ancestors,
            size: self.size_with_ancestors,
            txid: self.txid,
        }
    }

    fn subtract(&mut self, ancestor: &MempoolEntry) {
        self.size_with_ancestors -= ancestor.size;
        self.mod_fees_with_ancestors -= ancestor.modified_fee();
        self.sigops_with_ancestors -= ancestor.sigops;
    }
}

/// The modified set: records indexed by id and by reduced ancestor score.
#[derive(Debug, Default)]
pub(crate) struct ModifiedTxSet {
    by_id: HashMap<EntryId, ModifiedEntry>,
    by_score: BTreeSet<(AncestorScore, EntryId)>,
}

impl ModifiedTxSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// The record with the best reduced ancestor feerate.
    pub fn best(&self) -> Option<ModifiedEntry> {
        let &(_, id) = self.by_score.iter().next_back()?;
        self.by_id.get(&id).copied()
    }

    /// Subtract a newly-placed ancestor's contribution from a descendant's
    /// record, creating the record from the mempool aggregates first if
    /// this is the descendant's first placed ancestor.
    pub fn subtract_ancestor(
        &mut self,
        descendant: EntryId,
        descendant_entry: &MempoolEntry,
        ancestor: &MempoolEntry,
    ) {
        let mut record = match self.by_id.remove(&descendant) {
            Some(record) => {
                self.by_score.remove(&(record.score(), descendant));
                record
            }
            None => ModifiedEntry::from_entry(descendant, descendant_entry),
        };
        record.subtract(ancestor);
        self.by_score.insert((record.score(), descendant));
        self.by_id.insert(descendant, record);
    }

    /// Drop a record (entry placed in the block or failed).
    pub fn remove(&mut self, id: EntryId) {
        if let Some(record) = self.by_id.remove(&id) {
            self.by_score.remove(&(record.score(), id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::mempool::{EntryParams, Mempool};
    use ember_core::types::{Hash256, OutPoint, Transaction, TxInput, TxOutput};

    fn make_tx(seed: u8) -> Transaction {
        Transaction {
            version: 1,
            time: 0,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    txid: Hash256([seed; 32]),
                    index: 0,
                },
                script_sig: vec![0; 72],
            }],
            outputs: vec![TxOutput { value: 1_000, script_pubkey: vec![0xAA; 25] }],
            lock_time: 0,
        }
    }

    fn params(fee: u64) -> EntryParams {
        EntryParams {
            fee,
            sigops: 1,
            height: 100,
            time: 0,
            input_value: 0,
            start_priority: 0.0,
        }
    }

    fn pool_with_chain() -> (Mempool, EntryId, EntryId) {
        let mut pool = Mempool::new();
        let parent = pool.insert(make_tx(1), params(1_000)).unwrap();
        let parent_txid = pool.entry(parent).unwrap().txid;
        let child_tx = Transaction {
            version: 1,
            time: 0,
            inputs: vec![TxInput {
                previous_output: OutPoint { txid: parent_txid, index: 0 },
                script_sig: vec![0; 72],
            }],
            outputs: vec![TxOutput { value: 500, script_pubkey: vec![0xBB; 25] }],
            lock_time: 0,
        };
        let child = pool.insert(child_tx, params(3_000)).unwrap();
        (pool, parent, child)
    }

    #[test]
    fn empty_set() {
        let set = ModifiedTxSet::new();
        assert!(set.is_empty());
        assert!(set.best().is_none());
        assert!(!set.contains(0));
    }

    #[test]
    fn first_subtraction_seeds_from_mempool_aggregates() {
        let (pool, parent, child) = pool_with_chain();
        let mut set = ModifiedTxSet::new();
        let parent_entry = pool.entry(parent).unwrap();
        let child_entry = pool.entry(child).unwrap();

        set.subtract_ancestor(child, child_entry, parent_entry);

        let record = set.best().unwrap();
        assert_eq!(record.id, child);
        assert_eq!(record.size_with_ancestors, child_entry.size);
        assert_eq!(record.mod_fees_with_ancestors, 3_000);
        assert_eq!(record.sigops_with_ancestors, 1);
    }

    #[test]
    fn repeated_subtraction_updates_in_place() {
        // Two parents, one child spending both.
        let mut pool = Mempool::new();
        let p1 = pool.insert(make_tx(1), params(1_000)).unwrap();
        let p2 = pool.insert(make_tx(2), params(2_000)).unwrap();
        let t1 = pool.entry(p1).unwrap().txid;
        let t2 = pool.entry(p2).unwrap().txid;
        let child_tx = Transaction {
            version: 1,
            time: 0,
            inputs: vec![
                TxInput {
                    previous_output: OutPoint { txid: t1, index: 0 },
                    script_sig: vec![0; 72],
                },
                TxInput {
                    previous_output: OutPoint { txid: t2, index: 0 },
                    script_sig: vec![0; 72],
                },
            ],
            outputs: vec![TxOutput { value: 100, script_pubkey: vec![0xCC; 25] }],
            lock_time: 0,
        };
        let child = pool.insert(child_tx, params(4_000)).unwrap();

        let mut set = ModifiedTxSet::new();
        let child_entry = pool.entry(child).unwrap();
        set.subtract_ancestor(child, child_entry, pool.entry(p1).unwrap());
        set.subtract_ancestor(child, child_entry, pool.entry(p2).unwrap());

        let record = set.best().unwrap();
        assert_eq!(record.mod_fees_with_ancestors, 4_000);
        assert_eq!(record.size_with_ancestors, child_entry.size);
        assert_eq!(record.sigops_with_ancestors, 1);
        assert_eq!(set.by_id.len(), 1);
        assert_eq!(set.by_score.len(), 1);
    }

    #[test]
    fn best_tracks_score_changes() {
        let (pool, parent, child) = pool_with_chain();
        let mut pool2 = Mempool::new();
        let rich = pool2.insert(make_tx(9), params(50_000)).unwrap();

        let mut set = ModifiedTxSet::new();
        set.subtract_ancestor(child, pool.entry(child).unwrap(), pool.entry(parent).unwrap());
        // Seed a second record from an unrelated pool; ids differ.
        let rich_entry = pool2.entry(rich).unwrap();
        let mut record = ModifiedEntry::from_entry(rich, rich_entry);
        record.id = 7;
        set.by_score.insert((record.score(), 7));
        set.by_id.insert(7, record);

        assert_eq!(set.best().unwrap().id, 7);
        set.remove(7);
        assert_eq!(set.best().unwrap().id, child);
    }

    #[test]
    fn remove_clears_both_indexes() {
        let (pool, parent, child) = pool_with_chain();
        let mut set = ModifiedTxSet::new();
        set.subtract_ancestor(child, pool.entry(child).unwrap(), pool.entry(parent).unwrap());

        set.remove(child);
        assert!(set.is_empty());
        assert!(set.by_score.is_empty());
        assert!(set.best().is_none());
    }
}
