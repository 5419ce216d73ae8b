//! In-memory pool of unconfirmed transactions (mempool).
//!
//! The mempool stores validated transactions awaiting inclusion in blocks
//! together with the DAG structure the block assembler selects over:
//! - O(1) lookup by txid via a compact-id arena
//! - O(1) conflict detection via a spent-outpoint index
//! - O(log n) ancestor-feerate-ordered iteration for package selection
//! - direct parent/child links and transitive ancestor/descendant walks
//!
//! Every entry carries four aggregates summed over the entry and all of its
//! unconfirmed ancestors: size, modified fees, sigops, and ancestor count.
//! The aggregates are kept consistent across insertion, operator deltas,
//! and block connection, so the assembler can read them without recomputing.
//!
//! Transactions must be validated by the caller before insertion; the
//! mempool only checks for duplicates and input conflicts. Acceptance
//! policy (minimum relay fees, eviction) belongs to the caller as well.
//!
//! Not thread-safe — callers wrap the pool in a `Mutex` (the miner does).

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::MempoolError;
use crate::types::{Block, Hash256, OutPoint, Transaction};

/// Compact identifier of a pool entry. Stable for the entry's lifetime;
/// slots are recycled after removal.
pub type EntryId = u32;

/// Ordered-index key: ancestor feerate with txid tie-break.
///
/// The feerate `mod_fees / size` is compared exactly by cross
/// multiplication in 128-bit arithmetic, so the ordering is total and
/// deterministic — equal rates fall back to txid order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncestorScore {
    /// Modified fees of the entry plus all unconfirmed ancestors.
    pub mod_fees: i64,
    /// Serialized size of the entry plus all unconfirmed ancestors.
    pub size: u64,
    /// Tie-break key.
    pub txid: Hash256,
}

impl Ord for AncestorScore {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.mod_fees as i128 * other.size as i128;
        let rhs = other.mod_fees as i128 * self.size as i128;
        lhs.cmp(&rhs).then_with(|| self.txid.cmp(&other.txid))
    }
}

impl PartialOrd for AncestorScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Metadata supplied by the validation layer at insertion time.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryParams {
    /// Absolute fee in sparks.
    pub fee: u64,
    /// Signature operation count.
    pub sigops: u32,
    /// Chain height when the transaction entered the pool.
    pub height: u64,
    /// Wall-clock time when the transaction entered the pool.
    pub time: u64,
    /// Sum of input values, for coin-age priority aging.
    pub input_value: u64,
    /// Coin-age priority at entry: Σ input_value × confirmation_depth,
    /// divided by transaction size.
    pub start_priority: f64,
}

/// A transaction stored in the mempool with precomputed metadata and
/// ancestor aggregates.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    /// The unconfirmed transaction.
    pub tx: Transaction,
    /// Precomputed transaction ID.
    pub txid: Hash256,
    /// Transaction fee in sparks.
    pub fee: u64,
    /// Serialized size in bytes.
    pub size: u64,
    /// Signature operation count.
    pub sigops: u32,
    /// Wall-clock entry time.
    pub entry_time: u64,
    /// Chain height at entry.
    pub entry_height: u64,
    /// Serialized size of this entry and all unconfirmed ancestors.
    pub size_with_ancestors: u64,
    /// Modified fees of this entry and all unconfirmed ancestors.
    pub mod_fees_with_ancestors: i64,
    /// Sigops of this entry and all unconfirmed ancestors.
    pub sigops_with_ancestors: u32,
    /// Number of unconfirmed ancestors, including this entry.
    pub ancestor_count: u32,
    input_value: u64,
    start_priority: f64,
    fee_delta: i64,
    priority_delta: f64,
    parents: Vec<EntryId>,
    children: Vec<EntryId>,
}

impl MempoolEntry {
    /// Fee adjusted by any operator delta.
    pub fn modified_fee(&self) -> i64 {
        self.fee as i64 + self.fee_delta
    }

    /// Coin-age priority at the given height: the entry priority plus the
    /// age accrued since, plus any operator delta.
    pub fn priority(&self, height: u64) -> f64 {
        let aged = height.saturating_sub(self.entry_height) as f64 * self.input_value as f64
            / self.size as f64;
        self.start_priority + aged + self.priority_delta
    }

    /// Direct in-pool parents.
    pub fn parents(&self) -> &[EntryId] {
        &self.parents
    }

    /// Direct in-pool children.
    pub fn children(&self) -> &[EntryId] {
        &self.children
    }

    /// Key for the ancestor-feerate index.
    pub fn ancestor_score(&self) -> AncestorScore {
        AncestorScore {
            mod_fees: self.mod_fees_with_ancestors,
            size: self.size_with_ancestors,
            txid: self.txid,
        }
    }
}

/// In-memory pool of unconfirmed transactions with DAG aggregates.
#[derive(Default)]
pub struct Mempool {
    /// Arena of entries; freed slots are recycled via `free`.
    entries: Vec<Option<MempoolEntry>>,
    free: Vec<EntryId>,
    /// Primary index: txid → id.
    by_txid: HashMap<Hash256, EntryId>,
    /// Spent outpoint → id of the pool transaction that spends it.
    by_outpoint: HashMap<OutPoint, EntryId>,
    /// Ancestor-feerate index, ascending; iterate in reverse for best-first.
    by_ancestor_score: BTreeSet<(AncestorScore, EntryId)>,
    /// Current total serialized bytes in the pool.
    total_bytes: u64,
}

impl Mempool {
    /// Create an empty mempool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a validated transaction into the pool.
    ///
    /// All in-pool parents must already be present (a transaction cannot
    /// enter the pool before the outputs it spends exist). Ancestor
    /// aggregates for the new entry are computed here; existing entries
    /// are unaffected because a new transaction is never an ancestor of
    /// anything already pooled.
    ///
    /// Returns the new entry's id.
    pub fn insert(&mut self, tx: Transaction, params: EntryParams) -> Result<EntryId, MempoolError> {
        let encoded = bincode::encode_to_vec(&tx, bincode::config::standard())
            .map_err(|e| MempoolError::Internal(e.to_string()))?;
        let txid = Hash256(blake3::hash(&encoded).into());
        let size = encoded.len() as u64;

        if self.by_txid.contains_key(&txid) {
            return Err(MempoolError::AlreadyExists(txid.to_string()));
        }

        for input in &tx.inputs {
            if let Some(&existing) = self.by_outpoint.get(&input.previous_output) {
                let existing_txid = self
                    .slot(existing)
                    .map(|e| e.txid.to_string())
                    .unwrap_or_default();
                return Err(MempoolError::Conflict {
                    new_txid: txid.to_string(),
                    existing_txid,
                    outpoint: input.previous_output.to_string(),
                });
            }
        }

        // Direct in-pool parents, deduplicated (a tx may spend several
        // outputs of the same parent).
        let mut parents: Vec<EntryId> = Vec::new();
        for input in &tx.inputs {
            if let Some(&pid) = self.by_txid.get(&input.previous_output.txid) {
                if !parents.contains(&pid) {
                    parents.push(pid);
                }
            }
        }

        let ancestors = self.ancestors_of(&parents);
        let mut size_with_ancestors = size;
        let mut mod_fees_with_ancestors = params.fee as i64;
        let mut sigops_with_ancestors = params.sigops;
        for &a in &ancestors {
            if let Some(e) = self.slot(a) {
                size_with_ancestors += e.size;
                mod_fees_with_ancestors += e.modified_fee();
                sigops_with_ancestors += e.sigops;
            }
        }

        let entry = MempoolEntry {
            tx,
            txid,
            fee: params.fee,
            size,
            sigops: params.sigops,
            entry_time: params.time,
            entry_height: params.height,
            size_with_ancestors,
            mod_fees_with_ancestors,
            sigops_with_ancestors,
            ancestor_count: ancestors.len() as u32 + 1,
            input_value: params.input_value,
            start_priority: params.start_priority,
            fee_delta: 0,
            priority_delta: 0.0,
            parents: parents.clone(),
            children: Vec::new(),
        };

        let score = entry.ancestor_score();
        let outpoints: Vec<OutPoint> = entry
            .tx
            .inputs
            .iter()
            .map(|i| i.previous_output.clone())
            .collect();

        let id = match self.free.pop() {
            Some(id) => {
                self.entries[id as usize] = Some(entry);
                id
            }
            None => {
                self.entries.push(Some(entry));
                (self.entries.len() - 1) as EntryId
            }
        };

        for &p in &parents {
            if let Some(parent) = self.slot_mut(p) {
                parent.children.push(id);
            }
        }
        for op in outpoints {
            self.by_outpoint.insert(op, id);
        }
        self.by_txid.insert(txid, id);
        self.by_ancestor_score.insert((score, id));
        self.total_bytes += size;

        Ok(id)
    }

    /// Apply operator fee and priority deltas to a transaction.
    ///
    /// The fee delta propagates into the modified-fee aggregate of the
    /// entry and of every descendant, re-sorting the ancestor-feerate
    /// index as needed.
    pub fn prioritise(
        &mut self,
        txid: &Hash256,
        fee_delta: i64,
        priority_delta: f64,
    ) -> Result<(), MempoolError> {
        let id = *self
            .by_txid
            .get(txid)
            .ok_or_else(|| MempoolError::UnknownTransaction(txid.to_string()))?;
        self.update_entry(id, |e| {
            e.fee_delta += fee_delta;
            e.priority_delta += priority_delta;
            e.mod_fees_with_ancestors += fee_delta;
        });
        for d in self.calculate_descendants(id) {
            self.update_entry(d, |e| e.mod_fees_with_ancestors += fee_delta);
        }
        Ok(())
    }

    /// Remove transactions confirmed by a connected block, plus any pool
    /// transactions they conflict with (and the conflicts' descendants).
    ///
    /// Surviving descendants of confirmed transactions have the confirmed
    /// ancestors' contributions subtracted from their aggregates.
    pub fn remove_for_block(&mut self, block: &Block) {
        let mut confirmed: HashSet<EntryId> = HashSet::new();
        for tx in &block.transactions {
            if let Ok(txid) = tx.txid() {
                if let Some(&id) = self.by_txid.get(&txid) {
                    confirmed.insert(id);
                }
            }
        }

        let mut remove = confirmed.clone();
        for tx in &block.transactions {
            for input in &tx.inputs {
                if input.previous_output.is_null() {
                    continue;
                }
                if let Some(&id) = self.by_outpoint.get(&input.previous_output) {
                    if confirmed.contains(&id) {
                        continue;
                    }
                    // A conflicting spend; the entry and everything built
                    // on it are now unspendable.
                    remove.insert(id);
                    for d in self.calculate_descendants(id) {
                        remove.insert(d);
                    }
                }
            }
        }

        // Fix aggregates of surviving descendants before unlinking.
        let contributions: Vec<(EntryId, u64, i64, u32)> = remove
            .iter()
            .filter_map(|&id| self.slot(id).map(|e| (id, e.size, e.modified_fee(), e.sigops)))
            .collect();
        for (id, size, mod_fee, sigops) in contributions {
            for d in self.calculate_descendants(id) {
                if remove.contains(&d) {
                    continue;
                }
                self.update_entry(d, |e| {
                    e.size_with_ancestors -= size;
                    e.mod_fees_with_ancestors -= mod_fee;
                    e.sigops_with_ancestors -= sigops;
                    e.ancestor_count -= 1;
                });
            }
        }

        for &id in &remove {
            self.remove_entry(id, &remove);
        }
    }

    /// Internal: remove one entry and clean up all indices and links.
    fn remove_entry(&mut self, id: EntryId, removed_with: &HashSet<EntryId>) {
        let Some(entry) = self.entries.get_mut(id as usize).and_then(Option::take) else {
            return;
        };
        for &p in &entry.parents {
            if removed_with.contains(&p) {
                continue;
            }
            if let Some(parent) = self.slot_mut(p) {
                parent.children.retain(|&c| c != id);
            }
        }
        for &c in &entry.children {
            if removed_with.contains(&c) {
                continue;
            }
            if let Some(child) = self.slot_mut(c) {
                child.parents.retain(|&p| p != id);
            }
        }
        for input in &entry.tx.inputs {
            self.by_outpoint.remove(&input.previous_output);
        }
        self.by_txid.remove(&entry.txid);
        self.by_ancestor_score.remove(&(entry.ancestor_score(), id));
        self.total_bytes -= entry.size;
        self.free.push(id);
    }

    /// Get an entry by id. Returns `None` for freed slots.
    pub fn entry(&self, id: EntryId) -> Option<&MempoolEntry> {
        self.slot(id)
    }

    /// Get an entry by txid.
    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.by_txid.get(txid).and_then(|&id| self.slot(id))
    }

    /// Look up the id of a pooled transaction.
    pub fn id_of(&self, txid: &Hash256) -> Option<EntryId> {
        self.by_txid.get(txid).copied()
    }

    /// Check if a transaction with the given txid is in the pool.
    pub fn contains(&self, txid: &Hash256) -> bool {
        self.by_txid.contains_key(txid)
    }

    /// Entry ids ordered by ancestor feerate, best first.
    pub fn ids_by_ancestor_score(&self) -> Vec<EntryId> {
        self.by_ancestor_score.iter().rev().map(|&(_, id)| id).collect()
    }

    /// The full set of unconfirmed ancestors of an entry (excluding the
    /// entry itself).
    pub fn calculate_ancestors(&self, id: EntryId) -> Vec<EntryId> {
        match self.slot(id) {
            Some(e) => self.ancestors_of(&e.parents),
            None => Vec::new(),
        }
    }

    /// The full set of in-pool descendants of an entry (excluding the
    /// entry itself).
    pub fn calculate_descendants(&self, id: EntryId) -> Vec<EntryId> {
        let mut seen: HashSet<EntryId> = HashSet::new();
        let mut stage: Vec<EntryId> = match self.slot(id) {
            Some(e) => e.children.clone(),
            None => return Vec::new(),
        };
        let mut out = Vec::new();
        while let Some(d) = stage.pop() {
            if !seen.insert(d) {
                continue;
            }
            out.push(d);
            if let Some(e) = self.slot(d) {
                stage.extend_from_slice(&e.children);
            }
        }
        out
    }

    /// Transitive ancestor closure of a set of entries.
    fn ancestors_of(&self, seed: &[EntryId]) -> Vec<EntryId> {
        let mut seen: HashSet<EntryId> = HashSet::new();
        let mut stage: Vec<EntryId> = seed.to_vec();
        let mut out = Vec::new();
        while let Some(a) = stage.pop() {
            if !seen.insert(a) {
                continue;
            }
            out.push(a);
            if let Some(e) = self.slot(a) {
                stage.extend_from_slice(&e.parents);
            }
        }
        out
    }

    /// Number of transactions in the pool.
    pub fn len(&self) -> usize {
        self.by_txid.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.by_txid.is_empty()
    }

    /// Total serialized bytes of all transactions in the pool.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Iterate over all live entry ids (arbitrary order).
    pub fn iter_ids(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.by_txid.values().copied()
    }

    fn slot(&self, id: EntryId) -> Option<&MempoolEntry> {
        self.entries.get(id as usize).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: EntryId) -> Option<&mut MempoolEntry> {
        self.entries.get_mut(id as usize).and_then(Option::as_mut)
    }

    /// Mutate an entry and re-key the ancestor-feerate index if its score
    /// changed.
    fn update_entry(&mut self, id: EntryId, f: impl FnOnce(&mut MempoolEntry)) {
        let (old, new) = {
            let Some(e) = self.entries.get_mut(id as usize).and_then(Option::as_mut) else {
                return;
            };
            let old = e.ancestor_score();
            f(e);
            (old, e.ancestor_score())
        };
        if old != new {
            self.by_ancestor_score.remove(&(old, id));
            self.by_ancestor_score.insert((new, id));
        }
    }
}
