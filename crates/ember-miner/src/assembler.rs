//! The selection engine: builds block templates from the mempool.
//!
//! Selection is two-phase. An optional priority phase reserves the head of
//! the block for high coin-age transactions regardless of fee; the
//! ancestor-feerate phase then fills the remainder with the best-paying
//! *packages* — a transaction together with all of its unconfirmed
//! ancestors.
//!
//! Since transactions are not removed from the mempool as they are placed,
//! the cached ancestor aggregates of their descendants go stale mid-build.
//! The phase therefore iterates two streams in parallel: the mempool's own
//! ancestor-feerate order, and an overlay of descendants of already-placed
//! transactions with the placed ancestors' contributions subtracted
//! ([`ModifiedTxSet`]). At each step the better-scoring head of the two
//! streams is considered.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::{debug, info};

use ember_core::constants::{
    allow_free, COINBASE_SIGOP_RESERVE, COINBASE_SIZE_RESERVE, DEFAULT_BLOCK_MAX_SIZE,
    MAX_BLOCK_SIGOPS, POW_SUBSIDY,
};
use ember_core::error::MinerError;
use ember_core::mempool::{EntryId, Mempool, MempoolEntry};
use ember_core::script;
use ember_core::traits::ChainView;
use ember_core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};

use crate::config::MinerConfig;
use crate::modified::ModifiedTxSet;
use crate::stats::MinerStats;
use crate::template::BlockTemplate;

/// Give up filling the block after this many consecutive package failures
/// once the block is nearly full.
const MAX_CONSECUTIVE_FAILURES: u32 = 1000;

/// Coin-age priority with a total order, for the phase-A heap.
#[derive(Debug, PartialEq)]
struct Priority(f64);

impl Eq for Priority {}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-call scratch state for one template build.
///
/// Create one, call [`assemble`](Self::assemble), and discard it. The
/// long-lived [`Miner`](crate::miner::Miner) service wraps this with lock
/// acquisition and telemetry.
pub struct BlockAssembler<'a> {
    chain: &'a dyn ChainView,
    pool: &'a Mempool,
    config: MinerConfig,
    stats: Option<&'a MinerStats>,

    template: BlockTemplate,
    in_block: HashSet<EntryId>,
    block_size: u64,
    block_sigops: u32,
    block_tx: u64,
    fees: u64,
    height: u64,
    block_time: u64,
    lock_time_cutoff: u64,
    proof_of_stake: bool,
    last_few_txs: u32,
    block_finished: bool,
}

impl<'a> BlockAssembler<'a> {
    /// Create an assembler over a locked chain view and mempool.
    pub fn new(chain: &'a dyn ChainView, pool: &'a Mempool, config: MinerConfig) -> Self {
        let placeholder = Transaction {
            version: 1,
            time: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        };
        Self {
            chain,
            pool,
            config,
            stats: None,
            template: BlockTemplate {
                block: Block {
                    header: BlockHeader {
                        version: 0,
                        prev_hash: Hash256::ZERO,
                        merkle_root: Hash256::ZERO,
                        time: 0,
                        bits: 0,
                        nonce: 0,
                    },
                    transactions: vec![placeholder],
                    signature: Vec::new(),
                },
                fees: vec![-1],
                sigops: vec![0],
                height: 0,
                total_fees: 0,
            },
            in_block: HashSet::new(),
            block_size: COINBASE_SIZE_RESERVE,
            block_sigops: COINBASE_SIGOP_RESERVE,
            block_tx: 0,
            fees: 0,
            height: 0,
            block_time: 0,
            lock_time_cutoff: 0,
            proof_of_stake: false,
            last_few_txs: 0,
            block_finished: false,
        }
    }

    /// Publish template counters to the given stats on completion.
    pub fn with_stats(mut self, stats: &'a MinerStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Build a template on top of the current tip.
    ///
    /// `coinbase_script` receives the subsidy and fees on proof-of-work;
    /// it is ignored on proof-of-stake, where the coinbase is left empty
    /// and the staker inserts a coinstake at index 1 after signing.
    pub fn assemble(
        mut self,
        coinbase_script: &[u8],
        proof_of_stake: bool,
    ) -> Result<BlockTemplate, MinerError> {
        let tip = self.chain.tip().ok_or(MinerError::TipUnavailable)?;
        let params = self.chain.params();

        self.proof_of_stake = proof_of_stake;
        self.height = tip.height + 1;
        self.block_time = self.chain.adjusted_time();
        self.lock_time_cutoff = if params.locktime_uses_mtp {
            tip.median_time_past
        } else {
            self.block_time
        };

        let mut version = self.chain.block_version(&tip);
        if params.pos_no_retargeting {
            // Regtest-only override for testing fork scenarios.
            if let Some(v) = self.config.block_version {
                version = v;
            }
        }
        self.template.height = self.height;
        self.template.block.header.version = version;
        self.template.block.header.prev_hash = tip.hash;

        if !proof_of_stake {
            self.add_priority_txs();
        }
        let (packages_selected, descendants_updated) = self.add_package_txs();

        if let Some(stats) = self.stats {
            stats.record_template(self.block_tx, self.block_size);
        }

        // Final coinbase replaces the placeholder at index 0.
        let coinbase = Transaction {
            version: 1,
            time: self.block_time,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                script_sig: script::coinbase_script_sig(self.height, None),
            }],
            outputs: vec![if proof_of_stake {
                TxOutput::empty()
            } else {
                TxOutput {
                    value: self.fees + POW_SUBSIDY,
                    script_pubkey: coinbase_script.to_vec(),
                }
            }],
            lock_time: 0,
        };
        self.template.block.transactions[0] = coinbase;
        self.template.fees[0] = -(self.fees as i64);
        self.template.sigops[0] = 0;
        self.template.total_fees = self.fees;

        let max_tx_time = self
            .template
            .block
            .transactions
            .iter()
            .map(|tx| tx.time)
            .max()
            .unwrap_or(0);
        let mut time = tip.min_next_block_time().max(max_tx_time);
        if !proof_of_stake {
            time = time.max(self.chain.adjusted_time());
        }
        self.template.block.header.time = time;
        self.template.block.header.bits = self.chain.next_work_required(&tip, proof_of_stake);
        self.template.block.header.nonce = 0;
        self.template.refresh_merkle_root()?;

        if !proof_of_stake {
            self.chain
                .test_block_validity(&self.template.block)
                .map_err(|e| MinerError::ValidityCheckFailed(e.0))?;
        }

        debug!(
            height = self.height,
            size = self.block_size,
            txs = self.block_tx,
            fees = self.fees,
            packages_selected,
            descendants_updated,
            "assembled block template"
        );

        Ok(self.template)
    }

    // ------------------------------------------------------------------
    // Phase A: coin-age priority
    // ------------------------------------------------------------------

    /// Fill the head of the block with high coin-age transactions,
    /// regardless of the fees they pay.
    fn add_priority_txs(&mut self) {
        let priority_budget = self.config.block_priority_size.min(self.config.block_max_size);
        if priority_budget == 0 {
            return;
        }
        let pool = self.pool;

        let mut heap: BinaryHeap<(Priority, EntryId)> = pool
            .iter_ids()
            .filter_map(|id| {
                let e = pool.entry(id)?;
                Some((Priority(e.priority(self.height)), id))
            })
            .collect();
        // Entries whose parents are not yet placed wait here with their
        // popped priority until a parent lands in the block.
        let mut waiting: HashMap<EntryId, f64> = HashMap::new();

        while !self.block_finished {
            let Some((Priority(priority), id)) = heap.pop() else {
                break;
            };
            if self.in_block.contains(&id) {
                continue;
            }
            let Some(entry) = pool.entry(id) else {
                continue;
            };
            if self.proof_of_stake && entry.tx.time > self.block_time {
                continue;
            }
            if self.is_still_dependent(entry) {
                waiting.insert(id, priority);
                continue;
            }
            if self.test_for_block(entry) {
                self.add_to_block(id);

                if self.block_size >= priority_budget || !allow_free(priority) {
                    break;
                }

                // A placed parent may release waiting children.
                for child in entry.children() {
                    if let Some(p) = waiting.remove(child) {
                        heap.push((Priority(p), *child));
                    }
                }
            }
        }
    }

    /// Whether any direct parent of the entry is still outside the block.
    fn is_still_dependent(&self, entry: &MempoolEntry) -> bool {
        entry
            .parents()
            .iter()
            .any(|parent| !self.in_block.contains(parent))
    }

    /// Priority-phase admission test. Tracks how often the remaining space
    /// has been probed and flags the block finished when it is effectively
    /// full.
    fn test_for_block(&mut self, entry: &MempoolEntry) -> bool {
        if self.block_size + entry.size >= self.config.block_max_size {
            if self.block_size > self.config.block_max_size.saturating_sub(100)
                || self.last_few_txs > 50
            {
                self.block_finished = true;
                return false;
            }
            if self.block_size > self.config.block_max_size.saturating_sub(1000) {
                self.last_few_txs += 1;
            }
            return false;
        }

        if self.block_sigops as u64 + entry.sigops as u64 >= MAX_BLOCK_SIGOPS as u64 {
            if self.block_sigops > MAX_BLOCK_SIGOPS - 2 {
                self.block_finished = true;
            }
            return false;
        }

        if !entry.tx.is_final(self.height, self.lock_time_cutoff) {
            return false;
        }

        true
    }

    // ------------------------------------------------------------------
    // Phase B: ancestor feerate
    // ------------------------------------------------------------------

    /// Fill the block with the best-feerate packages that still fit.
    ///
    /// Returns `(packages_selected, descendants_updated)`.
    fn add_package_txs(&mut self) -> (u64, u64) {
        let pool = self.pool;
        let mut modified = ModifiedTxSet::new();
        // Entries that failed inclusion; never reconsidered, because their
        // cached aggregates would be wrong on re-evaluation.
        let mut failed: HashSet<EntryId> = HashSet::new();
        let mut packages_selected = 0u64;
        let mut descendants_updated = 0u64;

        // Seed the overlay with descendants of priority-phase inclusions.
        let seeded: Vec<EntryId> = self.in_block.iter().copied().collect();
        descendants_updated += self.update_packages_for_added(&seeded, &mut modified);

        let order = pool.ids_by_ancestor_score();
        let mut mi = 0usize;
        let mut consecutive_failures = 0u32;

        while mi < order.len() || !modified.is_empty() {
            if mi < order.len() && self.skip_entry(order[mi], &modified, &failed) {
                mi += 1;
                continue;
            }

            // Pick the better of the next mempool entry and the best
            // overlay record.
            let using_modified;
            let id;
            let (package_size, package_fees, package_sigops);
            if mi >= order.len() {
                let Some(record) = modified.best() else {
                    break;
                };
                using_modified = true;
                id = record.id;
                package_size = record.size_with_ancestors;
                package_fees = record.mod_fees_with_ancestors;
                package_sigops = record.sigops_with_ancestors;
            } else {
                let mem_id = order[mi];
                let Some(entry) = pool.entry(mem_id) else {
                    mi += 1;
                    continue;
                };
                match modified.best() {
                    Some(record) if record.score() > entry.ancestor_score() => {
                        using_modified = true;
                        id = record.id;
                        package_size = record.size_with_ancestors;
                        package_fees = record.mod_fees_with_ancestors;
                        package_sigops = record.sigops_with_ancestors;
                    }
                    _ => {
                        using_modified = false;
                        id = mem_id;
                        package_size = entry.size_with_ancestors;
                        package_fees = entry.mod_fees_with_ancestors;
                        package_sigops = entry.sigops_with_ancestors;
                        mi += 1;
                    }
                }
            }

            debug_assert!(!self.in_block.contains(&id));

            if package_fees < self.config.block_min_fee_rate.fee(package_size) as i64 {
                // Rate-ordered iteration: nothing later can satisfy the
                // floor.
                return (packages_selected, descendants_updated);
            }

            if !self.test_package(package_size, package_sigops) {
                if using_modified {
                    // Always looking at the overlay's best entry: a failed
                    // one must leave so the next best can be considered.
                    modified.remove(id);
                    failed.insert(id);
                }
                consecutive_failures += 1;
                if consecutive_failures > MAX_CONSECUTIVE_FAILURES
                    && self.block_size > self.config.block_max_size.saturating_sub(4000)
                {
                    break;
                }
                continue;
            }

            // The package: the entry plus its not-yet-placed ancestors.
            let mut package: Vec<EntryId> = pool
                .calculate_ancestors(id)
                .into_iter()
                .filter(|a| !self.in_block.contains(a))
                .collect();
            package.push(id);

            if !self.test_package_transactions(&package) {
                if using_modified {
                    modified.remove(id);
                    failed.insert(id);
                }
                continue;
            }

            consecutive_failures = 0;

            let sorted = self.sort_for_block(package);
            for &member in &sorted {
                self.add_to_block(member);
                modified.remove(member);
            }
            packages_selected += 1;

            descendants_updated += self.update_packages_for_added(&sorted, &mut modified);
        }

        (packages_selected, descendants_updated)
    }

    /// Skip order entries that are already placed, carry stale aggregates
    /// (present in the overlay), or already failed.
    fn skip_entry(&self, id: EntryId, modified: &ModifiedTxSet, failed: &HashSet<EntryId>) -> bool {
        self.in_block.contains(&id) || modified.contains(id) || failed.contains(&id)
    }

    /// Package-level size and sigop limits.
    fn test_package(&self, package_size: u64, package_sigops: u32) -> bool {
        // Note: checks the default size cap, not the configured one; the
        // per-transaction walk in test_package_transactions enforces the
        // runtime cap.
        if self.block_size + package_size >= DEFAULT_BLOCK_MAX_SIZE {
            return false;
        }
        if self.block_sigops as u64 + package_sigops as u64 >= MAX_BLOCK_SIGOPS as u64 {
            return false;
        }
        true
    }

    /// Transaction-level checks over the whole package: lock-time finality,
    /// the running size against the configured cap, and, under
    /// proof-of-stake, no transaction timestamped after the draft block.
    fn test_package_transactions(&self, package: &[EntryId]) -> bool {
        let pool = self.pool;
        let mut potential_size = self.block_size;
        for &id in package {
            let Some(entry) = pool.entry(id) else {
                return false;
            };
            if !entry.tx.is_final(self.height, self.lock_time_cutoff) {
                return false;
            }
            if self.proof_of_stake && entry.tx.time > self.block_time {
                return false;
            }
            if potential_size + entry.size >= self.config.block_max_size {
                return false;
            }
            potential_size += entry.size;
        }
        true
    }

    /// Order a package for inclusion: ancestor count ascending is a total
    /// order consistent with the dependency DAG.
    fn sort_for_block(&self, mut package: Vec<EntryId>) -> Vec<EntryId> {
        let pool = self.pool;
        package.sort_by_key(|&id| {
            pool.entry(id)
                .map(|e| (e.ancestor_count, e.txid))
                .unwrap_or((u32::MAX, Hash256::ZERO))
        });
        package
    }

    /// Append one transaction to the template and update all running
    /// totals.
    fn add_to_block(&mut self, id: EntryId) {
        let pool = self.pool;
        let Some(entry) = pool.entry(id) else {
            return;
        };
        self.template.push(entry.tx.clone(), entry.fee, entry.sigops);
        self.block_size += entry.size;
        self.block_tx += 1;
        self.block_sigops += entry.sigops;
        self.fees += entry.fee;
        self.in_block.insert(id);

        if self.config.print_priority {
            info!(
                priority = entry.priority(self.height),
                fee = entry.modified_fee(),
                txid = %entry.txid,
                "added to block"
            );
        }
    }

    /// Record every unplaced descendant of the newly-placed entries in the
    /// overlay, subtracting the placed ancestors' contributions. Returns
    /// the number of descendant records touched.
    fn update_packages_for_added(&self, added: &[EntryId], modified: &mut ModifiedTxSet) -> u64 {
        let pool = self.pool;
        let mut updated = 0;
        for &ancestor_id in added {
            let Some(ancestor) = pool.entry(ancestor_id) else {
                continue;
            };
            for descendant_id in pool.calculate_descendants(ancestor_id) {
                if self.in_block.contains(&descendant_id) {
                    continue;
                }
                let Some(descendant) = pool.entry(descendant_id) else {
                    continue;
                };
                modified.subtract_ancestor(descendant_id, descendant, ancestor);
                updated += 1;
            }
        }
        updated
    }
}
