//! The proof-of-stake staking loop.
//!
//! A long-lived task that, on each quantized timestamp tick, asks the
//! wallet for a coinstake satisfying the current target, rebuilds the
//! block around it, and submits — racing chain-tip changes the whole way.
//! Candidate timestamps are quantized to the stake grid
//! (`adjusted_time & !stake_timestamp_mask`), so each grid slot is
//! searched at most once.
//!
//! The task is cancelled cooperatively: the `running` flag is observed
//! around every sleep.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use ember_core::constants::REGTEST_MINER_SLEEP_MS;
use ember_core::error::{MinerError, StakeError, WalletError};
use ember_core::traits::{BlockProcessor, CoinStake, ConsensusParams, NetStatus, StakeWallet};
use ember_core::types::Block;

use crate::miner::Miner;
use crate::stats::MinerStats;
use crate::template::BlockTemplate;

/// Sign a proof-of-stake template.
///
/// Asks the wallet for a coinstake whose kernel satisfies the template's
/// target at `search_time`. On success the coinstake lands at index 1,
/// the coinbase and header adopt the coinstake timestamp, transactions
/// timestamped after the block are evicted, and the block signature is
/// written over the final header hash.
///
/// Returns `Ok(false)` when no stake is found at this timestamp, when the
/// template is not a proof-of-stake skeleton (its coinbase output must be
/// empty), or when the coinstake timestamp falls below `min_stake_time`
/// (median-time-past + 1).
pub fn sign_block(
    template: &mut BlockTemplate,
    wallet: &dyn StakeWallet,
    search_time: u64,
    min_stake_time: u64,
) -> Result<bool, StakeError> {
    let skeleton = template
        .block
        .transactions
        .first()
        .is_some_and(|cb| cb.outputs.len() == 1 && cb.outputs[0].is_empty());
    if !skeleton {
        return Ok(false);
    }

    let bits = template.block.header.bits;
    let coin_stake = match wallet.create_coin_stake(bits, search_time, template.total_fees) {
        Ok(Some(cs)) => cs,
        Ok(None) => return Ok(false),
        Err(WalletError::Locked | WalletError::NoStakeableCoins) => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let CoinStake { tx: coinstake_tx, key } = coin_stake;

    if !coinstake_tx.is_coin_stake() {
        return Err(StakeError::Rejected("wallet returned a malformed coinstake".into()));
    }
    if coinstake_tx.time < min_stake_time {
        return Ok(false);
    }

    let stake_time = coinstake_tx.time;
    template.block.header.time = stake_time;
    template.block.transactions[0].time = stake_time;

    let coinstake_sigops = coinstake_tx.inputs.len() as u32;
    template.block.transactions.insert(1, coinstake_tx);
    template.fees.insert(1, 0);
    template.sigops.insert(1, coinstake_sigops);

    // The stake timestamp binds the block time; anything newer can no
    // longer be carried.
    template.evict_after(stake_time);
    template.refresh_merkle_root()?;

    let hash = template.block.header.hash();
    template.block.signature = key.sign(hash.as_bytes()).to_vec();
    Ok(true)
}

/// The staking worker.
pub struct Staker {
    miner: Arc<Miner>,
    wallet: Arc<dyn StakeWallet>,
    processor: Arc<dyn BlockProcessor>,
    net: Arc<dyn NetStatus>,
    stats: Arc<MinerStats>,
    last_search_time: u64,
    try_to_sync: bool,
}

impl Staker {
    /// Create a staker over the miner service and its collaborators.
    pub fn new(
        miner: Arc<Miner>,
        wallet: Arc<dyn StakeWallet>,
        processor: Arc<dyn BlockProcessor>,
        net: Arc<dyn NetStatus>,
    ) -> Self {
        let stats = miner.stats();
        Self {
            miner,
            wallet,
            processor,
            net,
            stats,
            last_search_time: 0,
            try_to_sync: true,
        }
    }

    /// Run the staking loop until `running` is cleared.
    pub async fn run(mut self, running: Arc<AtomicBool>) {
        info!("staking started");
        let params = self.miner.chain.params();
        let sleep_ms = if params.pos_no_retargeting {
            // Regtest would otherwise produce several blocks per second.
            REGTEST_MINER_SLEEP_MS
        } else {
            self.miner.config().miner_sleep_ms
        };
        self.last_search_time = self.miner.chain.adjusted_time();

        while running.load(Ordering::Relaxed) {
            while self.wallet.is_locked() {
                self.stats.clear_search_interval();
                sleep(Duration::from_secs(10)).await;
                if !running.load(Ordering::Relaxed) {
                    info!("staker shutting down");
                    return;
                }
            }

            if !params.pos_no_retargeting {
                while self.net.peer_count() == 0 || self.net.is_initial_block_download() {
                    self.stats.clear_search_interval();
                    self.try_to_sync = true;
                    sleep(Duration::from_secs(1)).await;
                    if !running.load(Ordering::Relaxed) {
                        info!("staker shutting down");
                        return;
                    }
                }
                if self.try_to_sync {
                    self.try_to_sync = false;
                    // Freshly connected: give the network a minute when
                    // peers are few or the best header is stale.
                    if self.net.peer_count() < 3
                        || self.net.best_header_time() + 600 < self.miner.chain.adjusted_time()
                    {
                        sleep(Duration::from_secs(60)).await;
                        continue;
                    }
                }
            }

            if self.wallet.have_stakeable_coins() {
                match self.stake_once(&params).await {
                    Ok(true) => sleep(Duration::from_millis(500)).await,
                    Ok(false) => {}
                    Err(StakeError::StaleTip) => {
                        info!("valid future proof-of-stake block was orphaned before becoming valid");
                    }
                    Err(StakeError::Expired) => {
                        info!("proof-of-stake block took too long to create and has expired");
                    }
                    Err(e) => warn!("staking iteration failed: {e}"),
                }
            }

            sleep(Duration::from_millis(sleep_ms)).await;
        }
        info!("staker shutting down");
    }

    /// One search iteration: build a stake skeleton, try the current grid
    /// slot, and on success verify the tip is unchanged and submit.
    ///
    /// Returns `Ok(true)` when a block was submitted.
    async fn stake_once(&mut self, params: &ConsensusParams) -> Result<bool, StakeError> {
        let chain = Arc::clone(&self.miner.chain);
        let tip = chain.tip().ok_or(MinerError::TipUnavailable)?;

        let mut template = self.miner.create_new_block(&[], true)?;

        let search_time = chain.adjusted_time() & !params.stake_timestamp_mask;
        if search_time <= self.last_search_time {
            return Ok(false);
        }
        let interval = (search_time - self.last_search_time) as i64;

        let signed = sign_block(
            &mut template,
            &*self.wallet,
            search_time,
            tip.min_next_block_time(),
        )?;

        self.stats.set_search_interval(interval);
        self.last_search_time = search_time;

        if !signed {
            return Ok(false);
        }

        // A signed stake is time-critical: see it onto the chain before
        // the timestamp expires, unless the tip moves under us.
        loop {
            let now_tip = chain.tip().ok_or(MinerError::TipUnavailable)?;
            if now_tip.hash != template.block.header.prev_hash {
                return Err(StakeError::StaleTip);
            }
            let block_time = template.block.header.time;
            if block_time <= tip.time || params.future_drift(block_time) < tip.time {
                return Err(StakeError::Expired);
            }
            if block_time > params.future_drift(chain.adjusted_time()) {
                sleep(Duration::from_secs(3)).await;
                continue;
            }
            break;
        }

        self.check_stake(&template.block)?;
        Ok(true)
    }

    /// Final checks and hand-off to the block-processing collaborator.
    fn check_stake(&self, block: &Block) -> Result<(), StakeError> {
        if !block.is_proof_of_stake() || block.signature.is_empty() {
            return Err(StakeError::Rejected("not a signed proof-of-stake block".into()));
        }
        let tip = self.miner.chain.tip().ok_or(MinerError::TipUnavailable)?;
        if block.header.prev_hash != tip.hash {
            return Err(StakeError::StaleTip);
        }
        info!(hash = %block.header.hash(), "new proof-of-stake block found");
        self.processor
            .process_new_block(block, true)
            .map_err(|e| StakeError::Rejected(e.to_string()))
    }
}
