//! # ember-miner
//! Block production for the Ember protocol: the template assembler
//! (ancestor-feerate package selection with an optional coin-age priority
//! region), the proof-of-work generation driver, and the proof-of-stake
//! staking loop.
//!
//! The crate talks to the rest of the node exclusively through the
//! collaborator traits in [`ember_core::traits`]; wire up a [`Miner`] with
//! a chain view and mempool, then drive it from RPC
//! ([`Miner::generate_blocks`]) or spawn a [`Staker`].

pub mod assembler;
pub mod config;
pub mod extra_nonce;
mod generator;
pub mod miner;
mod modified;
pub mod staker;
pub mod stats;
pub mod template;

pub use assembler::BlockAssembler;
pub use config::{FeeRate, MinerArgs, MinerConfig};
pub use extra_nonce::ExtraNonce;
pub use miner::Miner;
pub use staker::{sign_block, Staker};
pub use stats::MinerStats;
pub use template::BlockTemplate;
