//! # ember-core
//! Foundation types, mempool view, and collaborator traits for the Ember
//! protocol.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod mempool;
pub mod merkle;
pub mod script;
pub mod target;
pub mod traits;
pub mod types;
