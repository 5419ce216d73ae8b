//! Error types for the Ember protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")] AlreadyExists(String),
    #[error("conflicts with pool tx {existing_txid} on outpoint {outpoint}")] Conflict { new_txid: String, existing_txid: String, outpoint: String },
    #[error("unknown transaction: {0}")] UnknownTransaction(String),
    #[error("internal: {0}")] Internal(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
}

/// A block candidate rejected by the consensus engine's validity check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidityError(pub String);

/// A block rejected by the block-processing collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("block rejected: {0}")]
pub struct BlockRejected(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MinerError {
    #[error("no chain tip available")] TipUnavailable,
    #[error("template failed validity check: {0}")] ValidityCheckFailed(String),
    #[error("template allocation failed")] OutOfResources,
    #[error("invalid configuration: {0}")] ConfigInvalid(String),
    #[error("generated block rejected: {0}")] BlockRejected(String),
    #[error(transparent)] Transaction(#[from] TransactionError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("wallet is locked")] Locked,
    #[error("no stakeable coins")] NoStakeableCoins,
    #[error("coinstake: {0}")] CoinStake(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StakeError {
    #[error("chain tip changed while building stake block")] StaleTip,
    #[error("stake block took too long to create and has expired")] Expired,
    #[error("stake block rejected: {0}")] Rejected(String),
    #[error(transparent)] Miner(#[from] MinerError),
    #[error(transparent)] Wallet(#[from] WalletError),
    #[error(transparent)] Transaction(#[from] TransactionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_variants_display() {
        let errors: Vec<String> = vec![
            MinerError::TipUnavailable.to_string(),
            MinerError::ValidityCheckFailed("bad merkle root".into()).to_string(),
            MinerError::ConfigInvalid("blockmintxfee".into()).to_string(),
            WalletError::Locked.to_string(),
            StakeError::StaleTip.to_string(),
            MempoolError::UnknownTransaction("ab".into()).to_string(),
        ];
        for e in &errors {
            assert!(!e.is_empty());
        }
    }

    #[test]
    fn stake_error_wraps_miner_error() {
        let e: StakeError = MinerError::TipUnavailable.into();
        assert_eq!(e.to_string(), MinerError::TipUnavailable.to_string());
    }
}
