use std::io::{self, ErrorKind};

use primitive_types::H256;
use thiserror::Error;

use crate::validator_manager::errors::ContractError;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the conversion flow.
#[derive(Debug, Error)]
pub enum Error {
    /// Detected before any network call; never retried.
    #[error("{0}")]
    Precondition(String),

    /// Contract revert decoded through the selector registry.
    #[error(transparent)]
    Revert(#[from] ContractError),

    #[error("unknown error selector {selector} (revert data 0x{})", hex::encode(.data))]
    UnknownSelector { selector: String, data: Vec<u8> },

    /// Wraps a contract write failure with the tx hash, when one was submitted.
    #[error("{msg}: {source} ({marker})")]
    Transaction {
        msg: String,
        marker: String,
        tx_hash: Option<H256>,
        source: Box<Error>,
    },

    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("failed receipt status")]
    FailedReceiptStatus,

    #[error("signed weight {signed_weight} of total {total_weight} does not meet quorum {quorum_percentage}%")]
    Quorum {
        signed_weight: u64,
        total_weight: u64,
        quorum_percentage: u64,
    },

    #[error("conversion ID mismatch (expected {expected}, P-Chain has {actual})")]
    ConversionIdMismatch { expected: String, actual: String },

    #[error("signature aggregator: {0}")]
    Aggregator(String),

    #[error("issue tx error {0}")]
    Issue(String),

    #[error("timeout {0}")]
    Timeout(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    /// Wraps `cause` the way operators read contract failures: the tx hash if
    /// the request reached the chain, otherwise an explicit "not submitted" marker.
    pub fn transaction(msg: impl Into<String>, tx_hash: Option<H256>, cause: Error) -> Self {
        let marker = match tx_hash {
            Some(h) => format!("txHash=0x{:x}", h),
            None => String::from("tx failed to be submitted"),
        };
        Error::Transaction {
            msg: msg.into(),
            marker,
            tx_hash,
            source: Box::new(cause),
        }
    }

    /// Returns the decoded contract revert, looking through transaction wrapping.
    pub fn contract_error(&self) -> Option<&ContractError> {
        match self {
            Error::Revert(e) => Some(e),
            Error::Transaction { source, .. } => source.contract_error(),
            _ => None,
        }
    }

    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            Error::Transaction { tx_hash, .. } => *tx_hash,
            _ => None,
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::Precondition(_))
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            other => io::Error::new(ErrorKind::Other, other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(format!("failed serde_json {}", e))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Codec(format!("failed serde_yaml {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Rpc(e.to_string())
    }
}
