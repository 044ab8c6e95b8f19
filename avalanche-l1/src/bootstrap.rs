//! Bootstrap validators named in the conversion transaction.
use std::{
    fs::File,
    io::{self, Error as IoError, ErrorKind},
    path::Path,
    str::FromStr,
};

use avalanche_types::ids::node;
use serde::{Deserialize, Serialize};

use crate::{
    errors::{Error, Result},
    warp::{ValidatorData, BLS_PROOF_OF_POSSESSION_LEN, BLS_PUBLIC_KEY_LEN},
};

pub const DEFAULT_WEIGHT: u64 = 20;
/// Initial P-Chain balance in nAVAX (1 AVAX).
pub const DEFAULT_BALANCE: u64 = 1_000_000_000;

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapValidator {
    #[serde(rename = "nodeID")]
    pub node_id: String,
    pub weight: u64,
    pub balance: u64,
    /// "0x"-prefixed hex of the compressed BLS public key.
    pub bls_public_key: String,
    pub bls_proof_of_possession: String,
    /// P-Chain address that receives the leftover balance.
    pub change_owner_addr: String,
}

fn decode_hex(s: &str, field: &str, len: usize) -> Result<Vec<u8>> {
    let b = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| Error::precondition(format!("invalid {field} '{s}' ({e})")))?;
    if b.len() != len {
        return Err(Error::precondition(format!(
            "invalid {field} length {} (expected {len})",
            b.len()
        )));
    }
    Ok(b)
}

impl BootstrapValidator {
    pub fn node_id(&self) -> Result<node::Id> {
        node::Id::from_str(&self.node_id)
            .map_err(|e| Error::precondition(format!("invalid node ID '{}' ({})", self.node_id, e)))
    }

    pub fn bls_public_key(&self) -> Result<Vec<u8>> {
        decode_hex(&self.bls_public_key, "BLS public key", BLS_PUBLIC_KEY_LEN)
    }

    pub fn bls_proof_of_possession(&self) -> Result<Vec<u8>> {
        decode_hex(
            &self.bls_proof_of_possession,
            "BLS proof of possession",
            BLS_PROOF_OF_POSSESSION_LEN,
        )
    }

    pub fn validate(&self) -> Result<()> {
        self.node_id()?;
        self.bls_public_key()?;
        self.bls_proof_of_possession()?;
        if self.weight == 0 {
            return Err(Error::precondition(format!(
                "bootstrap validator {} weight must be positive",
                self.node_id
            )));
        }
        if self.balance == 0 {
            return Err(Error::precondition(format!(
                "bootstrap validator {} balance must be positive",
                self.node_id
            )));
        }
        if self.change_owner_addr.is_empty() {
            return Err(Error::precondition(format!(
                "bootstrap validator {} missing change owner address",
                self.node_id
            )));
        }
        Ok(())
    }

    pub fn to_validator_data(&self) -> Result<ValidatorData> {
        Ok(ValidatorData {
            node_id: self.node_id()?,
            bls_public_key: self.bls_public_key()?,
            weight: self.weight,
        })
    }
}

pub fn validate_all(validators: &[BootstrapValidator]) -> Result<()> {
    if validators.is_empty() {
        return Err(Error::precondition("missing bootstrap validators"));
    }
    for v in validators.iter() {
        v.validate()?;
    }
    Ok(())
}

/// Loads the JSON list of bootstrap validators.
pub fn load(file_path: &str) -> io::Result<Vec<BootstrapValidator>> {
    log::info!("loading bootstrap validators from {}", file_path);

    if !Path::new(file_path).exists() {
        return Err(IoError::new(
            ErrorKind::NotFound,
            format!("file {} does not exists", file_path),
        ));
    }

    let f = File::open(file_path).map_err(|e| {
        IoError::new(
            ErrorKind::Other,
            format!("failed to open {} ({})", file_path, e),
        )
    })?;
    serde_json::from_reader(f)
        .map_err(|e| IoError::new(ErrorKind::InvalidInput, format!("invalid JSON: {}", e)))
}
