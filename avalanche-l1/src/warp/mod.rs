//! Warp messages for the subnet-to-L1 conversion.
//!
//! Everything here uses the avalanchego linear codec: big-endian integers,
//! `u32` length prefixes for variable-sized bytes, and a leading `u16` codec
//! version on every top-level structure.
pub mod predicate;
pub mod signed;

use avalanche_types::ids::{self, node};
use bytes::{Buf, BufMut, BytesMut};
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};

pub const CODEC_VERSION: u16 = 0;

pub const BLS_PUBLIC_KEY_LEN: usize = 48;
pub const BLS_PROOF_OF_POSSESSION_LEN: usize = 96;
pub const BLS_SIGNATURE_LEN: usize = 96;
pub const NODE_ID_LEN: usize = 20;
pub const ID_LEN: usize = 32;
pub const EVM_ADDRESS_LEN: usize = 20;

/// Type ID of "SubnetToL1Conversion" in the platform warp message codec.
const SUBNET_TO_L1_CONVERSION_TYPE_ID: u32 = 0;
/// Type ID of "AddressedCall" in the warp payload codec.
const ADDRESSED_CALL_TYPE_ID: u32 = 1;

/// Conversion messages are always sent by the P-Chain, whose ID is all zeros.
pub fn platform_chain_id() -> ids::Id {
    ids::Id::empty()
}

pub fn sha256(d: impl AsRef<[u8]>) -> Vec<u8> {
    Sha256::digest(d.as_ref()).to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorData {
    pub node_id: node::Id,
    pub bls_public_key: Vec<u8>,
    pub weight: u64,
}

/// The data the P-Chain commits to when it accepts a `ConvertSubnetToL1Tx`.
/// Validators are kept sorted by node ID, matching the order the P-Chain
/// wallet puts them in the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionData {
    pub subnet_id: ids::Id,
    pub manager_chain_id: ids::Id,
    pub manager_address: Vec<u8>,
    pub validators: Vec<ValidatorData>,
}

impl ConversionData {
    pub fn new(
        subnet_id: ids::Id,
        manager_chain_id: ids::Id,
        manager_address: &[u8],
        mut validators: Vec<ValidatorData>,
    ) -> Result<Self> {
        if subnet_id.is_empty() {
            return Err(Error::precondition("missing Subnet ID"));
        }
        if manager_chain_id.is_empty() {
            return Err(Error::precondition("missing validator manager blockchain ID"));
        }
        if manager_address.len() != EVM_ADDRESS_LEN {
            return Err(Error::precondition(format!(
                "invalid validator manager address length {} (expected {EVM_ADDRESS_LEN})",
                manager_address.len()
            )));
        }
        if validators.is_empty() {
            return Err(Error::precondition("missing bootstrap validators"));
        }
        for v in validators.iter() {
            if v.node_id.is_empty() {
                return Err(Error::precondition("empty bootstrap validator node ID"));
            }
            if v.bls_public_key.len() != BLS_PUBLIC_KEY_LEN {
                return Err(Error::Codec(format!(
                    "invalid BLS public key length {} for {} (expected {BLS_PUBLIC_KEY_LEN})",
                    v.bls_public_key.len(),
                    v.node_id
                )));
            }
            if v.weight == 0 {
                return Err(Error::precondition(format!(
                    "bootstrap validator {} has zero weight",
                    v.node_id
                )));
            }
        }
        validators.sort_by(|a, b| a.node_id.as_ref().cmp(b.node_id.as_ref()));
        for w in validators.windows(2) {
            if w[0].node_id == w[1].node_id {
                return Err(Error::precondition(format!(
                    "duplicate bootstrap validator {}",
                    w[0].node_id
                )));
            }
        }

        Ok(Self {
            subnet_id,
            manager_chain_id,
            manager_address: manager_address.to_vec(),
            validators,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(
            2 + ID_LEN * 2 + 4 + self.manager_address.len() + 4
                + self.validators.len() * (4 + NODE_ID_LEN + BLS_PUBLIC_KEY_LEN + 8),
        );
        buf.put_u16(CODEC_VERSION);
        buf.put_slice(self.subnet_id.as_ref());
        buf.put_slice(self.manager_chain_id.as_ref());
        buf.put_u32(self.manager_address.len() as u32);
        buf.put_slice(&self.manager_address);
        buf.put_u32(self.validators.len() as u32);
        for v in self.validators.iter() {
            buf.put_u32(NODE_ID_LEN as u32);
            buf.put_slice(v.node_id.as_ref());
            buf.put_slice(&v.bls_public_key);
            buf.put_u64(v.weight);
        }
        buf.to_vec()
    }

    /// ID the P-Chain records for the subnet after conversion.
    pub fn conversion_id(&self) -> ids::Id {
        ids::Id::from_slice(&sha256(self.to_bytes()))
    }
}

/// Payload carried inside the addressed call.
pub fn subnet_to_l1_conversion_payload(conversion_id: &ids::Id) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(2 + 4 + ID_LEN);
    buf.put_u16(CODEC_VERSION);
    buf.put_u32(SUBNET_TO_L1_CONVERSION_TYPE_ID);
    buf.put_slice(conversion_id.as_ref());
    buf.to_vec()
}

pub fn addressed_call(source_address: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(2 + 4 + 4 + source_address.len() + 4 + payload.len());
    buf.put_u16(CODEC_VERSION);
    buf.put_u32(ADDRESSED_CALL_TYPE_ID);
    buf.put_u32(source_address.len() as u32);
    buf.put_slice(source_address);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedMessage {
    pub network_id: u32,
    pub source_chain_id: ids::Id,
    pub payload: Vec<u8>,
}

impl UnsignedMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(2 + 4 + ID_LEN + 4 + self.payload.len());
        buf.put_u16(CODEC_VERSION);
        buf.put_u32(self.network_id);
        buf.put_slice(self.source_chain_id.as_ref());
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.to_vec()
    }

    pub fn id(&self) -> ids::Id {
        ids::Id::from_slice(&sha256(self.to_bytes()))
    }

    /// Hex without "0x", the form the signature aggregator expects.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub(crate) fn unpack(u: &mut Unpacker<'_>) -> Result<Self> {
        let codec = u.u16("codec version")?;
        if codec != CODEC_VERSION {
            return Err(Error::Codec(format!("unknown codec version {codec}")));
        }
        let network_id = u.u32("network ID")?;
        let source_chain_id = ids::Id::from_slice(u.take(ID_LEN, "source chain ID")?);
        let payload = u.bytes("payload")?.to_vec();
        Ok(Self {
            network_id,
            source_chain_id,
            payload,
        })
    }
}

/// Builds the unsigned "SubnetToL1Conversion" message from conversion data.
/// Identical inputs always produce identical bytes.
pub fn build_conversion_message(network_id: u32, data: &ConversionData) -> UnsignedMessage {
    let conversion_id = data.conversion_id();
    let payload = subnet_to_l1_conversion_payload(&conversion_id);
    UnsignedMessage {
        network_id,
        source_chain_id: platform_chain_id(),
        payload: addressed_call(&[], &payload),
    }
}

/// Orders validator weights the way the P-Chain orders its canonical
/// validator set: by uncompressed BLS public key, with validators sharing a
/// key merged. Compressed keys carry flag bits in the top three bits of the
/// first byte; masking them leaves the big-endian x coordinate, which orders
/// the same as the uncompressed form for distinct keys.
pub fn canonical_weights(validators: &[(Vec<u8>, u64)]) -> Vec<u64> {
    let mut keyed: Vec<(Vec<u8>, u64)> = validators
        .iter()
        .filter(|(pk, _)| !pk.is_empty())
        .map(|(pk, w)| {
            let mut k = pk.clone();
            k[0] &= 0x1f;
            (k, *w)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut weights: Vec<u64> = Vec::with_capacity(keyed.len());
    let mut prev: Option<Vec<u8>> = None;
    for (k, w) in keyed {
        if prev.as_ref() == Some(&k) {
            if let Some(last) = weights.last_mut() {
                *last = last.saturating_add(w);
            }
        } else {
            weights.push(w);
            prev = Some(k);
        }
    }
    weights
}

/// Bounds-checked reader over codec bytes.
pub(crate) struct Unpacker<'a> {
    buf: &'a [u8],
}

impl<'a> Unpacker<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub(crate) fn take(&mut self, n: usize, field: &str) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::Codec(format!(
                "insufficient bytes for {field} (need {n}, have {})",
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn u16(&mut self, field: &str) -> Result<u16> {
        let mut b = self.take(2, field)?;
        Ok(b.get_u16())
    }

    pub(crate) fn u32(&mut self, field: &str) -> Result<u32> {
        let mut b = self.take(4, field)?;
        Ok(b.get_u32())
    }

    pub(crate) fn bytes(&mut self, field: &str) -> Result<&'a [u8]> {
        let n = self.u32(field)? as usize;
        self.take(n, field)
    }
}
