use bytes::{BufMut, BytesMut};

use crate::{
    errors::{Error, Result},
    warp::{UnsignedMessage, Unpacker, BLS_SIGNATURE_LEN},
};

/// Type ID of "BitSetSignature" in the warp codec.
const BIT_SET_SIGNATURE_TYPE_ID: u32 = 0;

/// Warp message with an aggregated BLS signature.
///
/// `signers` is the big-endian big-int encoding of a bit set where bit `i`
/// marks the `i`-th validator of the canonical validator set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub unsigned: UnsignedMessage,
    pub signers: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedMessage {
    pub fn from_slice(d: &[u8]) -> Result<Self> {
        let mut u = Unpacker::new(d);
        let unsigned = UnsignedMessage::unpack(&mut u)?;
        let type_id = u.u32("signature type ID")?;
        if type_id != BIT_SET_SIGNATURE_TYPE_ID {
            return Err(Error::Codec(format!("unknown signature type ID {type_id}")));
        }
        let signers = u.bytes("signers")?.to_vec();
        let signature = u.take(BLS_SIGNATURE_LEN, "signature")?.to_vec();
        if u.remaining() != 0 {
            return Err(Error::Codec(format!(
                "{} trailing bytes after signed message",
                u.remaining()
            )));
        }
        Ok(Self {
            unsigned,
            signers,
            signature,
        })
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim().trim_start_matches("0x");
        let d = hex::decode(s).map_err(|e| Error::Codec(format!("failed hex decode {}", e)))?;
        Self::from_slice(&d)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let unsigned = self.unsigned.to_bytes();
        let mut buf =
            BytesMut::with_capacity(unsigned.len() + 4 + 4 + self.signers.len() + BLS_SIGNATURE_LEN);
        buf.put_slice(&unsigned);
        buf.put_u32(BIT_SET_SIGNATURE_TYPE_ID);
        buf.put_u32(self.signers.len() as u32);
        buf.put_slice(&self.signers);
        buf.put_slice(&self.signature);
        buf.to_vec()
    }

    /// Indices of the canonical validators that signed, ascending.
    pub fn signer_indices(&self) -> Vec<usize> {
        let mut indices = Vec::new();
        for (pos, byte) in self.signers.iter().rev().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    indices.push(pos * 8 + bit);
                }
            }
        }
        indices
    }

    /// Sums the weights of the signers; `weights` is in canonical order.
    pub fn signed_weight(&self, weights: &[u64]) -> Result<u64> {
        let mut total: u64 = 0;
        for i in self.signer_indices() {
            let w = weights.get(i).ok_or_else(|| {
                Error::Codec(format!(
                    "signer index {i} out of range for {} validators",
                    weights.len()
                ))
            })?;
            total = total
                .checked_add(*w)
                .ok_or_else(|| Error::Codec(String::from("signed weight overflow")))?;
        }
        Ok(total)
    }

    pub fn check_quorum(&self, weights: &[u64], quorum_percentage: u64) -> Result<()> {
        let total_weight = weights
            .iter()
            .try_fold(0u64, |acc, w| acc.checked_add(*w))
            .ok_or_else(|| Error::Codec(String::from("total weight overflow")))?;
        if total_weight == 0 {
            return Err(Error::precondition("canonical validator set has zero weight"));
        }
        let signed_weight = self.signed_weight(weights)?;
        if !meets_quorum(signed_weight, total_weight, quorum_percentage) {
            return Err(Error::Quorum {
                signed_weight,
                total_weight,
                quorum_percentage,
            });
        }
        Ok(())
    }
}

pub fn meets_quorum(signed_weight: u64, total_weight: u64, quorum_percentage: u64) -> bool {
    (signed_weight as u128) * 100 >= (quorum_percentage as u128) * (total_weight as u128)
}

/// Encodes signer indices the way `signers` is laid out on the wire.
pub fn signer_bits(indices: &[usize]) -> Vec<u8> {
    let Some(max) = indices.iter().max() else {
        return Vec::new();
    };
    let len = max / 8 + 1;
    let mut out = vec![0u8; len];
    for i in indices {
        out[len - 1 - i / 8] |= 1 << (i % 8);
    }
    out
}

#[cfg(test)]
mod tests {
    use avalanche_types::ids;

    use super::*;

    fn signed(indices: &[usize]) -> SignedMessage {
        SignedMessage {
            unsigned: UnsignedMessage {
                network_id: 1337,
                source_chain_id: ids::Id::empty(),
                payload: vec![1, 2, 3],
            },
            signers: signer_bits(indices),
            signature: vec![7; BLS_SIGNATURE_LEN],
        }
    }

    #[test]
    fn test_signed_message_parse() {
        let msg = signed(&[0, 2, 9]);
        assert_eq!(msg.signers, vec![0b0000_0010, 0b0000_0101]);

        let parsed = SignedMessage::from_hex(&format!("0x{}", hex::encode(msg.to_bytes()))).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.signer_indices(), vec![0, 2, 9]);

        let mut truncated = msg.to_bytes();
        truncated.pop();
        assert!(SignedMessage::from_slice(&truncated).is_err());

        let mut trailing = msg.to_bytes();
        trailing.push(0);
        assert!(SignedMessage::from_slice(&trailing).is_err());
    }

    #[test]
    fn test_quorum() {
        // two equal-weight validators, one signer: 50%
        let msg = signed(&[0]);
        let weights = [10, 10];
        assert_eq!(msg.signed_weight(&weights).unwrap(), 10);
        assert!(msg.check_quorum(&weights, 50).is_ok());
        match msg.check_quorum(&weights, 67).unwrap_err() {
            Error::Quorum {
                signed_weight,
                total_weight,
                quorum_percentage,
            } => {
                assert_eq!(signed_weight, 10);
                assert_eq!(total_weight, 20);
                assert_eq!(quorum_percentage, 67);
            }
            e => panic!("unexpected error {e}"),
        }

        assert!(signed(&[0, 1]).check_quorum(&weights, 100).is_ok());
        assert!(signed(&[3]).signed_weight(&weights).is_err());
        assert!(signed(&[0]).check_quorum(&[0, 0], 67).is_err());

        assert!(meets_quorum(67, 100, 67));
        assert!(!meets_quorum(66, 100, 67));
        assert!(meets_quorum(u64::MAX, u64::MAX, 100));
    }
}
