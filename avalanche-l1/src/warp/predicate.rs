use ethers_core::types::transaction::eip2930::{AccessList, AccessListItem};
use primitive_types::{H160, H256};

/// Address of the warp precompile on subnet-evm and coreth.
pub const WARP_PRECOMPILE_ADDRESS: H160 = H160([
    0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x05,
]);

const PREDICATE_END_BYTE: u8 = 0xff;

/// Packs a signed warp message as a predicate: the bytes, a 0xff delimiter,
/// then zero padding up to a multiple of 32.
pub fn pack(msg: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(msg.len() + 32);
    out.extend_from_slice(msg);
    out.push(PREDICATE_END_BYTE);
    let rem = out.len() % 32;
    if rem != 0 {
        out.resize(out.len() + 32 - rem, 0);
    }
    out
}

/// Access list that delivers the signed message to the warp precompile.
pub fn access_list(signed_msg: &[u8]) -> AccessList {
    let storage_keys = pack(signed_msg)
        .chunks(32)
        .map(H256::from_slice)
        .collect();
    AccessList(vec![AccessListItem {
        address: WARP_PRECOMPILE_ADDRESS,
        storage_keys,
    }])
}

#[test]
fn test_access_list() {
    assert_eq!(
        format!("{:?}", WARP_PRECOMPILE_ADDRESS),
        "0x0200000000000000000000000000000000000005"
    );

    let packed = pack(&[1; 31]);
    assert_eq!(packed.len(), 32);
    assert_eq!(packed[31], 0xff);

    let packed = pack(&[1; 32]);
    assert_eq!(packed.len(), 64);
    assert_eq!(packed[32], 0xff);
    assert!(packed[33..].iter().all(|b| *b == 0));

    let list = access_list(&[9; 40]);
    assert_eq!(list.0.len(), 1);
    assert_eq!(list.0[0].address, WARP_PRECOMPILE_ADDRESS);
    assert_eq!(list.0[0].storage_keys.len(), 2);
    assert_eq!(list.0[0].storage_keys[1].as_bytes()[8], 0xff);
}
