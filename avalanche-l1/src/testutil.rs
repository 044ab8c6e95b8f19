//! In-memory collaborators for flow tests.
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use avalanche_types::ids::{self, node};
use ethers_core::{
    abi::{self, ParamType, Token},
    types::transaction::eip2930::AccessList,
    utils,
};
use primitive_types::{H160, H256, U256};

use crate::{
    aggregator::SignatureAggregator,
    bootstrap::{BootstrapValidator, DEFAULT_BALANCE, DEFAULT_WEIGHT},
    errors::{Error, Result},
    health::NodeHealth,
    pchain::{ConvertTxRequest, MultisigTx, PChainClient, PChainWallet, SubnetInfo, TxStatus},
    validator_manager::{
        abi as vm_abi,
        abi::ChurnTracker,
        driver::{ContractBackend, SendError, TxReceipt},
    },
    warp::{
        predicate::WARP_PRECOMPILE_ADDRESS,
        signed::{signer_bits, SignedMessage},
        UnsignedMessage, Unpacker, BLS_SIGNATURE_LEN,
    },
};

pub fn manager_address() -> H160 {
    H160::from_low_u64_be(0x0feedc0de)
}

pub fn specialized_address() -> H160 {
    H160::from_low_u64_be(0x05fec1a1)
}

pub fn owner_address() -> H160 {
    H160::from_low_u64_be(0x0a11ce)
}

pub fn bootstrap_validators(n: u8) -> Vec<BootstrapValidator> {
    (1..=n)
        .map(|i| BootstrapValidator {
            node_id: node::Id::from_slice(&[i; 20]).to_string(),
            weight: DEFAULT_WEIGHT,
            balance: DEFAULT_BALANCE,
            bls_public_key: format!("0x{}", hex::encode([i; 48])),
            bls_proof_of_possession: format!("0x{}", hex::encode([i; 96])),
            change_owner_addr: String::from("P-custom18jma8ppw3nhx5r4ap8clazz0dps7rv5u9xde7p"),
        })
        .collect()
}

pub fn convert_tx_request() -> ConvertTxRequest {
    ConvertTxRequest {
        subnet_id: ids::Id::from_slice(&[1; 32]),
        manager_chain_id: ids::Id::from_slice(&[2; 32]),
        manager_address: manager_address(),
        validators: bootstrap_validators(2),
    }
}

pub fn multisig_tx(threshold: u32, auth: &[&str], signed: &[&str]) -> MultisigTx {
    MultisigTx {
        tx_id: String::from("2QYfFcfZ9b7Mv3ZDS2ojyACqyhMcdkDEsjD1ZgrmT1o4ZNgbW4"),
        conversion_id: convert_tx_request().conversion_id().unwrap().to_string(),
        tx_bytes: vec![0, 0, 0, 0, 0, 0x23],
        control_keys: auth.iter().map(|s| s.to_string()).collect(),
        threshold,
        auth_signers: auth.iter().map(|s| s.to_string()).collect(),
        signed: signed.iter().map(|s| s.to_string()).collect(),
    }
}

/// Returns the same signing state on every build, bound to the request.
pub struct MockWallet {
    pub tx: MultisigTx,
    pub builds: AtomicUsize,
    pub requests: Mutex<Vec<ConvertTxRequest>>,
}

impl MockWallet {
    pub fn new(tx: MultisigTx) -> Self {
        Self {
            tx,
            builds: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PChainWallet for MockWallet {
    async fn build_convert_tx(&self, req: &ConvertTxRequest) -> Result<MultisigTx> {
        req.validate()?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req.clone());
        let mut tx = self.tx.clone();
        tx.conversion_id = req.conversion_id()?.to_string();
        Ok(tx)
    }
}

/// Converts the subnet to `conversion_id` once a tx is issued.
pub struct MockPChain {
    pub subnet: Mutex<SubnetInfo>,
    pub conversion_id: ids::Id,
    pub weights: Vec<u64>,
    pub issued: AtomicUsize,
}

impl MockPChain {
    pub fn new(conversion_id: ids::Id, weights: Vec<u64>) -> Self {
        Self {
            subnet: Mutex::new(SubnetInfo {
                is_permissioned: true,
                conversion_id: ids::Id::empty(),
                manager_chain_id: ids::Id::empty(),
                manager_address: Vec::new(),
            }),
            conversion_id,
            weights,
            issued: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PChainClient for MockPChain {
    async fn issue_tx(&self, _tx_bytes: &[u8]) -> Result<String> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        let mut s = self.subnet.lock().unwrap();
        s.is_permissioned = false;
        s.conversion_id = self.conversion_id.clone();
        Ok(String::from("2QYfFcfZ9b7Mv3ZDS2ojyACqyhMcdkDEsjD1ZgrmT1o4ZNgbW4"))
    }

    async fn tx_status(&self, _tx_id: &str) -> Result<TxStatus> {
        Ok(TxStatus::Committed)
    }

    async fn get_subnet(&self, _subnet_id: &ids::Id) -> Result<SubnetInfo> {
        Ok(self.subnet.lock().unwrap().clone())
    }

    async fn canonical_validator_weights(&self, _subnet_id: &ids::Id) -> Result<Vec<u64>> {
        Ok(self.weights.clone())
    }
}

/// Signs with the validators at `signers` (canonical indices).
pub struct MockAggregator {
    pub signers: Vec<usize>,
    pub calls: AtomicUsize,
    pub justifications: Mutex<Vec<String>>,
}

impl MockAggregator {
    pub fn new(signers: &[usize]) -> Self {
        Self {
            signers: signers.to_vec(),
            calls: AtomicUsize::new(0),
            justifications: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SignatureAggregator for MockAggregator {
    async fn sign(
        &self,
        message_hex: &str,
        justification_hex: &str,
        _signing_subnet_id: &ids::Id,
        _quorum_percentage: u64,
    ) -> Result<SignedMessage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.justifications
            .lock()
            .unwrap()
            .push(justification_hex.to_string());
        let b = hex::decode(message_hex).map_err(|e| Error::Codec(e.to_string()))?;
        let unsigned = UnsignedMessage::unpack(&mut Unpacker::new(&b))?;
        Ok(SignedMessage {
            unsigned,
            signers: signer_bits(&self.signers),
            signature: vec![0xaa; BLS_SIGNATURE_LEN],
        })
    }
}

pub struct MockHealth {
    pub checks: AtomicUsize,
}

impl MockHealth {
    pub fn new() -> Self {
        Self {
            checks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl NodeHealth for MockHealth {
    async fn is_healthy(&self, _blockchain_id: &ids::Id) -> Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct ContractState {
    pub initialized: HashSet<H160>,
    pub owners: HashMap<H160, H160>,
    pub registered: HashMap<Vec<u8>, H256>,
    pub validator_set_initialized: bool,
    /// Custom error `initializeValidatorSet` reverts with, if set.
    pub reject_validator_set: Option<&'static str>,
    /// (to, selector) of every mined tx.
    pub sends: Vec<(H160, [u8; 4])>,
}

/// Simulates Validator Manager contracts deployed at any address.
pub struct MockContract {
    pub sender: H160,
    pub balance: U256,
    pub state: Mutex<ContractState>,
}

fn revert(signature: &str) -> SendError {
    SendError {
        tx_hash: None,
        revert_data: Some(utils::id(signature).to_vec()),
        message: String::from("execution reverted"),
    }
}

fn selector(data: &[u8]) -> [u8; 4] {
    let mut s = [0u8; 4];
    if data.len() >= 4 {
        s.copy_from_slice(&data[..4]);
    }
    s
}

fn is_selector(data: &[u8], signature: &str) -> bool {
    selector(data) == utils::id(signature)
}

/// Node IDs carried by `initializeValidatorSet` calldata.
fn node_ids(data: &[u8]) -> Vec<Vec<u8>> {
    let types = [
        ParamType::Tuple(vec![
            ParamType::FixedBytes(32),
            ParamType::FixedBytes(32),
            ParamType::Address,
            ParamType::Array(Box::new(ParamType::Tuple(vec![
                ParamType::Bytes,
                ParamType::Bytes,
                ParamType::Uint(64),
            ]))),
        ]),
        ParamType::Uint(32),
    ];
    let tokens = abi::decode(&types, &data[4..]).unwrap();
    let mut out = Vec::new();
    if let Token::Tuple(conversion) = &tokens[0] {
        if let Token::Array(validators) = &conversion[3] {
            for v in validators {
                if let Token::Tuple(fields) = v {
                    if let Token::Bytes(node_id) = &fields[0] {
                        out.push(node_id.clone());
                    }
                }
            }
        }
    }
    out
}

impl MockContract {
    pub fn new() -> Self {
        Self {
            sender: owner_address(),
            balance: U256::from(1_000_000_000_000_000_000u64),
            state: Mutex::new(ContractState::default()),
        }
    }

    /// Selectors sent to `to`, in order.
    pub fn sent(&self, to: H160) -> Vec<[u8; 4]> {
        self.state
            .lock()
            .unwrap()
            .sends
            .iter()
            .filter(|(t, _)| *t == to)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn sent_count(&self, signature: &str) -> usize {
        let sel = utils::id(signature);
        self.state
            .lock()
            .unwrap()
            .sends
            .iter()
            .filter(|(_, s)| *s == sel)
            .count()
    }
}

#[async_trait]
impl ContractBackend for MockContract {
    fn sender(&self) -> H160 {
        self.sender
    }

    async fn balance(&self) -> Result<U256> {
        Ok(self.balance)
    }

    async fn call(&self, to: H160, data: Vec<u8>) -> Result<Vec<u8>> {
        let st = self.state.lock().unwrap();
        if is_selector(&data, vm_abi::OWNER) {
            let owner = st.owners.get(&to).copied().unwrap_or_default();
            return Ok(abi::encode(&[Token::Address(owner)]));
        }
        if is_selector(&data, vm_abi::GET_CHURN_TRACKER) {
            let pct = if st.initialized.contains(&to) { 20 } else { 0 };
            return Ok(vm_abi::encode_churn_tracker(&ChurnTracker {
                churn_period_seconds: 0,
                maximum_churn_percentage: pct,
                start_time: U256::zero(),
                initial_weight: 0,
                total_weight: 0,
                churn_amount: 0,
            }));
        }
        if is_selector(&data, vm_abi::REGISTERED_VALIDATORS) {
            let node_id = match abi::decode(&[ParamType::Bytes], &data[4..]).unwrap().as_slice() {
                [Token::Bytes(b)] => b.clone(),
                _ => Vec::new(),
            };
            let vid = st.registered.get(&node_id).copied().unwrap_or_default();
            return Ok(abi::encode(&[Token::FixedBytes(vid.as_bytes().to_vec())]));
        }
        if is_selector(&data, vm_abi::WEIGHT_TO_VALUE) {
            let weight = match abi::decode(&[ParamType::Uint(64)], &data[4..]).unwrap().as_slice() {
                [Token::Uint(u)] => *u,
                _ => U256::zero(),
            };
            return Ok(abi::encode(&[Token::Uint(weight)]));
        }
        Err(Error::Rpc(format!("unexpected call 0x{}", hex::encode(selector(&data)))))
    }

    async fn send(
        &self,
        to: H160,
        data: Vec<u8>,
        access_list: Option<AccessList>,
    ) -> std::result::Result<TxReceipt, SendError> {
        let mut st = self.state.lock().unwrap();

        let is_initialize = [
            vm_abi::INITIALIZE_POA_V1,
            vm_abi::INITIALIZE_POS_V1,
            vm_abi::INITIALIZE_ACP99,
            vm_abi::INITIALIZE_POS_ACP99,
        ]
        .iter()
        .any(|sig| is_selector(&data, sig));

        if is_initialize {
            if st.initialized.contains(&to) {
                return Err(revert("InvalidInitialization()"));
            }
            st.initialized.insert(to);
            st.owners.insert(to, self.sender);
        } else if is_selector(&data, vm_abi::TRANSFER_OWNERSHIP) {
            if st.owners.get(&to) != Some(&self.sender) {
                return Err(revert("OwnableUnauthorizedAccount(address)"));
            }
            let new_owner = vm_abi::decode_address(&data[4..], vm_abi::TRANSFER_OWNERSHIP).unwrap();
            st.owners.insert(to, new_owner);
        } else if is_selector(&data, vm_abi::INITIALIZE_VALIDATOR_SET) {
            let delivered = access_list
                .map(|al| al.0.iter().any(|item| item.address == WARP_PRECOMPILE_ADDRESS))
                .unwrap_or(false);
            if !delivered {
                return Err(revert("InvalidWarpMessage()"));
            }
            if st.validator_set_initialized {
                return Err(revert("InvalidInitializationStatus()"));
            }
            if let Some(signature) = st.reject_validator_set {
                return Err(revert(signature));
            }
            for node_id in node_ids(&data) {
                let vid = H256::from_slice(&crate::warp::sha256(&node_id));
                st.registered.insert(node_id, vid);
            }
            st.validator_set_initialized = true;
        } else {
            return Err(SendError {
                tx_hash: None,
                revert_data: Some(vec![0xde, 0xad, 0xbe, 0xef]),
                message: String::from("execution reverted"),
            });
        }

        st.sends.push((to, selector(&data)));
        Ok(TxReceipt {
            tx_hash: H256::from_low_u64_be(st.sends.len() as u64),
            success: true,
        })
    }
}
