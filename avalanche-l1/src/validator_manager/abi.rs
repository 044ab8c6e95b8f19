//! Calldata encoding and return decoding for the Validator Manager ABI.
use avalanche_types::ids;
use ethers_core::{
    abi::{self, ParamType, Token},
    utils,
};
use primitive_types::{H160, H256, U256};

use crate::{
    errors::{Error, Result},
    validator_manager::{ChurnSettings, PoSParams},
    warp::ConversionData,
};

pub const INITIALIZE_POA_V1: &str = "initialize((bytes32,uint64,uint8),address)";
pub const INITIALIZE_POS_V1: &str =
    "initialize(((bytes32,uint64,uint8),uint256,uint256,uint64,uint16,uint8,uint256,address,bytes32))";
pub const INITIALIZE_ACP99: &str = "initialize((address,bytes32,uint64,uint8))";
pub const INITIALIZE_POS_ACP99: &str =
    "initialize((address,uint256,uint256,uint64,uint16,uint8,uint256,address,bytes32))";
pub const INITIALIZE_VALIDATOR_SET: &str =
    "initializeValidatorSet((bytes32,bytes32,address,(bytes,bytes,uint64)[]),uint32)";
pub const TRANSFER_OWNERSHIP: &str = "transferOwnership(address)";
pub const OWNER: &str = "owner()";
pub const REGISTERED_VALIDATORS: &str = "registeredValidators(bytes)";
pub const GET_CHURN_TRACKER: &str = "getChurnTracker()";
pub const WEIGHT_TO_VALUE: &str = "weightToValue(uint64)";
pub const GET_VALIDATOR: &str = "getValidator(bytes32)";

pub fn calldata(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut d = utils::id(signature).to_vec();
    d.extend(abi::encode(tokens));
    d
}

fn id_token(id: &ids::Id) -> Token {
    Token::FixedBytes(id.as_ref().to_vec())
}

fn churn_tokens(subnet_id: &ids::Id, churn: &ChurnSettings) -> Vec<Token> {
    vec![
        id_token(subnet_id),
        Token::Uint(U256::from(churn.churn_period_seconds)),
        Token::Uint(U256::from(churn.maximum_churn_percentage)),
    ]
}

fn pos_tokens(params: &PoSParams) -> Result<Vec<Token>> {
    Ok(vec![
        Token::Uint(params.minimum_stake_amount),
        Token::Uint(params.maximum_stake_amount),
        Token::Uint(U256::from(params.minimum_stake_duration)),
        Token::Uint(U256::from(params.minimum_delegation_fee)),
        Token::Uint(U256::from(params.maximum_stake_multiplier)),
        Token::Uint(params.weight_to_value_factor),
        Token::Address(params.reward_calculator()?),
        id_token(&params.uptime_blockchain_id),
    ])
}

pub fn initialize_poa_v1(subnet_id: &ids::Id, churn: &ChurnSettings, owner: H160) -> Vec<u8> {
    calldata(
        INITIALIZE_POA_V1,
        &[Token::Tuple(churn_tokens(subnet_id, churn)), Token::Address(owner)],
    )
}

pub fn initialize_pos_v1(
    subnet_id: &ids::Id,
    churn: &ChurnSettings,
    params: &PoSParams,
) -> Result<Vec<u8>> {
    let mut settings = vec![Token::Tuple(churn_tokens(subnet_id, churn))];
    settings.extend(pos_tokens(params)?);
    Ok(calldata(INITIALIZE_POS_V1, &[Token::Tuple(settings)]))
}

pub fn initialize_acp99(admin: H160, subnet_id: &ids::Id, churn: &ChurnSettings) -> Vec<u8> {
    let mut settings = vec![Token::Address(admin)];
    settings.extend(churn_tokens(subnet_id, churn));
    calldata(INITIALIZE_ACP99, &[Token::Tuple(settings)])
}

pub fn initialize_pos_acp99(manager: H160, params: &PoSParams) -> Result<Vec<u8>> {
    let mut settings = vec![Token::Address(manager)];
    settings.extend(pos_tokens(params)?);
    Ok(calldata(INITIALIZE_POS_ACP99, &[Token::Tuple(settings)]))
}

/// `message_index` is the position of the warp predicate in the access list.
pub fn initialize_validator_set(data: &ConversionData, message_index: u32) -> Vec<u8> {
    let validators = data
        .validators
        .iter()
        .map(|v| {
            Token::Tuple(vec![
                Token::Bytes(v.node_id.as_ref().to_vec()),
                Token::Bytes(v.bls_public_key.clone()),
                Token::Uint(U256::from(v.weight)),
            ])
        })
        .collect();
    let conversion = Token::Tuple(vec![
        id_token(&data.subnet_id),
        id_token(&data.manager_chain_id),
        Token::Address(H160::from_slice(&data.manager_address)),
        Token::Array(validators),
    ]);
    calldata(
        INITIALIZE_VALIDATOR_SET,
        &[conversion, Token::Uint(U256::from(message_index))],
    )
}

pub fn transfer_ownership(new_owner: H160) -> Vec<u8> {
    calldata(TRANSFER_OWNERSHIP, &[Token::Address(new_owner)])
}

pub fn owner() -> Vec<u8> {
    calldata(OWNER, &[])
}

pub fn registered_validators(node_id: &[u8]) -> Vec<u8> {
    calldata(REGISTERED_VALIDATORS, &[Token::Bytes(node_id.to_vec())])
}

pub fn get_churn_tracker() -> Vec<u8> {
    calldata(GET_CHURN_TRACKER, &[])
}

pub fn weight_to_value(weight: u64) -> Vec<u8> {
    calldata(WEIGHT_TO_VALUE, &[Token::Uint(U256::from(weight))])
}

pub fn get_validator(validation_id: H256) -> Vec<u8> {
    calldata(GET_VALIDATOR, &[Token::FixedBytes(validation_id.as_bytes().to_vec())])
}

fn decode(types: &[ParamType], d: &[u8], method: &str) -> Result<Vec<Token>> {
    abi::decode(types, d).map_err(|e| Error::Codec(format!("failed to decode {method} output ({e})")))
}

fn unexpected(method: &str, t: &Token) -> Error {
    Error::Codec(format!("unexpected {method} output {t:?}"))
}

fn as_u64(t: &Token, method: &str) -> Result<u64> {
    match t {
        Token::Uint(u) if u.bits() <= 64 => Ok(u.low_u64()),
        other => Err(unexpected(method, other)),
    }
}

pub fn decode_address(d: &[u8], method: &str) -> Result<H160> {
    match decode(&[ParamType::Address], d, method)?.as_slice() {
        [Token::Address(a)] => Ok(*a),
        other => Err(Error::Codec(format!("unexpected {method} output {other:?}"))),
    }
}

pub fn decode_bytes32(d: &[u8], method: &str) -> Result<H256> {
    match decode(&[ParamType::FixedBytes(32)], d, method)?.as_slice() {
        [Token::FixedBytes(b)] if b.len() == 32 => Ok(H256::from_slice(b)),
        other => Err(Error::Codec(format!("unexpected {method} output {other:?}"))),
    }
}

pub fn decode_uint256(d: &[u8], method: &str) -> Result<U256> {
    match decode(&[ParamType::Uint(256)], d, method)?.as_slice() {
        [Token::Uint(u)] => Ok(*u),
        other => Err(Error::Codec(format!("unexpected {method} output {other:?}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChurnTracker {
    pub churn_period_seconds: u64,
    pub maximum_churn_percentage: u8,
    pub start_time: U256,
    pub initial_weight: u64,
    pub total_weight: u64,
    pub churn_amount: u64,
}

impl ChurnTracker {
    /// `initialize` rejects a zero churn percentage, so a configured one
    /// means the manager was initialized.
    pub fn is_initialized(&self) -> bool {
        self.maximum_churn_percentage != 0
    }
}

pub fn decode_churn_tracker(d: &[u8]) -> Result<ChurnTracker> {
    let types = [
        ParamType::Uint(64),
        ParamType::Uint(8),
        ParamType::Tuple(vec![
            ParamType::Uint(256),
            ParamType::Uint(64),
            ParamType::Uint(64),
            ParamType::Uint(64),
        ]),
    ];
    let tokens = decode(&types, d, GET_CHURN_TRACKER)?;
    let period = &tokens[0];
    let pct = as_u64(&tokens[1], GET_CHURN_TRACKER)?;
    match &tokens[2] {
        Token::Tuple(p) if p.len() == 4 => {
            let start_time = match &p[0] {
                Token::Uint(u) => *u,
                other => return Err(unexpected(GET_CHURN_TRACKER, other)),
            };
            Ok(ChurnTracker {
                churn_period_seconds: as_u64(period, GET_CHURN_TRACKER)?,
                maximum_churn_percentage: pct as u8,
                start_time,
                initial_weight: as_u64(&p[1], GET_CHURN_TRACKER)?,
                total_weight: as_u64(&p[2], GET_CHURN_TRACKER)?,
                churn_amount: as_u64(&p[3], GET_CHURN_TRACKER)?,
            })
        }
        other => Err(unexpected(GET_CHURN_TRACKER, other)),
    }
}

pub fn encode_churn_tracker(t: &ChurnTracker) -> Vec<u8> {
    abi::encode(&[
        Token::Uint(U256::from(t.churn_period_seconds)),
        Token::Uint(U256::from(t.maximum_churn_percentage)),
        Token::Tuple(vec![
            Token::Uint(t.start_time),
            Token::Uint(U256::from(t.initial_weight)),
            Token::Uint(U256::from(t.total_weight)),
            Token::Uint(U256::from(t.churn_amount)),
        ]),
    ])
}

/// Status values of the on-chain `ValidatorStatus` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorStatus {
    Unknown,
    PendingAdded,
    Active,
    PendingRemoved,
    Completed,
    Invalidated,
}

impl From<u8> for ValidatorStatus {
    fn from(v: u8) -> Self {
        match v {
            1 => ValidatorStatus::PendingAdded,
            2 => ValidatorStatus::Active,
            3 => ValidatorStatus::PendingRemoved,
            4 => ValidatorStatus::Completed,
            5 => ValidatorStatus::Invalidated,
            _ => ValidatorStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorRecord {
    pub status: ValidatorStatus,
    pub node_id: Vec<u8>,
    pub starting_weight: u64,
    pub weight: u64,
    pub start_time: u64,
    pub end_time: u64,
}

/// Decodes `getValidator`. V1 has a single message nonce, ACP99 splits it into
/// sent and received nonces.
pub fn decode_validator(d: &[u8], acp99: bool) -> Result<ValidatorRecord> {
    let mut fields = vec![ParamType::Uint(8), ParamType::Bytes, ParamType::Uint(64), ParamType::Uint(64)];
    if acp99 {
        fields.push(ParamType::Uint(64));
    }
    fields.extend([ParamType::Uint(64), ParamType::Uint(64), ParamType::Uint(64)]);

    let tokens = decode(&[ParamType::Tuple(fields)], d, GET_VALIDATOR)?;
    let Some(Token::Tuple(t)) = tokens.into_iter().next() else {
        return Err(Error::Codec(format!("unexpected {GET_VALIDATOR} output")));
    };
    let node_id = match &t[1] {
        Token::Bytes(b) => b.clone(),
        other => return Err(unexpected(GET_VALIDATOR, other)),
    };
    let tail = if acp99 { 5 } else { 4 };
    Ok(ValidatorRecord {
        status: ValidatorStatus::from(as_u64(&t[0], GET_VALIDATOR)? as u8),
        node_id,
        starting_weight: as_u64(&t[2], GET_VALIDATOR)?,
        weight: as_u64(&t[tail], GET_VALIDATOR)?,
        start_time: as_u64(&t[tail + 1], GET_VALIDATOR)?,
        end_time: as_u64(&t[tail + 2], GET_VALIDATOR)?,
    })
}
