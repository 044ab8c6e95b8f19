//! Canonical registry of Validator Manager custom errors.
//!
//! Every contract interaction decodes revert data through [`decode_revert`],
//! so callers branch on a [`ContractError`] instead of matching strings.
use std::{collections::HashMap, sync::OnceLock};

use ethers_core::{
    abi::{self, ParamType, Token},
    utils,
};
use thiserror::Error;

use crate::errors::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ContractError {
    #[error("the contract is already initialized")]
    AlreadyInitialized,
    #[error("invalid churn percentage")]
    InvalidMaximumChurnPercentage,
    #[error("invalid validation id")]
    InvalidValidationId,
    #[error("invalid validator status")]
    InvalidValidatorStatus,
    #[error("max churn rate exceeded")]
    MaxChurnRateExceeded,
    #[error("validators set already initialized")]
    InvalidInitializationStatus,
    #[error("invalid validator manager blockchain ID")]
    InvalidValidatorManagerBlockchainId,
    #[error("invalid validator manager address")]
    InvalidValidatorManagerAddress,
    #[error("node already registered")]
    NodeAlreadyRegistered,
    #[error("invalid subnet conversion id")]
    InvalidSubnetConversionId,
    #[error("invalid registration expiry")]
    InvalidRegistrationExpiry,
    #[error("invalid BLS key length")]
    InvalidBlsKeyLength,
    #[error("invalid node id")]
    InvalidNodeId,
    #[error("invalid warp message")]
    InvalidWarpMessage,
    #[error("invalid warp source chain ID")]
    InvalidWarpSourceChainId,
    #[error("invalid warp origin sender address")]
    InvalidWarpOriginSenderAddress,
    #[error("delegator ineligible for rewards")]
    DelegatorIneligibleForRewards,
    #[error("invalid BLS public key")]
    InvalidBlsPublicKey,
    #[error("invalid codec ID")]
    InvalidCodecId,
    #[error("invalid conversion ID")]
    InvalidConversionId,
    #[error("invalid delegation fee")]
    InvalidDelegationFee,
    #[error("invalid delegation ID")]
    InvalidDelegationId,
    #[error("invalid delegator status")]
    InvalidDelegatorStatus,
    #[error("invalid message length")]
    InvalidMessageLength,
    #[error("invalid message type")]
    InvalidMessageType,
    #[error("invalid min stake duration")]
    InvalidMinStakeDuration,
    #[error("invalid nonce")]
    InvalidNonce,
    #[error("invalid pchain owner threshold")]
    InvalidPChainOwnerThreshold,
    #[error("invalid stake amount")]
    InvalidStakeAmount,
    #[error("invalid stake multiplier")]
    InvalidStakeMultiplier,
    #[error("invalid token address")]
    InvalidTokenAddress,
    #[error("invalid total weight")]
    InvalidTotalWeight,
    #[error("max weight exceeded")]
    MaxWeightExceeded,
    #[error("min stake duration not passed")]
    MinStakeDurationNotPassed,
    #[error("pchain owner addresses not sorted")]
    PChainOwnerAddressesNotSorted,
    #[error("unauthorized owner")]
    UnauthorizedOwner,
    #[error("unexpected registration status")]
    UnexpectedRegistrationStatus,
    #[error("validator ineligible for rewards")]
    ValidatorIneligibleForRewards,
    #[error("validator not PoS")]
    ValidatorNotPos,
    #[error("zero weight to value factor")]
    ZeroWeightToValueFactor,
    #[error("invalid proxy or validator owner")]
    InvalidOwner,
}

/// Solidity error signature to sentinel. `UnauthorizedOwner` and the
/// OpenZeppelin `OwnableUnauthorizedAccount` share a sentinel.
pub const ERROR_SIGNATURES: &[(&str, ContractError)] = &[
    ("InvalidInitialization()", ContractError::AlreadyInitialized),
    ("InvalidMaximumChurnPercentage(uint8)", ContractError::InvalidMaximumChurnPercentage),
    ("InvalidValidationID(bytes32)", ContractError::InvalidValidationId),
    ("InvalidValidatorStatus(uint8)", ContractError::InvalidValidatorStatus),
    ("MaxChurnRateExceeded(uint64)", ContractError::MaxChurnRateExceeded),
    ("InvalidInitializationStatus()", ContractError::InvalidInitializationStatus),
    ("InvalidValidatorManagerBlockchainID(bytes32)", ContractError::InvalidValidatorManagerBlockchainId),
    ("InvalidValidatorManagerAddress(address)", ContractError::InvalidValidatorManagerAddress),
    ("NodeAlreadyRegistered(bytes)", ContractError::NodeAlreadyRegistered),
    ("InvalidSubnetConversionID(bytes32,bytes32)", ContractError::InvalidSubnetConversionId),
    ("InvalidRegistrationExpiry(uint64)", ContractError::InvalidRegistrationExpiry),
    ("InvalidBLSKeyLength(uint256)", ContractError::InvalidBlsKeyLength),
    ("InvalidNodeID(bytes)", ContractError::InvalidNodeId),
    ("InvalidWarpMessage()", ContractError::InvalidWarpMessage),
    ("InvalidWarpSourceChainID(bytes32)", ContractError::InvalidWarpSourceChainId),
    ("InvalidWarpOriginSenderAddress(address)", ContractError::InvalidWarpOriginSenderAddress),
    ("DelegatorIneligibleForRewards(bytes32)", ContractError::DelegatorIneligibleForRewards),
    ("InvalidBLSPublicKey()", ContractError::InvalidBlsPublicKey),
    ("InvalidCodecID(uint32)", ContractError::InvalidCodecId),
    ("InvalidConversionID(bytes32,bytes32)", ContractError::InvalidConversionId),
    ("InvalidDelegationFee(uint16)", ContractError::InvalidDelegationFee),
    ("InvalidDelegationID(bytes32)", ContractError::InvalidDelegationId),
    // enums are encoded as uint8 in selectors
    ("InvalidDelegatorStatus(uint8)", ContractError::InvalidDelegatorStatus),
    ("InvalidMessageLength(uint32,uint32)", ContractError::InvalidMessageLength),
    ("InvalidMessageType()", ContractError::InvalidMessageType),
    ("InvalidMinStakeDuration(uint64)", ContractError::InvalidMinStakeDuration),
    ("InvalidNonce(uint64)", ContractError::InvalidNonce),
    ("InvalidPChainOwnerThreshold(uint256,uint256)", ContractError::InvalidPChainOwnerThreshold),
    ("InvalidStakeAmount(uint256)", ContractError::InvalidStakeAmount),
    ("InvalidStakeMultiplier(uint8)", ContractError::InvalidStakeMultiplier),
    ("InvalidTokenAddress(address)", ContractError::InvalidTokenAddress),
    ("InvalidTotalWeight(uint256)", ContractError::InvalidTotalWeight),
    ("MaxWeightExceeded(uint64)", ContractError::MaxWeightExceeded),
    ("MinStakeDurationNotPassed(uint64)", ContractError::MinStakeDurationNotPassed),
    ("PChainOwnerAddressesNotSorted()", ContractError::PChainOwnerAddressesNotSorted),
    ("UnauthorizedOwner(address)", ContractError::UnauthorizedOwner),
    ("UnexpectedRegistrationStatus(bool)", ContractError::UnexpectedRegistrationStatus),
    ("ValidatorIneligibleForRewards(bytes32)", ContractError::ValidatorIneligibleForRewards),
    ("ValidatorNotPoS(bytes32)", ContractError::ValidatorNotPos),
    ("ZeroWeightToValueFactor()", ContractError::ZeroWeightToValueFactor),
    ("OwnableInvalidOwner(address)", ContractError::InvalidOwner),
    ("OwnableUnauthorizedAccount(address)", ContractError::UnauthorizedOwner),
];

/// Standard solidity `revert("reason")`.
const ERROR_STRING_SIGNATURE: &str = "Error(string)";

fn registry() -> &'static HashMap<[u8; 4], ContractError> {
    static REGISTRY: OnceLock<HashMap<[u8; 4], ContractError>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        ERROR_SIGNATURES
            .iter()
            .map(|(sig, e)| (utils::id(sig), *e))
            .collect()
    })
}

pub fn lookup(selector: [u8; 4]) -> Option<ContractError> {
    registry().get(&selector).copied()
}

/// Maps raw revert data to a typed error.
pub fn decode_revert(data: &[u8]) -> Error {
    if data.len() < 4 {
        return Error::UnknownSelector {
            selector: format!("0x{}", hex::encode(data)),
            data: data.to_vec(),
        };
    }
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&data[..4]);

    if let Some(e) = lookup(selector) {
        return Error::Revert(e);
    }
    if selector == utils::id(ERROR_STRING_SIGNATURE) {
        if let Ok(tokens) = abi::decode(&[ParamType::String], &data[4..]) {
            if let Some(Token::String(reason)) = tokens.into_iter().next() {
                return Error::Reverted(reason);
            }
        }
    }
    Error::UnknownSelector {
        selector: format!("0x{}", hex::encode(selector)),
        data: data.to_vec(),
    }
}
