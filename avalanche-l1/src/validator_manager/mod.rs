//! Validator Manager contract configuration and driver.
pub mod abi;
pub mod driver;
pub mod errors;
pub mod evm;

use std::str::FromStr;

use avalanche_types::ids;
use primitive_types::{H160, U256};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

pub use driver::{ContractBackend, Driver, InitializeOutcome, SendError, TxReceipt};

pub const DEFAULT_CHURN_PERIOD_SECONDS: u64 = 0;
pub const DEFAULT_MAXIMUM_CHURN_PERCENTAGE: u8 = 20;

pub const DEFAULT_POS_MINIMUM_STAKE_AMOUNT: u64 = 1;
pub const DEFAULT_POS_MAXIMUM_STAKE_AMOUNT: u64 = 1000;
pub const DEFAULT_POS_MINIMUM_STAKE_DURATION: u64 = 100;
pub const DEFAULT_POS_MINIMUM_DELEGATION_FEE: u16 = 1;
pub const DEFAULT_POS_MAXIMUM_STAKE_MULTIPLIER: u8 = 1;
pub const DEFAULT_POS_WEIGHT_TO_VALUE_FACTOR: u64 = 1;
pub const DEFAULT_REWARD_CALCULATOR_ADDRESS: &str = "0xDEADC0DE00000000000000000000000000000000";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidatorManagement {
    #[serde(rename = "Proof Of Authority")]
    ProofOfAuthority,
    #[serde(rename = "Proof Of Stake")]
    ProofOfStake,
}

/// Contract layout: V1 is a single contract with a settings struct,
/// ACP99 is a generic manager plus a specialized (PoS) contract that owns it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    V1,
    Acp99,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ChurnSettings {
    pub churn_period_seconds: u64,
    pub maximum_churn_percentage: u8,
}

impl Default for ChurnSettings {
    fn default() -> Self {
        Self {
            churn_period_seconds: DEFAULT_CHURN_PERIOD_SECONDS,
            maximum_churn_percentage: DEFAULT_MAXIMUM_CHURN_PERCENTAGE,
        }
    }
}

impl ChurnSettings {
    pub fn validate(&self) -> Result<()> {
        if self.maximum_churn_percentage == 0 || self.maximum_churn_percentage > 100 {
            return Err(Error::precondition(format!(
                "maximum churn percentage {} must be in (0, 100]",
                self.maximum_churn_percentage
            )));
        }
        Ok(())
    }
}

/// Proof-of-Stake settings passed to `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PoSParams {
    pub minimum_stake_amount: U256,
    pub maximum_stake_amount: U256,
    pub minimum_stake_duration: u64,
    pub minimum_delegation_fee: u16,
    pub maximum_stake_multiplier: u8,
    pub weight_to_value_factor: U256,
    pub reward_calculator_address: String,
    pub uptime_blockchain_id: ids::Id,
}

impl Default for PoSParams {
    fn default() -> Self {
        Self {
            minimum_stake_amount: U256::from(DEFAULT_POS_MINIMUM_STAKE_AMOUNT),
            maximum_stake_amount: U256::from(DEFAULT_POS_MAXIMUM_STAKE_AMOUNT),
            minimum_stake_duration: DEFAULT_POS_MINIMUM_STAKE_DURATION,
            minimum_delegation_fee: DEFAULT_POS_MINIMUM_DELEGATION_FEE,
            maximum_stake_multiplier: DEFAULT_POS_MAXIMUM_STAKE_MULTIPLIER,
            weight_to_value_factor: U256::from(DEFAULT_POS_WEIGHT_TO_VALUE_FACTOR),
            reward_calculator_address: String::from(DEFAULT_REWARD_CALCULATOR_ADDRESS),
            uptime_blockchain_id: ids::Id::empty(),
        }
    }
}

impl PoSParams {
    /// Amounts are unsigned so they are never negative.
    pub fn verify(&self) -> Result<()> {
        if self.maximum_stake_amount < self.minimum_stake_amount {
            return Err(Error::precondition(
                "maximum stake amount cannot be less than minimum stake amount",
            ));
        }
        if self.weight_to_value_factor.is_zero() {
            return Err(Error::precondition("weight to value factor cannot be zero"));
        }
        if self.reward_calculator_address.is_empty() {
            return Err(Error::precondition("reward calculator address cannot be empty"));
        }
        parse_address(&self.reward_calculator_address, "reward calculator")?;
        Ok(())
    }

    pub fn reward_calculator(&self) -> Result<H160> {
        parse_address(&self.reward_calculator_address, "reward calculator")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Management {
    ProofOfAuthority,
    ProofOfStake(PoSParams),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ManagerConfig {
    pub management: Management,
    pub generation: Generation,
    #[serde(default)]
    pub churn: ChurnSettings,
}

impl ManagerConfig {
    pub fn proof_of_authority(generation: Generation) -> Self {
        Self {
            management: Management::ProofOfAuthority,
            generation,
            churn: ChurnSettings::default(),
        }
    }

    pub fn proof_of_stake(generation: Generation, params: PoSParams) -> Self {
        Self {
            management: Management::ProofOfStake(params),
            generation,
            churn: ChurnSettings::default(),
        }
    }

    pub fn kind(&self) -> ValidatorManagement {
        match self.management {
            Management::ProofOfAuthority => ValidatorManagement::ProofOfAuthority,
            Management::ProofOfStake(_) => ValidatorManagement::ProofOfStake,
        }
    }

    pub fn pos_params(&self) -> Option<&PoSParams> {
        match &self.management {
            Management::ProofOfStake(p) => Some(p),
            Management::ProofOfAuthority => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.churn.validate()?;
        if let Some(p) = self.pos_params() {
            p.verify()?;
        }
        Ok(())
    }
}

/// Parses a "0x"-prefixed 20-byte hex address.
pub fn parse_address(s: &str, what: &str) -> Result<H160> {
    let trimmed = s.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| Error::precondition(format!("invalid {what} address '{s}' (missing 0x)")))?;
    if hex_part.len() != 40 {
        return Err(Error::precondition(format!(
            "invalid {what} address '{s}' (expected 20 bytes)"
        )));
    }
    H160::from_str(hex_part)
        .map_err(|e| Error::precondition(format!("invalid {what} address '{s}' ({e})")))
}
