use async_trait::async_trait;
use avalanche_types::ids;
use ethers_core::types::transaction::eip2930::AccessList;
use primitive_types::{H160, H256, U256};

use crate::{
    errors::{Error, Result},
    validator_manager::{
        abi::{self, ChurnTracker, ValidatorRecord},
        errors::{decode_revert, ContractError},
        Generation, Management, ManagerConfig,
    },
    warp::{predicate, signed::SignedMessage, ConversionData},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub success: bool,
}

/// Failure to get a transaction mined. `tx_hash` is set when the
/// transaction reached the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendError {
    pub tx_hash: Option<H256>,
    pub revert_data: Option<Vec<u8>>,
    pub message: String,
}

/// EVM access used by the driver; one sender key, one chain.
#[async_trait]
pub trait ContractBackend: Send + Sync {
    fn sender(&self) -> H160;

    async fn balance(&self) -> Result<U256>;

    /// `eth_call`; reverts are decoded through the error registry.
    async fn call(&self, to: H160, data: Vec<u8>) -> Result<Vec<u8>>;

    async fn send(
        &self,
        to: H160,
        data: Vec<u8>,
        access_list: Option<AccessList>,
    ) -> std::result::Result<TxReceipt, SendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitializeOutcome {
    Initialized(Vec<H256>),
    AlreadyInitialized,
}

/// Issues lifecycle transactions against one Validator Manager deployment.
pub struct Driver<'a> {
    backend: &'a dyn ContractBackend,
    manager: H160,
    specialized: Option<H160>,
}

impl<'a> Driver<'a> {
    pub fn new(backend: &'a dyn ContractBackend, manager: H160, specialized: Option<H160>) -> Self {
        Self {
            backend,
            manager,
            specialized,
        }
    }

    pub fn manager(&self) -> H160 {
        self.manager
    }

    /// Sends a contract write and wraps failures with the tx hash marker.
    async fn tx(
        &self,
        desc: &str,
        to: H160,
        data: Vec<u8>,
        access_list: Option<AccessList>,
    ) -> Result<H256> {
        log::info!("sending '{desc}' to 0x{:x} from 0x{:x}", to, self.backend.sender());
        match self.backend.send(to, data, access_list).await {
            Ok(r) if r.success => {
                log::info!("'{desc}' succeeded with tx 0x{:x}", r.tx_hash);
                Ok(r.tx_hash)
            }
            Ok(r) => Err(Error::transaction(desc, Some(r.tx_hash), Error::FailedReceiptStatus)),
            Err(e) => {
                let cause = match e.revert_data {
                    Some(d) => decode_revert(&d),
                    None => Error::Rpc(e.message),
                };
                Err(Error::transaction(desc, e.tx_hash, cause))
            }
        }
    }

    /// Runs `tx`, mapping `sentinel` reverts to `Ok(None)`.
    async fn tx_tolerating(
        &self,
        desc: &str,
        to: H160,
        data: Vec<u8>,
        access_list: Option<AccessList>,
        sentinel: ContractError,
    ) -> Result<Option<H256>> {
        match self.tx(desc, to, data, access_list).await {
            Ok(h) => Ok(Some(h)),
            Err(e) if e.contract_error() == Some(&sentinel) => {
                log::info!("'{desc}' skipped: {sentinel}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Initializes the manager (and its specialization for ACP99 PoS).
    /// An already-initialized contract is not an error.
    pub async fn initialize(
        &self,
        config: &ManagerConfig,
        subnet_id: &ids::Id,
        owner: H160,
    ) -> Result<InitializeOutcome> {
        config.validate()?;

        let mut hashes = Vec::new();
        match (&config.management, config.generation) {
            (Management::ProofOfAuthority, Generation::V1) => {
                let data = abi::initialize_poa_v1(subnet_id, &config.churn, owner);
                hashes.extend(
                    self.tx_tolerating(
                        "initialize validator manager",
                        self.manager,
                        data,
                        None,
                        ContractError::AlreadyInitialized,
                    )
                    .await?,
                );
            }
            (Management::ProofOfStake(params), Generation::V1) => {
                let data = abi::initialize_pos_v1(subnet_id, &config.churn, params)?;
                hashes.extend(
                    self.tx_tolerating(
                        "initialize validator manager",
                        self.manager,
                        data,
                        None,
                        ContractError::AlreadyInitialized,
                    )
                    .await?,
                );
            }
            (Management::ProofOfAuthority, Generation::Acp99) => {
                let data = abi::initialize_acp99(owner, subnet_id, &config.churn);
                hashes.extend(
                    self.tx_tolerating(
                        "initialize validator manager",
                        self.manager,
                        data,
                        None,
                        ContractError::AlreadyInitialized,
                    )
                    .await?,
                );
            }
            (Management::ProofOfStake(params), Generation::Acp99) => {
                let specialized = self.specialized.ok_or_else(|| {
                    Error::precondition("missing specialized validator manager address")
                })?;

                let data = abi::initialize_acp99(owner, subnet_id, &config.churn);
                hashes.extend(
                    self.tx_tolerating(
                        "initialize validator manager",
                        self.manager,
                        data,
                        None,
                        ContractError::AlreadyInitialized,
                    )
                    .await?,
                );

                let data = abi::initialize_pos_acp99(self.manager, params)?;
                hashes.extend(
                    self.tx_tolerating(
                        "initialize PoS validator manager",
                        specialized,
                        data,
                        None,
                        ContractError::AlreadyInitialized,
                    )
                    .await?,
                );

                // the specialized manager administers the base manager
                let current_owner = self.owner().await?;
                if current_owner != specialized {
                    let data = abi::transfer_ownership(specialized);
                    hashes.push(
                        self.tx("transfer validator manager ownership", self.manager, data, None)
                            .await?,
                    );
                } else {
                    log::info!("validator manager already owned by 0x{:x}", specialized);
                }
            }
        }

        if hashes.is_empty() {
            Ok(InitializeOutcome::AlreadyInitialized)
        } else {
            Ok(InitializeOutcome::Initialized(hashes))
        }
    }

    /// Replays the P-Chain signed conversion message into the manager.
    /// Returns `None` if the validator set was already initialized.
    pub async fn initialize_validator_set(
        &self,
        data: &ConversionData,
        signed: &SignedMessage,
    ) -> Result<Option<H256>> {
        let calldata = abi::initialize_validator_set(data, 0);
        let access_list = predicate::access_list(&signed.to_bytes());
        self.tx_tolerating(
            "initialize validator set",
            self.manager,
            calldata,
            Some(access_list),
            ContractError::InvalidInitializationStatus,
        )
        .await
    }

    pub async fn owner(&self) -> Result<H160> {
        let out = self.backend.call(self.manager, abi::owner()).await?;
        abi::decode_address(&out, abi::OWNER)
    }

    pub async fn churn_tracker(&self) -> Result<ChurnTracker> {
        let out = self.backend.call(self.manager, abi::get_churn_tracker()).await?;
        abi::decode_churn_tracker(&out)
    }

    /// Validation ID for a node, zero if the node is not registered.
    pub async fn registered_validator(&self, node_id: &[u8]) -> Result<H256> {
        let out = self
            .backend
            .call(self.manager, abi::registered_validators(node_id))
            .await?;
        abi::decode_bytes32(&out, abi::REGISTERED_VALIDATORS)
    }

    pub async fn validator(&self, validation_id: H256, generation: Generation) -> Result<ValidatorRecord> {
        let out = self
            .backend
            .call(self.manager, abi::get_validator(validation_id))
            .await?;
        abi::decode_validator(&out, generation == Generation::Acp99)
    }

    /// Staking value of `weight`; served by the specialized contract on ACP99.
    pub async fn weight_to_value(&self, weight: u64) -> Result<U256> {
        let target = self.specialized.unwrap_or(self.manager);
        let out = self.backend.call(target, abi::weight_to_value(weight)).await?;
        abi::decode_uint256(&out, abi::WEIGHT_TO_VALUE)
    }
}

#[cfg(test)]
mod tests {
    use ethers_core::utils;

    use super::*;
    use crate::{
        testutil::{self, MockContract},
        validator_manager::PoSParams,
        warp::{self, signed::signer_bits, BLS_SIGNATURE_LEN},
    };

    fn conversion() -> (ConversionData, SignedMessage) {
        let validators = testutil::bootstrap_validators(2)
            .iter()
            .map(|v| v.to_validator_data().unwrap())
            .collect();
        let data = ConversionData::new(
            ids::Id::from_slice(&[1; 32]),
            ids::Id::from_slice(&[2; 32]),
            testutil::manager_address().as_bytes(),
            validators,
        )
        .unwrap();
        let signed = SignedMessage {
            unsigned: warp::build_conversion_message(1337, &data),
            signers: signer_bits(&[0, 1]),
            signature: vec![1; BLS_SIGNATURE_LEN],
        };
        (data, signed)
    }

    #[tokio::test]
    async fn test_initialize_poa_is_idempotent() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();

        let backend = MockContract::new();
        let driver = Driver::new(&backend, testutil::manager_address(), None);
        let subnet_id = ids::Id::from_slice(&[1; 32]);
        let cfg = ManagerConfig::proof_of_authority(Generation::V1);

        assert!(!driver.churn_tracker().await.unwrap().is_initialized());
        let first = driver
            .initialize(&cfg, &subnet_id, testutil::owner_address())
            .await
            .unwrap();
        assert!(matches!(first, InitializeOutcome::Initialized(ref h) if h.len() == 1));
        assert!(driver.churn_tracker().await.unwrap().is_initialized());

        let second = driver
            .initialize(&cfg, &subnet_id, testutil::owner_address())
            .await
            .unwrap();
        assert_eq!(second, InitializeOutcome::AlreadyInitialized);
        assert_eq!(backend.sent_count(abi::INITIALIZE_POA_V1), 1);
    }

    #[tokio::test]
    async fn test_initialize_pos_acp99() {
        let backend = MockContract::new();
        let manager = testutil::manager_address();
        let specialized = testutil::specialized_address();
        let subnet_id = ids::Id::from_slice(&[1; 32]);
        let cfg = ManagerConfig::proof_of_stake(Generation::Acp99, PoSParams::default());

        let err = Driver::new(&backend, manager, None)
            .initialize(&cfg, &subnet_id, testutil::owner_address())
            .await
            .unwrap_err();
        assert!(err.is_precondition());
        assert!(backend.state.lock().unwrap().sends.is_empty());

        let driver = Driver::new(&backend, manager, Some(specialized));
        let out = driver
            .initialize(&cfg, &subnet_id, testutil::owner_address())
            .await
            .unwrap();
        assert!(matches!(out, InitializeOutcome::Initialized(ref h) if h.len() == 3));
        assert_eq!(
            backend.sent(manager),
            vec![
                utils::id(abi::INITIALIZE_ACP99),
                utils::id(abi::TRANSFER_OWNERSHIP)
            ]
        );
        assert_eq!(backend.sent(specialized), vec![utils::id(abi::INITIALIZE_POS_ACP99)]);
        assert_eq!(driver.owner().await.unwrap(), specialized);

        // ownership already transferred, nothing left to send
        let again = driver
            .initialize(&cfg, &subnet_id, testutil::owner_address())
            .await
            .unwrap();
        assert_eq!(again, InitializeOutcome::AlreadyInitialized);
        assert_eq!(backend.state.lock().unwrap().sends.len(), 3);

        assert_eq!(driver.weight_to_value(20).await.unwrap(), U256::from(20));
    }

    #[tokio::test]
    async fn test_invalid_pos_params_fail_before_send() {
        let backend = MockContract::new();
        let driver = Driver::new(&backend, testutil::manager_address(), None);
        let mut params = PoSParams::default();
        params.weight_to_value_factor = U256::zero();
        let err = driver
            .initialize(
                &ManagerConfig::proof_of_stake(Generation::V1, params),
                &ids::Id::from_slice(&[1; 32]),
                testutil::owner_address(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "weight to value factor cannot be zero");
        assert!(backend.state.lock().unwrap().sends.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_validator_set() {
        let backend = MockContract::new();
        let driver = Driver::new(&backend, testutil::manager_address(), None);
        let (data, signed) = conversion();

        let node_id = data.validators[0].node_id.as_ref().to_vec();
        assert!(driver.registered_validator(&node_id).await.unwrap().is_zero());

        let h = driver.initialize_validator_set(&data, &signed).await.unwrap();
        assert!(h.is_some());
        assert!(!driver.registered_validator(&node_id).await.unwrap().is_zero());

        // replay is reported as already done
        assert_eq!(driver.initialize_validator_set(&data, &signed).await.unwrap(), None);
        assert_eq!(backend.sent_count(abi::INITIALIZE_VALIDATOR_SET), 1);
    }

    #[tokio::test]
    async fn test_tx_error_wrapping() {
        let backend = MockContract::new();
        let driver = Driver::new(&backend, testutil::manager_address(), None);
        let err = driver
            .tx("register validator", testutil::manager_address(), vec![1, 2, 3, 4], None)
            .await
            .unwrap_err();
        assert_eq!(err.tx_hash(), None);
        assert!(err.to_string().starts_with("register validator: unknown error selector 0xdeadbeef"));
        assert!(err.to_string().ends_with("(tx failed to be submitted)"));
        assert!(err.contract_error().is_none());
    }
}
