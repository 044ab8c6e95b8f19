//! Drives a subnet from "not converted" to an L1 with an initialized
//! validator set. Every step checks on-chain state first, so a rerun after
//! any failure resumes where the previous run stopped.
use std::{fmt, path::Path};

use avalanche_types::ids;
use primitive_types::H160;
use tokio::time::Duration;

use crate::{
    aggregator::{SignatureAggregator, DEFAULT_QUORUM_PERCENTAGE},
    bootstrap::{self, BootstrapValidator},
    errors::{Error, Result},
    health::{self, NodeHealth, DEFAULT_HEALTH_POLL_INTERVAL, DEFAULT_HEALTH_TIMEOUT},
    pchain::{ConvertTxRequest, IssueOptions, IssueOutcome, Issuer, PChainClient, PChainWallet},
    sidecar::Sidecar,
    validator_manager::{
        self, driver::InitializeOutcome, ContractBackend, Driver, Generation, Management,
        ManagerConfig,
    },
    warp::{self, ConversionData, UnsignedMessage},
};

/// Everything known about the L1 before the first step runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    /// Sidecar name of the L1.
    pub name: String,
    /// Sidecar network key, e.g. "Local Network".
    pub network: String,
    pub network_id: u32,
    pub subnet_id: ids::Id,
    pub blockchain_id: ids::Id,
    /// Empty when the manager is deployed on the L1 itself.
    pub manager_blockchain_id: ids::Id,
    pub manager_address: String,
    /// PoS contract that specializes the manager (ACP99 only).
    pub specialized_manager_address: Option<String>,
    pub owner_address: String,
    pub manager: ManagerConfig,
    pub bootstrap_validators: Vec<BootstrapValidator>,
    pub quorum_percentage: u64,
    pub rpc_url: String,
}

impl ConversionRequest {
    pub fn validate(&self) -> Result<()> {
        if self.subnet_id.is_empty() {
            return Err(Error::precondition("missing Subnet ID"));
        }
        if self.blockchain_id.is_empty() {
            return Err(Error::precondition("missing Blockchain ID"));
        }
        if self.rpc_url.is_empty() {
            return Err(Error::precondition("missing RPC URL"));
        }
        self.manager_address()?;
        if self.owner_address.is_empty() {
            return Err(Error::precondition("missing Owner Address"));
        }
        self.owner_address()?;
        self.specialized_manager_address()?;
        bootstrap::validate_all(&self.bootstrap_validators)?;
        if self.quorum_percentage == 0 || self.quorum_percentage > 100 {
            return Err(Error::precondition(format!(
                "invalid quorum percentage {}",
                self.quorum_percentage
            )));
        }
        self.manager.validate()
    }

    pub fn manager_address(&self) -> Result<H160> {
        validator_manager::parse_address(&self.manager_address, "validator manager")
    }

    pub fn owner_address(&self) -> Result<H160> {
        validator_manager::parse_address(&self.owner_address, "owner")
    }

    pub fn specialized_manager_address(&self) -> Result<Option<H160>> {
        match &self.specialized_manager_address {
            Some(s) if !s.is_empty() => Ok(Some(validator_manager::parse_address(
                s,
                "specialized validator manager",
            )?)),
            _ => Ok(None),
        }
    }

    pub fn manager_blockchain_id(&self) -> ids::Id {
        if self.manager_blockchain_id.is_empty() {
            self.blockchain_id.clone()
        } else {
            self.manager_blockchain_id.clone()
        }
    }

    pub fn convert_tx_request(&self) -> Result<ConvertTxRequest> {
        Ok(ConvertTxRequest {
            subnet_id: self.subnet_id.clone(),
            manager_chain_id: self.manager_blockchain_id(),
            manager_address: self.manager_address()?,
            validators: self.bootstrap_validators.clone(),
        })
    }
}

/// Builds the conversion data the P-Chain hashes and the unsigned warp
/// message that attests to it.
pub fn conversion_message(
    network_id: u32,
    subnet_id: ids::Id,
    manager_chain_id: ids::Id,
    manager_address: H160,
    validators: &[BootstrapValidator],
) -> Result<(ConversionData, UnsignedMessage)> {
    bootstrap::validate_all(validators)?;
    let validators = validators
        .iter()
        .map(|v| v.to_validator_data())
        .collect::<Result<Vec<_>>>()?;
    let data = ConversionData::new(
        subnet_id,
        manager_chain_id,
        manager_address.as_bytes(),
        validators,
    )?;
    let msg = warp::build_conversion_message(network_id, &data);
    Ok((data, msg))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    NotConverted,
    /// The conversion tx was saved for co-signers and not issued.
    ConvertedPendingSignatures,
    Converted,
    ManagerUninitialized,
    ManagerInitialized,
    ValidatorSetPending,
    ValidatorSetInitialized,
}

impl fmt::Display for ConversionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversionState::NotConverted => "not converted",
            ConversionState::ConvertedPendingSignatures => "converted (pending signatures)",
            ConversionState::Converted => "converted",
            ConversionState::ManagerUninitialized => "validator manager uninitialized",
            ConversionState::ManagerInitialized => "validator manager initialized",
            ConversionState::ValidatorSetPending => "validator set pending",
            ConversionState::ValidatorSetInitialized => "validator set initialized",
        };
        write!(f, "{}", s)
    }
}

/// External systems the flow talks to.
pub struct Collaborators<'a> {
    /// Only needed while the subnet is not converted yet.
    pub wallet: Option<&'a dyn PChainWallet>,
    pub pchain: &'a dyn PChainClient,
    pub contract: &'a dyn ContractBackend,
    pub aggregator: &'a dyn SignatureAggregator,
    pub health: &'a dyn NodeHealth,
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub issue: IssueOptions,
    pub health_timeout: Duration,
    pub health_poll_interval: Duration,
    /// Where a partially signed conversion tx is written.
    pub partial_tx_path: String,
    pub sidecar_path: Option<String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            issue: IssueOptions::default(),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            health_poll_interval: DEFAULT_HEALTH_POLL_INTERVAL,
            partial_tx_path: String::from("convert-tx.json"),
            sidecar_path: None,
        }
    }
}

pub struct Orchestrator<'a> {
    req: ConversionRequest,
    deps: Collaborators<'a>,
    opts: OrchestratorOptions,
    sidecar: Sidecar,
    state: ConversionState,
}

impl<'a> Orchestrator<'a> {
    /// Fails on an invalid request before any network call.
    pub fn new(req: ConversionRequest, deps: Collaborators<'a>, opts: OrchestratorOptions) -> Result<Self> {
        req.validate()?;
        let sidecar = match &opts.sidecar_path {
            Some(p) if Path::new(p).exists() => {
                let sc = Sidecar::load(p)?;
                sc.validate()?;
                sc
            }
            _ => Sidecar::new(&req.name),
        };
        Ok(Self {
            req,
            deps,
            opts,
            sidecar,
            state: ConversionState::NotConverted,
        })
    }

    pub fn state(&self) -> ConversionState {
        self.state
    }

    pub fn request(&self) -> &ConversionRequest {
        &self.req
    }

    pub fn sidecar(&self) -> &Sidecar {
        &self.sidecar
    }

    fn transition(&mut self, next: ConversionState) {
        if self.state != next {
            log::info!("state: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn sync_sidecar(&self) -> Result<()> {
        if let Some(p) = &self.opts.sidecar_path {
            self.sidecar.sync(p)?;
        }
        Ok(())
    }

    fn driver(&self) -> Result<Driver<'a>> {
        Ok(Driver::new(
            self.deps.contract,
            self.req.manager_address()?,
            self.req.specialized_manager_address()?,
        ))
    }

    /// Runs every remaining step. Returns the state reached; a partially
    /// signed conversion stops at `ConvertedPendingSignatures`.
    pub async fn run(&mut self) -> Result<ConversionState> {
        self.convert().await?;
        if self.state == ConversionState::ConvertedPendingSignatures {
            return Ok(self.state);
        }
        self.wait_for_nodes().await?;
        self.initialize_manager().await?;
        self.initialize_validator_set().await?;
        Ok(self.state)
    }

    pub async fn convert(&mut self) -> Result<()> {
        log::info!("STEP: converting subnet {} to an L1", self.req.subnet_id);

        let recorded = self
            .sidecar
            .network(&self.req.network)
            .map(|d| d.sovereign)
            .unwrap_or(false);
        if recorded {
            log::info!("subnet {} already converted (sidecar)", self.req.subnet_id);
            self.transition(ConversionState::Converted);
            return Ok(());
        }
        let subnet = self.deps.pchain.get_subnet(&self.req.subnet_id).await?;
        if subnet.is_converted() {
            log::info!(
                "subnet {} already converted (conversion ID {})",
                self.req.subnet_id,
                subnet.conversion_id
            );
            self.record_conversion()?;
            self.transition(ConversionState::Converted);
            return Ok(());
        }

        let wallet = self.deps.wallet.ok_or_else(|| {
            Error::precondition(format!(
                "subnet {} is not converted and no P-Chain wallet was given",
                self.req.subnet_id
            ))
        })?;
        let tx_req = self.req.convert_tx_request()?;
        let outcome = Issuer::new(wallet, self.deps.pchain)
            .with_options(self.opts.issue)
            .convert(&tx_req, &self.opts.partial_tx_path)
            .await?;
        match outcome {
            IssueOutcome::Partial {
                tx_id,
                file_path,
                remaining_signers,
            } => {
                log::warn!(
                    "conversion tx {} needs {} more signature(s), saved to '{}'",
                    tx_id,
                    remaining_signers.len(),
                    file_path
                );
                self.transition(ConversionState::ConvertedPendingSignatures);
            }
            IssueOutcome::Committed { tx_id } => {
                log::info!("conversion tx {} committed", tx_id);
                self.record_conversion()?;
                self.transition(ConversionState::Converted);
            }
        }
        Ok(())
    }

    fn record_conversion(&mut self) -> Result<()> {
        let req = self.req.clone();
        let d = self.sidecar.network_mut(&req.network);
        d.subnet_id = req.subnet_id.to_string();
        d.blockchain_id = req.blockchain_id.to_string();
        if !req.manager_blockchain_id.is_empty() {
            d.validator_manager_blockchain_id = req.manager_blockchain_id.to_string();
        }
        d.validator_manager_address = req.manager_address.clone();
        if !d.rpc_endpoints.contains(&req.rpc_url) {
            d.rpc_endpoints.push(req.rpc_url.clone());
        }
        d.sovereign = true;
        d.validator_management = Some(req.manager.kind());
        d.use_acp99 = req.manager.generation == Generation::Acp99;
        self.sync_sidecar()
    }

    pub async fn wait_for_nodes(&mut self) -> Result<()> {
        log::info!("STEP: waiting for nodes to bootstrap {}", self.req.blockchain_id);
        health::wait_until_healthy(
            self.deps.health,
            &self.req.blockchain_id,
            self.opts.health_timeout,
            self.opts.health_poll_interval,
        )
        .await?;
        self.transition(ConversionState::ManagerUninitialized);
        Ok(())
    }

    pub async fn initialize_manager(&mut self) -> Result<()> {
        log::info!(
            "STEP: initializing validator manager {} ({:?})",
            self.req.manager_address,
            self.req.manager.kind()
        );

        let recorded = self
            .sidecar
            .network(&self.req.network)
            .map(|d| d.manager_initialized)
            .unwrap_or(false);
        if recorded {
            log::info!("validator manager already initialized (sidecar)");
            self.transition(ConversionState::ManagerInitialized);
            return Ok(());
        }

        let driver = self.driver()?;
        if self.manager_is_initialized(&driver).await? {
            log::info!("validator manager already initialized");
        } else {
            let balance = self.deps.contract.balance().await?;
            if balance.is_zero() {
                return Err(Error::precondition(format!(
                    "account 0x{:x} has no funds to initialize the validator manager",
                    self.deps.contract.sender()
                )));
            }
            match driver
                .initialize(&self.req.manager, &self.req.subnet_id, self.req.owner_address()?)
                .await?
            {
                InitializeOutcome::Initialized(hashes) => {
                    log::info!("validator manager initialized ({} tx)", hashes.len())
                }
                InitializeOutcome::AlreadyInitialized => {
                    log::info!("validator manager already initialized")
                }
            }
        }

        let network = self.req.network.clone();
        self.sidecar.network_mut(&network).manager_initialized = true;
        self.sync_sidecar()?;
        self.transition(ConversionState::ManagerInitialized);
        Ok(())
    }

    /// The base manager's initializer sets the churn tracker. ACP99 PoS then
    /// initializes the specialized contract and hands it ownership of the
    /// base manager; that transfer is the last transaction of the sequence.
    async fn manager_is_initialized(&self, driver: &Driver<'a>) -> Result<bool> {
        if !driver.churn_tracker().await?.is_initialized() {
            return Ok(false);
        }
        match (&self.req.manager.management, self.req.manager.generation) {
            (Management::ProofOfStake(_), Generation::Acp99) => {
                match self.req.specialized_manager_address()? {
                    Some(specialized) => Ok(driver.owner().await? == specialized),
                    None => Ok(false),
                }
            }
            _ => Ok(true),
        }
    }

    pub async fn initialize_validator_set(&mut self) -> Result<()> {
        log::info!("STEP: initializing validator set of {}", self.req.subnet_id);

        let recorded = self
            .sidecar
            .network(&self.req.network)
            .map(|d| d.validator_set_initialized)
            .unwrap_or(false);
        if recorded {
            log::info!("validator set already initialized (sidecar)");
            self.transition(ConversionState::ValidatorSetInitialized);
            return Ok(());
        }

        let driver = self.driver()?;
        let (data, unsigned) = conversion_message(
            self.req.network_id,
            self.req.subnet_id.clone(),
            self.req.manager_blockchain_id(),
            self.req.manager_address()?,
            &self.req.bootstrap_validators,
        )?;

        let first = data.validators[0].node_id.as_ref().to_vec();
        if !driver.registered_validator(&first).await?.is_zero() {
            log::info!("validator set already initialized (node registered)");
            return self.record_validator_set();
        }

        let subnet = self.deps.pchain.get_subnet(&self.req.subnet_id).await?;
        let expected = data.conversion_id();
        if subnet.conversion_id != expected {
            return Err(Error::ConversionIdMismatch {
                expected: expected.to_string(),
                actual: subnet.conversion_id.to_string(),
            });
        }

        self.transition(ConversionState::ValidatorSetPending);
        match self.aggregate_and_send(&driver, &data, &unsigned).await {
            Ok(()) => self.record_validator_set(),
            Err(e) => {
                self.transition(ConversionState::ManagerInitialized);
                Err(e)
            }
        }
    }

    async fn aggregate_and_send(
        &self,
        driver: &Driver<'a>,
        data: &ConversionData,
        unsigned: &UnsignedMessage,
    ) -> Result<()> {
        let signed = self
            .deps
            .aggregator
            .sign(
                &unsigned.to_hex(),
                &hex::encode(self.req.subnet_id.as_ref()),
                &self.req.subnet_id,
                self.req.quorum_percentage,
            )
            .await?;
        if &signed.unsigned != unsigned {
            return Err(Error::Aggregator(format!(
                "signed message {} does not match requested message {}",
                signed.unsigned.id(),
                unsigned.id()
            )));
        }

        let weights = self
            .deps
            .pchain
            .canonical_validator_weights(&self.req.subnet_id)
            .await?;
        signed.check_quorum(&weights, self.req.quorum_percentage)?;

        match driver.initialize_validator_set(data, &signed).await? {
            Some(h) => log::info!("validator set initialized with tx 0x{:x}", h),
            None => log::info!("validator set already initialized"),
        }
        Ok(())
    }

    fn record_validator_set(&mut self) -> Result<()> {
        let network = self.req.network.clone();
        self.sidecar.network_mut(&network).validator_set_initialized = true;
        self.sync_sidecar()?;
        self.transition(ConversionState::ValidatorSetInitialized);
        Ok(())
    }
}

impl Default for ConversionRequest {
    fn default() -> Self {
        Self {
            name: String::new(),
            network: String::new(),
            network_id: 0,
            subnet_id: ids::Id::empty(),
            blockchain_id: ids::Id::empty(),
            manager_blockchain_id: ids::Id::empty(),
            manager_address: String::new(),
            specialized_manager_address: None,
            owner_address: String::new(),
            manager: ManagerConfig::proof_of_authority(Generation::V1),
            bootstrap_validators: Vec::new(),
            quorum_percentage: DEFAULT_QUORUM_PERCENTAGE,
            rpc_url: String::new(),
        }
    }
}
