//! Building, persisting and issuing `ConvertSubnetToL1Tx`.
pub mod jsonrpc;

use std::{
    fs::{self, File},
    io::{self, Error as IoError, ErrorKind, Write},
    path::Path,
};

use async_trait::async_trait;
use avalanche_types::ids;
use primitive_types::H160;
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};
use tokio::time::{sleep, timeout, Duration, Instant};

use crate::{
    bootstrap::{self, BootstrapValidator},
    errors::{Error, Result},
    warp::ConversionData,
};

pub const API_TIMEOUT: Duration = Duration::from_secs(30);
pub const LARGE_API_TIMEOUT: Duration = Duration::from_secs(120);

pub const ISSUE_REPEATS: usize = 3;
pub const ISSUE_RETRY_SLEEP: Duration = Duration::from_secs(2);

pub const ACCEPTANCE_TIMEOUT: Duration = Duration::from_secs(120);
pub const ACCEPTANCE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Everything the P-Chain wallet needs to build the conversion transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertTxRequest {
    pub subnet_id: ids::Id,
    pub manager_chain_id: ids::Id,
    pub manager_address: H160,
    pub validators: Vec<BootstrapValidator>,
}

impl ConvertTxRequest {
    pub fn validate(&self) -> Result<()> {
        if self.subnet_id.is_empty() {
            return Err(Error::precondition("missing Subnet ID"));
        }
        if self.manager_chain_id.is_empty() {
            return Err(Error::precondition("missing validator manager blockchain ID"));
        }
        bootstrap::validate_all(&self.validators)
    }

    /// Conversion ID the P-Chain records once this conversion is accepted.
    pub fn conversion_id(&self) -> Result<ids::Id> {
        let validators = self
            .validators
            .iter()
            .map(|v| v.to_validator_data())
            .collect::<Result<Vec<_>>>()?;
        let data = ConversionData::new(
            self.subnet_id.clone(),
            self.manager_chain_id.clone(),
            self.manager_address.as_bytes(),
            validators,
        )?;
        Ok(data.conversion_id())
    }
}

/// A P-Chain transaction with its signing state.
///
/// `auth_signers` is the subset of `control_keys` whose signatures satisfy
/// the subnet owner threshold; `signed` lists those already applied. The
/// signatures themselves are checked by the P-Chain on issuance.
/// `conversion_id` binds the tx to the conversion it performs.
#[serde_as]
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct MultisigTx {
    pub tx_id: String,
    pub conversion_id: String,
    #[serde_as(as = "Hex")]
    pub tx_bytes: Vec<u8>,
    pub control_keys: Vec<String>,
    pub threshold: u32,
    pub auth_signers: Vec<String>,
    #[serde(default)]
    pub signed: Vec<String>,
}

impl MultisigTx {
    pub fn remaining_auth_signers(&self) -> Vec<String> {
        self.auth_signers
            .iter()
            .filter(|s| !self.signed.contains(s))
            .cloned()
            .collect()
    }

    /// Fails unless the tx performs the conversion `req` describes.
    pub fn check_conversion(&self, req: &ConvertTxRequest) -> Result<()> {
        let expected = req.conversion_id()?.to_string();
        if self.conversion_id != expected {
            return Err(Error::precondition(format!(
                "tx {} converts with conversion ID '{}', expected {} for subnet {}",
                self.tx_id, self.conversion_id, expected, req.subnet_id
            )));
        }
        Ok(())
    }

    pub fn is_ready_to_commit(&self) -> bool {
        self.auth_signers.len() >= self.threshold as usize && self.remaining_auth_signers().is_empty()
    }

    /// Persists the transaction for out-of-band signing.
    pub fn to_file(&self, file_path: &str) -> io::Result<()> {
        log::info!("writing tx {} to '{}'", self.tx_id, file_path);
        let path = Path::new(file_path);
        if let Some(parent_dir) = path.parent() {
            if !parent_dir.as_os_str().is_empty() {
                fs::create_dir_all(parent_dir)?;
            }
        }

        let d = serde_json::to_vec_pretty(self).map_err(|e| {
            IoError::new(ErrorKind::Other, format!("failed to serialize tx to JSON {}", e))
        })?;
        let mut f = File::create(file_path)?;
        f.write_all(&d)?;
        Ok(())
    }

    pub fn from_file(file_path: &str) -> io::Result<Self> {
        log::info!("loading tx from {}", file_path);

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
}

/// Wallet side of the P-Chain: builds and signs with whatever keys it holds.
#[async_trait]
pub trait PChainWallet: Send + Sync {
    async fn build_convert_tx(&self, req: &ConvertTxRequest) -> Result<MultisigTx>;
}

/// Serves a conversion tx that an external wallet already built and
/// (partially) signed.
#[derive(Debug, Clone)]
pub struct FileWallet {
    file_path: String,
}

impl FileWallet {
    pub fn new(file_path: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
        }
    }
}

#[async_trait]
impl PChainWallet for FileWallet {
    async fn build_convert_tx(&self, req: &ConvertTxRequest) -> Result<MultisigTx> {
        req.validate()?;
        let tx = MultisigTx::from_file(&self.file_path)?;
        tx.check_conversion(req)?;
        Ok(tx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Committed,
    Processing,
    Dropped(String),
    Unknown,
}

/// What the P-Chain reports for a subnet. An empty `conversion_id` means the
/// subnet was not converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetInfo {
    pub is_permissioned: bool,
    pub conversion_id: ids::Id,
    pub manager_chain_id: ids::Id,
    pub manager_address: Vec<u8>,
}

impl SubnetInfo {
    pub fn is_converted(&self) -> bool {
        !self.conversion_id.is_empty()
    }
}

#[async_trait]
pub trait PChainClient: Send + Sync {
    /// Returns the tx ID assigned by the node.
    async fn issue_tx(&self, tx_bytes: &[u8]) -> Result<String>;

    async fn tx_status(&self, tx_id: &str) -> Result<TxStatus>;

    async fn get_subnet(&self, subnet_id: &ids::Id) -> Result<SubnetInfo>;

    /// Weights of the subnet's current validators in canonical order.
    async fn canonical_validator_weights(&self, subnet_id: &ids::Id) -> Result<Vec<u64>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    Committed {
        tx_id: String,
    },
    /// Not enough signatures; the tx was saved and never issued.
    Partial {
        tx_id: String,
        file_path: String,
        remaining_signers: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct IssueOptions {
    pub repeats: usize,
    pub retry_sleep: Duration,
    pub issue_timeout: Duration,
    pub acceptance_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for IssueOptions {
    fn default() -> Self {
        Self {
            repeats: ISSUE_REPEATS,
            retry_sleep: ISSUE_RETRY_SLEEP,
            issue_timeout: LARGE_API_TIMEOUT,
            acceptance_timeout: ACCEPTANCE_TIMEOUT,
            poll_interval: ACCEPTANCE_POLL_INTERVAL,
        }
    }
}

pub struct Issuer<'a> {
    wallet: &'a dyn PChainWallet,
    client: &'a dyn PChainClient,
    opts: IssueOptions,
}

impl<'a> Issuer<'a> {
    pub fn new(wallet: &'a dyn PChainWallet, client: &'a dyn PChainClient) -> Self {
        Self {
            wallet,
            client,
            opts: IssueOptions::default(),
        }
    }

    pub fn with_options(mut self, opts: IssueOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Builds the conversion tx; issues it if fully signed, otherwise saves it
    /// to `partial_tx_path` for the remaining co-signers.
    pub async fn convert(&self, req: &ConvertTxRequest, partial_tx_path: &str) -> Result<IssueOutcome> {
        req.validate()?;

        let tx = self.wallet.build_convert_tx(req).await?;
        tx.check_conversion(req)?;
        if !tx.is_ready_to_commit() {
            let remaining_signers = tx.remaining_auth_signers();
            tx.to_file(partial_tx_path)?;
            log::warn!(
                "tx {} is partially signed, {} signature(s) remaining ({:?}), saved to '{}'",
                tx.tx_id,
                remaining_signers.len(),
                remaining_signers,
                partial_tx_path
            );
            return Ok(IssueOutcome::Partial {
                tx_id: tx.tx_id,
                file_path: partial_tx_path.to_string(),
                remaining_signers,
            });
        }

        let tx_id = commit(self.client, &tx, &self.opts).await?;
        Ok(IssueOutcome::Committed { tx_id })
    }
}

/// Issues a fully signed tx with bounded retries and waits until the P-Chain
/// commits it.
pub async fn commit(client: &dyn PChainClient, tx: &MultisigTx, opts: &IssueOptions) -> Result<String> {
    if !tx.is_ready_to_commit() {
        return Err(Error::precondition(format!(
            "tx {} is not ready to commit, remaining signers {:?}",
            tx.tx_id,
            tx.remaining_auth_signers()
        )));
    }

    let mut last_err = String::new();
    let mut issued: Option<String> = None;
    for attempt in 0..opts.repeats {
        if attempt > 0 {
            // an earlier attempt may have landed despite the error
            match client.tx_status(&tx.tx_id).await {
                Ok(TxStatus::Committed | TxStatus::Processing) => {
                    log::info!("tx {} already issued by an earlier attempt", tx.tx_id);
                    issued = Some(tx.tx_id.clone());
                    break;
                }
                Ok(status) => log::debug!(
                    "tx {} not seen after failed attempt ({:?}), re-issuing",
                    tx.tx_id,
                    status
                ),
                Err(e) => log::debug!(
                    "tx {} status unknown after failed attempt ({}), re-issuing",
                    tx.tx_id,
                    e
                ),
            }
        }

        log::info!("issuing tx {} (attempt {})", tx.tx_id, attempt + 1);
        match timeout(opts.issue_timeout, client.issue_tx(&tx.tx_bytes)).await {
            Ok(Ok(tx_id)) => {
                issued = Some(tx_id);
                break;
            }
            Ok(Err(e)) => {
                last_err = format!("error issuing tx with ID {}: {}", tx.tx_id, e);
            }
            Err(_) => {
                last_err = format!("timeout issuing/verifying tx with ID {}", tx.tx_id);
            }
        }
        log::warn!("{last_err}");
        if attempt + 1 < opts.repeats {
            sleep(opts.retry_sleep).await;
        }
    }
    let tx_id = issued.ok_or_else(|| Error::Issue(last_err))?;

    wait_for_acceptance(client, &tx_id, opts).await?;
    Ok(tx_id)
}

pub async fn wait_for_acceptance(client: &dyn PChainClient, tx_id: &str, opts: &IssueOptions) -> Result<()> {
    let start = Instant::now();
    loop {
        match client.tx_status(tx_id).await {
            Ok(TxStatus::Committed) => {
                log::info!("tx {} committed", tx_id);
                return Ok(());
            }
            Ok(TxStatus::Dropped(reason)) => {
                return Err(Error::Issue(format!("tx {tx_id} dropped ({reason})")));
            }
            Ok(s) => log::info!("tx {} status {:?}, waiting", tx_id, s),
            Err(e) => log::warn!("failed to get tx {} status ({})", tx_id, e),
        }
        if start.elapsed() >= opts.acceptance_timeout {
            return Err(Error::Timeout(format!(
                "waiting for tx {tx_id} acceptance after {:?}",
                opts.acceptance_timeout
            )));
        }
        sleep(opts.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use super::*;
    use crate::testutil;

    struct StaticWallet(MultisigTx);

    #[async_trait]
    impl PChainWallet for StaticWallet {
        async fn build_convert_tx(&self, _req: &ConvertTxRequest) -> Result<MultisigTx> {
            Ok(self.0.clone())
        }
    }

    /// Fails the first `failures` issue calls.
    struct FlakyClient {
        failures: usize,
        issued: AtomicUsize,
        calls: AtomicUsize,
        statuses: Mutex<Vec<TxStatus>>,
    }

    impl FlakyClient {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                issued: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                statuses: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PChainClient for FlakyClient {
        async fn issue_tx(&self, _tx_bytes: &[u8]) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(Error::Rpc(String::from("connection refused")));
            }
            self.issued.fetch_add(1, Ordering::SeqCst);
            Ok(String::from("tx-1"))
        }

        async fn tx_status(&self, _tx_id: &str) -> Result<TxStatus> {
            if self.issued.load(Ordering::SeqCst) == 0 {
                return Ok(TxStatus::Unknown);
            }
            let mut s = self.statuses.lock().unwrap();
            Ok(if s.is_empty() { TxStatus::Committed } else { s.remove(0) })
        }

        async fn get_subnet(&self, _subnet_id: &ids::Id) -> Result<SubnetInfo> {
            unreachable!()
        }

        async fn canonical_validator_weights(&self, _subnet_id: &ids::Id) -> Result<Vec<u64>> {
            unreachable!()
        }
    }

    fn fast() -> IssueOptions {
        IssueOptions {
            repeats: 3,
            retry_sleep: Duration::from_millis(1),
            issue_timeout: Duration::from_secs(1),
            acceptance_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_multisig_tx() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();

        let mut tx = testutil::multisig_tx(2, &["a", "b"], &["a"]);
        assert!(!tx.is_ready_to_commit());
        assert_eq!(tx.remaining_auth_signers(), vec![String::from("b")]);

        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("partial").join("tx.json");
        let p = p.to_str().unwrap();
        tx.to_file(p).unwrap();
        let loaded = MultisigTx::from_file(p).unwrap();
        assert_eq!(loaded, tx);

        tx.signed.push(String::from("b"));
        assert!(tx.is_ready_to_commit());

        // fewer auth signers than the threshold is never ready
        let tx = testutil::multisig_tx(2, &["a"], &["a"]);
        assert!(!tx.is_ready_to_commit());
    }

    #[tokio::test]
    async fn test_partial_tx_is_never_issued() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("convert.json");
        let p = p.to_str().unwrap();

        let wallet = StaticWallet(testutil::multisig_tx(2, &["a", "b"], &["a"]));
        let client = FlakyClient::new(0);
        let outcome = Issuer::new(&wallet, &client)
            .with_options(fast())
            .convert(&testutil::convert_tx_request(), p)
            .await
            .unwrap();
        match outcome {
            IssueOutcome::Partial {
                remaining_signers,
                file_path,
                ..
            } => {
                assert_eq!(remaining_signers, vec![String::from("b")]);
                assert_eq!(file_path, p);
            }
            o => panic!("unexpected {o:?}"),
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(Path::new(p).exists());

        // and commit refuses it outright
        let err = commit(&client, &MultisigTx::from_file(p).unwrap(), &fast())
            .await
            .unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_validators_fail_before_network() {
        let wallet = StaticWallet(testutil::multisig_tx(1, &["a"], &["a"]));
        let client = FlakyClient::new(0);
        let mut req = testutil::convert_tx_request();
        req.validators.clear();
        let err = Issuer::new(&wallet, &client)
            .with_options(fast())
            .convert(&req, "/tmp/unused.json")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing bootstrap validators");
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_issue_retries() {
        let wallet = StaticWallet(testutil::multisig_tx(1, &["a"], &["a"]));

        let client = FlakyClient::new(2);
        let outcome = Issuer::new(&wallet, &client)
            .with_options(fast())
            .convert(&testutil::convert_tx_request(), "/tmp/unused.json")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IssueOutcome::Committed {
                tx_id: String::from("tx-1")
            }
        );
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);

        let client = FlakyClient::new(3);
        let err = commit(&client, &wallet.0, &fast()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "issue tx error error issuing tx with ID {}: rpc error: connection refused",
                wallet.0.tx_id
            )
        );
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_attempt_that_landed_is_not_reissued() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();

        let tx = testutil::multisig_tx(1, &["a"], &["a"]);

        // the first issueTx errors although the tx reached the P-Chain
        let client = FlakyClient::new(1);
        client.issued.store(1, Ordering::SeqCst);
        let tx_id = commit(&client, &tx, &fast()).await.unwrap();
        assert_eq!(tx_id, tx.tx_id);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        // not seen after the failure, so the second attempt re-issues
        let client = FlakyClient::new(1);
        let tx_id = commit(&client, &tx, &fast()).await.unwrap();
        assert_eq!(tx_id, "tx-1");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mismatched_tx_is_never_issued() {
        let mut tx = testutil::multisig_tx(1, &["a"], &["a"]);
        tx.conversion_id = ids::Id::from_slice(&[9; 32]).to_string();
        let wallet = StaticWallet(tx);
        let client = FlakyClient::new(0);

        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("convert.json");
        let err = Issuer::new(&wallet, &client)
            .with_options(fast())
            .convert(&testutil::convert_tx_request(), p.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(!p.exists());

        // the stamped ID covers every field of the conversion
        let req = testutil::convert_tx_request();
        let mut other = req.clone();
        other.validators[0].weight += 1;
        assert_ne!(req.conversion_id().unwrap(), other.conversion_id().unwrap());
        assert!(testutil::multisig_tx(1, &["a"], &["a"]).check_conversion(&req).is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_acceptance() {
        let client = FlakyClient::new(0);
        client.issued.store(1, Ordering::SeqCst);
        client
            .statuses
            .lock()
            .unwrap()
            .extend([TxStatus::Processing, TxStatus::Processing]);
        assert!(wait_for_acceptance(&client, "tx-1", &fast()).await.is_ok());

        client
            .statuses
            .lock()
            .unwrap()
            .push(TxStatus::Dropped(String::from("insufficient funds")));
        let err = wait_for_acceptance(&client, "tx-1", &fast()).await.unwrap_err();
        assert!(err.to_string().contains("insufficient funds"));

        let client = FlakyClient::new(0);
        assert!(matches!(
            wait_for_acceptance(&client, "tx-1", &fast()).await.unwrap_err(),
            Error::Timeout(_)
        ));
    }

    #[tokio::test]
    async fn test_file_wallet() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("signed.json");
        let p = p.to_str().unwrap();
        let tx = testutil::multisig_tx(1, &["a"], &["a"]);
        tx.to_file(p).unwrap();

        let wallet = FileWallet::new(p);
        assert_eq!(
            wallet
                .build_convert_tx(&testutil::convert_tx_request())
                .await
                .unwrap(),
            tx
        );

        // a tx for another conversion is rejected before anything is issued
        let mut other = testutil::convert_tx_request();
        other.manager_chain_id = ids::Id::from_slice(&[3; 32]);
        let err = wallet.build_convert_tx(&other).await.unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains(&other.conversion_id().unwrap().to_string()));

        let missing = FileWallet::new(dir.path().join("missing.json").to_str().unwrap());
        assert!(missing
            .build_convert_tx(&testutil::convert_tx_request())
            .await
            .is_err());
    }
}
