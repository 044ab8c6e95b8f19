//! Node readiness checks run before touching the L1.
use async_trait::async_trait;
use avalanche_types::ids;
use serde::Deserialize;
use tokio::time::{sleep, Duration, Instant};

use crate::{
    errors::{Error, Result},
    pchain::API_TIMEOUT,
};

pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(180);
pub const DEFAULT_HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[async_trait]
pub trait NodeHealth: Send + Sync {
    /// True once every node is healthy and has bootstrapped `blockchain_id`.
    async fn is_healthy(&self, blockchain_id: &ids::Id) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    healthy: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BootstrappedResult {
    is_bootstrapped: bool,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    result: Option<BootstrappedResult>,
}

/// Checks "/ext/health" and "info.isBootstrapped" on each endpoint.
#[derive(Debug, Clone)]
pub struct HttpNodeHealth {
    endpoints: Vec<String>,
    http: reqwest::Client,
}

impl HttpNodeHealth {
    pub fn new(endpoints: &[String]) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::precondition("missing node endpoints"));
        }
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| Error::Rpc(format!("failed to build http client ({e})")))?;
        Ok(Self {
            endpoints: endpoints
                .iter()
                .map(|ep| ep.trim_end_matches('/').to_string())
                .collect(),
            http,
        })
    }

    async fn check(&self, ep: &str, blockchain_id: &ids::Id) -> Result<bool> {
        log::info!("checking health for {}", ep);
        let rb = self
            .http
            .get(format!("{ep}/ext/health"))
            .send()
            .await?
            .bytes()
            .await?;
        let resp: HealthResponse = serde_json::from_slice(&rb)?;
        if !resp.healthy {
            return Ok(false);
        }

        let rb = self
            .http
            .post(format!("{ep}/ext/info"))
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "info.isBootstrapped",
                "params": { "chain": blockchain_id.to_string() },
            }))
            .send()
            .await?
            .bytes()
            .await?;
        let resp: InfoResponse = serde_json::from_slice(&rb)?;
        Ok(resp.result.map(|r| r.is_bootstrapped).unwrap_or(false))
    }
}

#[async_trait]
impl NodeHealth for HttpNodeHealth {
    async fn is_healthy(&self, blockchain_id: &ids::Id) -> Result<bool> {
        for ep in self.endpoints.iter() {
            if !self.check(ep, blockchain_id).await? {
                log::info!("{} not ready for {}", ep, blockchain_id);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Polls until healthy. Transient check errors are logged and retried.
pub async fn wait_until_healthy(
    h: &dyn NodeHealth,
    blockchain_id: &ids::Id,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        match h.is_healthy(blockchain_id).await {
            Ok(true) => {
                log::info!("nodes healthy for {}", blockchain_id);
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => log::warn!("health check failed ({})", e),
        }
        if start.elapsed() >= timeout {
            return Err(Error::Timeout(format!(
                "waiting for nodes to be healthy after {:?}",
                timeout
            )));
        }
        sleep(poll_interval).await;
    }
}
