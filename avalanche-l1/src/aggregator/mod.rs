//! Signature aggregator: service configuration, process supervision and the
//! HTTP signing client.
pub mod client;
pub mod supervisor;

use std::{
    fs::{self, File},
    io::{self, Error as IoError, ErrorKind, Write},
    path::Path,
};

use async_trait::async_trait;
use avalanche_types::ids;
use serde::{Deserialize, Serialize};

use crate::{errors::Result, warp::signed::SignedMessage};

pub const DEFAULT_QUORUM_PERCENTAGE: u64 = 67;
pub const DEFAULT_SIGNATURE_CACHE_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_API_PORT: u16 = 8080;
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const AGGREGATE_SIGNATURES_PATH: &str = "/aggregate-signatures";

/// Anything that can turn an unsigned warp message into a signed one.
#[async_trait]
pub trait SignatureAggregator: Send + Sync {
    async fn sign(
        &self,
        message_hex: &str,
        justification_hex: &str,
        signing_subnet_id: &ids::Id,
        quorum_percentage: u64,
    ) -> Result<SignedMessage>;
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
pub struct ApiConfig {
    #[serde(rename = "base-url")]
    pub base_url: String,
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
pub struct Peer {
    pub id: String,
    pub ip: String,
}

/// Configuration file consumed by the signature-aggregator binary.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct AggregatorConfig {
    pub log_level: String,
    pub p_chain_api: ApiConfig,
    pub info_api: ApiConfig,
    pub signature_cache_size: u64,
    pub allow_private_ips: bool,
    #[serde(default)]
    pub tracked_subnet_ids: Vec<String>,
    #[serde(default)]
    pub manually_tracked_peers: Vec<Peer>,
    pub api_port: u16,
}

impl AggregatorConfig {
    /// Config against one network endpoint, tracking `subnet_ids`.
    pub fn default_for(network_endpoint: &str, subnet_ids: &[ids::Id]) -> Self {
        Self {
            log_level: String::from(DEFAULT_LOG_LEVEL),
            p_chain_api: ApiConfig {
                base_url: network_endpoint.to_string(),
            },
            info_api: ApiConfig {
                base_url: network_endpoint.to_string(),
            },
            signature_cache_size: DEFAULT_SIGNATURE_CACHE_SIZE,
            allow_private_ips: true,
            tracked_subnet_ids: subnet_ids.iter().map(|id| id.to_string()).collect(),
            manually_tracked_peers: Vec::new(),
            api_port: DEFAULT_API_PORT,
        }
    }

    pub fn track_subnet(&mut self, subnet_id: &ids::Id) {
        let s = subnet_id.to_string();
        if !self.tracked_subnet_ids.contains(&s) {
            self.tracked_subnet_ids.push(s);
        }
    }

    pub fn add_peer(&mut self, peer: Peer) {
        if !self.manually_tracked_peers.iter().any(|p| p.id == peer.id) {
            self.manually_tracked_peers.push(peer);
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.api_port)
    }

    pub fn sync(&self, file_path: &str) -> io::Result<()> {
        log::info!("syncing signature aggregator config to '{}'", file_path);
        let path = Path::new(file_path);
        if let Some(parent_dir) = path.parent() {
            if !parent_dir.as_os_str().is_empty() {
                fs::create_dir_all(parent_dir)?;
            }
        }

        let d = serde_json::to_vec_pretty(self).map_err(|e| {
            IoError::new(
                ErrorKind::Other,
                format!("failed to serialize config to JSON {}", e),
            )
        })?;
        let mut f = File::create(file_path)?;
        f.write_all(&d)?;
        Ok(())
    }

    pub fn load(file_path: &str) -> io::Result<Self> {
        log::info!("loading signature aggregator config from {}", file_path);

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

#[test]
fn test_aggregator_config() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .is_test(true)
        .try_init();

    let subnet_id = ids::Id::from_slice(&[7; 32]);
    let mut cfg = AggregatorConfig::default_for("http://127.0.0.1:9650", &[subnet_id]);
    cfg.track_subnet(&subnet_id);
    assert_eq!(cfg.tracked_subnet_ids.len(), 1);
    cfg.add_peer(Peer {
        id: String::from("NodeID-7Xhw2mDxuDS44j42TCB6U5579esbSt3Lg"),
        ip: String::from("127.0.0.1:9651"),
    });
    cfg.add_peer(Peer {
        id: String::from("NodeID-7Xhw2mDxuDS44j42TCB6U5579esbSt3Lg"),
        ip: String::from("127.0.0.1:9651"),
    });
    assert_eq!(cfg.manually_tracked_peers.len(), 1);

    let v = serde_json::to_value(&cfg).unwrap();
    for key in [
        "log-level",
        "p-chain-api",
        "info-api",
        "signature-cache-size",
        "allow-private-ips",
        "tracked-subnet-ids",
        "manually-tracked-peers",
        "api-port",
    ] {
        assert!(v.get(key).is_some(), "missing {key}");
    }
    assert_eq!(v["p-chain-api"]["base-url"], "http://127.0.0.1:9650");
    assert_eq!(v["signature-cache-size"], 1048576);

    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("aggregator").join("config.json");
    let p = p.to_str().unwrap();
    cfg.sync(p).unwrap();
    assert_eq!(AggregatorConfig::load(p).unwrap(), cfg);
    assert_eq!(cfg.endpoint(), "http://127.0.0.1:8080");
}
