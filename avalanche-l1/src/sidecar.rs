//! Per-L1 state persisted between runs.
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Error as IoError, ErrorKind, Write},
    path::Path,
    str::FromStr,
};

use avalanche_types::ids;
use primitive_types::H160;
use serde::{Deserialize, Serialize};

use crate::{
    errors::{Error, Result},
    validator_manager::{self, ValidatorManagement},
};

/// What is known about the L1 on one network (e.g. "Local Network").
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct NetworkData {
    #[serde(default)]
    pub subnet_id: String,
    #[serde(default)]
    pub blockchain_id: String,
    #[serde(default)]
    pub rpc_endpoints: Vec<String>,
    #[serde(default)]
    pub validator_manager_address: String,
    /// Empty when the manager lives on the L1 itself.
    #[serde(default)]
    pub validator_manager_blockchain_id: String,
    #[serde(default)]
    pub sovereign: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_management: Option<ValidatorManagement>,
    #[serde(default)]
    pub use_acp99: bool,
    #[serde(default)]
    pub manager_initialized: bool,
    #[serde(default)]
    pub validator_set_initialized: bool,
}

fn parse_id(s: &str, what: &str) -> Result<ids::Id> {
    if s.is_empty() {
        return Err(Error::precondition(format!("missing {what}")));
    }
    ids::Id::from_str(s).map_err(|e| Error::precondition(format!("invalid {what} '{s}' ({e})")))
}

impl NetworkData {
    pub fn subnet_id(&self) -> Result<ids::Id> {
        parse_id(&self.subnet_id, "Subnet ID")
    }

    pub fn blockchain_id(&self) -> Result<ids::Id> {
        parse_id(&self.blockchain_id, "Blockchain ID")
    }

    pub fn manager_blockchain_id(&self) -> Result<ids::Id> {
        if self.validator_manager_blockchain_id.is_empty() {
            return self.blockchain_id();
        }
        parse_id(
            &self.validator_manager_blockchain_id,
            "validator manager blockchain ID",
        )
    }

    pub fn manager_address(&self) -> Result<H160> {
        validator_manager::parse_address(&self.validator_manager_address, "validator manager address")
    }

    pub fn rpc_endpoint(&self) -> Option<&str> {
        self.rpc_endpoints.first().map(|s| s.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Sidecar {
    pub name: String,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkData>,
}

impl Sidecar {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            networks: BTreeMap::new(),
        }
    }

    pub fn network(&self, network: &str) -> Option<&NetworkData> {
        self.networks.get(network)
    }

    pub fn network_mut(&mut self, network: &str) -> &mut NetworkData {
        self.networks.entry(network.to_string()).or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::precondition("missing sidecar name"));
        }
        for (network, d) in self.networks.iter() {
            if d.manager_initialized && d.validator_manager_address.is_empty() {
                return Err(Error::precondition(format!(
                    "{network}: validator manager marked initialized without an address"
                )));
            }
            if d.validator_set_initialized && !d.manager_initialized {
                return Err(Error::precondition(format!(
                    "{network}: validator set marked initialized before the manager"
                )));
            }
            if !d.validator_manager_address.is_empty() {
                d.manager_address()?;
            }
        }
        Ok(())
    }

    /// Writes JSON for ".json" paths, YAML otherwise.
    pub fn sync(&self, file_path: &str) -> io::Result<()> {
        log::info!("syncing sidecar to '{}'", file_path);
        let path = Path::new(file_path);
        if let Some(parent_dir) = path.parent() {
            if !parent_dir.as_os_str().is_empty() {
                fs::create_dir_all(parent_dir)?;
            }
        }

        let d = if is_json(file_path) {
            serde_json::to_string_pretty(self).map_err(|e| {
                IoError::new(ErrorKind::Other, format!("failed to serialize to JSON {}", e))
            })?
        } else {
            serde_yaml::to_string(self).map_err(|e| {
                IoError::new(ErrorKind::Other, format!("failed to serialize to YAML {}", e))
            })?
        };
        let mut f = File::create(file_path)?;
        f.write_all(d.as_bytes())?;
        Ok(())
    }

    pub fn load(file_path: &str) -> io::Result<Self> {
        log::info!("loading sidecar from {}", file_path);

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
        if is_json(file_path) {
            serde_json::from_reader(f)
                .map_err(|e| IoError::new(ErrorKind::InvalidInput, format!("invalid JSON: {}", e)))
        } else {
            serde_yaml::from_reader(f)
                .map_err(|e| IoError::new(ErrorKind::InvalidInput, format!("invalid YAML: {}", e)))
        }
    }
}

fn is_json(file_path: &str) -> bool {
    Path::new(file_path)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[test]
fn test_sidecar() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .is_test(true)
        .try_init();

    let mut sc = Sidecar::new("mysubnet");
    {
        let d = sc.network_mut("Local Network");
        d.subnet_id = ids::Id::from_slice(&[1; 32]).to_string();
        d.blockchain_id = ids::Id::from_slice(&[2; 32]).to_string();
        d.rpc_endpoints = vec![String::from("http://127.0.0.1:9650/ext/bc/abc/rpc")];
        d.validator_manager_address = String::from("0x0feedc0de0000000000000000000000000000000");
        d.sovereign = true;
        d.validator_management = Some(ValidatorManagement::ProofOfAuthority);
        d.manager_initialized = true;
    }
    sc.validate().unwrap();

    let d = sc.network("Local Network").unwrap();
    assert_eq!(d.subnet_id().unwrap(), ids::Id::from_slice(&[1; 32]));
    // empty manager blockchain falls back to the L1
    assert_eq!(d.manager_blockchain_id().unwrap(), ids::Id::from_slice(&[2; 32]));
    assert_eq!(d.rpc_endpoint(), Some("http://127.0.0.1:9650/ext/bc/abc/rpc"));
    assert!(sc.network("Fuji").is_none());

    let dir = tempfile::tempdir().unwrap();
    for name in ["sidecar.yaml", "sidecar.json"] {
        let p = dir.path().join(name);
        let p = p.to_str().unwrap();
        sc.sync(p).unwrap();
        assert_eq!(Sidecar::load(p).unwrap(), sc);
    }
    let raw = fs::read_to_string(dir.path().join("sidecar.yaml")).unwrap();
    assert!(raw.contains("validator_management: Proof Of Authority"));

    assert!(Sidecar::load(dir.path().join("missing.yaml").to_str().unwrap()).is_err());

    let p = random_manager::tmp_path(10, Some(".yml")).unwrap();
    sc.sync(&p).unwrap();
    assert_eq!(Sidecar::load(&p).unwrap(), sc);
    fs::remove_file(&p).unwrap();

    let mut bad = sc.clone();
    let d = bad.network_mut("Local Network");
    d.manager_initialized = false;
    d.validator_set_initialized = true;
    assert!(bad.validate().unwrap_err().is_precondition());

    assert!(NetworkData::default().subnet_id().unwrap_err().is_precondition());
}
