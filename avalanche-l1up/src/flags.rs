//! Flags shared by the subcommands that drive the conversion flow.
use std::{
    fs,
    io::{self, Error, ErrorKind},
    path::Path,
    str::FromStr,
};

use avalanche_l1::{
    aggregator::{
        supervisor::Supervisor, AggregatorConfig, DEFAULT_API_PORT, DEFAULT_QUORUM_PERCENTAGE,
    },
    bootstrap,
    orchestrator::ConversionRequest,
    rpc::{self, SidecarRpc, StaticRpc},
    sidecar::Sidecar,
    validator_manager::{Generation, ManagerConfig, PoSParams},
};
use avalanche_types::ids;
use clap::{value_parser, Arg, ArgMatches, Command};

pub const DEFAULT_NETWORK: &str = "Local Network";
pub const DEFAULT_NETWORK_ID: u32 = 1337;
pub const DEFAULT_NODE_ENDPOINT: &str = "http://127.0.0.1:9650";
pub const DEFAULT_AGGREGATOR_BIN_PATH: &str = "signature-aggregator";
pub const DEFAULT_AGGREGATOR_DIR: &str = ".avalanche-l1up/signature-aggregator";

pub fn log_level() -> Arg {
    Arg::new("LOG_LEVEL")
        .long("log-level")
        .short('l')
        .help("Sets the log level")
        .required(false)
        .num_args(1)
        .value_parser(["debug", "info"])
        .default_value("info")
}

pub fn skip_prompt() -> Arg {
    Arg::new("SKIP_PROMPT")
        .long("skip-prompt")
        .short('s')
        .help("Skips prompt mode")
        .required(false)
        .num_args(0)
}

pub fn node_endpoint() -> Arg {
    Arg::new("NODE_ENDPOINT")
        .long("node-endpoint")
        .help("Sets the avalanchego API endpoint")
        .required(false)
        .num_args(1)
        .default_value(DEFAULT_NODE_ENDPOINT)
}

pub fn sidecar_file_path(required: bool) -> Arg {
    Arg::new("SIDECAR_FILE_PATH")
        .long("sidecar-file-path")
        .help("Sets the L1 sidecar file (YAML, or JSON by extension)")
        .required(required)
        .num_args(1)
}

pub fn network() -> Arg {
    Arg::new("NETWORK")
        .long("network")
        .help("Sets the sidecar network key")
        .required(false)
        .num_args(1)
        .default_value(DEFAULT_NETWORK)
}

pub fn network_id() -> Arg {
    Arg::new("NETWORK_ID")
        .long("network-id")
        .help("Sets the avalanche network ID signed into warp messages")
        .required(false)
        .num_args(1)
        .value_parser(value_parser!(u32))
        .default_value("1337")
}

pub fn validators_file_path() -> Arg {
    Arg::new("VALIDATORS_FILE_PATH")
        .long("validators-file-path")
        .help("Sets the JSON file of bootstrap validators")
        .required(true)
        .num_args(1)
}

/// Adds the flags of the conversion flow to `cmd`.
pub fn conversion_args(cmd: Command) -> Command {
    cmd.arg(log_level())
        .arg(sidecar_file_path(true))
        .arg(network())
        .arg(network_id())
        .arg(node_endpoint())
        .arg(
            Arg::new("L1_NAME")
                .long("l1-name")
                .help("Sets the L1 name recorded in a new sidecar")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("SUBNET_ID")
                .long("subnet-id")
                .help("Sets the subnet ID (defaults to the sidecar)")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("BLOCKCHAIN_ID")
                .long("blockchain-id")
                .help("Sets the L1 blockchain ID (defaults to the sidecar)")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("MANAGER_BLOCKCHAIN_ID")
                .long("manager-blockchain-id")
                .help("Sets the blockchain ID hosting the validator manager (defaults to the L1)")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("MANAGER_ADDRESS")
                .long("manager-address")
                .help("Sets the validator manager contract address (defaults to the sidecar)")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("SPECIALIZED_MANAGER_ADDRESS")
                .long("specialized-manager-address")
                .help("Sets the PoS contract specializing the ACP99 manager")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("OWNER_ADDRESS")
                .long("owner-address")
                .help("Sets the validator manager owner address")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("PRIVATE_KEY_FILE_PATH")
                .long("private-key-file-path")
                .help("Sets the file holding the hex private key that sends contract transactions")
                .required(true)
                .num_args(1),
        )
        .arg(validators_file_path())
        .arg(
            Arg::new("VALIDATOR_MANAGEMENT")
                .long("validator-management")
                .help("Sets the validator management type")
                .required(false)
                .num_args(1)
                .value_parser(["poa", "pos"])
                .default_value("poa"),
        )
        .arg(
            Arg::new("ACP99")
                .long("acp99")
                .help("Uses the ACP99 validator manager contracts")
                .required(false)
                .num_args(0),
        )
        .arg(
            Arg::new("MANAGER_CONFIG_FILE_PATH")
                .long("manager-config-file-path")
                .help("Sets a YAML validator manager config (overrides --validator-management and --acp99)")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("QUORUM_PERCENTAGE")
                .long("quorum-percentage")
                .help("Sets the signature quorum percentage")
                .required(false)
                .num_args(1)
                .value_parser(value_parser!(u64))
                .default_value("67"),
        )
        .arg(
            Arg::new("RPC_URL")
                .long("rpc-url")
                .help("Sets the EVM RPC endpoint of the validator manager chain")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("C_CHAIN_ID")
                .long("c-chain-id")
                .help("Sets the network C-Chain ID, for managers deployed on the C-Chain")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("PARTIAL_TX_FILE_PATH")
                .long("partial-tx-file-path")
                .help("Sets where a partially signed conversion tx is saved")
                .required(false)
                .num_args(1)
                .default_value("convert-tx.json"),
        )
        .arg(
            Arg::new("AGGREGATOR_BIN_PATH")
                .long("aggregator-bin-path")
                .help("Sets the signature-aggregator binary")
                .required(false)
                .num_args(1)
                .default_value(DEFAULT_AGGREGATOR_BIN_PATH),
        )
        .arg(
            Arg::new("AGGREGATOR_DIR")
                .long("aggregator-dir")
                .help("Sets the directory for the aggregator config, run file and logs")
                .required(false)
                .num_args(1)
                .default_value(DEFAULT_AGGREGATOR_DIR),
        )
        .arg(
            Arg::new("AGGREGATOR_API_PORT")
                .long("aggregator-api-port")
                .help("Sets the aggregator API port")
                .required(false)
                .num_args(1)
                .value_parser(value_parser!(u16))
                .default_value("8080"),
        )
        .arg(skip_prompt())
}

#[derive(Debug, Clone)]
pub struct ConversionFlags {
    pub log_level: String,
    pub sidecar_file_path: String,
    pub network: String,
    pub network_id: u32,
    pub node_endpoint: String,
    pub l1_name: String,
    pub subnet_id: String,
    pub blockchain_id: String,
    pub manager_blockchain_id: String,
    pub manager_address: String,
    pub specialized_manager_address: String,
    pub owner_address: String,
    pub private_key_file_path: String,
    pub validators_file_path: String,
    pub validator_management: String,
    pub acp99: bool,
    pub manager_config_file_path: String,
    pub quorum_percentage: u64,
    pub rpc_url: String,
    pub c_chain_id: String,
    pub partial_tx_file_path: String,
    pub aggregator_bin_path: String,
    pub aggregator_dir: String,
    pub aggregator_api_port: u16,
    pub skip_prompt: bool,
}

fn string(m: &ArgMatches, id: &str) -> String {
    m.get_one::<String>(id).cloned().unwrap_or_default()
}

impl ConversionFlags {
    pub fn from_matches(m: &ArgMatches) -> Self {
        Self {
            log_level: m
                .get_one::<String>("LOG_LEVEL")
                .unwrap_or(&String::from("info"))
                .clone(),
            sidecar_file_path: string(m, "SIDECAR_FILE_PATH"),
            network: m
                .get_one::<String>("NETWORK")
                .unwrap_or(&String::from(DEFAULT_NETWORK))
                .clone(),
            network_id: *m.get_one::<u32>("NETWORK_ID").unwrap_or(&DEFAULT_NETWORK_ID),
            node_endpoint: m
                .get_one::<String>("NODE_ENDPOINT")
                .unwrap_or(&String::from(DEFAULT_NODE_ENDPOINT))
                .clone(),
            l1_name: string(m, "L1_NAME"),
            subnet_id: string(m, "SUBNET_ID"),
            blockchain_id: string(m, "BLOCKCHAIN_ID"),
            manager_blockchain_id: string(m, "MANAGER_BLOCKCHAIN_ID"),
            manager_address: string(m, "MANAGER_ADDRESS"),
            specialized_manager_address: string(m, "SPECIALIZED_MANAGER_ADDRESS"),
            owner_address: string(m, "OWNER_ADDRESS"),
            private_key_file_path: string(m, "PRIVATE_KEY_FILE_PATH"),
            validators_file_path: string(m, "VALIDATORS_FILE_PATH"),
            validator_management: m
                .get_one::<String>("VALIDATOR_MANAGEMENT")
                .unwrap_or(&String::from("poa"))
                .clone(),
            acp99: m.get_flag("ACP99"),
            manager_config_file_path: string(m, "MANAGER_CONFIG_FILE_PATH"),
            quorum_percentage: *m
                .get_one::<u64>("QUORUM_PERCENTAGE")
                .unwrap_or(&DEFAULT_QUORUM_PERCENTAGE),
            rpc_url: string(m, "RPC_URL"),
            c_chain_id: string(m, "C_CHAIN_ID"),
            partial_tx_file_path: m
                .get_one::<String>("PARTIAL_TX_FILE_PATH")
                .unwrap_or(&String::from("convert-tx.json"))
                .clone(),
            aggregator_bin_path: m
                .get_one::<String>("AGGREGATOR_BIN_PATH")
                .unwrap_or(&String::from(DEFAULT_AGGREGATOR_BIN_PATH))
                .clone(),
            aggregator_dir: m
                .get_one::<String>("AGGREGATOR_DIR")
                .unwrap_or(&String::from(DEFAULT_AGGREGATOR_DIR))
                .clone(),
            aggregator_api_port: *m
                .get_one::<u16>("AGGREGATOR_API_PORT")
                .unwrap_or(&DEFAULT_API_PORT),
            skip_prompt: m.get_flag("SKIP_PROMPT"),
        }
    }

    pub fn load_sidecar(&self) -> io::Result<Sidecar> {
        if Path::new(&self.sidecar_file_path).exists() {
            return Sidecar::load(&self.sidecar_file_path);
        }
        if self.l1_name.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "sidecar {} does not exist, set --l1-name to create one",
                    self.sidecar_file_path
                ),
            ));
        }
        Ok(Sidecar::new(&self.l1_name))
    }

    pub fn private_key(&self) -> io::Result<String> {
        let s = fs::read_to_string(&self.private_key_file_path).map_err(|e| {
            Error::new(
                ErrorKind::Other,
                format!("failed to read {} ({})", self.private_key_file_path, e),
            )
        })?;
        Ok(s.trim().to_string())
    }

    fn manager_config(&self, blockchain_id: &ids::Id) -> io::Result<ManagerConfig> {
        if !self.manager_config_file_path.is_empty() {
            let f = fs::File::open(&self.manager_config_file_path)?;
            return serde_yaml::from_reader(f).map_err(|e| {
                Error::new(ErrorKind::InvalidInput, format!("invalid YAML: {}", e))
            });
        }
        let generation = if self.acp99 {
            Generation::Acp99
        } else {
            Generation::V1
        };
        if self.validator_management == "pos" {
            let params = PoSParams {
                uptime_blockchain_id: blockchain_id.clone(),
                ..Default::default()
            };
            Ok(ManagerConfig::proof_of_stake(generation, params))
        } else {
            Ok(ManagerConfig::proof_of_authority(generation))
        }
    }

    /// Merges the flags with what the sidecar already records; flags win.
    pub fn request(&self, sidecar: &Sidecar) -> io::Result<ConversionRequest> {
        let recorded = sidecar.network(&self.network).cloned().unwrap_or_default();
        let pick = |flag: &str, recorded: &str| {
            if flag.is_empty() {
                recorded.to_string()
            } else {
                flag.to_string()
            }
        };

        let subnet_id = parse_id(&pick(&self.subnet_id, &recorded.subnet_id))?;
        let blockchain_id = parse_id(&pick(&self.blockchain_id, &recorded.blockchain_id))?;
        let manager_blockchain_id = parse_id(&pick(
            &self.manager_blockchain_id,
            &recorded.validator_manager_blockchain_id,
        ))?;
        let manager_chain = if manager_blockchain_id.is_empty() {
            blockchain_id.clone()
        } else {
            manager_blockchain_id.clone()
        };

        let explicit = StaticRpc(self.rpc_url.clone());
        let from_sidecar = SidecarRpc {
            sidecar: sidecar.clone(),
            network: self.network.clone(),
            network_endpoint: self.node_endpoint.clone(),
            c_chain_id: if self.c_chain_id.is_empty() {
                None
            } else {
                Some(parse_id(&self.c_chain_id)?)
            },
        };
        let rpc_url = rpc::resolve(&[&explicit, &from_sidecar], &manager_chain)?;

        let bootstrap_validators = bootstrap::load(&self.validators_file_path)?;

        Ok(ConversionRequest {
            name: sidecar.name.clone(),
            network: self.network.clone(),
            network_id: self.network_id,
            subnet_id,
            blockchain_id: blockchain_id.clone(),
            manager_blockchain_id,
            manager_address: pick(&self.manager_address, &recorded.validator_manager_address),
            specialized_manager_address: if self.specialized_manager_address.is_empty() {
                None
            } else {
                Some(self.specialized_manager_address.clone())
            },
            owner_address: self.owner_address.clone(),
            manager: self.manager_config(&blockchain_id)?,
            bootstrap_validators,
            quorum_percentage: self.quorum_percentage,
            rpc_url,
        })
    }

    /// Supervisor for an aggregator tracking `subnet_id`.
    pub fn supervisor(&self, subnet_id: &ids::Id) -> Supervisor {
        let mut config = AggregatorConfig::default_for(&self.node_endpoint, &[subnet_id.clone()]);
        config.log_level = self.log_level.clone();
        config.api_port = self.aggregator_api_port;
        aggregator_supervisor(&self.aggregator_bin_path, &self.aggregator_dir, config)
    }

    /// Command line that stops the aggregator [`Self::supervisor`] started.
    pub fn aggregator_stop_command(&self) -> String {
        format!(
            "{} {} --action stop --aggregator-bin-path {} --aggregator-dir {} --api-port {}",
            crate::APP_NAME,
            crate::signature_aggregator::NAME,
            self.aggregator_bin_path,
            self.aggregator_dir,
            self.aggregator_api_port
        )
    }
}

pub fn aggregator_supervisor(bin_path: &str, dir: &str, config: AggregatorConfig) -> Supervisor {
    let dir = Path::new(dir);
    let path = |name: &str| dir.join(name).display().to_string();
    Supervisor::new(bin_path, config, &path("config.json"), &path("run.json"))
        .with_log_path(&path("signature-aggregator.log"))
}

/// Empty input is the empty ID.
pub fn parse_id(s: &str) -> io::Result<ids::Id> {
    if s.is_empty() {
        return Ok(ids::Id::empty());
    }
    ids::Id::from_str(s)
        .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("invalid ID '{}' ({})", s, e)))
}
