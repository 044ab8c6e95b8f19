use std::io::{self, stdout};

use avalanche_l1::{
    health::HttpNodeHealth,
    orchestrator::{Collaborators, ConversionState, Orchestrator, OrchestratorOptions},
    pchain::{jsonrpc, FileWallet, PChainWallet},
    validator_manager::evm::EvmBackend,
};
use clap::{Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use dialoguer::{theme::ColorfulTheme, Select};

use crate::flags::{self, ConversionFlags};

pub const NAME: &str = "convert";

pub fn command() -> Command {
    flags::conversion_args(
        Command::new(NAME)
            .about("Converts a subnet to an L1 and initializes its validator manager"),
    )
    .arg(
        Arg::new("CONVERT_TX_FILE_PATH")
            .long("convert-tx-file-path")
            .help("Sets the signed ConvertSubnetToL1Tx file (not needed once the subnet is converted)")
            .required(false)
            .num_args(1),
    )
}

pub async fn execute(opts: ConversionFlags, convert_tx_file_path: &str) -> io::Result<()> {
    if convert_tx_file_path.is_empty() {
        run(opts, None, "convert").await
    } else {
        let wallet = FileWallet::new(convert_tx_file_path);
        run(opts, Some(&wallet), "convert").await
    }
}

/// Runs the conversion flow; without a wallet an unconverted subnet is an error.
pub async fn run(
    opts: ConversionFlags,
    wallet: Option<&dyn PChainWallet>,
    action: &str,
) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, &opts.log_level),
    );

    let sidecar = opts.load_sidecar()?;
    let req = opts.request(&sidecar)?;

    execute!(
        stdout(),
        SetForegroundColor(Color::Blue),
        Print(format!(
            "\nloaded conversion request for '{}' on {}\n",
            req.name, req.network
        )),
        ResetColor
    )?;
    println!(
        "subnet {}\nblockchain {}\nvalidator manager {} ({:?}, {:?})\nowner {}\nRPC {}\n",
        req.subnet_id,
        req.blockchain_id,
        req.manager_address,
        req.manager.kind(),
        req.manager.generation,
        req.owner_address,
        req.rpc_url
    );

    if !opts.skip_prompt {
        let options = &[
            format!(
                "No, I am not ready to {action} subnet {} ({} bootstrap validators)",
                req.subnet_id,
                req.bootstrap_validators.len()
            ),
            format!(
                "Yes, let's {action} subnet {} ({} bootstrap validators)",
                req.subnet_id,
                req.bootstrap_validators.len()
            ),
        ];
        let selected = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Select your '{action}' option"))
            .items(&options[..])
            .default(0)
            .interact()?;
        if selected == 0 {
            return Ok(());
        }
    } else {
        log::info!("skipping prompt...")
    }

    let supervisor = opts.supervisor(&req.subnet_id);
    let aggregator = supervisor.start().await?;
    log::info!(
        "signature aggregator {} running at {}",
        aggregator.pid,
        aggregator.endpoint
    );

    let private_key = opts.private_key()?;
    let contract = EvmBackend::new(&req.rpc_url, &private_key).await?;
    let pchain = jsonrpc::Client::new(&opts.node_endpoint)?;
    let health = HttpNodeHealth::new(&[opts.node_endpoint.clone()])?;

    let mut orchestrator = Orchestrator::new(
        req,
        Collaborators {
            wallet,
            pchain: &pchain,
            contract: &contract,
            aggregator: &aggregator.client,
            health: &health,
        },
        OrchestratorOptions {
            partial_tx_path: opts.partial_tx_file_path.clone(),
            sidecar_path: Some(opts.sidecar_file_path.clone()),
            ..Default::default()
        },
    )?;
    let result = orchestrator.run().await;
    println!(
        "\n# signature aggregator (pid {}) is still running at {}, stop it with\n{}\n",
        aggregator.pid,
        aggregator.endpoint,
        opts.aggregator_stop_command()
    );
    let state = result?;

    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print(format!("\n'{}' is {}\n", orchestrator.request().name, state)),
        ResetColor
    )?;
    if state == ConversionState::ConvertedPendingSignatures {
        println!(
            "# collect the remaining signatures on the conversion tx, then commit it\n{} commit-tx --tx-file-path {} --node-endpoint {}\n",
            crate::APP_NAME,
            opts.partial_tx_file_path,
            opts.node_endpoint
        );
    }

    Ok(())
}
