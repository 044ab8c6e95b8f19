use std::io::{self, stdout};

use avalanche_l1::pchain::{self, jsonrpc, IssueOptions, MultisigTx};
use clap::{Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use dialoguer::{theme::ColorfulTheme, Select};

use crate::flags;

pub const NAME: &str = "commit-tx";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Issues a fully signed P-Chain tx and waits for it to be committed")
        .arg(flags::log_level())
        .arg(
            Arg::new("TX_FILE_PATH")
                .long("tx-file-path")
                .help("Sets the signed tx file")
                .required(true)
                .num_args(1),
        )
        .arg(flags::node_endpoint())
        .arg(flags::skip_prompt())
}

pub async fn execute(
    log_level: &str,
    tx_file_path: &str,
    node_endpoint: &str,
    skip_prompt: bool,
) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let tx = MultisigTx::from_file(tx_file_path)?;
    if !tx.is_ready_to_commit() {
        execute!(
            stdout(),
            SetForegroundColor(Color::Red),
            Print(format!(
                "\ntx {} still needs signatures from {:?}\n",
                tx.tx_id,
                tx.remaining_auth_signers()
            )),
            ResetColor
        )?;
        return Ok(());
    }

    if !skip_prompt {
        let options = &[
            format!("No, I am not ready to commit tx {} via {}", tx.tx_id, node_endpoint),
            format!("Yes, let's commit tx {} via {}", tx.tx_id, node_endpoint),
        ];
        let selected = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select your 'commit' option")
            .items(&options[..])
            .default(0)
            .interact()?;
        if selected == 0 {
            return Ok(());
        }
    } else {
        log::info!("skipping prompt...")
    }

    let client = jsonrpc::Client::new(node_endpoint)?;
    let tx_id = pchain::commit(&client, &tx, &IssueOptions::default()).await?;

    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print(format!("\ncommitted tx {}\n", tx_id)),
        ResetColor
    )?;
    Ok(())
}
