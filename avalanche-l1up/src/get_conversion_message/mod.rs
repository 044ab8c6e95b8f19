use std::io::{self, stdout, Error, ErrorKind};

use avalanche_l1::{bootstrap, orchestrator, sidecar::Sidecar};
use clap::Command;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};

use crate::flags;

pub const NAME: &str = "get-conversion-message";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Prints the unsigned SubnetToL1Conversion warp message of an L1")
        .arg(flags::log_level())
        .arg(flags::sidecar_file_path(true))
        .arg(flags::network())
        .arg(flags::network_id())
        .arg(flags::validators_file_path())
}

pub async fn execute(
    log_level: &str,
    sidecar_file_path: &str,
    network: &str,
    network_id: u32,
    validators_file_path: &str,
) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    let sidecar = Sidecar::load(sidecar_file_path)?;
    let d = sidecar.network(network).ok_or_else(|| {
        Error::new(
            ErrorKind::NotFound,
            format!("network '{}' not found in {}", network, sidecar_file_path),
        )
    })?;
    let validators = bootstrap::load(validators_file_path)?;

    let (data, msg) = orchestrator::conversion_message(
        network_id,
        d.subnet_id()?,
        d.manager_blockchain_id()?,
        d.manager_address()?,
        &validators,
    )?;

    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print(format!("\nconversion ID: {}\n", data.conversion_id())),
        ResetColor
    )?;
    println!("message ID: {}", msg.id());
    println!("unsigned message:\n{}", msg.to_hex());

    Ok(())
}
