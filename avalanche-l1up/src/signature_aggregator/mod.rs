use std::{
    io::{self, stdout, Error, ErrorKind},
    str::FromStr,
};

use avalanche_l1::aggregator::{supervisor::RunFile, AggregatorConfig};
use avalanche_types::ids;
use clap::{value_parser, Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};

use crate::flags;

pub const NAME: &str = "signature-aggregator";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Starts, stops, or inspects the local signature aggregator")
        .arg(flags::log_level())
        .arg(
            Arg::new("ACTION")
                .long("action")
                .help("Sets the action")
                .required(false)
                .num_args(1)
                .value_parser(["start", "stop", "status"])
                .default_value("status"),
        )
        .arg(
            Arg::new("AGGREGATOR_BIN_PATH")
                .long("aggregator-bin-path")
                .help("Sets the signature-aggregator binary")
                .required(false)
                .num_args(1)
                .default_value(flags::DEFAULT_AGGREGATOR_BIN_PATH),
        )
        .arg(
            Arg::new("AGGREGATOR_DIR")
                .long("aggregator-dir")
                .help("Sets the directory for the aggregator config, run file and logs")
                .required(false)
                .num_args(1)
                .default_value(flags::DEFAULT_AGGREGATOR_DIR),
        )
        .arg(flags::node_endpoint())
        .arg(
            Arg::new("API_PORT")
                .long("api-port")
                .help("Sets the aggregator API port")
                .required(false)
                .num_args(1)
                .value_parser(value_parser!(u16))
                .default_value("8080"),
        )
        .arg(
            Arg::new("SUBNET_IDS")
                .long("subnet-ids")
                .help("Sets the comma-separated subnet IDs to track")
                .required(false)
                .num_args(1),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub log_level: String,
    pub action: String,
    pub bin_path: String,
    pub dir: String,
    pub node_endpoint: String,
    pub api_port: u16,
    pub subnet_ids: Vec<String>,
}

pub async fn execute(opts: Options) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, &opts.log_level),
    );

    let mut subnet_ids = Vec::new();
    for s in opts.subnet_ids.iter() {
        let id = ids::Id::from_str(s).map_err(|e| {
            Error::new(ErrorKind::InvalidInput, format!("invalid subnet ID '{}' ({})", s, e))
        })?;
        subnet_ids.push(id);
    }

    let mut config = AggregatorConfig::default_for(&opts.node_endpoint, &subnet_ids);
    config.log_level = opts.log_level.clone();
    config.api_port = opts.api_port;
    let supervisor = flags::aggregator_supervisor(&opts.bin_path, &opts.dir, config);

    match opts.action.as_str() {
        "start" => {
            let handle = supervisor.start().await?;
            execute!(
                stdout(),
                SetForegroundColor(Color::Green),
                Print(format!(
                    "\nsignature aggregator {} ready at {}\n",
                    handle.pid, handle.endpoint
                )),
                ResetColor
            )?;
        }
        "stop" => {
            supervisor.stop().await?;
            execute!(
                stdout(),
                SetForegroundColor(Color::Green),
                Print("\nsignature aggregator stopped\n"),
                ResetColor
            )?;
        }
        _ => match RunFile::load(&supervisor.run_file_path)? {
            Some(run) => {
                let ready = supervisor.is_ready().await?;
                println!(
                    "signature aggregator pid {} on port {} (config {}): {}",
                    run.pid,
                    run.api_port,
                    run.config_path,
                    if ready { "ready" } else { "not ready" }
                );
            }
            None => println!("signature aggregator is not running"),
        },
    }

    Ok(())
}
