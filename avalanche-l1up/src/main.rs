mod commit_tx;
mod convert;
mod flags;
mod get_conversion_message;
mod init_validator_manager;
mod signature_aggregator;

use std::io;

use clap::{crate_version, Command};

const APP_NAME: &str = "avalanche-l1up";

/// Every subcommand can be re-run: finished steps are detected and skipped.
#[tokio::main]
async fn main() -> io::Result<()> {
    let matches = Command::new(APP_NAME)
        .version(crate_version!())
        .about("Avalanche subnet-to-L1 conversion and validator manager tools")
        .subcommands(vec![
            convert::command(),
            init_validator_manager::command(),
            get_conversion_message::command(),
            commit_tx::command(),
            signature_aggregator::command(),
        ])
        .get_matches();

    match matches.subcommand() {
        Some((convert::NAME, sub_matches)) => {
            let opts = flags::ConversionFlags::from_matches(sub_matches);
            convert::execute(
                opts,
                &sub_matches
                    .get_one::<String>("CONVERT_TX_FILE_PATH")
                    .unwrap_or(&String::new())
                    .clone(),
            )
            .await?;
        }

        Some((init_validator_manager::NAME, sub_matches)) => {
            let opts = flags::ConversionFlags::from_matches(sub_matches);
            init_validator_manager::execute(opts).await?;
        }

        Some((get_conversion_message::NAME, sub_matches)) => {
            get_conversion_message::execute(
                &sub_matches
                    .get_one::<String>("LOG_LEVEL")
                    .unwrap_or(&String::from("info"))
                    .clone(),
                &sub_matches
                    .get_one::<String>("SIDECAR_FILE_PATH")
                    .unwrap_or(&String::new())
                    .clone(),
                &sub_matches
                    .get_one::<String>("NETWORK")
                    .unwrap_or(&String::from(flags::DEFAULT_NETWORK))
                    .clone(),
                *sub_matches
                    .get_one::<u32>("NETWORK_ID")
                    .unwrap_or(&flags::DEFAULT_NETWORK_ID),
                &sub_matches
                    .get_one::<String>("VALIDATORS_FILE_PATH")
                    .unwrap_or(&String::new())
                    .clone(),
            )
            .await?;
        }

        Some((commit_tx::NAME, sub_matches)) => {
            commit_tx::execute(
                &sub_matches
                    .get_one::<String>("LOG_LEVEL")
                    .unwrap_or(&String::from("info"))
                    .clone(),
                &sub_matches
                    .get_one::<String>("TX_FILE_PATH")
                    .unwrap_or(&String::new())
                    .clone(),
                &sub_matches
                    .get_one::<String>("NODE_ENDPOINT")
                    .unwrap_or(&String::from(flags::DEFAULT_NODE_ENDPOINT))
                    .clone(),
                sub_matches.get_flag("SKIP_PROMPT"),
            )
            .await?;
        }

        Some((signature_aggregator::NAME, sub_matches)) => {
            let s = sub_matches
                .get_one::<String>("SUBNET_IDS")
                .unwrap_or(&String::new())
                .clone();
            let subnet_ids: Vec<String> = s
                .split(',')
                .map(|x| x.trim().to_string())
                .filter(|x| !x.is_empty())
                .collect();

            signature_aggregator::execute(signature_aggregator::Options {
                log_level: sub_matches
                    .get_one::<String>("LOG_LEVEL")
                    .unwrap_or(&String::from("info"))
                    .clone(),
                action: sub_matches
                    .get_one::<String>("ACTION")
                    .unwrap_or(&String::from("status"))
                    .clone(),
                bin_path: sub_matches
                    .get_one::<String>("AGGREGATOR_BIN_PATH")
                    .unwrap_or(&String::from(flags::DEFAULT_AGGREGATOR_BIN_PATH))
                    .clone(),
                dir: sub_matches
                    .get_one::<String>("AGGREGATOR_DIR")
                    .unwrap_or(&String::from(flags::DEFAULT_AGGREGATOR_DIR))
                    .clone(),
                node_endpoint: sub_matches
                    .get_one::<String>("NODE_ENDPOINT")
                    .unwrap_or(&String::from(flags::DEFAULT_NODE_ENDPOINT))
                    .clone(),
                api_port: *sub_matches
                    .get_one::<u16>("API_PORT")
                    .unwrap_or(&avalanche_l1::aggregator::DEFAULT_API_PORT),
                subnet_ids,
            })
            .await?;
        }

        _ => unreachable!("unknown subcommand"),
    }

    Ok(())
}
