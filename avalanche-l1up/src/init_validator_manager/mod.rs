use std::io;

use clap::Command;

use crate::{
    convert,
    flags::{self, ConversionFlags},
};

pub const NAME: &str = "init-validator-manager";

pub fn command() -> Command {
    flags::conversion_args(
        Command::new(NAME)
            .about("Initializes the validator manager and validator set of a converted L1"),
    )
}

pub async fn execute(opts: ConversionFlags) -> io::Result<()> {
    convert::run(opts, None, "initialize the validator manager of").await
}
