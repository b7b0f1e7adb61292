use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use log::info;

mod convert;
mod input;
mod separate;

use convert::ConvertArgs;
use separate::SeparateArgs;

#[derive(Parser, Debug)]
#[command(
    name = "obj2citygml",
    version,
    about = "Split building OBJ exports by footprint and convert them to CityGML"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match mesh groups to footprints and write one OBJ per building
    Separate(SeparateArgs),
    /// Build a CityGML document for every per-building mesh in a directory
    Convert(ConvertArgs),
}

fn main() -> Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Separate(args) => {
            separate::run(&args)?;
        }
        Command::Convert(args) => {
            let summary = convert::run(&args)?;
            if !summary.failed.is_empty() {
                bail!(
                    "{} of {} file(s) failed",
                    summary.failed.len(),
                    summary.failed.len() + summary.written + summary.skipped
                );
            }
            info!("{} document(s) written, {} skipped", summary.written, summary.skipped);
        }
    }

    Ok(())
}
