mod cli;
mod ops;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    snapback::logging::init(cli.verbose);

    if let Commands::Version = cli.command {
        ops::do_version();
        return Ok(());
    }

    let settings = ops::load_settings(&cli)?;
    match cli.command {
        Commands::Create { kind } => {
            ops::do_create(&settings, kind.into())?;
        }
        Commands::Rollback { artifact, kind } => {
            ops::do_rollback(&settings, &artifact, kind.map(Into::into))?;
        }
        Commands::Size { kind } => {
            ops::do_size(&settings, kind.into())?;
        }
        Commands::List => {
            ops::do_list(&settings)?;
        }
        Commands::Version => {}
    }

    Ok(())
}
