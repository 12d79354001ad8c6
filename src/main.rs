mod commands;

use cache_machine::config::Config;
use cache_machine::logging;
use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cache-machine")]
#[command(about = "Entity-bound read-through cache over a SQLite post store")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cache-machine/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Entity database to use
  #[arg(short, long)]
  database: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override database if specified on command line
  let config = if let Some(database) = args.database {
    Config {
      database: Some(database),
      ..config
    }
  } else {
    config
  };

  let _guard = logging::init(&config.log)?;

  let workspace = commands::Workspace::open(&config)?;
  workspace.run(args.command)
}
