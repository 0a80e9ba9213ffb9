use anyhow::Result;
use clap::Parser;
use tracing::Level;

mod cli;

use cli::{Cli, Commands};
use podlock::config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    podlock::logging::init(level, cli.log_format);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::CreateContainer(args) => cli::container::create(args, &config).await,
        Commands::RemoveContainer(args) => cli::container::remove(args, &config).await,
        Commands::Install(args) => cli::install::run(args, &config),
        Commands::Status => cli::status::run(&config),
    }
}
