use anyhow::Result;
use clap::Parser;
use dockspace::cli::{self, Commands};
use dockspace::commands;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Only use colors when outputting to a TTY (not when piped to file)
    let use_color = atty::is(atty::Stream::Stdout);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(true)
        .with_ansi(use_color)
        .init();

    let result = match cli.cmd {
        Commands::Check => commands::cmd_check(&cli.config).await,
        Commands::Target(args) => commands::cmd_target(args).await,
        Commands::Workspace(args) => commands::cmd_workspace(&cli.config, args).await,
        Commands::Project(args) => commands::cmd_project(&cli.config, args).await,
    };

    if let Err(e) = &result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }

    result
}
