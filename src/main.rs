//! Herald CLI entry point.

use clap::Parser;

use herald::cli::commands::serve::Mode;
use herald::cli::commands::{config, render, serve};
use herald::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Controller(args) => serve::execute(Mode::Controller, args, config_path).await,
        Commands::Webhook(args) => serve::execute(Mode::Webhook, args, config_path).await,
        Commands::Run(args) => serve::execute(Mode::All, args, config_path).await,
        Commands::Config(args) => config::execute(args, config_path, cli.json).await,
        Commands::Render(args) => render::execute(args, cli.json).await,
    };

    if let Err(err) = result {
        herald::cli::handle_error(err, cli.json);
    }
}
