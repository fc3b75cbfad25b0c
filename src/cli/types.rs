//! CLI type definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::commands::{config::ConfigArgs, render::RenderArgs, serve::ServeArgs};

#[derive(Parser)]
#[command(name = "herald")]
#[command(about = "Herald - email and contact convergence engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to herald.yaml + herald.local.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run all reconcilers
    Controller(ServeArgs),

    /// Run the webhook receiver
    Webhook(ServeArgs),

    /// Run reconcilers and the webhook receiver over one shared store
    Run(ServeArgs),

    /// Load, validate and print the effective configuration
    Config(ConfigArgs),

    /// Render an EmailTemplate manifest for preview
    Render(RenderArgs),
}
