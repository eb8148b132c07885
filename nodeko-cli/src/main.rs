use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "nodeko")]
#[command(about = "Build and publish Node.js container images without a Dockerfile", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and publish container images from the given paths
    Publish {
        /// Paths to Node.js application directories
        #[arg(required = true)]
        paths: Vec<String>,

        /// Tags to apply to the published images
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Directory the paths are resolved against
        #[arg(short = 'B', long, default_value = ".")]
        base_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Publish { paths, tags, base_dir } => {
            commands::publish::publish(&base_dir, &paths, tags).await
        }
    }
}
