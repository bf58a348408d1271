use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::error;

use snapflow::logger::init_tracing;
use snapflow::{GraphBuilder, config, status};

#[derive(Parser, Debug)]
#[command(
    name = "snapflow",
    about = "Run a declarative streaming pipeline node",
    version
)]
struct Cli {
    /// Pipeline configuration file (YAML)
    config: PathBuf,

    /// Node to run from the configuration
    #[arg(short = 'n', long, default_value = "main")]
    node: String,

    /// Answer liveness requests on this address (e.g. tcp://0.0.0.0:5999)
    #[arg(short = 'S', long)]
    status_address: Option<String>,

    /// Log level override (e.g. error, warn, info, debug, trace)
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Also write daily-rolling logs into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli.log_level, cli.log_dir.as_deref()) {
        eprintln!("cannot initialise logging: {e:#}");
        process::exit(2);
    }

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let doc = config::load_file(&cli.config).await?;
    let node = GraphBuilder::new().build(&doc, &cli.node)?;

    // A status responder that cannot bind is fatal before any chain runs.
    let responder = match &cli.status_address {
        Some(addr) => Some(status::status_server(addr, status::fixed("OK")).await?),
        None => None,
    };

    let outcome = node.run().await;

    if let Some(handle) = responder {
        handle.abort();
    }
    Ok(outcome?)
}
