//! shopgraph Command-Line Client
//!
//! Seeds a sample shop store, shows the fetch plan chosen for a projection
//! request and runs projections against the store.

mod commands;
mod formatter;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use commands::{Overrides, RequestSource};
use formatter::OutputFormat;

/// shopgraph Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "shopgraph")]
#[command(version, about = "Plan and run aggregate projections over the shop graph")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Output format
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write the sample shop data to a store
    Seed {
        /// Store directory
        #[arg(short = 'd', long, default_value = "./shopgraph_data")]
        data_path: PathBuf,
    },

    /// Show the entity graph
    Schema,

    /// Show the fetch plan for a request without running it
    Plan {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Run a projection and print the DTOs
    Project {
        /// Store directory; a seeded in-memory store is used when omitted
        #[arg(short = 'd', long)]
        data_path: Option<PathBuf>,

        #[command(flatten)]
        request: RequestArgs,

        /// Request timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print fetch metrics after the results
        #[arg(long)]
        stats: bool,
    },
}

#[derive(clap::Args, Debug)]
pub struct RequestArgs {
    /// Named request preset
    #[arg(short = 'p', long, default_value = "orders", conflicts_with = "request")]
    pub preset: String,

    /// Projection request as a JSON file
    #[arg(short = 'r', long)]
    pub request: Option<PathBuf>,

    /// Projector configuration as a JSON file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Root ids per collection round trip
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Maximum independent collection steps
    #[arg(long)]
    pub max_collections: Option<usize>,
}

impl RequestArgs {
    fn source(&self) -> RequestSource {
        match &self.request {
            Some(path) => RequestSource::File(path.clone()),
            None => RequestSource::Preset(self.preset.clone()),
        }
    }

    fn overrides(&self, timeout_ms: Option<u64>) -> Overrides {
        Overrides {
            config: self.config.clone(),
            batch_size: self.batch_size,
            max_collections: self.max_collections,
            timeout_ms,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shopgraph_cli=info,shopgraph_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<String, commands::CliError> {
    let formatter = formatter::create_formatter(args.format);

    match args.command {
        Command::Seed { data_path } => commands::seed(&data_path),
        Command::Schema => commands::schema(&*formatter),
        Command::Plan { request } => {
            let plan = commands::plan(&request.source(), &request.overrides(None))?;
            Ok(plan.explain())
        }
        Command::Project {
            data_path,
            request,
            timeout_ms,
            stats,
        } => {
            commands::project(
                data_path.as_deref(),
                &request.source(),
                &request.overrides(timeout_ms),
                &*formatter,
                stats,
            )
            .await
        }
    }
}
