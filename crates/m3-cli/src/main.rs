use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{AppContext, datasets, init, query, serve};

#[derive(Parser, Debug)]
#[command(name = "m3", version, about = "MIMIC-IV for MCP agents")]
struct Cli {
    /// Configuration file. Defaults to `<data_dir>/m3.yaml` when present.
    #[arg(short, long, global = true, env = "M3_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download, convert and catalog a dataset, then make it active.
    Init {
        /// Dataset name, e.g. mimic-iv-demo
        dataset: String,
    },

    /// Make an already initialized dataset active.
    Use {
        dataset: String,
    },

    /// Show the active dataset and what is on disk for each dataset.
    Status {
        /// Print the report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List known dataset definitions.
    Datasets {
        /// Print the list as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Run one read-only query against the active dataset.
    Query {
        sql: String,
    },

    /// Serve the query tools over MCP (stdio).
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout is reserved for command output and MCP messages.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = AppContext::load(cli.config.as_deref())?;

    match cli.cmd {
        Command::Init { dataset } => init::run_init(&ctx, &dataset).await?,
        Command::Use { dataset } => datasets::run_use(&ctx, &dataset).await?,
        Command::Status { json } => datasets::run_status(&ctx, json)?,
        Command::Datasets { json } => datasets::run_list(&ctx, json)?,
        Command::Query { sql } => query::run_query(&ctx, &sql).await?,
        Command::Serve => serve::run_serve(&ctx).await?,
    }

    Ok(())
}
