//! # Tenant RAG CLI (`trag`)
//!
//! ## Usage
//!
//! ```bash
//! trag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trag serve` | Start the HTTP server |
//! | `trag ingest <tenant> <file>` | Build (or replace) a tenant's index from a spreadsheet |
//! | `trag query <tenant> "<text>"` | Answer a question from a tenant's index |
//! | `trag remove <tenant>` | Delete a tenant and all its data |
//! | `trag tenants` | List tenants with a live index |
//! | `trag files <tenant>` | List the source files behind a tenant's index |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tenant_rag::config::load_config;
use tenant_rag::server::run_server;
use tenant_rag::service::RagService;

/// Multi-tenant retrieval-augmented generation over uploaded spreadsheets.
#[derive(Parser)]
#[command(name = "trag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Build or replace a tenant's index from a .csv, .tsv or .xlsx file.
    Ingest {
        tenant: String,
        file: PathBuf,
    },

    /// Answer a question from a tenant's index.
    Query {
        tenant: String,
        text: String,

        /// Ask for a single reference URL instead of a free-form answer.
        #[arg(long)]
        link: bool,

        /// Also print the retrieved context records.
        #[arg(long)]
        show_context: bool,
    },

    /// Delete a tenant's index and stored files.
    Remove { tenant: String },

    /// List tenants with a live index.
    Tenants,

    /// List the source files behind a tenant's index.
    Files { tenant: String },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    if let Commands::Serve = cli.command {
        let runtime = tokio::runtime::Runtime::new()?;
        return runtime.block_on(run_server(&cfg));
    }

    // The remaining commands run synchronously; provider clients are blocking.
    let service = RagService::from_config(&cfg)?;

    match cli.command {
        Commands::Serve => {}
        Commands::Ingest { tenant, file } => {
            let summary = service.ingest_path(&tenant, &file)?;
            println!(
                "Indexed {} records for tenant '{}' ({}, {} dims).",
                summary.records, summary.tenant, summary.model, summary.dims
            );
        }
        Commands::Query {
            tenant,
            text,
            link,
            show_context,
        } => {
            let answer = if link {
                service.query_reference_link(&tenant, &text)?
            } else {
                service.query(&tenant, &text)?
            };
            println!("{}", answer.text);
            if show_context {
                println!();
                for (i, item) in answer.context.iter().enumerate() {
                    let origin = &item.record.origin;
                    let location = match &origin.sheet {
                        Some(sheet) => format!("{}:{}#{}", origin.source, sheet, origin.row),
                        None => format!("{}#{}", origin.source, origin.row),
                    };
                    println!("{}. [{:.2}] {}", i + 1, item.score, location);
                    for line in item.record.text.lines() {
                        println!("    {}", line);
                    }
                }
            }
        }
        Commands::Remove { tenant } => {
            service.remove_tenant(&tenant)?;
            println!("Removed tenant '{}'.", tenant);
        }
        Commands::Tenants => {
            let tenants = service.list_tenants()?;
            if tenants.is_empty() {
                println!("No tenants.");
            }
            for tenant in tenants {
                println!("{}", tenant);
            }
        }
        Commands::Files { tenant } => {
            for file in service.list_tenant_source_files(&tenant)? {
                println!("{}", file);
            }
        }
    }

    Ok(())
}
