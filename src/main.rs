use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use ghidra_context::config::{load_config, CONTEXT_PATH_ENV, DEFAULT_CONTEXT_FILENAME};
use ghidra_context::document::{load_document, write_document};
use ghidra_context::extraction::{ContextExtractor, SnapshotProgram};
use ghidra_context::mcp::McpServer;
use ghidra_context::service::ContextService;

/// Ghidra context export and query service.
#[derive(Parser)]
#[command(
    name = "ghidra-context",
    about = "Export Ghidra analysis into a context document and serve lookups over MCP"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server on stdio
    Serve {
        /// Base directory holding .ghidra-context (default: current directory)
        #[arg(short, long)]
        path: Option<String>,
    },
    /// Run one headless extraction and print a summary
    Setup {
        /// Ghidra installation directory
        engine: PathBuf,
        /// Binary to analyze
        binary: PathBuf,
        /// Base directory holding .ghidra-context (default: current directory)
        #[arg(short, long)]
        path: Option<String>,
    },
    /// Build a context document from a program snapshot
    Extract {
        /// Program snapshot (JSON)
        snapshot: PathBuf,
        /// Output path (default: $GHIDRA_CONTEXT_JSON, else ghidra_context.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Per-function decompile budget in seconds (default: from config)
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Base directory holding .ghidra-context (default: current directory)
        #[arg(short, long)]
        path: Option<String>,
    },
    /// Show what a context document contains
    Status {
        /// Context document
        document: PathBuf,
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> ghidra_context::errors::Result<()> {
    match cli.command {
        Commands::Serve { path } => {
            let base = resolve_path(path);
            let config = load_config(&base)?;
            let server = McpServer::new(ContextService::new(config));
            server.run().await?;
        }
        Commands::Setup {
            engine,
            binary,
            path,
        } => {
            let base = resolve_path(path);
            let config = load_config(&base)?;
            let service = ContextService::new(config);
            let summary = service.setup(&engine, &binary)?;
            println!(
                "Context loaded for '{}': {} functions, {} structures, {} enums, {} function definitions in {}ms",
                summary.binary_name,
                summary.stats.function_count,
                summary.stats.structure_count,
                summary.stats.enum_count,
                summary.stats.function_definition_count,
                summary.duration_ms
            );
            if summary.decompile_failures > 0 {
                println!(
                    "  {} functions without pseudocode",
                    summary.decompile_failures
                );
            }
            println!("  Document: {}", service.config().context_path.display());
        }
        Commands::Extract {
            snapshot,
            output,
            timeout,
            path,
        } => {
            let config = load_config(&resolve_path(path))?;
            let budget = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.decompile_timeout());
            let output = output.unwrap_or_else(default_output_path);
            let program = SnapshotProgram::open(&snapshot)?;
            let extractor = ContextExtractor::new(budget);
            let result = extractor.extract(&program);
            write_document(&output, &result.document)?;
            println!(
                "Extracted {} functions ({} without pseudocode), skipped {} data types in {}ms",
                result.document.functions.len(),
                result.decompile_failures,
                result.skipped_types,
                result.duration_ms
            );
            println!("  Document: {}", output.display());
        }
        Commands::Status { document, json } => {
            let (doc, hash) = load_document(&document)?;
            let stats = doc.stats();
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "program": doc.program,
                        "content_hash": hash,
                        "stats": stats,
                    }))?
                );
            } else {
                println!("Context Document");
                println!("  Program:              {}", doc.program);
                println!("  Functions:            {}", stats.function_count);
                println!("  Structures:           {}", stats.structure_count);
                println!("  Enums:                {}", stats.enum_count);
                println!("  Function definitions: {}", stats.function_definition_count);
                println!("  SHA-256:              {}", hash);
            }
        }
    }
    Ok(())
}

/// Resolves an optional path argument, defaulting to the current directory.
fn resolve_path(path: Option<String>) -> PathBuf {
    match path {
        Some(p) => PathBuf::from(p),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Output path for `extract` when none is given on the command line.
fn default_output_path() -> PathBuf {
    std::env::var_os(CONTEXT_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTEXT_FILENAME))
}
