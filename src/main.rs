//! StencilOpt Command Line Interface
//!
//! Usage:
//!   stencilopt --threads <N> [OPTIONS] <input-file>
//!   stencilopt --help
//!
//! Examples:
//!   stencilopt --threads 8 matmul.json            # Stencil with 8 threads
//!   stencilopt --threads 4 --emit=json gemm.json  # Emit transformed IR as JSON
//!   stencilopt --threads 8 -vv matmul.json        # Debug-level search logging

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, info};
use std::fs;
use std::path::PathBuf;

use stencilopt::ir::FuncOp;
use stencilopt::transform::stencil::GemmStencilPass;
use stencilopt::transform::Transform;
use stencilopt::utils::print_func;

/// StencilOpt - stencil-matching loop-nest optimizer
#[derive(Parser, Debug)]
#[command(name = "stencilopt")]
#[command(version)]
#[command(about = "Rewrites multiply-accumulate loop nests into tiled kernel calls", long_about = None)]
struct Cli {
    /// Input function in JSON form
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Number of parallel execution units to amortize outer loops across
    #[arg(long)]
    threads: usize,

    /// What to emit
    #[arg(long, default_value = "ir")]
    emit: EmitKind,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// Textual IR
    Ir,
    /// JSON IR (round-trips through the loader)
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("StencilOpt v{}", stencilopt::VERSION);
    debug!("Input file: {:?}", cli.input);

    // Read input function
    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read input file: {:?}", cli.input))?;
    let mut func: FuncOp = serde_json::from_str(&source)
        .with_context(|| format!("Failed to parse function from {:?}", cli.input))?;

    // The pass refuses to run without a positive thread count.
    let pass = GemmStencilPass::new(cli.threads)?;
    info!("Running {} over {} band(s)...", pass.name(), func.bands.len());
    let changed = pass.apply(&mut func)?;
    if changed {
        info!("Function rewritten");
    } else {
        info!("No band matched; function unchanged");
    }

    let output = match cli.emit {
        EmitKind::Ir => print_func(&func),
        EmitKind::Json => serde_json::to_string_pretty(&func)?,
    };
    write_output(&cli.output, &output)
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content).with_context(|| format!("Failed to write output: {:?}", p))?
        }
        None => println!("{}", content),
    }
    Ok(())
}
