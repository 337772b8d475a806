//! weave CLI
//!
//! - `weave prog.gm` runs the program once with a round-robin schedule
//! - `weave -i prog.gm` steps threads interactively
//! - `weave -e prog.gm` explores every interleaving

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use weave::explorer::write_finding_graphs;
use weave::{interpret, interpret_interactive, model_check, parse, Explorer, ExplorerConfig};

#[derive(Parser, Debug)]
#[command(name = "weave")]
#[command(about = "Interpreter and model checker for a small lock-based concurrent language")]
#[command(version)]
struct Cli {
    /// Program to run
    input: PathBuf,

    /// Where to write the execution graph (.dot/.gv for Graphviz, else Mermaid)
    #[arg(short, long, default_value = "graph.md")]
    output: PathBuf,

    /// Step threads interactively
    #[arg(short, long, conflicts_with = "explore")]
    interactive: bool,

    /// Explore all interleavings
    #[arg(short, long)]
    explore: bool,

    /// Give up exploring after this many transitions
    #[arg(long, requires = "explore")]
    max_states: Option<usize>,

    /// Give up exploring traces longer than this
    #[arg(long, requires = "explore")]
    max_depth: Option<usize>,

    /// Stop exploring at the first violation or deadlock
    #[arg(long, requires = "explore")]
    stop_at_first: bool,

    /// Print the exploration report as JSON
    #[arg(long, requires = "explore")]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn explore(cli: &Cli, program: weave::Program, out: &mut dyn Write) -> Result<i32> {
    let config = ExplorerConfig {
        max_states: cli.max_states,
        max_depth: cli.max_depth,
        stop_at_first: cli.stop_at_first,
    };
    if !cli.json {
        return Ok(model_check(&program, &cli.output, config, out)?);
    }

    let mut report = Explorer::new(program, config).explore()?;
    serde_json::to_writer_pretty(&mut *out, &report).context("failed to serialize report")?;
    writeln!(out)?;
    write_finding_graphs(&mut report, &cli.output).context("failed to write execution graphs")?;
    Ok(report.exit_code())
}

fn run(cli: &Cli) -> Result<i32> {
    let source = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let program = parse(&source).with_context(|| format!("failed to parse {}", cli.input.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let code = if cli.explore {
        explore(cli, program, &mut out)?
    } else if cli.interactive {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        interpret_interactive(&program, &cli.output, &mut input, &mut out)?
    } else {
        interpret(&program, &cli.output, &mut out)?
    };
    Ok(code)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(err) => {
            error!("{:#}", err);
            eprintln!("error: {:#}", err);
            ExitCode::from(2)
        }
    }
}
