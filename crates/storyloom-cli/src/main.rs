use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(
    name = "storyloom",
    version,
    about = "Generate branching visual novels as a consistency-checked story graph"
)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: output::OutputFormat,

    /// Project directory
    #[arg(
        short = 'C',
        long,
        global = true,
        env = "STORYLOOM_PROJECT",
        default_value = "."
    )]
    project: PathBuf,

    #[command(subcommand)]
    command: commands::Commands,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        commands::Commands::Create(args) => commands::create::run(args, &cli.project, cli.format),
        commands::Commands::Play(args) => commands::play::run(args, &cli.project),
        commands::Commands::Status => commands::status::run(&cli.project, cli.format),
        commands::Commands::Graph(args) => commands::graph::run(args, &cli.project, cli.format),
        commands::Commands::Validate => commands::validate::run(&cli.project, cli.format),
    }
}
