use std::path::Path;

use anyhow::Result;
use clap::Args;
use storyloom_export::to_dot;

use super::open_project;
use crate::output::format::format_graph;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct GraphArgs {
    /// Output DOT format for Graphviz
    #[arg(long)]
    pub dot: bool,
}

pub fn run(args: &GraphArgs, root: &Path, format: OutputFormat) -> Result<()> {
    let (_, project) = open_project(root)?;
    if args.dot {
        print!("{}", to_dot(&project.graph));
        return Ok(());
    }
    print!("{}", format_graph(&project.graph, format));
    if matches!(format, OutputFormat::Json) {
        println!();
    }
    Ok(())
}
