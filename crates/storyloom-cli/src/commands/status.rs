use std::path::Path;

use anyhow::{Context, Result};
use storyloom_export::StatusReport;

use super::open_project;
use crate::output::OutputFormat;

pub fn run(root: &Path, format: OutputFormat) -> Result<()> {
    let (dir, project) = open_project(root)?;
    let report = StatusReport::build(&project).context("Failed to analyze the story graph")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            print!("{}", report.to_text());
            if dir.export_path().is_file() {
                println!("Export:   {}", dir.export_path().display());
            } else if report.is_complete() {
                println!("Export:   not written yet (run `storyloom create`)");
            }
        }
    }
    Ok(())
}
