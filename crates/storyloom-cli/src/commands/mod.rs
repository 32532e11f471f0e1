pub mod create;
pub mod graph;
pub mod play;
pub mod status;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use storyloom_core::storage::ProjectDir;
use storyloom_core::Project;

#[derive(Subcommand)]
pub enum Commands {
    /// Bootstrap a story (or resume one), generate every scene and export it
    Create(create::CreateArgs),
    /// Play the exported game in the terminal or hand it to a renderer
    Play(play::PlayArgs),
    /// Show generation progress, levels, endings and failures
    Status,
    /// Show the branch graph
    Graph(graph::GraphArgs),
    /// Check the project graph and the exported game for consistency
    Validate,
}

fn open_project(root: &Path) -> Result<(ProjectDir, Project)> {
    let dir = ProjectDir::new(root);
    if !dir.exists() {
        anyhow::bail!(
            "No story project in {}. Run `storyloom create` first.",
            root.display()
        );
    }
    let project = dir.load().context("Failed to load project")?;
    Ok((dir, project))
}
