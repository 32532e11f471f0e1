use std::path::Path;

use anyhow::{Context, Result};
use storyloom_core::Project;
use storyloom_export::{export_project, from_json, to_json, validate};

use super::open_project;
use crate::output::OutputFormat;

pub fn run(root: &Path, format: OutputFormat) -> Result<()> {
    let (dir, project) = open_project(root)?;

    project
        .graph
        .validate()
        .context("Story graph is structurally invalid")?;
    check_persona_refs(&project)?;

    let game = export_project(&project).context("Story cannot be exported")?;
    validate(&game).context("Exported game is not self-contained")?;

    let on_disk = if dir.export_path().is_file() {
        let text = dir.read_export()?;
        let saved = from_json(&text).context("game.json is not valid game data")?;
        validate(&saved).context("game.json is not self-contained")?;
        Some(text == to_json(&game)?)
    } else {
        None
    };

    match format {
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "valid": true,
                "scenes": game.scenes.len(),
                "personas": game.personas.len(),
                "poses": game.poses.len(),
                "export_up_to_date": on_disk,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Text => {
            println!("\u{2713} graph is acyclic and every scene is reachable");
            println!("\u{2713} every persona reference resolves");
            println!(
                "\u{2713} {} scene(s) audited and exportable ({} ending(s))",
                game.scenes.len(),
                game.scenes.iter().filter(|s| s.is_ending()).count()
            );
            match on_disk {
                Some(true) => println!("\u{2713} game.json is up to date"),
                Some(false) => println!("! game.json differs from the project; run `storyloom create` to refresh it"),
                None => println!("! game.json has not been written yet"),
            }
        }
    }
    Ok(())
}

fn check_persona_refs(project: &Project) -> Result<()> {
    for node in project.graph.nodes() {
        let Some(content) = &node.content else {
            continue;
        };
        for line in &content.dialogue {
            if let Some(speaker) = &line.speaker {
                project
                    .personas
                    .require(speaker)
                    .with_context(|| format!("Scene {} has a line by {speaker}", node.id))?;
            }
        }
        for change in &content.state_changes {
            if !project.personas.contains(&change.persona) {
                anyhow::bail!(
                    "Scene {} changes state of unknown persona {}",
                    node.id,
                    change.persona
                );
            }
        }
        for change in &content.affection {
            if !project.personas.contains(&change.persona) {
                anyhow::bail!(
                    "Scene {} changes affection of unknown persona {}",
                    node.id,
                    change.persona
                );
            }
        }
    }
    Ok(())
}
