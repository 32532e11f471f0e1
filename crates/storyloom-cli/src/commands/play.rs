use std::collections::{HashSet, VecDeque};
use std::io::{BufRead, Write};
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use clap::Args;
use storyloom_core::ending::Affection;
use storyloom_core::model::EdgeId;
use storyloom_core::storage::ProjectDir;
use storyloom_export::serialize::{Choice, GameData};
use storyloom_export::{from_json, validate};

#[derive(Args)]
pub struct PlayArgs {
    /// Renderer command; the game file path is appended as its last argument
    #[arg(long)]
    pub renderer: Option<String>,

    /// Choices to take in order (1-based), instead of asking on stdin
    #[arg(long, value_delimiter = ',')]
    pub choose: Vec<usize>,
}

pub fn run(args: &PlayArgs, root: &Path) -> Result<()> {
    let dir = ProjectDir::new(root);
    let text = dir
        .read_export()
        .context("No exported game found. Run `storyloom create` first.")?;
    let game = from_json(&text).context("Failed to parse game file")?;
    validate(&game).context("Game file is not playable")?;

    if let Some(renderer) = &args.renderer {
        return launch(renderer, &dir.export_path());
    }

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    walk(
        &game,
        args.choose.iter().copied().collect(),
        &mut stdin.lock(),
        &mut stdout.lock(),
    )
}

fn launch(renderer: &str, game_path: &Path) -> Result<()> {
    let mut parts = renderer.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("--renderer must not be empty"))?;
    let status = Command::new(program)
        .args(parts)
        .arg(game_path)
        .status()
        .with_context(|| format!("Failed to start renderer {program}"))?;
    if !status.success() {
        anyhow::bail!("Renderer exited with {status}");
    }
    Ok(())
}

/// Built-in text player. Picks come from `picks` first, then from `input`;
/// running out of input ends the session. Affection gathered along the way
/// decides the ending.
fn walk(
    game: &GameData,
    mut picks: VecDeque<usize>,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "== {} ==", game.title)?;
    let mut taken: HashSet<EdgeId> = HashSet::new();
    let mut affection = Affection::new();
    let mut current = game.start.clone();
    loop {
        let scene = game
            .scene(&current)
            .ok_or_else(|| anyhow::anyhow!("Scene {current} is missing from the game file"))?;
        writeln!(out)?;
        if let Some(location) = &scene.location {
            writeln!(out, "[{location}]")?;
        }
        for line in &scene.dialogue {
            match line.speaker.as_ref().and_then(|s| game.persona(s)) {
                Some(persona) => writeln!(out, "{} ({}): {}", persona.name, line.emotion, line.text)?,
                None => writeln!(out, "  {}", line.text)?,
            }
        }
        affection.apply(&scene.affection);

        let open: Vec<&Choice> = scene
            .choices
            .iter()
            .filter(|c| c.precondition.as_ref().map_or(true, |p| p.evaluate(&taken)))
            .collect();
        if open.is_empty() {
            writeln!(out, "\n-- The End --")?;
            let kind = game.endings.classify(&affection);
            match affection.highest() {
                Some((id, value)) => {
                    let name = game
                        .personas
                        .iter()
                        .find(|p| &p.id == id)
                        .map_or(id.as_str(), |p| p.name.as_str());
                    writeln!(out, "Ending: {kind} (closest to {name}, affection {value})")?;
                }
                None => writeln!(out, "Ending: {kind}")?,
            }
            return Ok(());
        }
        for (i, choice) in open.iter().enumerate() {
            writeln!(out, "  {}) {}", i + 1, choice.label)?;
        }

        let choice = loop {
            let pick = match picks.pop_front() {
                Some(pick) => pick,
                None => {
                    write!(out, "> ")?;
                    out.flush()?;
                    let mut line = String::new();
                    if input.read_line(&mut line)? == 0 {
                        writeln!(out, "\n(stopped)")?;
                        return Ok(());
                    }
                    match line.trim().parse() {
                        Ok(pick) => pick,
                        Err(_) => {
                            writeln!(out, "Enter a number between 1 and {}", open.len())?;
                            continue;
                        }
                    }
                }
            };
            match pick.checked_sub(1).and_then(|i| open.get(i)) {
                Some(choice) => break *choice,
                None => writeln!(out, "Enter a number between 1 and {}", open.len())?,
            }
        };
        writeln!(out, "> {}", choice.label)?;
        taken.insert(choice.id.clone());
        current = choice.target_id.clone();
    }
}
