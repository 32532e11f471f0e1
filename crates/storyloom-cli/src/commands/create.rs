use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use storyloom_core::config::RunConfig;
use storyloom_core::storage::ProjectDir;
use storyloom_core::Project;
use storyloom_export::{export_project, to_json, ExportError};
use storyloom_pipeline::bootstrap::{self, WorldSeed};
use storyloom_pipeline::{
    CancelFlag, OfflineStoryteller, OpenAiProvider, ProviderSettings, Providers, Runner,
    VoiceRuleJudge,
};

use crate::output::format::format_run_report;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct CreateArgs {
    /// World seed file (JSON: title, premise, locations, personas)
    #[arg(long, conflicts_with = "brief")]
    pub world: Option<PathBuf>,

    /// One-line brief for the designer agent when there is no seed file
    #[arg(long)]
    pub brief: Option<String>,

    /// Run configuration file (JSON); missing keys take defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Throw away the existing story and start over with the same cast
    #[arg(long)]
    pub fresh: bool,

    /// Use the built-in deterministic storyteller (no network)
    #[arg(long)]
    pub offline: bool,

    /// Concurrent scene pipelines per level
    #[arg(long)]
    pub workers: Option<usize>,

    /// Longest choice path from the opening scene
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Maximum number of scenes
    #[arg(long)]
    pub max_scenes: Option<usize>,

    #[command(flatten)]
    pub provider: ProviderArgs,
}

#[derive(Args)]
pub struct ProviderArgs {
    /// API key for the text and image endpoints (falls back to OPENAI_API_KEY)
    #[arg(long, env = "STORYLOOM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "STORYLOOM_BASE_URL")]
    pub base_url: Option<String>,

    /// Chat model
    #[arg(long, env = "STORYLOOM_MODEL")]
    pub model: Option<String>,

    /// Image model
    #[arg(long, env = "STORYLOOM_IMAGE_MODEL")]
    pub image_model: Option<String>,
}

impl ProviderArgs {
    fn settings(&self) -> ProviderSettings {
        ProviderSettings {
            api_key: self
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok()),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            image_model: self.image_model.clone(),
        }
    }
}

pub fn run(args: &CreateArgs, root: &Path, format: OutputFormat) -> Result<()> {
    let dir = ProjectDir::new(root);
    let _lock = dir
        .try_lock()
        .with_context(|| format!("Cannot open project in {}", root.display()))?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
    rt.block_on(create(args, &dir, format))
}

async fn create(args: &CreateArgs, dir: &ProjectDir, format: OutputFormat) -> Result<()> {
    let existing = if dir.exists() {
        Some(dir.load().context("Failed to load project")?)
    } else {
        None
    };
    let seeded = args.world.is_some() || args.brief.is_some();
    if seeded && existing.is_some() && !args.fresh {
        anyhow::bail!(
            "A story already exists in {}. Pass --fresh to replace it, or drop --world/--brief to resume.",
            dir.root().display()
        );
    }

    let mut config = match (&args.config, &existing) {
        (Some(path), _) => RunConfig::load(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        (None, Some(project)) => project.config.clone(),
        (None, None) => RunConfig::default_init(),
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(depth) = args.max_depth {
        config.max_depth = depth;
    }
    if let Some(scenes) = args.max_scenes {
        config.max_scenes = scenes;
    }
    config.validate().context("Invalid run configuration")?;

    let providers = build_providers(args, dir, &config)?;

    let mut project = match (seed(args, &providers).await?, existing) {
        (Some(seed), _) => seed
            .into_project(config)
            .context("Failed to bootstrap project")?,
        (None, Some(mut project)) => {
            if args.fresh {
                project.reset();
            }
            project.config = config;
            project
        }
        (None, None) => anyhow::bail!(
            "No story in {}. Pass --world <file> or --brief <text> to start one.",
            dir.root().display()
        ),
    };
    dir.save(&project).context("Failed to save project")?;
    println!(
        "{} {:?} ({} persona(s), {} scene(s) so far)",
        if seeded || args.fresh { "Created" } else { "Resuming" },
        project.world.title,
        project.personas.len(),
        project.graph.len()
    );

    let report = generate(&providers, &mut project, dir).await?;
    print!("{}", format_run_report(&report, format));
    if report.cancelled {
        return Ok(());
    }
    if !report.failures.is_empty() {
        anyhow::bail!(
            "{} scene(s) exhausted their retries; see `storyloom status`",
            report.failures.len()
        );
    }

    write_export(&project, dir)
}

async fn seed(args: &CreateArgs, providers: &Providers) -> Result<Option<WorldSeed>> {
    if let Some(path) = &args.world {
        let seed = WorldSeed::load(path)
            .with_context(|| format!("Failed to read world seed {}", path.display()))?;
        return Ok(Some(seed));
    }
    match &args.brief {
        Some(brief) => {
            let seed = bootstrap::design(providers, brief)
                .await
                .context("Designer could not produce a world")?;
            Ok(Some(seed))
        }
        None => Ok(None),
    }
}

fn build_providers(args: &CreateArgs, dir: &ProjectDir, config: &RunConfig) -> Result<Providers> {
    let judge = Arc::new(VoiceRuleJudge);
    let timeout = config.provider_timeout();
    if args.offline {
        let offline = Arc::new(OfflineStoryteller::with_assets(dir.clone()));
        return Ok(Providers::new(offline.clone(), offline, judge, timeout));
    }
    let remote = Arc::new(
        OpenAiProvider::new(&args.provider.settings(), dir.clone())
            .context("Failed to configure the model provider")?,
    );
    tracing::info!("Using model {}", remote.model());
    Ok(Providers::new(remote.clone(), remote, judge, timeout))
}

async fn generate(
    providers: &Providers,
    project: &mut Project,
    dir: &ProjectDir,
) -> Result<storyloom_pipeline::RunReport> {
    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted: stopping after the current level");
            on_interrupt.cancel();
        }
    });

    let runner = Runner::new(providers.clone()).with_cancel(cancel);
    let result = runner.run(project, |p| dir.save(p)).await;
    dir.save(project).context("Failed to save project")?;
    result.context("Generation run failed")
}

fn write_export(project: &Project, dir: &ProjectDir) -> Result<()> {
    let game = match export_project(project) {
        Ok(game) => game,
        Err(ExportError::IncompleteGraph { nodes }) => {
            let ids: Vec<&str> = nodes.iter().map(|n| n.as_str()).collect();
            anyhow::bail!("Story is incomplete, nothing exported. Unfinished: {}", ids.join(", "));
        }
        Err(e) => return Err(e).context("Export failed"),
    };
    let path = dir
        .write_export(&to_json(&game)?)
        .context("Failed to write game file")?;
    println!(
        "Exported {} scene(s) to {}",
        game.scenes.len(),
        path.display()
    );
    Ok(())
}
