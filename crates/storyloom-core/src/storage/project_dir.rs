use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::project::Project;

const PROJECT_FILE: &str = "project.json";
const EXPORT_FILE: &str = "game.json";
const LOCK_FILE: &str = ".storyloom.lock";
const ASSETS_DIR: &str = "assets";

/// On-disk layout of a story project:
///
/// ```text
/// <root>/project.json   full working state (personas, graph, catalog, config)
/// <root>/game.json      player-facing export
/// <root>/assets/        generated images, named by content hash
/// ```
#[derive(Debug, Clone)]
pub struct ProjectDir {
    root: PathBuf,
}

/// Exclusive hold on a project directory for the lifetime of a run.
/// Released when dropped.
#[derive(Debug)]
pub struct ProjectLock {
    file: fs::File,
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

impl ProjectDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_path(&self) -> PathBuf {
        self.root.join(PROJECT_FILE)
    }

    pub fn export_path(&self) -> PathBuf {
        self.root.join(EXPORT_FILE)
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join(ASSETS_DIR)
    }

    pub fn exists(&self) -> bool {
        self.project_path().is_file()
    }

    /// Create the directory tree if needed.
    pub fn init(&self) -> Result<(), CoreError> {
        fs::create_dir_all(self.assets_dir())?;
        Ok(())
    }

    /// Take the run lock without blocking. Fails if another process holds it.
    pub fn try_lock(&self) -> Result<ProjectLock, CoreError> {
        self.init()?;
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(LOCK_FILE))?;
        fs2::FileExt::try_lock_exclusive(&file).map_err(|e| {
            CoreError::Config(format!(
                "project {} is in use by another run: {e}",
                self.root.display()
            ))
        })?;
        Ok(ProjectLock { file })
    }

    pub fn load(&self) -> Result<Project, CoreError> {
        let path = self.project_path();
        if !path.is_file() {
            return Err(CoreError::ProjectNotFound(self.root.display().to_string()));
        }
        let data = fs::read_to_string(&path)?;
        let project: Project = serde_json::from_str(&data)?;
        tracing::debug!(
            "Loaded project {} ({} scenes, {} personas)",
            project.id,
            project.graph.len(),
            project.personas.len()
        );
        Ok(project)
    }

    /// Write `project.json` through a temp file and rename, so a crash never
    /// leaves a truncated project behind.
    pub fn save(&self, project: &Project) -> Result<(), CoreError> {
        let json = serde_json::to_string_pretty(project)?;
        self.write_atomic(&self.project_path(), json.as_bytes())?;
        tracing::debug!("Saved project {}", project.id);
        Ok(())
    }

    pub fn write_export(&self, json: &str) -> Result<PathBuf, CoreError> {
        let path = self.export_path();
        self.write_atomic(&path, json.as_bytes())?;
        Ok(path)
    }

    pub fn read_export(&self) -> Result<String, CoreError> {
        let path = self.export_path();
        if !path.is_file() {
            return Err(CoreError::ProjectNotFound(path.display().to_string()));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// Store image bytes under `assets/<name>`. Returns the path relative to
    /// the project root, which is what asset references hold.
    pub fn write_asset(&self, name: &str, bytes: &[u8]) -> Result<String, CoreError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(CoreError::InvalidId(format!("bad asset file name {name:?}")));
        }
        fs::create_dir_all(self.assets_dir())?;
        let path = self.assets_dir().join(name);
        if !path.exists() {
            self.write_atomic(&path, bytes)?;
        }
        Ok(format!("{ASSETS_DIR}/{name}"))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
        fs::create_dir_all(&self.root)?;
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
