pub mod project_dir;

pub use project_dir::{ProjectDir, ProjectLock};
