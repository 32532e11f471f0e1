//! Core data model for Storyloom: personas, the branch graph of scenes and
//! choices, the generation scheduler, ending rules, and the project
//! aggregate that ties them together on disk.

pub mod config;
pub mod ending;
pub mod error;
pub mod graph;
pub mod model;
pub mod persona_store;
pub mod project;
pub mod scheduler;
pub mod storage;

pub use error::CoreError;
pub use graph::BranchGraph;
pub use persona_store::PersonaStore;
pub use project::Project;
