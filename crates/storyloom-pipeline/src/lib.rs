//! Scene generation for Storyloom.
//!
//! Every pending scene runs through four stages (producer, writer, actor,
//! artist), then the auditor decides whether the draft joins the graph. The
//! [`runner`] drives this level by level until the story is complete.

pub mod auditor;
pub mod bootstrap;
pub mod context;
pub mod error;
pub mod judge;
pub mod pipeline;
pub mod provider;
pub mod runner;
pub mod script;
pub mod stages;

#[cfg(test)]
mod testkit;

pub use auditor::{Auditor, Verdict};
pub use bootstrap::WorldSeed;
pub use error::{PipelineError, ProviderError, StageError};
pub use judge::{PersonaJudge, VoiceRuleJudge};
pub use pipeline::Pipeline;
pub use provider::{OfflineStoryteller, OpenAiProvider, ProviderSettings, Providers};
pub use runner::{CancelFlag, RunReport, Runner};
