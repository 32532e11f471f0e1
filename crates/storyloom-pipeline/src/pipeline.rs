use crate::error::StageError;
use crate::stages::{Actor, Artist, Draft, Producer, Stage, StageContext, Writer};

/// Fixed, ordered list of stages run for every node attempt.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl Pipeline {
    /// Producer, Writer, Actor, Artist.
    pub fn standard() -> Self {
        Self::with_stages(vec![
            Box::new(Producer),
            Box::new(Writer),
            Box::new(Actor),
            Box::new(Artist),
        ])
    }

    pub fn with_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order for the node described by `ctx`. The first
    /// failing stage ends the attempt.
    pub async fn process(&self, ctx: &StageContext) -> Result<Draft, StageError> {
        let mut draft = Draft::new(ctx.generation.node.clone(), ctx.generation.attempt);
        for stage in &self.stages {
            tracing::debug!("{} stage on {}", stage.name(), draft.node);
            draft = stage.run(draft, ctx).await.inspect_err(|e| {
                tracing::warn!("Attempt {} on {} failed: {e}", ctx.generation.attempt, ctx.generation.node);
            })?;
        }
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AgentRole;
    use crate::testkit;

    #[tokio::test]
    async fn test_standard_pipeline_offline() {
        let (project, root) = testkit::project();
        let ctx = testkit::context(project, &root, testkit::ScriptedText::new(), 2);
        let pipeline = Pipeline::standard();
        assert_eq!(pipeline.stage_names(), vec!["producer", "writer", "actor", "artist"]);

        let draft = pipeline.process(&ctx).await.unwrap();
        assert_eq!(draft.node, root);
        assert_eq!(draft.proposal.choices.len(), 2);
        assert!(!draft.content.dialogue.is_empty());
        assert!(draft
            .content
            .dialogue
            .iter()
            .filter(|l| l.speaker.is_some())
            .all(|l| l.pose.is_some()));
        assert!(!draft.new_assets.is_empty());
    }

    #[tokio::test]
    async fn test_first_failing_stage_stops_the_attempt() {
        let text = testkit::ScriptedText::new()
            .push(AgentRole::Producer, "<summary>s</summary>")
            .push(AgentRole::Writer, r#"<content id="ghost">Boo.</content>"#);
        let (project, root) = testkit::project();
        let ctx = testkit::context(project, &root, text.clone(), 0);
        let err = Pipeline::standard().process(&ctx).await.unwrap_err();
        assert_eq!(err.stage(), "writer");
        assert_eq!(text.calls(AgentRole::Actor), 0);
    }
}
