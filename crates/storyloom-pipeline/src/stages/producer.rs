use async_trait::async_trait;
use storyloom_core::graph::{ChoiceTarget, NodeStub, ProposedChoice, TopologyProposal};
use storyloom_core::model::{NodeId, NodeStatus};

use super::{provider_failure, Draft, Stage, StageContext};
use crate::error::StageError;
use crate::provider::{AgentRole, RequestHints, TextRequest};
use crate::script::{parse_producer, TargetSpec};

const NAME: &str = "producer";
const MAX_MERGE_CANDIDATES: usize = 8;

const SYSTEM: &str = "You are the producer of a branching visual novel. You decide what \
happens in one scene and which choices the player gets at its end. Reply only with markup:
<summary>one or two sentences describing the scene</summary>
<scene>where it takes place</scene>
<choice target=\"new:short-key\" premise=\"what the new scene is about\">choice label</choice>
<choice target=\"existing:node-id\">choice label</choice>
A choice may carry requires=\"e3\" (the player took choice e3), \"!e3\" (did not), \
\"e1,e2\" (all) or \"e1|e2\" (any). Omit <choice> entirely when the scene is an ending.";

/// Plans the scene and proposes its outgoing choices. The only stage whose
/// output affects topology.
#[derive(Debug, Clone, Default)]
pub struct Producer;

impl Producer {
    /// Pending scenes this node may link to instead of inventing a new one.
    fn merge_candidates(ctx: &StageContext) -> Vec<&NodeId> {
        ctx.snapshot
            .graph
            .nodes()
            .filter(|n| n.status == NodeStatus::Pending && n.id != ctx.generation.node)
            .map(|n| &n.id)
            .take(MAX_MERGE_CANDIDATES)
            .collect()
    }

    fn prompt(ctx: &StageContext) -> String {
        let mut prompt = ctx.world_brief();
        prompt.push('\n');
        prompt.push_str(&ctx.generation.render());
        prompt.push('\n');
        if ctx.choice_budget == 0 {
            prompt.push_str("This scene is an ending: do not propose any choices.\n");
        } else {
            prompt.push_str(&format!(
                "Propose between 1 and {} choices.\n",
                ctx.choice_budget
            ));
            let candidates = Self::merge_candidates(ctx);
            if !candidates.is_empty() {
                prompt.push_str("Scenes you may link to with existing:<id>:\n");
                for id in candidates {
                    let premise = ctx
                        .snapshot
                        .graph
                        .node(id)
                        .map(|n| n.premise.as_str())
                        .unwrap_or_default();
                    prompt.push_str(&format!("- {id}: {premise}\n"));
                }
            }
        }
        prompt
    }
}

#[async_trait]
impl Stage for Producer {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, mut draft: Draft, ctx: &StageContext) -> Result<Draft, StageError> {
        let request = TextRequest::new(AgentRole::Producer, SYSTEM, Self::prompt(ctx))
            .with_temperature(0.9)
            .with_hints(RequestHints {
                node: Some(ctx.generation.node.clone()),
                personas: ctx.snapshot.personas.ids().cloned().collect(),
                locations: ctx.snapshot.world.locations.clone(),
                max_choices: ctx.choice_budget,
                summary: Some(ctx.generation.premise.clone()),
                line: None,
            });
        let text = ctx
            .providers
            .generate_text(&request)
            .await
            .map_err(provider_failure(NAME))?;
        let script =
            parse_producer(&text).map_err(|source| StageError::Script { stage: NAME, source })?;

        if script.choices.len() > ctx.choice_budget {
            return Err(StageError::integrity(
                NAME,
                format!(
                    "proposed {} choice(s) but the run budget allows {}",
                    script.choices.len(),
                    ctx.choice_budget
                ),
            ));
        }

        draft.content.summary = script.summary;
        draft.content.location = script.location;
        draft.proposal = TopologyProposal {
            choices: script
                .choices
                .into_iter()
                .map(|c| ProposedChoice {
                    label: c.label,
                    target: match c.target {
                        TargetSpec::New { key, premise } => ChoiceTarget::New(NodeStub {
                            key: (!key.is_empty()).then_some(key),
                            premise,
                        }),
                        TargetSpec::Existing(id) => ChoiceTarget::Existing(id),
                    },
                    precondition: c.requires,
                })
                .collect(),
        };
        tracing::debug!(
            "Producer planned {} with {} choice(s)",
            draft.node,
            draft.proposal.choices.len()
        );
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;

    #[tokio::test]
    async fn test_producer_builds_proposal() {
        let text = testkit::ScriptedText::new().push(
            AgentRole::Producer,
            r#"<summary>Hana waits.</summary><scene>gate</scene>
<choice target="new:library">Follow her</choice>
<choice target="new:">Go home</choice>"#,
        );
        let (project, root) = testkit::project();
        let ctx = testkit::context(project, &root, text, 3);
        let draft = Producer.run(Draft::new(root.clone(), 1), &ctx).await.unwrap();
        assert_eq!(draft.content.summary, "Hana waits.");
        assert_eq!(draft.content.location.as_deref(), Some("gate"));
        assert_eq!(draft.proposal.new_stub_count(), 2);
        match &draft.proposal.choices[1].target {
            ChoiceTarget::New(stub) => assert!(stub.key.is_none()),
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_choices_over_budget_are_integrity_errors() {
        let text = testkit::ScriptedText::new().push(
            AgentRole::Producer,
            r#"<summary>The end?</summary><choice target="new:more">Continue</choice>"#,
        );
        let (project, root) = testkit::project();
        let ctx = testkit::context(project, &root, text, 0);
        let err = Producer.run(Draft::new(root, 1), &ctx).await.unwrap_err();
        assert!(matches!(err, StageError::ContentIntegrity { stage: "producer", .. }));
    }

    #[tokio::test]
    async fn test_missing_summary_is_script_error() {
        let text = testkit::ScriptedText::new().push(AgentRole::Producer, "no markup at all");
        let (project, root) = testkit::project();
        let ctx = testkit::context(project, &root, text, 2);
        let err = Producer.run(Draft::new(root, 1), &ctx).await.unwrap_err();
        assert!(matches!(err, StageError::Script { .. }));
    }
}
