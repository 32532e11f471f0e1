//! Run orchestration: dependency levels, bounded worker pool, serial commit,
//! retries and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use storyloom_core::model::{NodeId, NodeStatus, Rejection, RejectionKind};
use storyloom_core::project::Progress;
use storyloom_core::{scheduler, CoreError, Project};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::auditor::{Auditor, Verdict};
use crate::context::GenerationContext;
use crate::error::{PipelineError, StageError};
use crate::pipeline::Pipeline;
use crate::provider::Providers;
use crate::stages::{Draft, StageContext};

/// Cooperative stop request, checked between levels.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A node that exhausted its retry budget, with everything that went wrong.
#[derive(Debug, Clone, Serialize)]
pub struct NodeFailure {
    pub node: NodeId,
    pub premise: String,
    pub attempts: u32,
    pub trail: Vec<Rejection>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub levels: usize,
    pub attempts: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Nodes reset because a previous run stopped mid-attempt.
    pub recovered: usize,
    pub failures: Vec<NodeFailure>,
    /// Pending nodes that cannot run because an ancestor failed.
    pub blocked: Vec<NodeId>,
    pub cancelled: bool,
    pub progress: Progress,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failures.is_empty() && self.progress.is_complete()
    }
}

pub struct Runner {
    providers: Providers,
    pipeline: Arc<Pipeline>,
    auditor: Auditor,
    cancel: CancelFlag,
}

impl Runner {
    pub fn new(providers: Providers) -> Self {
        let auditor = Auditor::new(Arc::clone(&providers.judge));
        Self {
            providers,
            pipeline: Arc::new(Pipeline::standard()),
            auditor,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Generate every reachable pending scene. `checkpoint` is called with the
    /// project after each level so an interrupted run can resume.
    pub async fn run<F>(&self, project: &mut Project, mut checkpoint: F) -> Result<RunReport, PipelineError>
    where
        F: FnMut(&Project) -> Result<(), CoreError>,
    {
        project.config.validate()?;
        project.ensure_root()?;
        project.graph.validate()?;

        let mut report = RunReport {
            recovered: project.recover_interrupted()?,
            ..Default::default()
        };
        if report.recovered > 0 {
            tracing::warn!("Recovered {} interrupted node(s)", report.recovered);
        }

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Run cancelled after {} level(s)", report.levels);
                report.cancelled = true;
                break;
            }
            requeue_rejected(project)?;
            let ready = scheduler::ready(&project.graph)?;
            if ready.is_empty() {
                break;
            }
            report.levels += 1;
            tracing::info!("Level {}: generating {} scene(s)", report.levels, ready.len());

            let budgets = allocate_budgets(project, &ready)?;
            for id in &ready {
                project.graph.require_mut(id)?.begin_attempt()?;
            }
            let snapshot = Arc::new(project.clone());
            let results = self.run_level(snapshot, &ready, &budgets).await?;
            for (id, result) in ready.iter().zip(results) {
                self.commit(project, id, result, &mut report)?;
            }

            project.touch();
            checkpoint(project)?;
        }

        report.failures = failures(project);
        report.blocked = blocked(project)?;
        report.progress = project.progress();
        for failure in &report.failures {
            tracing::error!(
                "{} failed after {} attempt(s); last reason: {}",
                failure.node,
                failure.attempts,
                failure.trail.last().map(|r| r.reason.as_str()).unwrap_or("unknown")
            );
        }
        Ok(report)
    }

    async fn run_level(
        &self,
        snapshot: Arc<Project>,
        ready: &[NodeId],
        budgets: &[usize],
    ) -> Result<Vec<Result<Draft, StageError>>, PipelineError> {
        let permits = Arc::new(Semaphore::new(snapshot.config.workers.max(1)));
        let mut workers = JoinSet::new();
        for (index, (id, &budget)) in ready.iter().zip(budgets).enumerate() {
            let ctx = StageContext {
                generation: GenerationContext::build(&snapshot, id)?,
                snapshot: Arc::clone(&snapshot),
                providers: self.providers.clone(),
                choice_budget: budget,
            };
            let pipeline = Arc::clone(&self.pipeline);
            let permits = Arc::clone(&permits);
            workers.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (index, pipeline.process(&ctx).await)
            });
        }

        let mut results: Vec<Option<Result<Draft, StageError>>> =
            ready.iter().map(|_| None).collect();
        while let Some(joined) = workers.join_next().await {
            let (index, result) = joined.map_err(|e| PipelineError::Worker(e.to_string()))?;
            results[index] = Some(result);
        }
        results
            .into_iter()
            .zip(ready)
            .map(|(result, id)| {
                result.ok_or_else(|| PipelineError::Worker(format!("no result for {id}")))
            })
            .collect()
    }

    /// Audit one finished attempt against the live project and either commit
    /// it or record the rejection.
    fn commit(
        &self,
        project: &mut Project,
        id: &NodeId,
        result: Result<Draft, StageError>,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        report.attempts += 1;
        let draft = match result {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!("Rejected {id}: {e}");
                project
                    .graph
                    .require_mut(id)?
                    .reject(RejectionKind::ContentIntegrity, e.to_string())?;
                report.rejected += 1;
                return Ok(());
            }
        };

        project.graph.require_mut(id)?.store_draft(draft.content.clone())?;
        let verdict = self
            .auditor
            .audit(&project.graph, &project.personas, &project.assets, &draft);
        let (kind, reason) = match verdict {
            Verdict::Accept => match project.graph.apply(id, &draft.proposal) {
                Ok(targets) => {
                    for entry in draft.new_assets {
                        let pose = entry.pose.clone();
                        if !project.assets.insert(entry) {
                            tracing::debug!("Pose {pose} was cached by another scene first");
                        }
                    }
                    for entry in draft.new_backgrounds {
                        let location = entry.location.clone();
                        if !project.assets.insert_background(entry) {
                            tracing::debug!("Background {location:?} was cached by another scene first");
                        }
                    }
                    project.graph.require_mut(id)?.freeze()?;
                    report.accepted += 1;
                    tracing::info!("Accepted {id} with {} choice(s)", targets.len());
                    return Ok(());
                }
                Err(e) => (RejectionKind::ConsistencyViolation, e.to_string()),
            },
            Verdict::Reject { kind, reason } => (kind, reason),
        };
        project.graph.require_mut(id)?.reject(kind, reason)?;
        report.rejected += 1;
        Ok(())
    }
}

/// Rejected nodes go back to the queue, or to Failed once out of retries.
fn requeue_rejected(project: &mut Project) -> Result<(), CoreError> {
    let max_retries = project.config.max_retries;
    let rejected: Vec<NodeId> = project
        .graph
        .nodes()
        .filter(|n| n.status == NodeStatus::Rejected)
        .map(|n| n.id.clone())
        .collect();
    for id in rejected {
        let node = project.graph.require_mut(&id)?;
        match node.requeue(max_retries)? {
            NodeStatus::Failed => tracing::error!("{id} failed after {} attempt(s)", node.attempts),
            _ => tracing::info!("Retrying {id} (attempt {})", node.attempts + 1),
        }
    }
    Ok(())
}

/// Split the remaining scene budget across the ready nodes in scheduler
/// order. Nodes at the depth limit get no choices and become endings.
fn allocate_budgets(project: &Project, ready: &[NodeId]) -> Result<Vec<usize>, CoreError> {
    let config = &project.config;
    let mut remaining = config.max_scenes.saturating_sub(project.graph.len());
    ready
        .iter()
        .map(|id| {
            let budget = if project.graph.depth(id)? >= config.max_depth {
                0
            } else {
                config.max_choices.min(remaining)
            };
            remaining -= budget;
            Ok(budget)
        })
        .collect()
}

fn failures(project: &Project) -> Vec<NodeFailure> {
    project
        .graph
        .nodes()
        .filter(|n| n.status == NodeStatus::Failed)
        .map(|n| NodeFailure {
            node: n.id.clone(),
            premise: n.premise.clone(),
            attempts: n.attempts,
            trail: n.rejections.clone(),
        })
        .collect()
}

fn blocked(project: &Project) -> Result<Vec<NodeId>, CoreError> {
    let graph = &project.graph;
    let mut out = Vec::new();
    for node in graph.nodes().filter(|n| n.status == NodeStatus::Pending) {
        let stuck = graph
            .ancestors_of(&node.id)?
            .iter()
            .any(|a| graph.node(a).is_some_and(|n| n.status == NodeStatus::Failed));
        if stuck {
            out.push(node.id.clone());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AgentRole;
    use crate::stages::Stage;
    use crate::testkit::{self, ScriptedText};
    use async_trait::async_trait;
    use storyloom_core::model::DialogueLine;

    /// Writes a fixed narrated ending without calling any provider.
    struct Narrate;

    #[async_trait]
    impl Stage for Narrate {
        fn name(&self) -> &'static str {
            "narrate"
        }

        async fn run(&self, mut draft: Draft, _ctx: &StageContext) -> Result<Draft, StageError> {
            draft.content.summary = "The term ends quietly.".into();
            draft.content.dialogue = vec![DialogueLine::narration("Snow falls on the empty yard.")];
            Ok(draft)
        }
    }

    fn runner(text: ScriptedText) -> Runner {
        Runner::new(testkit::providers(text))
    }

    #[tokio::test]
    async fn test_offline_run_audits_every_scene() {
        let (mut project, _) = testkit::project();
        project.config.max_depth = 2;
        let mut saves = 0;
        let report = runner(ScriptedText::new())
            .run(&mut project, |_| {
                saves += 1;
                Ok(())
            })
            .await
            .unwrap();

        assert!(report.is_complete(), "{report:?}");
        assert_eq!(report.levels, 3);
        assert_eq!(saves, 3);
        assert_eq!(project.graph.len(), 7);
        assert!(project.graph.nodes().all(|n| n.is_audited()));
        assert!(project.graph.validate().is_ok());
        assert!(!project.assets.is_empty());
        assert!(project.assets.backgrounds().count() > 0);
        for node in project.graph.nodes() {
            let location = node.content.as_ref().and_then(|c| c.location.as_deref());
            if let Some(location) = location {
                assert!(project.assets.contains_background(location), "{location}");
            }
        }
    }

    #[tokio::test]
    async fn test_custom_stage_list_replaces_standard_pipeline() {
        let text = ScriptedText::new();
        let (mut project, root) = testkit::project();
        let runner = runner(text.clone()).with_pipeline(Pipeline::with_stages(vec![Box::new(Narrate)]));
        let report = runner.run(&mut project, |_| Ok(())).await.unwrap();

        assert!(report.is_complete(), "{report:?}");
        assert_eq!(report.levels, 1);
        assert_eq!(project.graph.len(), 1);
        let node = project.graph.node(&root).unwrap();
        assert!(node.is_audited());
        assert_eq!(node.content.as_ref().unwrap().summary, "The term ends quietly.");
        for role in [AgentRole::Producer, AgentRole::Writer, AgentRole::Actor] {
            assert_eq!(text.calls(role), 0);
        }
    }

    #[tokio::test]
    async fn test_scene_budget_is_never_exceeded() {
        let (mut project, _) = testkit::project();
        project.config.max_depth = 10;
        project.config.max_scenes = 5;
        let report = runner(ScriptedText::new())
            .run(&mut project, |_| Ok(()))
            .await
            .unwrap();
        assert!(report.is_complete());
        assert!(project.graph.len() <= 5);
    }

    #[tokio::test]
    async fn test_unknown_persona_is_retried_then_audited() {
        let text = ScriptedText::new().push(
            AgentRole::Writer,
            r#"<content id="narrator">Morning.</content><content id="ghost">Boo.</content>"#,
        );
        let (mut project, root) = testkit::project();
        project.config.max_depth = 0;
        let report = runner(text).run(&mut project, |_| Ok(())).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.attempts, 2);
        assert_eq!(report.rejected, 1);
        let node = project.graph.node(&root).unwrap();
        assert_eq!(node.status, NodeStatus::Audited);
        assert_eq!(node.attempts, 2);
        assert_eq!(node.rejections.len(), 1);
        assert_eq!(node.rejections[0].kind, RejectionKind::ContentIntegrity);
        assert!(node.rejections[0].reason.contains("ghost"));
    }

    #[tokio::test]
    async fn test_sibling_conflict_is_rejected_and_retried() {
        let text = ScriptedText::new()
            .push_for(
                AgentRole::Producer,
                "root",
                r#"<summary>Rain starts.</summary>
<choice target="new:left">Run left</choice>
<choice target="new:right">Run right</choice>"#,
            )
            .push_for(
                AgentRole::Writer,
                "left",
                r#"<content id="hana" emotion="neutral">Good evening.</content>
<state id="hana" key="outfit">raincoat</state>"#,
            )
            .push_for(
                AgentRole::Writer,
                "right",
                r#"<content id="hana" emotion="neutral">Good evening.</content>
<state id="hana" key="outfit">swimsuit</state>"#,
            )
            .push_for(
                AgentRole::Writer,
                "right",
                r#"<content id="hana" emotion="neutral">Good evening.</content>
<state id="hana" key="outfit">raincoat</state>"#,
            );
        let (mut project, _) = testkit::project();
        project.config.max_depth = 1;
        let report = runner(text).run(&mut project, |_| Ok(())).await.unwrap();

        assert!(report.is_complete(), "{report:?}");
        let right = project.graph.node(&NodeId::from("right")).unwrap();
        assert_eq!(right.status, NodeStatus::Audited);
        assert_eq!(right.rejections.len(), 1);
        assert_eq!(right.rejections[0].kind, RejectionKind::ConsistencyViolation);
        assert!(right.rejections[0].reason.contains("hana.outfit"));
        assert_eq!(right.content.as_ref().unwrap().state_changes[0].value, "raincoat");
        assert!(project.graph.node(&NodeId::from("left")).unwrap().rejections.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_node_failed() {
        let ghost = r#"<content id="ghost">Boo.</content>"#;
        let text = ScriptedText::new()
            .push_for(AgentRole::Producer, "root", "<summary>Start.</summary><choice target=\"new:next\">Go</choice>")
            .push_for(AgentRole::Writer, "root", ghost)
            .push_for(AgentRole::Writer, "root", ghost)
            .push_for(AgentRole::Writer, "root", ghost);
        let (mut project, root) = testkit::project();
        let report = runner(text).run(&mut project, |_| Ok(())).await.unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].node, root);
        assert_eq!(report.failures[0].attempts, 3);
        assert_eq!(report.failures[0].trail.len(), 3);
        assert_eq!(project.graph.node(&root).unwrap().status, NodeStatus::Failed);
        // rejected drafts never attach their proposed choices
        assert_eq!(project.graph.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_before_next_level() {
        let (mut project, root) = testkit::project();
        let runner = runner(ScriptedText::new());
        runner.cancel_flag().cancel();
        let report = runner.run(&mut project, |_| Ok(())).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.levels, 0);
        assert_eq!(project.graph.node(&root).unwrap().status, NodeStatus::Pending);
    }

    #[tokio::test]
    async fn test_resume_recovers_interrupted_node() {
        let (mut project, root) = testkit::project();
        project.config.max_depth = 0;
        project.graph.require_mut(&root).unwrap().begin_attempt().unwrap();
        let report = runner(ScriptedText::new())
            .run(&mut project, |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(report.recovered, 1);
        assert!(report.is_complete());
    }
}
