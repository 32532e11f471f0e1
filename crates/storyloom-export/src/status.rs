use serde::Serialize;
use storyloom_core::model::{NodeId, NodeStatus};
use storyloom_core::project::Progress;
use storyloom_core::{scheduler, CoreError, Project};

/// Snapshot of a project's generation state for `storyloom status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub title: String,
    pub project_id: String,
    pub progress: Progress,
    pub personas: usize,
    pub poses: usize,
    pub edges: usize,
    /// Dependency levels, root first.
    pub levels: Vec<Vec<NodeId>>,
    pub merge_points: Vec<NodeId>,
    pub endings: Vec<NodeId>,
    pub failed: Vec<FailedScene>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedScene {
    pub id: NodeId,
    pub attempts: u32,
    pub last_reason: Option<String>,
}

impl StatusReport {
    pub fn build(project: &Project) -> Result<Self, CoreError> {
        let graph = &project.graph;
        let failed = graph
            .nodes()
            .filter(|n| n.status == NodeStatus::Failed)
            .map(|n| FailedScene {
                id: n.id.clone(),
                attempts: n.attempts,
                last_reason: n.rejections.last().map(|r| format!("{}: {}", r.kind, r.reason)),
            })
            .collect();
        Ok(Self {
            title: project.world.title.clone(),
            project_id: project.id.clone(),
            progress: project.progress(),
            personas: project.personas.len(),
            poses: project.assets.len(),
            edges: graph.edge_count(),
            levels: scheduler::levels(graph)?,
            merge_points: graph.merge_points().into_iter().cloned().collect(),
            endings: graph.terminals().into_iter().cloned().collect(),
            failed,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.progress.is_complete()
    }

    pub fn to_text(&self) -> String {
        let p = &self.progress;
        let mut out = format!("{} ({})\n", self.title, self.project_id);
        out.push_str(&format!(
            "Scenes:   {}/{} audited, {} failed\n",
            p.audited, p.total, p.failed
        ));
        for (status, count) in &p.by_status {
            out.push_str(&format!("  {status}: {count}\n"));
        }
        out.push_str(&format!(
            "Choices:  {}\nPersonas: {}\nPoses:    {}\n",
            self.edges, self.personas, self.poses
        ));
        out.push_str(&format!("Levels:   {}\n", self.levels.len()));
        for (i, level) in self.levels.iter().enumerate() {
            let ids: Vec<&str> = level.iter().map(NodeId::as_str).collect();
            out.push_str(&format!("  {i}: {}\n", ids.join(", ")));
        }
        if !self.merge_points.is_empty() {
            let ids: Vec<&str> = self.merge_points.iter().map(NodeId::as_str).collect();
            out.push_str(&format!("Merge points: {}\n", ids.join(", ")));
        }
        let endings: Vec<&str> = self.endings.iter().map(NodeId::as_str).collect();
        out.push_str(&format!("Endings:  {}\n", endings.join(", ")));
        for f in &self.failed {
            out.push_str(&format!(
                "FAILED {} after {} attempt(s): {}\n",
                f.id,
                f.attempts,
                f.last_reason.as_deref().unwrap_or("no reason recorded")
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_core::config::RunConfig;
    use storyloom_core::graph::{NodeStub, ParentEdge};
    use storyloom_core::model::RejectionKind;
    use storyloom_core::project::WorldInfo;

    #[test]
    fn test_status_of_diamond_with_failure() {
        let mut project = Project::new(
            WorldInfo {
                title: "Spring Term".into(),
                ..Default::default()
            },
            RunConfig::default_init(),
        );
        let root = project.ensure_root().unwrap();
        let g = &mut project.graph;
        let a = g.add_node(NodeStub::new("a", ""), Some(ParentEdge::new(root.clone(), "A"))).unwrap();
        let b = g.add_node(NodeStub::new("b", ""), Some(ParentEdge::new(root.clone(), "B"))).unwrap();
        let end = g.add_node(NodeStub::new("end", ""), Some(ParentEdge::new(a, "On"))).unwrap();
        g.add_edge(&b, &end, "On", None).unwrap();

        let node = g.require_mut(&root).unwrap();
        for _ in 0..3 {
            node.begin_attempt().unwrap();
            node.reject(RejectionKind::ContentIntegrity, "writer: unknown speaker").unwrap();
            node.requeue(2).unwrap();
        }

        let report = StatusReport::build(&project).unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.levels.len(), 3);
        assert_eq!(report.merge_points, vec![NodeId::from("end")]);
        assert_eq!(report.endings, vec![NodeId::from("end")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].attempts, 3);

        let text = report.to_text();
        assert!(text.contains("0/4 audited, 1 failed"));
        assert!(text.contains("Merge points: end"));
        assert!(text.contains("FAILED root after 3 attempt(s): content-integrity: writer: unknown speaker"));
    }
}
