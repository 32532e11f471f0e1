use storyloom_core::model::{NodeId, Persona, PersonaRef, PoseRef, Rejection};
use storyloom_core::{CoreError, Project};

/// What the story looked like on the way to a node. Derived on demand from
/// the project snapshot and never stored.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub node: NodeId,
    pub premise: String,
    pub attempt: u32,
    pub depth: usize,
    /// Audited ancestors in dependency order.
    pub history: Vec<PriorScene>,
    /// Labels of the choices leading into this node.
    pub arrived_by: Vec<String>,
    /// Why earlier attempts at this node were discarded.
    pub rejections: Vec<Rejection>,
    /// Poses already drawn for the current version of each persona.
    pub available_poses: Vec<PoseRef>,
}

#[derive(Debug, Clone)]
pub struct PriorScene {
    pub id: NodeId,
    pub summary: String,
    pub location: Option<String>,
    pub dialogue: Vec<String>,
}

impl GenerationContext {
    pub fn build(project: &Project, node: &NodeId) -> Result<Self, CoreError> {
        let graph = &project.graph;
        let current = graph.require(node)?;

        let mut history = Vec::new();
        for id in graph.ancestors_of(node)? {
            if &id == node {
                continue;
            }
            let Some(content) = graph.node(&id).and_then(|n| n.content.as_ref()) else {
                continue;
            };
            let dialogue = content
                .dialogue
                .iter()
                .map(|line| match &line.speaker {
                    Some(speaker) => {
                        let name = project
                            .personas
                            .get(speaker)
                            .map(|p| p.name.as_str())
                            .unwrap_or(speaker.id.as_str());
                        format!("{name} ({}): {}", line.emotion, line.text)
                    }
                    None => format!("({})", line.text),
                })
                .collect();
            history.push(PriorScene {
                id: id.clone(),
                summary: content.summary.clone(),
                location: content.location.clone(),
                dialogue,
            });
        }

        let current_cast: Vec<PersonaRef> =
            project.personas.iter_latest().map(Persona::reference).collect();
        let available_poses = current_cast
            .iter()
            .flat_map(|persona| project.assets.poses_for(persona))
            .map(|entry| entry.pose.clone())
            .collect();

        Ok(Self {
            node: node.clone(),
            premise: current.premise.clone(),
            attempt: current.attempts,
            depth: graph.depth(node)?,
            history,
            arrived_by: graph.incoming(node).iter().map(|e| e.label.clone()).collect(),
            rejections: current.rejections.clone(),
            available_poses,
        })
    }

    /// Prompt section describing the story so far.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.history.is_empty() {
            out.push_str("Story so far: this is the opening scene.\n");
        } else {
            out.push_str("Story so far:\n");
            for scene in &self.history {
                out.push_str(&format!("- [{}] {}", scene.id, scene.summary));
                if let Some(location) = &scene.location {
                    out.push_str(&format!(" (at {location})"));
                }
                out.push('\n');
                for line in &scene.dialogue {
                    out.push_str(&format!("    {line}\n"));
                }
            }
        }
        if !self.arrived_by.is_empty() {
            out.push_str(&format!(
                "The player arrived by choosing: {}\n",
                self.arrived_by.join(" / ")
            ));
        }
        if !self.premise.is_empty() {
            out.push_str(&format!("This scene: {}\n", self.premise));
        }
        if !self.available_poses.is_empty() {
            let poses: Vec<String> = self
                .available_poses
                .iter()
                .map(|p| format!("{} {}", p.persona, p.pose))
                .collect();
            out.push_str(&format!("Expressions already drawn: {}\n", poses.join(", ")));
        }
        if !self.rejections.is_empty() {
            out.push_str("Earlier attempts were rejected. Avoid these problems:\n");
            for r in &self.rejections {
                out.push_str(&format!("- attempt {} ({}): {}\n", r.attempt, r.kind, r.reason));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_core::config::RunConfig;
    use storyloom_core::graph::{NodeStub, ParentEdge};
    use storyloom_core::model::{DialogueLine, RejectionKind, SceneContent};
    use storyloom_core::project::WorldInfo;

    #[test]
    fn test_context_collects_audited_ancestors_and_rejections() {
        let mut project = Project::new(WorldInfo::default(), RunConfig::default_init());
        let root = project.ensure_root().unwrap();
        let child = project
            .graph
            .add_node(
                NodeStub::new("gate", "Meeting at the gate"),
                Some(ParentEdge::new(root.clone(), "Wait outside")),
            )
            .unwrap();

        let node = project.graph.node_mut(&root).unwrap();
        node.begin_attempt().unwrap();
        node.store_draft(SceneContent {
            summary: "First day".into(),
            location: Some("classroom".into()),
            dialogue: vec![DialogueLine::narration("The bell rings.")],
            ..Default::default()
        })
        .unwrap();
        node.freeze().unwrap();

        let node = project.graph.node_mut(&child).unwrap();
        node.begin_attempt().unwrap();
        node.reject(RejectionKind::ContentIntegrity, "unknown speaker ghost")
            .unwrap();
        node.requeue(2).unwrap();

        let ctx = GenerationContext::build(&project, &child).unwrap();
        assert_eq!(ctx.history.len(), 1);
        assert_eq!(ctx.depth, 1);
        assert_eq!(ctx.arrived_by, vec!["Wait outside".to_string()]);
        let text = ctx.render();
        assert!(text.contains("First day"));
        assert!(text.contains("(The bell rings.)"));
        assert!(text.contains("unknown speaker ghost"));
        assert!(text.contains("Meeting at the gate"));
    }

    #[test]
    fn test_available_poses_follow_current_version() {
        use storyloom_core::model::{AssetRef, CatalogEntry};

        let (mut project, root) = crate::testkit::project();
        let v1 = project.personas.resolve(&"hana".into()).unwrap();
        project.assets.insert(CatalogEntry {
            pose: PoseRef::of(&v1, "smile"),
            asset: AssetRef("assets/smile.png".into()),
            description: String::new(),
        });
        let ctx = GenerationContext::build(&project, &root).unwrap();
        assert_eq!(ctx.available_poses, vec![PoseRef::of(&v1, "smile")]);
        assert!(ctx.render().contains("Expressions already drawn: hana smile"));

        project.personas.amend(&v1.id, |_| {}).unwrap();
        let ctx = GenerationContext::build(&project, &root).unwrap();
        assert!(ctx.available_poses.is_empty());
    }
}
