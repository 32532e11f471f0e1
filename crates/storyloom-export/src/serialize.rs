//! Game data export: the self-contained JSON document a renderer plays.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use storyloom_core::ending::EndingThresholds;
use storyloom_core::model::{
    AffectionChange, AssetCatalog, EdgeId, NodeId, NodeStatus, Persona, PersonaId, PersonaRef,
    Precondition,
};
use storyloom_core::{scheduler, BranchGraph, PersonaStore, Project};

use crate::error::ExportError;

pub const GAME_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameData {
    pub format_version: u32,
    pub title: String,
    /// ID of the opening scene.
    pub start: NodeId,
    /// The full persona store: every committed version, sorted by ID then
    /// version, whether or not a scene uses it.
    pub personas: Vec<Persona>,
    /// Pose images keyed by `persona@vN:pose`.
    pub poses: BTreeMap<String, PoseAsset>,
    /// Scenes in generation order.
    pub scenes: Vec<Scene>,
    /// Affection the closest persona needs for each ending.
    #[serde(default)]
    pub endings: EndingThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoseAsset {
    pub persona: PersonaId,
    pub version: u32,
    pub pose: String,
    pub asset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: NodeId,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Background image for the location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    pub dialogue: Vec<Line>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affection: Vec<AffectionChange>,
    pub choices: Vec<Choice>,
}

impl Scene {
    pub fn is_ending(&self) -> bool {
        self.choices.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    /// `None` is narration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<PersonaRef>,
    pub text: String,
    pub emotion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub id: EdgeId,
    pub label: String,
    pub target_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<Precondition>,
}

impl GameData {
    pub fn scene(&self, id: &NodeId) -> Option<&Scene> {
        self.scenes.iter().find(|s| &s.id == id)
    }

    pub fn persona(&self, reference: &PersonaRef) -> Option<&Persona> {
        self.personas
            .iter()
            .find(|p| p.id == reference.id && p.version == reference.version)
    }
}

/// Build the export document. Every scene reachable from the root must be
/// audited; otherwise nothing is produced and the offending scenes are listed.
pub fn serialize(
    graph: &BranchGraph,
    store: &PersonaStore,
    catalog: &AssetCatalog,
    title: &str,
    endings: EndingThresholds,
) -> Result<GameData, ExportError> {
    endings.validate()?;
    graph.validate()?;
    let start = graph
        .root()
        .cloned()
        .ok_or_else(|| ExportError::Invalid("the story has no scenes".into()))?;
    let order = scheduler::order(graph)?;
    let reachable = graph.reachable_from_root();

    let incomplete: Vec<NodeId> = order
        .iter()
        .filter(|id| reachable.contains(*id))
        .filter(|id| graph.node(id).map(|n| n.status) != Some(NodeStatus::Audited))
        .cloned()
        .collect();
    if !incomplete.is_empty() {
        tracing::warn!("Export refused: {} scene(s) not audited", incomplete.len());
        return Err(ExportError::IncompleteGraph { nodes: incomplete });
    }

    let mut poses = BTreeMap::new();
    let mut scenes = Vec::with_capacity(order.len());
    for id in order.iter().filter(|id| reachable.contains(*id)) {
        let node = graph.require(id)?;
        let content = node
            .content
            .as_ref()
            .ok_or_else(|| ExportError::Invalid(format!("audited scene {id} has no content")))?;

        let mut dialogue = Vec::with_capacity(content.dialogue.len());
        for line in &content.dialogue {
            if let Some(speaker) = &line.speaker {
                store.require(speaker)?;
            }
            let pose_ref = match &line.pose {
                Some(pose) => {
                    let entry = catalog.get(pose).ok_or_else(|| {
                        ExportError::Invalid(format!("pose {pose} in scene {id} has no asset"))
                    })?;
                    poses.entry(pose.key()).or_insert_with(|| PoseAsset {
                        persona: pose.persona.clone(),
                        version: pose.version,
                        pose: pose.pose.clone(),
                        asset: entry.asset.to_string(),
                    });
                    Some(pose.key())
                }
                None => None,
            };
            dialogue.push(Line {
                speaker: line.speaker.clone(),
                text: line.text.clone(),
                emotion: line.emotion.clone(),
                pose_ref,
            });
        }

        let choices = graph
            .outgoing(id)
            .into_iter()
            .map(|edge| Choice {
                id: edge.id.clone(),
                label: edge.label.clone(),
                target_id: edge.target.clone(),
                precondition: edge.precondition.clone(),
            })
            .collect();

        let background = match content.location.as_deref().map(str::trim) {
            Some(location) if !location.is_empty() => {
                let entry = catalog.background(location).ok_or_else(|| {
                    ExportError::Invalid(format!(
                        "location {location:?} in scene {id} has no background"
                    ))
                })?;
                Some(entry.asset.to_string())
            }
            _ => None,
        };
        for change in &content.affection {
            if !store.contains(&change.persona) {
                return Err(ExportError::Invalid(format!(
                    "scene {id} changes affection of unknown persona {}",
                    change.persona
                )));
            }
        }

        scenes.push(Scene {
            id: id.clone(),
            summary: content.summary.clone(),
            location: content.location.clone(),
            background,
            dialogue,
            affection: content.affection.clone(),
            choices,
        });
    }
    let personas: Vec<Persona> = store.iter_all().cloned().collect();

    tracing::info!(
        "Exported {} scene(s), {} persona version(s), {} pose(s)",
        scenes.len(),
        personas.len(),
        poses.len()
    );
    Ok(GameData {
        format_version: GAME_FORMAT_VERSION,
        title: title.to_string(),
        start,
        personas,
        poses,
        scenes,
        endings,
    })
}

pub fn export_project(project: &Project) -> Result<GameData, ExportError> {
    serialize(
        &project.graph,
        &project.personas,
        &project.assets,
        &project.world.title,
        project.config.endings,
    )
}

/// Pretty JSON with a trailing newline. Identical input gives identical bytes.
pub fn to_json(game: &GameData) -> Result<String, ExportError> {
    let mut json = serde_json::to_string_pretty(game)?;
    json.push('\n');
    Ok(json)
}

pub fn from_json(text: &str) -> Result<GameData, ExportError> {
    Ok(serde_json::from_str(text)?)
}

/// Check that an export stands on its own: every reference resolves inside
/// the document and every scene can be reached from the start.
pub fn validate(game: &GameData) -> Result<(), ExportError> {
    let invalid = |msg: String| Err(ExportError::Invalid(msg));
    if let Err(e) = game.endings.validate() {
        return invalid(e.to_string());
    }

    let mut scene_ids = HashSet::new();
    for scene in &game.scenes {
        if !scene_ids.insert(&scene.id) {
            return invalid(format!("duplicate scene {}", scene.id));
        }
    }
    if !scene_ids.contains(&game.start) {
        return invalid(format!("start scene {} is missing", game.start));
    }

    let choice_ids: HashSet<&EdgeId> = game
        .scenes
        .iter()
        .flat_map(|s| s.choices.iter().map(|c| &c.id))
        .collect();

    for scene in &game.scenes {
        for (i, line) in scene.dialogue.iter().enumerate() {
            if let Some(speaker) = &line.speaker {
                if game.persona(speaker).is_none() {
                    return invalid(format!(
                        "scene {} line {} speaker {speaker} is not in the persona list",
                        scene.id,
                        i + 1
                    ));
                }
            }
            if let Some(pose_ref) = &line.pose_ref {
                let Some(pose) = game.poses.get(pose_ref) else {
                    return invalid(format!("scene {} uses unknown pose {pose_ref}", scene.id));
                };
                let owner = line.speaker.as_ref().map(|s| (&s.id, s.version));
                if owner != Some((&pose.persona, pose.version)) {
                    return invalid(format!(
                        "scene {} line {} shows pose {pose_ref} for another speaker",
                        scene.id,
                        i + 1
                    ));
                }
            }
        }
        if let Some(change) = scene
            .affection
            .iter()
            .find(|c| !game.personas.iter().any(|p| p.id == c.persona))
        {
            return invalid(format!(
                "scene {} changes affection of unknown persona {}",
                scene.id, change.persona
            ));
        }
        let mut labels = HashSet::new();
        for choice in &scene.choices {
            if !scene_ids.contains(&choice.target_id) {
                return invalid(format!(
                    "choice {:?} in {} targets missing scene {}",
                    choice.label, scene.id, choice.target_id
                ));
            }
            if !labels.insert(choice.label.as_str()) {
                return invalid(format!("duplicate choice {:?} in {}", choice.label, scene.id));
            }
            if let Some(precondition) = &choice.precondition {
                if let Some(missing) = precondition
                    .referenced_edges()
                    .into_iter()
                    .find(|e| !choice_ids.contains(e))
                {
                    return invalid(format!(
                        "choice {:?} in {} depends on unknown choice {missing}",
                        choice.label, scene.id
                    ));
                }
            }
        }
    }

    let mut seen = HashSet::from([&game.start]);
    let mut queue = VecDeque::from([&game.start]);
    while let Some(id) = queue.pop_front() {
        if let Some(scene) = game.scene(id) {
            for choice in &scene.choices {
                if seen.insert(&choice.target_id) {
                    queue.push_back(&choice.target_id);
                }
            }
        }
    }
    if let Some(unreachable) = game.scenes.iter().find(|s| !seen.contains(&s.id)) {
        return invalid(format!("scene {} cannot be reached from the start", unreachable.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_core::config::RunConfig;
    use storyloom_core::graph::{ChoiceTarget, NodeStub, ProposedChoice, TopologyProposal};
    use storyloom_core::model::{
        Appearance, AssetRef, BackgroundEntry, CatalogEntry, DialogueLine, PoseRef, SceneContent,
        SpeechRegister, Voice,
    };
    use storyloom_core::project::WorldInfo;

    fn finish(project: &mut Project, id: &NodeId) {
        let hana = project.personas.resolve(&"hana".into()).unwrap();
        let node = project.graph.require_mut(id).unwrap();
        node.begin_attempt().unwrap();
        node.store_draft(SceneContent {
            summary: format!("Scene {id}"),
            location: Some("classroom".into()),
            dialogue: vec![
                DialogueLine::narration("The bell rings."),
                DialogueLine {
                    speaker: Some(hana.clone()),
                    text: "Good morning.".into(),
                    emotion: "neutral".into(),
                    pose: Some(PoseRef::of(&hana, "neutral")),
                },
            ],
            affection: vec![AffectionChange {
                persona: hana.id.clone(),
                delta: 10,
            }],
            ..Default::default()
        })
        .unwrap();
        node.freeze().unwrap();
    }

    fn persona(id: &str, name: &str) -> Persona {
        Persona {
            id: id.into(),
            version: 1,
            name: name.into(),
            background: String::new(),
            appearance: Appearance {
                outfit: "uniform".into(),
                ..Default::default()
            },
            voice: Voice {
                register: SpeechRegister::Polite,
                ..Default::default()
            },
        }
    }

    /// Root with two leaves. Leaves are only audited when `complete`.
    fn story(complete: bool) -> Project {
        let mut project = Project::new(
            WorldInfo {
                title: "Spring Term".into(),
                premise: "A transfer student arrives.".into(),
                locations: vec![],
            },
            RunConfig::default_init(),
        );
        let hana = project.personas.commit(persona("hana", "Hana")).unwrap();
        project.assets.insert(CatalogEntry {
            pose: PoseRef::of(&hana, "neutral"),
            asset: AssetRef("assets/hana-neutral.png".into()),
            description: String::new(),
        });
        project.assets.insert_background(BackgroundEntry {
            location: "classroom".into(),
            asset: AssetRef("assets/classroom.png".into()),
            description: String::new(),
        });
        let root = project.ensure_root().unwrap();
        finish(&mut project, &root);
        let choice = |label: &str, key: &str| ProposedChoice {
            label: label.into(),
            target: ChoiceTarget::New(NodeStub::new(key, "")),
            precondition: None,
        };
        let leaves = project
            .graph
            .apply(
                &root,
                &TopologyProposal {
                    choices: vec![choice("Stay", "stay"), choice("Leave", "leave")],
                },
            )
            .unwrap();
        if complete {
            for leaf in &leaves {
                finish(&mut project, leaf);
            }
        } else {
            finish(&mut project, &leaves[0]);
        }
        project
    }

    #[test]
    fn test_root_and_two_leaves() {
        let game = export_project(&story(true)).unwrap();
        assert_eq!(game.start, NodeId::from("root"));
        let ids: Vec<&str> = game.scenes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["root", "stay", "leave"]);
        let root = game.scene(&"root".into()).unwrap();
        let targets: Vec<&str> = root.choices.iter().map(|c| c.target_id.as_str()).collect();
        assert_eq!(targets, vec!["stay", "leave"]);
        assert!(game.scene(&"stay".into()).unwrap().is_ending());
        assert_eq!(game.personas.len(), 1);
        assert_eq!(game.poses["hana@v1:neutral"].asset, "assets/hana-neutral.png");
        assert_eq!(root.background.as_deref(), Some("assets/classroom.png"));
        assert_eq!(root.affection.len(), 1);
        assert_eq!(game.endings, EndingThresholds::default());

        let json = to_json(&game).unwrap();
        assert!(json.contains("\"targetId\": \"stay\""));
        assert!(json.contains("\"poseRef\": \"hana@v1:neutral\""));
        assert!(validate(&game).is_ok());
    }

    #[test]
    fn test_export_carries_full_persona_store() {
        let mut project = story(true);
        project.personas.commit(persona("kai", "Kai")).unwrap();
        project
            .personas
            .amend(&"hana".into(), |p| p.appearance.outfit = "raincoat".into())
            .unwrap();

        let game = export_project(&project).unwrap();
        let refs: Vec<String> = game
            .personas
            .iter()
            .map(|p| p.reference().to_string())
            .collect();
        assert_eq!(refs, vec!["hana@v1", "hana@v2", "kai@v1"]);
        // scenes still point at the version they were written with
        let line = &game.scenes[0].dialogue[1];
        assert_eq!(line.speaker.as_ref().unwrap().to_string(), "hana@v1");
        assert!(validate(&game).is_ok());
    }

    #[test]
    fn test_missing_background_fails() {
        let mut project = story(true);
        let mut catalog = AssetCatalog::default();
        for entry in project.assets.iter() {
            catalog.insert(entry.clone());
        }
        project.assets = catalog;
        let err = export_project(&project).unwrap_err();
        assert!(matches!(err, ExportError::Invalid(ref m) if m.contains("classroom")));
    }

    #[test]
    fn test_pending_scene_blocks_export() {
        match export_project(&story(false)) {
            Err(ExportError::IncompleteGraph { nodes }) => {
                assert_eq!(nodes, vec![NodeId::from("leave")]);
            }
            other => panic!("expected incomplete graph, got {other:?}"),
        }
    }

    #[test]
    fn test_serialize_is_idempotent() {
        let project = story(true);
        let first = to_json(&export_project(&project).unwrap()).unwrap();
        let second = to_json(&export_project(&project).unwrap()).unwrap();
        assert_eq!(first, second);
        assert_eq!(from_json(&first).unwrap(), export_project(&project).unwrap());
    }

    #[test]
    fn test_missing_pose_asset_fails() {
        let mut project = story(true);
        project.assets = AssetCatalog::default();
        let err = export_project(&project).unwrap_err();
        assert!(matches!(err, ExportError::Invalid(ref m) if m.contains("hana@v1:neutral")));
    }

    #[test]
    fn test_validate_catches_dangling_references() {
        let game = export_project(&story(true)).unwrap();

        let mut broken = game.clone();
        broken.scenes[0].choices[0].target_id = "nowhere".into();
        assert!(validate(&broken).is_err());

        let mut broken = game.clone();
        broken.personas.clear();
        assert!(validate(&broken).is_err());

        let mut broken = game.clone();
        broken.poses.clear();
        assert!(validate(&broken).is_err());

        let mut broken = game.clone();
        if let Some(pose) = broken.poses.get_mut("hana@v1:neutral") {
            pose.version = 2;
        }
        assert!(validate(&broken).is_err());

        let mut broken = game.clone();
        broken.scenes[1].affection[0].persona = "ghost".into();
        assert!(validate(&broken).is_err());

        let mut broken = game;
        broken.scenes[0].choices.remove(1);
        let err = validate(&broken).unwrap_err();
        assert!(err.to_string().contains("leave"));
    }
}
