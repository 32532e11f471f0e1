use async_trait::async_trait;
use serde_json::json;
use storyloom_core::model::AssetRef;
use storyloom_core::storage::ProjectDir;

use super::{
    AgentRole, ImageDescriptor, ImageGenerator, ImageSubject, RequestHints, TextGenerator,
    TextRequest,
};
use crate::error::ProviderError;
use crate::script::{
    render_producer, render_writer, ProducerScript, ScriptAffection, ScriptChoice, ScriptLine,
    TargetSpec, WriterScript,
};

const BRANCH_LABELS: &[(&str, &str)] = &[
    ("Stay and talk", "talk"),
    ("Walk away for now", "walk"),
    ("Ask about the rumor", "rumor"),
];
const OPENERS: &[&str] = &[
    "I did not expect to see you here.",
    "Shall we go together?",
    "There is something I have to tell you.",
    "It is quieter than usual today.",
];

/// Deterministic, network-free storyteller. Every answer is derived from the
/// request hints, so the same project always grows the same story.
#[derive(Debug, Clone, Default)]
pub struct OfflineStoryteller {
    assets: Option<ProjectDir>,
}

impl OfflineStoryteller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write placeholder SVG images into the project's asset directory.
    pub fn with_assets(assets: ProjectDir) -> Self {
        Self {
            assets: Some(assets),
        }
    }

    fn seed(hints: &RequestHints) -> usize {
        hints
            .node
            .as_ref()
            .map(|n| n.as_str().bytes().map(usize::from).sum())
            .unwrap_or(0)
    }

    fn design(prompt: &str) -> String {
        let brief = prompt
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.ends_with(':'))
            .unwrap_or("A quiet spring term begins.");
        json!({
            "title": "Spring Term",
            "premise": brief,
            "locations": ["classroom", "rooftop", "library", "school gate"],
            "personas": [
                {
                    "id": "hana",
                    "name": "Hana",
                    "background": "Class representative who keeps everyone in line.",
                    "appearance": {
                        "outfit": "neat school uniform with a red ribbon",
                        "expressions": ["neutral", "smile"],
                        "palette": ["navy", "red"]
                    },
                    "voice": {
                        "traits": ["earnest", "dutiful"],
                        "register": "polite",
                        "forbidden": ["whatever"]
                    }
                },
                {
                    "id": "kai",
                    "name": "Kai",
                    "background": "Transfer student who skips morning classes.",
                    "appearance": {
                        "outfit": "untucked shirt and loose tie",
                        "expressions": ["neutral"],
                        "palette": ["grey"]
                    },
                    "voice": {
                        "traits": ["laid-back", "curious"],
                        "register": "casual"
                    }
                }
            ]
        })
        .to_string()
    }

    fn produce(hints: &RequestHints) -> String {
        let seed = Self::seed(hints);
        let node = hints.node.as_ref().map(|n| n.as_str()).unwrap_or("scene");
        let location = (!hints.locations.is_empty())
            .then(|| hints.locations[seed % hints.locations.len()].clone());
        let summary = hints
            .summary
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("The story continues in {node}."));
        let choices = (0..hints.max_choices.min(2))
            .map(|i| {
                let (label, suffix) = BRANCH_LABELS[(seed + i) % BRANCH_LABELS.len()];
                ScriptChoice {
                    label: label.to_string(),
                    target: TargetSpec::New {
                        key: format!("{node}-{suffix}"),
                        premise: format!("After choosing to {}", label.to_lowercase()),
                    },
                    requires: None,
                }
            })
            .collect();
        render_producer(&ProducerScript {
            summary,
            location,
            choices,
        })
    }

    fn write(hints: &RequestHints) -> String {
        let seed = Self::seed(hints);
        let mut lines = vec![ScriptLine {
            speaker: None,
            emotion: "neutral".into(),
            text: hints
                .summary
                .clone()
                .unwrap_or_else(|| "A moment passes.".into()),
        }];
        for (i, persona) in hints.personas.iter().take(2).enumerate() {
            lines.push(ScriptLine {
                speaker: Some(persona.to_string()),
                emotion: if i == 0 { "neutral" } else { "smile" }.into(),
                text: OPENERS[(seed + i) % OPENERS.len()].to_string(),
            });
        }
        let affection = hints
            .personas
            .first()
            .map(|persona| ScriptAffection {
                persona: persona.to_string(),
                delta: 10 + 5 * (seed % 3) as i32,
            })
            .into_iter()
            .collect();
        render_writer(&WriterScript {
            lines,
            states: Vec::new(),
            affection,
        })
    }
}

#[async_trait]
impl TextGenerator for OfflineStoryteller {
    async fn generate_text(&self, request: &TextRequest) -> Result<String, ProviderError> {
        Ok(match request.role {
            AgentRole::Designer => Self::design(&request.prompt),
            AgentRole::Producer => Self::produce(&request.hints),
            AgentRole::Writer => Self::write(&request.hints),
            AgentRole::Actor => "I see.".to_string(),
        })
    }

    fn name(&self) -> &str {
        "offline"
    }
}

#[async_trait]
impl ImageGenerator for OfflineStoryteller {
    async fn generate_image(&self, descriptor: &ImageDescriptor) -> Result<AssetRef, ProviderError> {
        let name = format!("{}.svg", descriptor.digest());
        let Some(assets) = &self.assets else {
            return Ok(AssetRef(format!("assets/{name}")));
        };
        let (width, height, fill, caption) = match &descriptor.subject {
            ImageSubject::Pose(pose) => (512, 768, "#dde", format!("{} ({})", pose.persona, pose.pose)),
            ImageSubject::Background(location) => (1280, 720, "#cdb", location.clone()),
        };
        let svg = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\">\
             <rect width=\"100%\" height=\"100%\" fill=\"{fill}\"/>\
             <text x=\"50%\" y=\"50%\" text-anchor=\"middle\" font-size=\"32\">{}</text>\
             </svg>\n",
            caption.replace('&', "&amp;").replace('<', "&lt;")
        );
        Ok(AssetRef(assets.write_asset(&name, svg.as_bytes())?))
    }

    fn name(&self) -> &str {
        "offline"
    }
}
