//! Fixtures shared by the pipeline tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use storyloom_core::config::RunConfig;
use storyloom_core::model::{Appearance, NodeId, Persona, PersonaId, SpeechRegister, Voice};
use storyloom_core::project::WorldInfo;
use storyloom_core::Project;

use crate::context::GenerationContext;
use crate::error::ProviderError;
use crate::judge::VoiceRuleJudge;
use crate::provider::{AgentRole, OfflineStoryteller, Providers, TextGenerator, TextRequest};
use crate::stages::StageContext;

/// Text provider that replays queued answers per role (optionally per node)
/// and falls back to the offline storyteller once a queue is empty.
#[derive(Clone, Default)]
pub struct ScriptedText {
    queued: Arc<Mutex<HashMap<(AgentRole, Option<String>), VecDeque<String>>>>,
    calls: Arc<Mutex<HashMap<AgentRole, usize>>>,
    fallback: OfflineStoryteller,
}

impl ScriptedText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, role: AgentRole, text: &str) -> Self {
        self.enqueue((role, None), text)
    }

    /// Answer only requests about `node`.
    pub fn push_for(self, role: AgentRole, node: &str, text: &str) -> Self {
        self.enqueue((role, Some(node.to_string())), text)
    }

    fn enqueue(self, key: (AgentRole, Option<String>), text: &str) -> Self {
        self.queued
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(text.to_string());
        self
    }

    pub fn calls(&self, role: AgentRole) -> usize {
        self.calls.lock().unwrap().get(&role).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TextGenerator for ScriptedText {
    async fn generate_text(&self, request: &TextRequest) -> Result<String, ProviderError> {
        *self.calls.lock().unwrap().entry(request.role).or_default() += 1;
        let node = request.hints.node.as_ref().map(|n| n.to_string());
        let next = {
            let mut queued = self.queued.lock().unwrap();
            queued
                .get_mut(&(request.role, node))
                .and_then(VecDeque::pop_front)
                .or_else(|| {
                    queued
                        .get_mut(&(request.role, None))
                        .and_then(VecDeque::pop_front)
                })
        };
        match next {
            Some(text) => Ok(text),
            None => self.fallback.generate_text(request).await,
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn persona(id: &str, name: &str, register: SpeechRegister, outfit: &str) -> Persona {
    Persona {
        id: PersonaId::from(id),
        version: 1,
        name: name.into(),
        background: String::new(),
        appearance: Appearance {
            outfit: outfit.into(),
            ..Default::default()
        },
        voice: Voice {
            traits: vec![],
            register,
            forbidden: vec!["whatever".into()],
        },
    }
}

/// A project with two personas and a pending root.
pub fn project() -> (Project, NodeId) {
    let mut project = Project::new(
        WorldInfo {
            title: "Spring Term".into(),
            premise: "A transfer student arrives.".into(),
            locations: vec!["classroom".into(), "rooftop".into()],
        },
        RunConfig::default_init(),
    );
    project
        .personas
        .commit(persona("hana", "Hana", SpeechRegister::Polite, "school uniform"))
        .unwrap();
    project
        .personas
        .commit(persona("kai", "Kai", SpeechRegister::Casual, "loose tie"))
        .unwrap();
    let root = project.ensure_root().unwrap();
    (project, root)
}

pub fn providers(text: ScriptedText) -> Providers {
    Providers::new(
        Arc::new(text),
        Arc::new(OfflineStoryteller::new()),
        Arc::new(VoiceRuleJudge),
        Duration::from_secs(5),
    )
}

pub fn context(project: Project, node: &NodeId, text: ScriptedText, budget: usize) -> StageContext {
    let generation = GenerationContext::build(&project, node).unwrap();
    StageContext {
        snapshot: Arc::new(project),
        generation,
        providers: providers(text),
        choice_budget: budget,
    }
}
