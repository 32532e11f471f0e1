use async_trait::async_trait;
use storyloom_core::model::{
    slugify, AffectionChange, DialogueLine, PersonaId, PersonaRef, StateChange,
};
use storyloom_core::PersonaStore;

use super::{provider_failure, Draft, Stage, StageContext};
use crate::error::StageError;
use crate::judge::EMOTION_MAX_LEN;
use crate::provider::{AgentRole, RequestHints, TextRequest};
use crate::script::parse_writer;

const NAME: &str = "writer";

const SYSTEM: &str = "You are the scenario writer of a visual novel. Write the dialogue \
for one scene. Reply only with markup, one element per line:
<content id=\"narrator\">narration</content>
<content id=\"persona-id\" emotion=\"smile\">spoken line</content>
<state id=\"persona-id\" key=\"outfit\">new value</state>
<affection id=\"persona-id\">+10</affection>
Use only the cast IDs you are given. Emit <state> only for visible changes that \
persist after the scene (clothing, injuries, props). Emit <affection> when the scene \
brings the player closer to or further from a character.";

/// Fills the planned scene with dialogue, visible persona state changes and
/// affection changes.
#[derive(Debug, Clone, Default)]
pub struct Writer;

/// Slug of an emotion, cut to the longest pose name allowed.
fn emotion_slug(raw: &str) -> String {
    let slug: String = slugify(raw).chars().take(EMOTION_MAX_LEN).collect();
    match slug.trim_end_matches('-') {
        "" => "neutral".to_string(),
        e => e.to_string(),
    }
}

fn resolve(store: &PersonaStore, raw: &str) -> Result<PersonaRef, StageError> {
    let unknown = || StageError::integrity(NAME, format!("unknown speaker {raw:?}"));
    let id = PersonaId::parse(raw.trim().to_lowercase()).map_err(|_| unknown())?;
    store.resolve(&id).map_err(|_| unknown())
}

#[async_trait]
impl Stage for Writer {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, mut draft: Draft, ctx: &StageContext) -> Result<Draft, StageError> {
        let mut prompt = ctx.world_brief();
        prompt.push('\n');
        prompt.push_str(&ctx.generation.render());
        prompt.push_str(&format!("\nScene summary: {}\n", draft.content.summary));
        if let Some(location) = &draft.content.location {
            prompt.push_str(&format!("Location: {location}\n"));
        }

        let request = TextRequest::new(AgentRole::Writer, SYSTEM, prompt).with_hints(RequestHints {
            node: Some(draft.node.clone()),
            personas: ctx.snapshot.personas.ids().cloned().collect(),
            locations: ctx.snapshot.world.locations.clone(),
            max_choices: 0,
            summary: Some(draft.content.summary.clone()),
            line: None,
        });
        let text = ctx
            .providers
            .generate_text(&request)
            .await
            .map_err(provider_failure(NAME))?;
        let script =
            parse_writer(&text).map_err(|source| StageError::Script { stage: NAME, source })?;

        let store = &ctx.snapshot.personas;
        let mut dialogue = Vec::with_capacity(script.lines.len());
        for line in script.lines {
            let speaker = line.speaker.as_deref().map(|s| resolve(store, s)).transpose()?;
            dialogue.push(DialogueLine {
                speaker,
                text: line.text,
                emotion: emotion_slug(&line.emotion),
                pose: None,
            });
        }

        let mut state_changes = Vec::with_capacity(script.states.len());
        for state in script.states {
            let persona = resolve(store, &state.persona)?.id;
            let attribute = state.key.trim().to_lowercase();
            if attribute.is_empty() || state.value.is_empty() {
                return Err(StageError::integrity(
                    NAME,
                    format!("state change for {persona} needs a key and a value"),
                ));
            }
            state_changes.push(StateChange {
                persona,
                attribute,
                value: state.value,
            });
        }

        let affection = script
            .affection
            .into_iter()
            .map(|change| {
                Ok(AffectionChange {
                    persona: resolve(store, &change.persona)?.id,
                    delta: change.delta,
                })
            })
            .collect::<Result<Vec<_>, StageError>>()?;

        tracing::debug!(
            "Writer produced {} line(s), {} state change(s) and {} affection change(s) for {}",
            dialogue.len(),
            state_changes.len(),
            affection.len(),
            draft.node
        );
        draft.content.dialogue = dialogue;
        draft.content.state_changes = state_changes;
        draft.content.affection = affection;
        Ok(draft)
    }
}
