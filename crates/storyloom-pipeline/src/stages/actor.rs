use async_trait::async_trait;
use storyloom_core::model::{Persona, PoseRef};

use super::{provider_failure, Draft, Stage, StageContext};
use crate::error::StageError;
use crate::judge::is_pose_name;
use crate::provider::{AgentRole, RequestHints, TextRequest};

const NAME: &str = "actor";

/// Plays each persona: checks every spoken line against the persona judge,
/// asks for one rewrite of a failing line, then assigns poses. An emotion
/// that cannot name a pose falls back to `neutral` without a rewrite.
#[derive(Debug, Clone, Default)]
pub struct Actor;

impl Actor {
    fn rewrite_request(persona: &Persona, text: &str, reason: &str) -> TextRequest {
        let system = format!(
            "You are {} in a visual novel. Stay strictly in character.\n{}",
            persona.name,
            persona.describe()
        );
        let prompt = format!(
            "This line was judged out of character: {reason}\n\
             Line: {text}\n\
             Rewrite it so it keeps the meaning but fits the character. \
             Reply with the rewritten line only."
        );
        TextRequest::new(AgentRole::Actor, system, prompt)
            .with_temperature(0.5)
            .with_hints(RequestHints {
                personas: vec![persona.id.clone()],
                line: Some(text.to_string()),
                ..Default::default()
            })
    }
}

fn clean_rewrite(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c == '"' || c == '\u{201c}' || c == '\u{201d}')
        .trim()
        .to_string()
}

#[async_trait]
impl Stage for Actor {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, mut draft: Draft, ctx: &StageContext) -> Result<Draft, StageError> {
        let store = &ctx.snapshot.personas;
        let catalog = &ctx.snapshot.assets;
        let judge = &ctx.providers.judge;

        for line in draft.content.dialogue.iter_mut() {
            let Some(speaker) = line.speaker.clone() else {
                continue;
            };
            let persona = store
                .get(&speaker)
                .ok_or_else(|| StageError::integrity(NAME, format!("unknown persona {speaker}")))?;

            if !is_pose_name(&line.emotion) {
                tracing::debug!("Emotion {:?} by {speaker} is not a pose name, using neutral", line.emotion);
                line.emotion = "neutral".to_string();
            }

            if let Err(reason) = judge.judge(persona, line) {
                tracing::warn!("Rewriting line by {speaker}: {reason}");
                let request = Self::rewrite_request(persona, &line.text, &reason);
                let rewritten = ctx
                    .providers
                    .generate_text(&request)
                    .await
                    .map_err(provider_failure(NAME))?;
                line.text = clean_rewrite(&rewritten);
                if let Err(reason) = judge.judge(persona, line) {
                    return Err(StageError::integrity(
                        NAME,
                        format!("line by {speaker} still out of character after rewrite: {reason}"),
                    ));
                }
            }

            let pose = PoseRef::of(&speaker, line.emotion.clone());
            let source = if catalog.contains(&pose) {
                "cached pose"
            } else if persona.appearance.has_expression(&line.emotion) {
                "base expression"
            } else {
                "new pose"
            };
            tracing::debug!("{} -> {pose} ({source})", draft.node);
            line.pose = Some(pose);
        }
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use storyloom_core::model::DialogueLine;

    fn spoken(ctx: &StageContext, persona: &str, text: &str) -> DialogueLine {
        let id = persona.into();
        DialogueLine {
            speaker: Some(ctx.snapshot.personas.resolve(&id).unwrap()),
            text: text.into(),
            emotion: "neutral".into(),
            pose: None,
        }
    }

    #[tokio::test]
    async fn test_failing_line_is_rewritten_once() {
        let text = testkit::ScriptedText::new().push(AgentRole::Actor, "\"As you wish.\"");
        let (project, root) = testkit::project();
        let ctx = testkit::context(project, &root, text.clone(), 0);
        let mut draft = Draft::new(root, 1);
        draft.content.dialogue = vec![
            DialogueLine::narration("Later."),
            spoken(&ctx, "hana", "Yeah, whatever."),
        ];
        let draft = Actor.run(draft, &ctx).await.unwrap();
        assert_eq!(draft.content.dialogue[1].text, "As you wish.");
        assert_eq!(
            draft.content.dialogue[1].pose.as_ref().unwrap().to_string(),
            "hana@v1:neutral"
        );
        assert!(draft.content.dialogue[0].pose.is_none());
        assert_eq!(text.calls(AgentRole::Actor), 1);
    }

    #[tokio::test]
    async fn test_bad_emotion_falls_back_without_rewrite() {
        let text = testkit::ScriptedText::new();
        let (project, root) = testkit::project();
        let ctx = testkit::context(project, &root, text.clone(), 0);
        let mut draft = Draft::new(root, 1);
        let mut line = spoken(&ctx, "hana", "Good morning.");
        line.emotion = "a-very-long-and-wistful-smile".into();
        draft.content.dialogue = vec![line];

        let draft = Actor.run(draft, &ctx).await.unwrap();
        let line = &draft.content.dialogue[0];
        assert_eq!(line.text, "Good morning.");
        assert_eq!(line.emotion, "neutral");
        assert_eq!(line.pose.as_ref().unwrap().key(), "hana@v1:neutral");
        assert_eq!(text.calls(AgentRole::Actor), 0);
    }

    #[tokio::test]
    async fn test_rewrite_that_still_fails_rejects_the_attempt() {
        let text = testkit::ScriptedText::new().push(AgentRole::Actor, "Whatever, gonna go.");
        let (project, root) = testkit::project();
        let ctx = testkit::context(project, &root, text, 0);
        let mut draft = Draft::new(root, 1);
        draft.content.dialogue = vec![spoken(&ctx, "hana", "Whatever.")];
        let err = Actor.run(draft, &ctx).await.unwrap_err();
        assert!(matches!(err, StageError::ContentIntegrity { stage: "actor", .. }));
    }
}
