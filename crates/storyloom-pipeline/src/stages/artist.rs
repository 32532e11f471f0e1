use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::try_join_all;
use storyloom_core::model::{BackgroundEntry, CatalogEntry, Persona, PoseRef};
use storyloom_core::Project;

use super::{provider_failure, Draft, Stage, StageContext};
use crate::error::{ProviderError, StageError};
use crate::provider::ImageDescriptor;

const NAME: &str = "artist";

/// Requests an image for every pose the scene uses that is not cached yet,
/// plus the scene's background when its location has none.
#[derive(Debug, Clone, Default)]
pub struct Artist;

fn describe(persona: &Persona, pose: &PoseRef, style: &str) -> String {
    let mut prompt = format!(
        "A single character sprite for a visual novel, vertical, plain background. \
         Art style: {style}. Character: {}, wearing {}. Expression: {}.",
        persona.name, persona.appearance.outfit, pose.pose
    );
    if !persona.appearance.palette.is_empty() {
        prompt.push_str(&format!(
            " Color palette: {}.",
            persona.appearance.palette.join(", ")
        ));
    }
    prompt
}

fn describe_background(project: &Project, location: &str) -> String {
    format!(
        "A visual novel background, wide landscape, no people. Art style: {}. \
         Location: {location}, in the world of \"{}\".",
        project.config.style, project.world.title
    )
}

impl Artist {
    async fn draw_background(
        &self,
        draft: &mut Draft,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        let Some(location) = draft.content.location.as_deref().map(str::trim) else {
            return Ok(());
        };
        if location.is_empty() || ctx.snapshot.assets.contains_background(location) {
            return Ok(());
        }
        let location = location.to_string();
        tracing::debug!("Artist drawing background {location:?} for {}", draft.node);
        let descriptor =
            ImageDescriptor::background(&location, describe_background(&ctx.snapshot, &location));
        let asset = ctx
            .providers
            .generate_image(&descriptor)
            .await
            .map_err(provider_failure(NAME))?;
        draft.new_backgrounds.push(BackgroundEntry {
            location,
            asset,
            description: descriptor.prompt,
        });
        Ok(())
    }
}

#[async_trait]
impl Stage for Artist {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, mut draft: Draft, ctx: &StageContext) -> Result<Draft, StageError> {
        let snapshot = &ctx.snapshot;
        let mut wanted: BTreeMap<String, (PoseRef, String)> = BTreeMap::new();
        for line in &draft.content.dialogue {
            let (Some(speaker), Some(pose)) = (&line.speaker, &line.pose) else {
                continue;
            };
            if !pose.belongs_to(speaker) {
                return Err(StageError::integrity(
                    NAME,
                    format!("pose {pose} does not match speaker {speaker}"),
                ));
            }
            if snapshot.assets.contains(pose) || wanted.contains_key(&pose.key()) {
                continue;
            }
            let persona = snapshot
                .personas
                .get(speaker)
                .ok_or_else(|| StageError::integrity(NAME, format!("unknown persona {speaker}")))?;
            wanted.insert(
                pose.key(),
                (pose.clone(), describe(persona, pose, &snapshot.config.style)),
            );
        }

        self.draw_background(&mut draft, ctx).await?;
        if wanted.is_empty() {
            return Ok(draft);
        }
        tracing::debug!("Artist drawing {} pose(s) for {}", wanted.len(), draft.node);

        let requests = wanted.into_values().map(|(pose, prompt)| async move {
            let descriptor = ImageDescriptor::pose(pose.clone(), prompt);
            let asset = ctx.providers.generate_image(&descriptor).await?;
            Ok::<_, ProviderError>(CatalogEntry {
                pose,
                asset,
                description: descriptor.prompt,
            })
        });
        let entries = try_join_all(requests).await.map_err(provider_failure(NAME))?;
        draft.new_assets.extend(entries);
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use storyloom_core::model::{AssetRef, DialogueLine, PersonaRef};

    fn line(speaker: &PersonaRef, emotion: &str) -> DialogueLine {
        DialogueLine {
            speaker: Some(speaker.clone()),
            text: "Hello.".into(),
            emotion: emotion.into(),
            pose: Some(PoseRef::of(speaker, emotion)),
        }
    }

    #[tokio::test]
    async fn test_only_uncached_poses_are_drawn() {
        let (mut project, root) = testkit::project();
        let hana = project.personas.resolve(&"hana".into()).unwrap();
        project.assets.insert(CatalogEntry {
            pose: PoseRef::of(&hana, "neutral"),
            asset: AssetRef("assets/cached.png".into()),
            description: String::new(),
        });
        let ctx = testkit::context(project, &root, testkit::ScriptedText::new(), 0);

        let mut draft = Draft::new(root, 1);
        draft.content.dialogue = vec![line(&hana, "neutral"), line(&hana, "smile"), line(&hana, "smile")];

        let draft = Artist.run(draft, &ctx).await.unwrap();
        assert_eq!(draft.new_assets.len(), 1);
        assert_eq!(draft.new_assets[0].pose.key(), "hana@v1:smile");
        assert!(draft.new_assets[0].description.contains("school uniform"));
        assert!(draft.new_backgrounds.is_empty());
    }

    #[tokio::test]
    async fn test_amended_persona_gets_fresh_pose() {
        let (mut project, root) = testkit::project();
        let v1 = project.personas.resolve(&"hana".into()).unwrap();
        project.assets.insert(CatalogEntry {
            pose: PoseRef::of(&v1, "smile"),
            asset: AssetRef("assets/v1-smile.png".into()),
            description: String::new(),
        });
        let v2 = project
            .personas
            .amend(&v1.id, |p| p.appearance.outfit = "raincoat".into())
            .unwrap();
        let ctx = testkit::context(project, &root, testkit::ScriptedText::new(), 0);

        let mut draft = Draft::new(root, 1);
        draft.content.dialogue = vec![line(&v1, "smile"), line(&v2, "smile")];

        let draft = Artist.run(draft, &ctx).await.unwrap();
        assert_eq!(draft.new_assets.len(), 1);
        assert_eq!(draft.new_assets[0].pose.key(), "hana@v2:smile");
        assert!(draft.new_assets[0].description.contains("raincoat"));
    }

    #[tokio::test]
    async fn test_background_drawn_once_per_location() {
        let (mut project, root) = testkit::project();
        project.assets.insert_background(BackgroundEntry {
            location: "Classroom".into(),
            asset: AssetRef("assets/classroom.png".into()),
            description: String::new(),
        });
        let ctx = testkit::context(project, &root, testkit::ScriptedText::new(), 0);

        let mut draft = Draft::new(root.clone(), 1);
        draft.content.location = Some("classroom".into());
        let draft = Artist.run(draft, &ctx).await.unwrap();
        assert!(draft.new_backgrounds.is_empty());

        let mut draft = Draft::new(root, 1);
        draft.content.location = Some("rooftop".into());
        let draft = Artist.run(draft, &ctx).await.unwrap();
        assert_eq!(draft.new_backgrounds.len(), 1);
        assert_eq!(draft.new_backgrounds[0].location, "rooftop");
        assert!(draft.new_backgrounds[0].description.contains("Spring Term"));
    }

    #[tokio::test]
    async fn test_pose_for_other_version_is_rejected() {
        let (mut project, root) = testkit::project();
        let v1 = project.personas.resolve(&"hana".into()).unwrap();
        let v2 = project.personas.amend(&v1.id, |_| {}).unwrap();
        let ctx = testkit::context(project, &root, testkit::ScriptedText::new(), 0);

        let mut draft = Draft::new(root, 1);
        let mut mismatched = line(&v2, "smile");
        mismatched.pose = Some(PoseRef::of(&v1, "smile"));
        draft.content.dialogue = vec![mismatched];
        assert!(Artist.run(draft, &ctx).await.is_err());
    }
}
