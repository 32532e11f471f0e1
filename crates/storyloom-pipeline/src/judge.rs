use storyloom_core::model::{DialogueLine, Persona, SpeechRegister};

/// Decides whether a line is in character for a persona version.
/// `Err` carries the reason, which is fed back into the rewrite request.
pub trait PersonaJudge: Send + Sync {
    fn judge(&self, persona: &Persona, line: &DialogueLine) -> Result<(), String>;
}

const SLANG: &[&str] = &[
    "gonna", "wanna", "gotta", "yeah", "nah", "dude", "lol", "kinda", "ain't", "y'all",
];
const MODERN: &[&str] = &["okay", "ok", "cool", "awesome", "phone", "internet"];
const TERSE_MAX_WORDS: usize = 12;
pub const EMOTION_MAX_LEN: usize = 24;

/// Whether `emotion` can name a pose: short, lowercase ASCII, digits, `_` or `-`.
pub fn is_pose_name(emotion: &str) -> bool {
    !emotion.is_empty()
        && emotion.len() <= EMOTION_MAX_LEN
        && emotion
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Rule-based judge: forbidden phrases, speech register, and a well-formed
/// emotion name for the pose.
#[derive(Debug, Clone, Default)]
pub struct VoiceRuleJudge;

impl VoiceRuleJudge {
    fn words(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
    }
}

impl PersonaJudge for VoiceRuleJudge {
    fn judge(&self, persona: &Persona, line: &DialogueLine) -> Result<(), String> {
        let text = line.text.trim();
        if text.is_empty() {
            return Err("line is empty".into());
        }

        let lowered = text.to_lowercase();
        if let Some(phrase) = persona
            .voice
            .forbidden
            .iter()
            .find(|p| !p.trim().is_empty() && lowered.contains(&p.trim().to_lowercase()))
        {
            return Err(format!("{} never says {phrase:?}", persona.name));
        }

        let banned: &[&str] = match persona.voice.register {
            SpeechRegister::Polite | SpeechRegister::Formal => SLANG,
            SpeechRegister::Archaic => MODERN,
            SpeechRegister::Casual | SpeechRegister::Terse => &[],
        };
        if let Some(word) = Self::words(text).find(|w| banned.contains(&w.as_str())) {
            return Err(format!(
                "{:?} breaks {}'s {} register",
                word, persona.name, persona.voice.register
            ));
        }
        if persona.voice.register == SpeechRegister::Terse {
            let count = Self::words(text).count();
            if count > TERSE_MAX_WORDS {
                return Err(format!(
                    "{} speaks tersely; line has {count} words (max {TERSE_MAX_WORDS})",
                    persona.name
                ));
            }
        }

        if !is_pose_name(&line.emotion) {
            return Err(format!("emotion {:?} is not a valid pose name", line.emotion));
        }
        Ok(())
    }
}
