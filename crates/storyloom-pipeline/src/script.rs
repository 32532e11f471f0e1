//! Script markup exchanged with the text provider.
//!
//! Producer output:
//!
//! ```text
//! <summary>Hana waits at the school gate.</summary>
//! <scene>school gate</scene>
//! <choice target="new:library" premise="Hana studies alone">Follow her</choice>
//! <choice target="existing:rooftop" requires="e1,!e4">Head upstairs</choice>
//! ```
//!
//! Writer output:
//!
//! ```text
//! <content id="narrator">The bell rings.</content>
//! <content id="hana" emotion="smile">Good morning.</content>
//! <state id="hana" key="outfit">rain-soaked uniform</state>
//! <affection id="hana">+10</affection>
//! ```
//!
//! Text outside tags is ignored so chatty providers still parse.

use std::collections::BTreeMap;

use storyloom_core::model::{EdgeId, NodeId, Precondition};

use crate::error::ScriptError;

pub const NARRATOR: &str = "narrator";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub attrs: BTreeMap<String, String>,
    pub body: String,
}

impl Tag {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    fn require(&self, key: &'static str) -> Result<&str, ScriptError> {
        self.attr(key).ok_or_else(|| ScriptError::MissingAttr {
            tag: self.name.clone(),
            attr: key,
        })
    }
}

/// Scan every `<name attr="v">body</name>` element, in document order.
pub fn tags(text: &str) -> Result<Vec<Tag>, ScriptError> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('<') {
        rest = &rest[open + 1..];
        let name_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        if name_len == 0 || !rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
            continue;
        }
        let name = rest[..name_len].to_ascii_lowercase();
        let Some(close) = rest.find('>') else {
            return Err(ScriptError::Unterminated(name));
        };
        let head = &rest[name_len..close];
        let self_closing = head.trim_end().ends_with('/');
        let attrs = parse_attrs(head.trim_end().trim_end_matches('/'));
        rest = &rest[close + 1..];

        let body = if self_closing {
            String::new()
        } else {
            let end_tag = format!("</{name}>");
            let Some(end) = find_ignore_case(rest, &end_tag) else {
                return Err(ScriptError::Unterminated(name));
            };
            let body = unescape(rest[..end].trim());
            rest = &rest[end + end_tag.len()..];
            body
        };
        out.push(Tag { name, attrs, body });
    }
    Ok(out)
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}

fn parse_attrs(mut head: &str) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    loop {
        head = head.trim_start();
        let Some(eq) = head.find('=') else { break };
        let key = head[..eq].trim().to_ascii_lowercase();
        head = head[eq + 1..].trim_start();
        let quote = match head.chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => break,
        };
        head = &head[1..];
        let Some(end) = head.find(quote) else { break };
        attrs.insert(key, unescape(&head[..end]));
        head = &head[end + 1..];
    }
    attrs
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    New { key: String, premise: String },
    Existing(NodeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptChoice {
    pub label: String,
    pub target: TargetSpec,
    pub requires: Option<Precondition>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProducerScript {
    pub summary: String,
    pub location: Option<String>,
    pub choices: Vec<ScriptChoice>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    /// `None` for narration.
    pub speaker: Option<String>,
    pub emotion: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptState {
    pub persona: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptAffection {
    pub persona: String,
    pub delta: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterScript {
    pub lines: Vec<ScriptLine>,
    pub states: Vec<ScriptState>,
    pub affection: Vec<ScriptAffection>,
}

pub fn parse_producer(text: &str) -> Result<ProducerScript, ScriptError> {
    let mut script = ProducerScript::default();
    for tag in tags(text)? {
        match tag.name.as_str() {
            "summary" => script.summary = tag.body,
            "scene" if !tag.body.is_empty() => script.location = Some(tag.body),
            "choice" => {
                let target = parse_target(tag.require("target")?, &tag)?;
                let requires = tag.attr("requires").map(parse_precondition).transpose()?;
                script.choices.push(ScriptChoice {
                    label: tag.body,
                    target,
                    requires,
                });
            }
            _ => {}
        }
    }
    if script.summary.is_empty() {
        return Err(ScriptError::Missing("summary"));
    }
    Ok(script)
}

fn parse_target(raw: &str, tag: &Tag) -> Result<TargetSpec, ScriptError> {
    match raw.split_once(':') {
        Some(("new", key)) => Ok(TargetSpec::New {
            key: key.trim().to_string(),
            premise: tag.attr("premise").unwrap_or(&tag.body).to_string(),
        }),
        Some(("existing", id)) if !id.trim().is_empty() => {
            Ok(TargetSpec::Existing(NodeId::from(id.trim())))
        }
        _ => Err(ScriptError::BadTarget(raw.to_string())),
    }
}

/// `e1` is taken(e1), `!e1` is not-taken(e1); comma-separated terms must all hold,
/// `|`-separated terms need any one.
pub fn parse_precondition(raw: &str) -> Result<Precondition, ScriptError> {
    let term = |t: &str| -> Result<Precondition, ScriptError> {
        let t = t.trim();
        let (negated, id) = match t.strip_prefix('!') {
            Some(id) => (true, id.trim()),
            None => (false, t),
        };
        let valid = id.len() > 1
            && id.starts_with('e')
            && id[1..].chars().all(|c| c.is_ascii_digit());
        if !valid {
            return Err(ScriptError::BadPrecondition(raw.to_string()));
        }
        let edge = EdgeId::from(id);
        Ok(if negated {
            Precondition::NotTaken(edge)
        } else {
            Precondition::Taken(edge)
        })
    };
    let (sep, combine): (char, fn(Vec<Precondition>) -> Precondition) = if raw.contains('|') {
        if raw.contains(',') {
            return Err(ScriptError::BadPrecondition(raw.to_string()));
        }
        ('|', Precondition::Any)
    } else {
        (',', Precondition::All)
    };
    let mut terms = raw.split(sep).map(term).collect::<Result<Vec<_>, _>>()?;
    Ok(if terms.len() == 1 {
        terms.remove(0)
    } else {
        combine(terms)
    })
}

fn render_precondition(p: &Precondition) -> Option<String> {
    let flat = |ps: &[Precondition], sep: &str| -> Option<String> {
        ps.iter()
            .map(|p| match p {
                Precondition::Taken(e) => Some(e.to_string()),
                Precondition::NotTaken(e) => Some(format!("!{e}")),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(|v| v.join(sep))
    };
    match p {
        Precondition::Taken(e) => Some(e.to_string()),
        Precondition::NotTaken(e) => Some(format!("!{e}")),
        Precondition::All(ps) => flat(ps, ","),
        Precondition::Any(ps) => flat(ps, "|"),
    }
}

pub fn parse_writer(text: &str) -> Result<WriterScript, ScriptError> {
    let mut script = WriterScript::default();
    for tag in tags(text)? {
        match tag.name.as_str() {
            "content" => {
                let id = tag.attr("id").unwrap_or(NARRATOR);
                let speaker = (!id.eq_ignore_ascii_case(NARRATOR)).then(|| id.to_string());
                let emotion = tag.attr("emotion").unwrap_or("neutral").to_string();
                if !tag.body.is_empty() {
                    script.lines.push(ScriptLine {
                        speaker,
                        emotion,
                        text: tag.body,
                    });
                }
            }
            "state" => script.states.push(ScriptState {
                persona: tag.require("id")?.to_string(),
                key: tag.require("key")?.to_string(),
                value: tag.body,
            }),
            "affection" => {
                let persona = tag.require("id")?.to_string();
                let delta = tag
                    .body
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| ScriptError::BadAffection(tag.body.clone()))?;
                script.affection.push(ScriptAffection { persona, delta });
            }
            _ => {}
        }
    }
    if script.lines.is_empty() {
        return Err(ScriptError::Missing("content"));
    }
    Ok(script)
}

pub fn render_producer(script: &ProducerScript) -> String {
    let mut out = format!("<summary>{}</summary>\n", escape(&script.summary));
    if let Some(location) = &script.location {
        out.push_str(&format!("<scene>{}</scene>\n", escape(location)));
    }
    for choice in &script.choices {
        let (target, premise) = match &choice.target {
            TargetSpec::New { key, premise } => (format!("new:{key}"), Some(premise)),
            TargetSpec::Existing(id) => (format!("existing:{id}"), None),
        };
        out.push_str(&format!("<choice target=\"{}\"", escape(&target)));
        if let Some(premise) = premise.filter(|p| !p.is_empty()) {
            out.push_str(&format!(" premise=\"{}\"", escape(premise)));
        }
        if let Some(requires) = choice.requires.as_ref().and_then(render_precondition) {
            out.push_str(&format!(" requires=\"{requires}\""));
        }
        out.push_str(&format!(">{}</choice>\n", escape(&choice.label)));
    }
    out
}

pub fn render_writer(script: &WriterScript) -> String {
    let mut out = String::new();
    for line in &script.lines {
        let id = line.speaker.as_deref().unwrap_or(NARRATOR);
        out.push_str(&format!(
            "<content id=\"{}\" emotion=\"{}\">{}</content>\n",
            escape(id),
            escape(&line.emotion),
            escape(&line.text)
        ));
    }
    for state in &script.states {
        out.push_str(&format!(
            "<state id=\"{}\" key=\"{}\">{}</state>\n",
            escape(&state.persona),
            escape(&state.key),
            escape(&state.value)
        ));
    }
    for change in &script.affection {
        out.push_str(&format!(
            "<affection id=\"{}\">{:+}</affection>\n",
            escape(&change.persona),
            change.delta
        ));
    }
    out
}
