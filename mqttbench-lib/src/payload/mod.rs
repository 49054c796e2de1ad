//! Payload templating.
//!
//! A payload is either plain text or a JSON tree. Within text (and within
//! every string leaf of a tree) two placeholders are recognised:
//!
//! - `${createTs}`: replaced by the unix epoch time in milliseconds;
//! - `${randN}`: replaced by `N` random characters out of `[0-9a-zA-Z]`.
//!
//! Templates are parsed once into a [`PayloadTemplate`] and rendered
//! for every message, right before it is handed to the publisher.

use std::time::SystemTime;

use rama::{error::BoxError, telemetry::tracing};
use rand::{Rng, distr::Alphanumeric};
use serde_json::{Map, Value};

use crate::utils::time::unix_millis;

#[cfg(test)]
mod tests;

const CREATE_TS_PLACEHOLDER: &str = "${createTs}";
const RAND_PLACEHOLDER_PREFIX: &str = "${rand";

/// Largest `N` accepted in `${randN}`: the maximum MQTT packet size.
pub const MAX_RAND_LEN: usize = 268_435_455;

/// Payload as configured by the user.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadSpec {
    /// Raw text, published as-is after substitution.
    Text(String),
    /// JSON tree, published as compact JSON after substitution.
    Tree(Value),
}

impl PayloadSpec {
    /// A JSON string becomes [`PayloadSpec::Text`], anything else a [`PayloadSpec::Tree`].
    pub fn from_json_value(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            other => Self::Tree(other),
        }
    }
}

impl Default for PayloadSpec {
    fn default() -> Self {
        Self::Text("hello world".to_owned())
    }
}

/// Resolve a payload spec in one go.
///
/// Prefer [`PayloadTemplate::compile`] when the same spec is rendered repeatedly.
pub fn resolve<R: Rng + ?Sized>(spec: &PayloadSpec, now: SystemTime, rng: &mut R) -> Vec<u8> {
    PayloadTemplate::compile(spec).render(now, rng)
}

/// A parsed [`PayloadSpec`], ready to be rendered.
#[derive(Debug, Clone)]
pub struct PayloadTemplate(TemplateKind);

#[derive(Debug, Clone)]
enum TemplateKind {
    Text(TextTemplate),
    Tree(TreeTemplate),
}

impl PayloadTemplate {
    /// Compile a spec, leaving invalid and oversized placeholders unresolved.
    pub fn compile(spec: &PayloadSpec) -> Self {
        match spec {
            PayloadSpec::Text(text) => Self(TemplateKind::Text(TextTemplate::parse(text))),
            PayloadSpec::Tree(value) => Self(TemplateKind::Tree(TreeTemplate::compile(value))),
        }
    }

    /// Compile a spec, failing on a `${randN}` with `N` above [`MAX_RAND_LEN`].
    pub fn try_compile(spec: &PayloadSpec) -> Result<Self, BoxError> {
        let template = Self::compile(spec);
        let oversized = match &template.0 {
            TemplateKind::Text(text) => text.oversized.as_deref(),
            TemplateKind::Tree(tree) => tree.oversized(),
        };
        match oversized {
            Some(n) => Err(BoxError::from(format!(
                "random string placeholder ${{rand{n}}} exceeds the maximum length of {MAX_RAND_LEN}"
            ))),
            None => Ok(template),
        }
    }

    /// Render the template with every placeholder resolved against `now`,
    /// each `${randN}` drawing fresh characters from `rng`.
    pub fn render<R: Rng + ?Sized>(&self, now: SystemTime, rng: &mut R) -> Vec<u8> {
        match &self.0 {
            TemplateKind::Text(text) => text.render(now, rng).into_bytes(),
            TemplateKind::Tree(tree) => tree.render(now, rng).to_string().into_bytes(),
        }
    }

    /// `true` if rendering never produces different output.
    pub fn is_static(&self) -> bool {
        match &self.0 {
            TemplateKind::Text(text) => text.is_static(),
            TemplateKind::Tree(tree) => tree.is_static(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    CreateTs,
    Rand(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TextTemplate {
    segments: Vec<Segment>,
    /// First `${randN}` left unresolved because `N` is too large.
    oversized: Option<String>,
}

/// Why a `${...}` marker is not resolved.
enum Unresolved {
    Invalid,
    Oversized(String),
}

impl TextTemplate {
    fn parse(input: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut oversized = None;
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            literal.push_str(&rest[..start]);
            let tail = &rest[start..];

            match parse_placeholder(tail) {
                Ok((placeholder, consumed)) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(placeholder);
                    rest = &tail[consumed..];
                }
                Err(unresolved) => {
                    if let Unresolved::Oversized(n) = unresolved {
                        oversized.get_or_insert(n);
                    }
                    // not a (valid) placeholder: keep the marker and scan on
                    literal.push_str("${");
                    rest = &tail[2..];
                }
            }
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self {
            segments,
            oversized,
        }
    }

    fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    fn render<R: Rng + ?Sized>(&self, now: SystemTime, rng: &mut R) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::CreateTs => out.push_str(&unix_millis(now).to_string()),
                Segment::Rand(n) => {
                    out.reserve(*n);
                    out.extend((0..*n).map(|_| char::from(rng.sample(Alphanumeric))));
                }
            }
        }
        out
    }
}

/// Parse the placeholder at the start of `tail` (which starts with `${`).
///
/// Returns the placeholder and the amount of bytes it spans.
fn parse_placeholder(tail: &str) -> Result<(Segment, usize), Unresolved> {
    if tail.starts_with(CREATE_TS_PLACEHOLDER) {
        return Ok((Segment::CreateTs, CREATE_TS_PLACEHOLDER.len()));
    }

    let after_prefix = tail
        .strip_prefix(RAND_PLACEHOLDER_PREFIX)
        .ok_or(Unresolved::Invalid)?;
    let Some(end) = after_prefix.find('}') else {
        tracing::warn!(
            template = tail,
            "unterminated random string placeholder; left unresolved"
        );
        return Err(Unresolved::Invalid);
    };

    let count = &after_prefix[..end];
    if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
        tracing::warn!(
            count,
            "fail to gen rand string: count is not a decimal integer; placeholder left unresolved"
        );
        return Err(Unresolved::Invalid);
    }

    match count.parse::<usize>() {
        Ok(n) if n <= MAX_RAND_LEN => {
            Ok((Segment::Rand(n), RAND_PLACEHOLDER_PREFIX.len() + end + 1))
        }
        _ => {
            tracing::warn!(
                count,
                max = MAX_RAND_LEN,
                "fail to gen rand string: count exceeds the maximum; placeholder left unresolved"
            );
            Err(Unresolved::Oversized(count.to_owned()))
        }
    }
}

#[derive(Debug, Clone)]
enum TreeTemplate {
    Text(TextTemplate),
    Array(Vec<TreeTemplate>),
    Object(Vec<(String, TreeTemplate)>),
    Value(Value),
}

impl TreeTemplate {
    fn compile(value: &Value) -> Self {
        match value {
            Value::String(text) => Self::Text(TextTemplate::parse(text)),
            Value::Array(items) => Self::Array(items.iter().map(Self::compile).collect()),
            Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Self::compile(value)))
                    .collect(),
            ),
            other => Self::Value(other.clone()),
        }
    }

    fn oversized(&self) -> Option<&str> {
        match self {
            Self::Text(text) => text.oversized.as_deref(),
            Self::Array(items) => items.iter().find_map(Self::oversized),
            Self::Object(entries) => entries.iter().find_map(|(_, value)| value.oversized()),
            Self::Value(_) => None,
        }
    }

    fn is_static(&self) -> bool {
        match self {
            Self::Text(text) => text.is_static(),
            Self::Array(items) => items.iter().all(Self::is_static),
            Self::Object(entries) => entries.iter().all(|(_, value)| value.is_static()),
            Self::Value(_) => true,
        }
    }

    fn render<R: Rng + ?Sized>(&self, now: SystemTime, rng: &mut R) -> Value {
        match self {
            Self::Text(text) => Value::String(text.render(now, rng)),
            Self::Array(items) => {
                Value::Array(items.iter().map(|item| item.render(now, rng)).collect())
            }
            Self::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.render(now, rng)))
                    .collect::<Map<String, Value>>(),
            ),
            Self::Value(value) => value.clone(),
        }
    }
}
