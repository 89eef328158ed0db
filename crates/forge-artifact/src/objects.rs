//! Introspected scene objects
//!
//! Objects reported either by the runtime observer (dump written at
//! teardown) or, when no dump is available, by a static scan of the source.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Where an object description came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectOrigin {
    /// Observed in the live scene at teardown
    #[default]
    Runtime,
    /// Inferred from source text
    Static,
}

/// One object present in a rendered (or scanned) scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrospectedObject {
    /// Type name, e.g. `Circle`
    #[serde(rename = "type")]
    pub kind: String,
    /// Variable name (static scan only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Centre, rounded to 3 decimals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<[f64; 3]>,
    /// Resolved colour as hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Text content for text-bearing objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub origin: ObjectOrigin,
}

impl IntrospectedObject {
    /// Runtime object of the given type
    #[must_use]
    pub fn runtime(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            position: None,
            color: None,
            text: None,
            origin: ObjectOrigin::Runtime,
        }
    }

    /// Short label used in context summaries: `Text("hi")`, `dot:Dot`, `Circle`
    #[must_use]
    pub fn descriptor(&self) -> String {
        match (&self.text, &self.name) {
            (Some(text), _) => format!("{}(\"{}\")", self.kind, text),
            (None, Some(name)) => format!("{name}:{}", self.kind),
            (None, None) => self.kind.clone(),
        }
    }
}

/// Parse a runtime dump (JSON list of objects)
///
/// # Errors
/// Returns the JSON error when the dump is malformed
pub fn parse_dump(json: &str) -> Result<Vec<IntrospectedObject>, serde_json::Error> {
    let mut objects: Vec<IntrospectedObject> = serde_json::from_str(json)?;
    for object in &mut objects {
        object.origin = ObjectOrigin::Runtime;
    }
    Ok(objects)
}

static CONSTRUCTOR_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*([A-Z][A-Za-z0-9_]*)\s*\((.*)$")
        .expect("valid regex")
});
static ADD_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"self\.add\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*[,)]").expect("valid regex")
});
static FIRST_STRING_ARG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*[rf]?(?:"([^"]*)"|'([^']*)')"#).expect("valid regex"));

const TEXT_TYPES: &[&str] = &["Text", "MathTex", "Tex", "MarkupText", "Paragraph"];
const EXCLUDED_NAMES: &[&str] = &["self", "Scene", "run_time", "PI", "TAU", "config"];

/// Infer objects from source text
///
/// Picks up `name = Constructor(...)` assignments and bare `self.add(name)`
/// calls, deduplicated by name in first-seen order.
#[must_use]
pub fn scan_static_objects(source: &str) -> Vec<IntrospectedObject> {
    let mut seen = HashSet::new();
    let mut objects = Vec::new();

    for line in source.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }

        if let Some(caps) = CONSTRUCTOR_ASSIGNMENT.captures(line) {
            let name = &caps[1];
            let kind = &caps[2];
            if !EXCLUDED_NAMES.contains(&name)
                && !EXCLUDED_NAMES.contains(&kind)
                && seen.insert(name.to_string())
            {
                let text = TEXT_TYPES
                    .contains(&kind)
                    .then(|| FIRST_STRING_ARG.captures(&caps[3]))
                    .flatten()
                    .and_then(|c| c.get(1).or_else(|| c.get(2)))
                    .map(|m| m.as_str().to_string());
                objects.push(IntrospectedObject {
                    kind: kind.to_string(),
                    name: Some(name.to_string()),
                    position: None,
                    color: None,
                    text,
                    origin: ObjectOrigin::Static,
                });
            }
            continue;
        }

        for caps in ADD_CALL.captures_iter(line) {
            let name = &caps[1];
            if !EXCLUDED_NAMES.contains(&name) && seen.insert(name.to_string()) {
                objects.push(IntrospectedObject {
                    kind: "Mobject".to_string(),
                    name: Some(name.to_string()),
                    position: None,
                    color: None,
                    text: None,
                    origin: ObjectOrigin::Static,
                });
            }
        }
    }

    objects
}
