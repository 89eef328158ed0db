//! Structural scene analysis
//!
//! Line-oriented scanning of generated scene sources. This is not a parser:
//! it reads class headers, indentation and a handful of call patterns,
//! which is enough to locate the declared scene and summarise what a
//! source builds.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Base classes accepted as a renderable scene
pub const KNOWN_SCENE_BASES: &[&str] = &[
    "Scene",
    "ThreeDScene",
    "MovingCameraScene",
    "ZoomedScene",
    "LinearTransformationScene",
    "VectorScene",
    "SpecialThreeDScene",
];

/// Method the renderer calls to build a scene
pub const ENTRY_POINT_METHOD: &str = "construct";

static CLASS_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^class\s+([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?\s*:").expect("valid regex")
});
static ENTRY_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+(?:async\s+)?def\s+construct\s*\(\s*self\b").expect("valid regex")
});
static METHOD_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("valid regex")
});
static ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=[^=]").expect("valid regex")
});
static ANIMATION_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(Create|Transform|ReplacementTransform|FadeIn|FadeOut|Rotate|Write|DrawBorderThenFill|GrowFromCenter)\s*\(")
        .expect("valid regex")
});
static AXES_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(Axes|ThreeDAxes|NumberPlane)\s*\(").expect("valid regex"));

/// Declared capability of a generated source: which class the renderer
/// should run and that it exposes the entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneContract {
    /// Name of the scene class
    pub class_name: String,
    /// The scene base it declares
    pub base: String,
    /// 1-based line of the class header
    pub line: usize,
}

impl SceneContract {
    /// Find the scene the renderer should run
    ///
    /// When several classes qualify the last one wins, mirroring how the
    /// renderer treats the final scene of a file as the main one.
    #[must_use]
    pub fn detect(source: &str) -> Option<Self> {
        Self::detect_all(source).pop()
    }

    /// Every top-level class that declares a scene base and defines the
    /// entry point in its own body
    #[must_use]
    pub fn detect_all(source: &str) -> Vec<Self> {
        let lines: Vec<&str> = source.lines().collect();
        let mut found = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            let Some(caps) = CLASS_HEADER.captures(line) else {
                continue;
            };
            let class_name = caps[1].to_string();
            let Some(base) = caps
                .get(2)
                .map(|m| m.as_str())
                .and_then(scene_base_of)
            else {
                continue;
            };

            let has_entry = class_body(&lines, idx)
                .iter()
                .any(|body_line| ENTRY_DEF.is_match(body_line));
            if has_entry {
                found.push(Self {
                    class_name,
                    base,
                    line: idx + 1,
                });
            }
        }

        found
    }
}

/// Pick the first scene-like base out of a class's base list
fn scene_base_of(bases: &str) -> Option<String> {
    bases
        .split(',')
        .map(|b| b.trim())
        .filter(|b| !b.is_empty() && !b.contains('='))
        .map(|b| b.rsplit('.').next().unwrap_or(b))
        .find(|b| KNOWN_SCENE_BASES.contains(b) || b.ends_with("Scene"))
        .map(str::to_string)
}

/// Lines belonging to the body of the class whose header is at `header_idx`
pub(crate) fn class_body<'a>(lines: &[&'a str], header_idx: usize) -> Vec<&'a str> {
    lines
        .iter()
        .skip(header_idx + 1)
        .take_while(|l| {
            let trimmed = l.trim();
            trimmed.is_empty() || trimmed.starts_with('#') || l.starts_with([' ', '\t'])
        })
        .copied()
        .collect()
}

/// Coarse structural summary of a scene source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneAnalysis {
    /// Detected scene class, if any
    pub scene_class: Option<String>,
    /// Defined function and method names
    pub methods: Vec<String>,
    /// Assigned variable names, first occurrence order
    pub variables: Vec<String>,
    /// Animation constructors used, in call order
    pub animations: Vec<String>,
    /// Whether the scene draws coordinate axes or planes
    pub has_axes: bool,
}

impl SceneAnalysis {
    /// Analyse a source
    #[must_use]
    pub fn analyze(source: &str) -> Self {
        let mut analysis = Self {
            scene_class: SceneContract::detect(source).map(|c| c.class_name),
            ..Self::default()
        };

        for line in source.lines() {
            let code = strip_comment(line);
            if let Some(caps) = METHOD_DEF.captures(code) {
                analysis.methods.push(caps[1].to_string());
            }
            if let Some(caps) = ASSIGNMENT.captures(code) {
                let name = caps[1].to_string();
                if !analysis.variables.contains(&name) {
                    analysis.variables.push(name);
                }
            }
            for caps in ANIMATION_CALL.captures_iter(code) {
                analysis.animations.push(caps[1].to_string());
            }
            if AXES_CALL.is_match(code) {
                analysis.has_axes = true;
            }
        }

        analysis
    }
}

/// Drop a trailing `#` comment (quotes are not tracked)
fn strip_comment(line: &str) -> &str {
    line.split_once('#').map_or(line, |(code, _)| code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SCENE: &str = r#"from manim import *

class Helper:
    def construct(self):
        pass

class Orbit(Scene):
    def construct(self):
        axes = Axes()
        dot = Dot()
        self.play(Create(axes), FadeIn(dot))
"#;

    #[test]
    fn detects_scene_contract() {
        let contract = SceneContract::detect(SCENE).unwrap();
        assert_eq!(contract.class_name, "Orbit");
        assert_eq!(contract.base, "Scene");
        assert_eq!(contract.line, 7);
    }

    #[test]
    fn class_without_entry_point_is_not_a_contract() {
        let source = "class Broken(Scene):\n    def setup(self):\n        pass\n";
        assert!(SceneContract::detect(source).is_none());
    }

    #[test]
    fn qualified_and_custom_bases_are_accepted() {
        let source = "class A(manim.ThreeDScene):\n    def construct(self):\n        pass\n\nclass B(MyBaseScene):\n    def construct(self):\n        pass\n";
        let all = SceneContract::detect_all(source);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].base, "ThreeDScene");
        assert_eq!(SceneContract::detect(source).unwrap().class_name, "B");
    }

    #[test]
    fn construct_in_a_later_class_does_not_leak_backwards() {
        let source = "class A(Scene):\n    x = 1\n\nclass B:\n    def construct(self):\n        pass\n";
        assert!(SceneContract::detect(source).is_none());
    }

    #[test]
    fn analysis_collects_structure() {
        let analysis = SceneAnalysis::analyze(SCENE);
        assert_eq!(analysis.scene_class.as_deref(), Some("Orbit"));
        assert_eq!(analysis.methods, vec!["construct", "construct"]);
        assert_eq!(analysis.variables, vec!["axes", "dot"]);
        assert_eq!(analysis.animations, vec!["Create", "FadeIn"]);
        assert!(analysis.has_axes);
    }

    #[test]
    fn analysis_ignores_commented_calls() {
        let analysis = SceneAnalysis::analyze("# plane = NumberPlane()\nx = 1\n");
        assert!(!analysis.has_axes);
        assert_eq!(analysis.variables, vec!["x"]);
    }
}
