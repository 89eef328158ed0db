//! Completeness gate
//!
//! Heuristic pre-filter that rejects sources which are visibly partial:
//! placeholder comments standing in for omitted code, ellipsis-only lines,
//! empty class bodies, sources too short to be a scene, or sources with
//! no runnable scene contract. Anything it lets through may still fail to
//! render; the repair loop catches that.

use crate::scene::{class_body, SceneContract};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Prefix for advisory markers appended after the draft gate
pub const WARNING_MARKER: &str = "# FORGE-VALIDATION-WARNING:";

/// Prefix for markers prepended after the final gate
pub const ERROR_MARKER: &str = "# FORGE-VALIDATION-ERROR:";

/// Default minimum number of non-blank lines
pub const DEFAULT_MIN_LINES: usize = 5;

static ELISION_COMMENT: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^\s*#\s*(\.\.\.|…)+\s*$",
        r"(?i)^\s*#.*\b(rest|remainder) of (the )?(code|scene|file|class|implementation)\b",
        r"(?i)^\s*#.*\b(rest|remaining|everything else|other code)\b.*\b(unchanged|same|as before)\b",
        r"(?i)^\s*#.*\b(existing|previous|original) code\b",
        r"(?i)^\s*#.*\bkeep (the )?(existing|rest|same)\b",
        r"^\s*#.*(其余|其他|剩余|原有|之前的|保持不变|省略|不变的)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static ELLIPSIS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\.\.\.|…)\s*$").expect("valid regex"));

static CLASS_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^class\s+([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"));

/// A single reason a source was judged incomplete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletenessIssue {
    /// Placeholder comment standing in for omitted code
    ElisionMarker { line: usize, excerpt: String },
    /// Line consisting only of an ellipsis
    EllipsisLine { line: usize },
    /// Class whose body is only `pass` or `...`
    EmptyClassBody { class_name: String, line: usize },
    /// Fewer non-blank lines than the minimum
    TooShort { lines: usize, min: usize },
    /// No scene class with an entry point
    MissingSceneContract,
}

impl CompletenessIssue {
    /// One-line description
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::ElisionMarker { line, excerpt } => {
                format!("line {line}: placeholder comment `{excerpt}`")
            }
            Self::EllipsisLine { line } => format!("line {line}: ellipsis in place of code"),
            Self::EmptyClassBody { class_name, line } => {
                format!("line {line}: class {class_name} has an empty body")
            }
            Self::TooShort { lines, min } => {
                format!("only {lines} non-blank lines (minimum {min})")
            }
            Self::MissingSceneContract => {
                "no scene class defining construct(self)".to_string()
            }
        }
    }
}

/// Outcome of a gate check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessReport {
    pub issues: Vec<CompletenessIssue>,
}

impl CompletenessReport {
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }

    /// All issue descriptions joined by `; `
    #[must_use]
    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(CompletenessIssue::describe)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Append advisory marker lines to `source`; unchanged when complete
    #[must_use]
    pub fn with_warning_footer(&self, source: &str) -> String {
        if self.is_complete() {
            return source.to_string();
        }
        let mut out = source.trim_end().to_string();
        out.push('\n');
        for issue in &self.issues {
            out.push_str(&format!("\n{WARNING_MARKER} {}", issue.describe()));
        }
        out.push('\n');
        out
    }

    /// Prepend error marker lines to `source`; unchanged when complete
    #[must_use]
    pub fn with_error_header(&self, source: &str) -> String {
        if self.is_complete() {
            return source.to_string();
        }
        let mut out = String::new();
        for issue in &self.issues {
            out.push_str(&format!("{ERROR_MARKER} {}\n", issue.describe()));
        }
        out.push_str(source);
        out
    }
}

/// Gate configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletenessGate {
    min_lines: usize,
}

impl Default for CompletenessGate {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_LINES)
    }
}

impl CompletenessGate {
    #[inline]
    #[must_use]
    pub const fn new(min_lines: usize) -> Self {
        Self { min_lines }
    }

    /// Check a source, collecting every issue found
    #[must_use]
    pub fn check(&self, source: &str) -> CompletenessReport {
        let lines: Vec<&str> = source.lines().collect();
        let mut issues = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            if ELLIPSIS_LINE.is_match(line) {
                issues.push(CompletenessIssue::EllipsisLine { line: idx + 1 });
            } else if ELISION_COMMENT.iter().any(|re| re.is_match(line)) {
                issues.push(CompletenessIssue::ElisionMarker {
                    line: idx + 1,
                    excerpt: line.trim().chars().take(60).collect(),
                });
            }

            if let Some(caps) = CLASS_NAME.captures(line) {
                let body = class_body(&lines, idx);
                let statements: Vec<&str> = body
                    .iter()
                    .map(|l| l.trim())
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .collect();
                if statements.iter().all(|s| *s == "pass" || *s == "..." || *s == "…") {
                    issues.push(CompletenessIssue::EmptyClassBody {
                        class_name: caps[1].to_string(),
                        line: idx + 1,
                    });
                }
            }
        }

        let non_blank = lines.iter().filter(|l| !l.trim().is_empty()).count();
        if non_blank < self.min_lines {
            issues.push(CompletenessIssue::TooShort {
                lines: non_blank,
                min: self.min_lines,
            });
        }

        if SceneContract::detect(source).is_none() {
            issues.push(CompletenessIssue::MissingSceneContract);
        }

        CompletenessReport { issues }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPLETE: &str = "from manim import *\n\nclass Demo(Scene):\n    def construct(self):\n        circle = Circle()\n        self.play(Create(circle))\n        self.wait(1)\n";

    #[test]
    fn complete_scene_passes() {
        let report = CompletenessGate::default().check(COMPLETE);
        assert!(report.is_complete(), "{}", report.summary());
    }

    #[test]
    fn detects_english_and_chinese_elisions() {
        let source = COMPLETE.replace(
            "        self.wait(1)\n",
            "        # rest of the code unchanged\n        # 其余代码保持不变\n",
        );
        let report = CompletenessGate::default().check(&source);
        let markers = report
            .issues
            .iter()
            .filter(|i| matches!(i, CompletenessIssue::ElisionMarker { .. }))
            .count();
        assert_eq!(markers, 2);
    }

    #[test]
    fn bare_hash_ellipsis_is_an_elision() {
        let source = COMPLETE.replace("        self.wait(1)\n", "        # ...\n");
        let report = CompletenessGate::default().check(&source);
        assert!(report
            .issues
            .contains(&CompletenessIssue::ElisionMarker { line: 7, excerpt: "# ...".into() }));
    }

    #[test]
    fn empty_class_body_is_reported() {
        let source = format!("{COMPLETE}\nclass Later(Scene):\n    pass\n");
        let report = CompletenessGate::default().check(&source);
        assert!(report.issues.iter().any(|i| matches!(
            i,
            CompletenessIssue::EmptyClassBody { class_name, .. } if class_name == "Later"
        )));
    }

    #[test]
    fn ordinary_comments_are_fine() {
        let source = COMPLETE.replace(
            "        self.wait(1)\n",
            "        # draw the circle slowly\n        self.wait(1)\n",
        );
        assert!(CompletenessGate::default().check(&source).is_complete());
    }

    #[test]
    fn warning_footer_appends_markers() {
        let report = CompletenessGate::default().check("...");
        let marked = report.with_warning_footer("...");
        assert!(marked.starts_with("..."));
        assert!(marked.lines().any(|l| l.starts_with(WARNING_MARKER)));
    }

    #[test]
    fn error_header_prepends_markers() {
        let report = CompletenessGate::default().check("x = 1");
        let marked = report.with_error_header("x = 1");
        assert!(marked.starts_with(ERROR_MARKER));
        assert!(marked.ends_with("x = 1"));
    }

    #[test]
    fn complete_report_leaves_source_untouched() {
        let report = CompletenessReport::default();
        assert_eq!(report.with_warning_footer(COMPLETE), COMPLETE);
        assert_eq!(report.with_error_header(COMPLETE), COMPLETE);
    }
}
