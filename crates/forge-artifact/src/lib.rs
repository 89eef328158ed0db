//! SceneForge Artifact Model
//!
//! Pure, synchronous building blocks shared by the render engine.
//!
//! # Core Concepts
//!
//! - [`Fingerprint`]: SHA-256 over a request and the scene state it targets
//! - [`ArtifactRef`]: Public reference to a rendered media file
//! - [`SceneContract`]: The scene class a source declares as runnable
//! - [`CompletenessGate`]: Heuristic rejection of visibly partial sources
//! - [`IntrospectedObject`]: Objects observed at teardown or scanned statically
//!
//! # Example
//!
//! ```rust,ignore
//! use forge_artifact::{CompletenessGate, Fingerprint, SceneContract};
//!
//! let key = Fingerprint::compute("add a square", &current_source);
//! let report = CompletenessGate::default().check(&draft);
//! let scene = SceneContract::detect(&draft).map(|c| c.class_name);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod completeness;
mod extract;
mod fingerprint;
mod objects;
mod scene;

pub use artifact::ArtifactRef;
pub use completeness::{
    CompletenessGate, CompletenessIssue, CompletenessReport, DEFAULT_MIN_LINES, ERROR_MARKER,
    WARNING_MARKER,
};
pub use extract::{
    bounded_head, bounded_tail, extract_code_block, extract_json_array, extract_json_object,
};
pub use fingerprint::{Fingerprint, FingerprintError, FINGERPRINT_SEPARATOR};
pub use objects::{parse_dump, scan_static_objects, IntrospectedObject, ObjectOrigin};
pub use scene::{SceneAnalysis, SceneContract, ENTRY_POINT_METHOD, KNOWN_SCENE_BASES};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn gate_and_contract_agree_on_entry_point() {
        let source = "from manim import *\n\nclass Wave(Scene):\n    def construct(self):\n        dot = Dot()\n        self.add(dot)\n";
        assert!(CompletenessGate::default().check(source).is_complete());
        assert_eq!(SceneContract::detect(source).unwrap().class_name, "Wave");
        assert_eq!(scan_static_objects(source)[0].kind, "Dot");
    }
}
