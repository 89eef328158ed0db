//! Artifact introspection
//!
//! Wraps a scene source with an observer subclass whose teardown reports the
//! objects present in the finished scene as a JSON list. Rendering the
//! observer instead of the original scene yields the same media plus the
//! dump. Observer failures are printed and never break the render.

use forge_artifact::{parse_dump, scan_static_objects, IntrospectedObject};
use std::path::{Path, PathBuf};

/// Environment variable the observer consults for its dump path
pub const DUMP_PATH_ENV: &str = "FORGE_OBJECT_DUMP";

const OBSERVER_TEMPLATE: &str = r#"

# --- runtime object observer ---
import json as _forge_json
import os as _forge_os


class __OBSERVER__(__SCENE__):
    def tear_down(self):
        try:
            _objects = []
            for _mob in list(self.mobjects):
                _entry = {"type": type(_mob).__name__}
                try:
                    _entry["position"] = [round(float(_v), 3) for _v in _mob.get_center()]
                except Exception:
                    pass
                try:
                    _color = _mob.get_color()
                    _to_hex = getattr(_color, "to_hex", None) or getattr(_color, "get_hex", None)
                    _entry["color"] = _to_hex() if _to_hex else str(_color)
                except Exception:
                    pass
                for _attr in ("text", "tex_string"):
                    _value = getattr(_mob, _attr, None)
                    if isinstance(_value, str) and _value:
                        _entry["text"] = _value
                        break
                _objects.append(_entry)
            _path = _forge_os.environ.get("__ENV__", __DUMP__)
            with open(_path, "w", encoding="utf-8") as _fh:
                _forge_json.dump(_objects, _fh, ensure_ascii=False)
        except Exception as _exc:
            print("object observer failed:", _exc)
        super().tear_down()
"#;

/// A source wrapped for observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedArtifact {
    /// Original source with the observer appended
    pub source: String,
    /// Class the renderer must run instead of the original scene
    pub entry_point: String,
    /// Where the dump will be written
    pub dump_path: PathBuf,
}

/// Builds observer-wrapped sources
#[derive(Debug, Clone, Copy, Default)]
pub struct Introspector;

impl Introspector {
    /// Wrap `source` so that rendering the returned entry point also dumps
    /// the scene's objects to `dump_path`
    #[must_use]
    pub fn wrap(source: &str, scene: &str, dump_path: &Path) -> ObservedArtifact {
        let entry_point = format!("ForgeObserved{scene}");
        let dump_literal = serde_json::to_string(&dump_path.display().to_string())
            .unwrap_or_else(|_| "\"objects.json\"".to_string());

        let observer = OBSERVER_TEMPLATE
            .replace("__OBSERVER__", &entry_point)
            .replace("__SCENE__", scene)
            .replace("__ENV__", DUMP_PATH_ENV)
            .replace("__DUMP__", &dump_literal);

        let mut wrapped = source.trim_end().to_string();
        wrapped.push('\n');
        wrapped.push_str(&observer);

        ObservedArtifact {
            source: wrapped,
            entry_point,
            dump_path: dump_path.to_path_buf(),
        }
    }
}

/// Read the objects a render reported
///
/// Falls back to a static scan of `source` when the dump is missing or
/// unreadable.
pub async fn read_dump(dump_path: &Path, source: &str) -> Vec<IntrospectedObject> {
    match tokio::fs::read_to_string(dump_path).await {
        Ok(json) => match parse_dump(&json) {
            Ok(objects) => {
                tracing::debug!(count = objects.len(), "read runtime object dump");
                return objects;
            }
            Err(e) => tracing::warn!(path = %dump_path.display(), "malformed object dump: {e}"),
        },
        Err(e) => tracing::debug!(path = %dump_path.display(), "no object dump: {e}"),
    }
    scan_static_objects(source)
}
