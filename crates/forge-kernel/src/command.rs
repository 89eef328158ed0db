//! Render invocation
//!
//! Builds the renderer command line
//! `<program...> <quality> --media_dir <dir> -o <stem> <file> <scene> [-s]`
//! and locates the media file the renderer leaves behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// One renderer invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCommand {
    program: Vec<String>,
    quality: String,
    media_dir: PathBuf,
    output_stem: String,
    source_file: PathBuf,
    scene: String,
    single_frame: bool,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl RenderCommand {
    /// Render `scene` from `source_file` with `program` (program plus leading args)
    #[must_use]
    pub fn new(
        program: &[String],
        source_file: impl Into<PathBuf>,
        scene: impl Into<String>,
    ) -> Self {
        Self {
            program: program.to_vec(),
            quality: "-ql".to_string(),
            media_dir: PathBuf::from("media"),
            output_stem: "output".to_string(),
            source_file: source_file.into(),
            scene: scene.into(),
            single_frame: false,
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    #[must_use]
    pub fn with_media_dir(mut self, media_dir: impl Into<PathBuf>) -> Self {
        self.media_dir = media_dir.into();
        self
    }

    #[must_use]
    pub fn with_output_stem(mut self, stem: impl Into<String>) -> Self {
        self.output_stem = stem.into();
        self
    }

    /// Render only the last frame as an image
    #[must_use]
    pub fn single_frame(mut self) -> Self {
        self.single_frame = true;
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    #[inline]
    #[must_use]
    pub fn output_stem(&self) -> &str {
        &self.output_stem
    }

    #[inline]
    #[must_use]
    pub fn is_single_frame(&self) -> bool {
        self.single_frame
    }

    /// Extension of the media file this invocation produces
    #[inline]
    #[must_use]
    pub fn media_extension(&self) -> &'static str {
        if self.single_frame {
            "png"
        } else {
            "mp4"
        }
    }

    /// Arguments after the program
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = self.program.iter().skip(1).cloned().collect();
        args.push(self.quality.clone());
        args.push("--media_dir".to_string());
        args.push(self.media_dir.display().to_string());
        args.push("-o".to_string());
        args.push(self.output_stem.clone());
        args.push(self.source_file.display().to_string());
        args.push(self.scene.clone());
        if self.single_frame {
            args.push("-s".to_string());
        }
        args
    }

    /// Program name, if any was configured
    #[must_use]
    pub fn program(&self) -> Option<&str> {
        self.program.first().map(String::as_str)
    }

    /// Tokio command with piped output, ready for group spawning
    pub(crate) fn to_command(&self) -> Option<Command> {
        let mut command = Command::new(self.program()?);
        command
            .args(self.args())
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        Some(command)
    }
}

/// Find the media file a render produced
///
/// The renderer nests its output (`videos/<file>/<quality>/<stem>.mp4`), so
/// this walks `dir` for a file with extension `ext` whose name contains
/// `stem`. Returns `None` when nothing matches or `dir` is unreadable.
pub async fn find_media(dir: &Path, stem: &str, ext: &str) -> Option<PathBuf> {
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&current).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(path);
            } else if is_media_match(&path, stem, ext) {
                return Some(path);
            }
        }
    }
    None
}

fn is_media_match(path: &Path, stem: &str, ext: &str) -> bool {
    let ext_matches = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext));
    let name_matches = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains(stem));
    ext_matches && name_matches
}
