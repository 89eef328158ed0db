//! Engine configuration
//!
//! Sources, later wins: [`ForgeConfig::default`], an optional TOML file,
//! then `FORGE_*` environment variables.

use crate::error::ForgeError;
use forge_artifact::DEFAULT_MIN_LINES;
use forge_kernel::{DEFAULT_DIAGNOSTIC_LIMIT, DEFAULT_MAX_LIVE};
use forge_llm::LlmConfig;
use forge_store::DEFAULT_HISTORY_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "FORGE_";

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Root of the `state/`, `work/` and `media/` directories
    pub data_root: PathBuf,
    /// Public prefix rendered media is served under
    pub media_prefix: String,
    /// Renderer program followed by its leading arguments
    pub render_program: Vec<String>,
    /// Renderer quality flag
    pub quality: String,
    /// Scene class used when no scene contract is detected
    pub default_scene: String,
    /// Repair attempts after the first render
    pub max_retries: u32,
    pub history_capacity: usize,
    /// History entries summarised into each prompt
    pub context_window: usize,
    pub max_live_renders: usize,
    pub render_timeout_secs: u64,
    pub preview_timeout_secs: u64,
    pub preview_enabled: bool,
    pub min_artifact_lines: usize,
    /// Bound on diagnostic text shown to clients
    pub diagnostic_limit: usize,
    /// Name reported by the health probe
    pub service_name: String,
    pub llm: LlmConfig,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("forge-data"),
            media_prefix: "/static".to_string(),
            render_program: vec![
                "python3".to_string(),
                "-m".to_string(),
                "manim".to_string(),
            ],
            quality: "-ql".to_string(),
            default_scene: "MathScene".to_string(),
            max_retries: 2,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            context_window: 3,
            max_live_renders: DEFAULT_MAX_LIVE,
            render_timeout_secs: 300,
            preview_timeout_secs: 20,
            preview_enabled: true,
            min_artifact_lines: DEFAULT_MIN_LINES,
            diagnostic_limit: DEFAULT_DIAGNOSTIC_LIMIT,
            service_name: "SceneForge Render Service".to_string(),
            llm: LlmConfig::default(),
        }
    }
}

impl ForgeConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = root.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_render_program(mut self, program: Vec<String>) -> Self {
        self.render_program = program;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_live_renders(mut self, max: usize) -> Self {
        self.max_live_renders = max;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout_secs = timeout.as_secs().max(1);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_preview(mut self, enabled: bool) -> Self {
        self.preview_enabled = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_llm(mut self, llm: LlmConfig) -> Self {
        self.llm = llm;
        self
    }

    #[inline]
    #[must_use]
    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    #[inline]
    #[must_use]
    pub fn preview_timeout(&self) -> Duration {
        Duration::from_secs(self.preview_timeout_secs)
    }

    /// Parse a TOML document over the defaults
    ///
    /// # Errors
    /// Returns [`ForgeError::Config`] if the document is not valid
    pub fn from_toml_str(raw: &str) -> Result<Self, ForgeError> {
        let config: Self = toml::from_str(raw).map_err(|e| ForgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    ///
    /// # Errors
    /// Returns [`ForgeError::Config`] naming the offending field
    pub fn validate(&self) -> Result<(), ForgeError> {
        let positive = [
            ("max_live_renders", self.max_live_renders),
            ("history_capacity", self.history_capacity),
            ("diagnostic_limit", self.diagnostic_limit),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ForgeError::Config(format!("{field} must be at least 1")));
        }
        if self.render_timeout_secs == 0 {
            return Err(ForgeError::Config("render_timeout_secs must be at least 1".to_string()));
        }
        if self.render_program.is_empty() {
            return Err(ForgeError::Config("render_program must name a program".to_string()));
        }
        Ok(())
    }

    /// Read a TOML file over the defaults
    ///
    /// # Errors
    /// Returns [`ForgeError::Io`] if the file cannot be read and
    /// [`ForgeError::Config`] if it is not valid
    pub fn from_toml_file(path: &Path) -> Result<Self, ForgeError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ForgeError::io_error(path, e))?;
        Self::from_toml_str(&raw)
    }

    /// Apply `FORGE_*` overrides from the process environment
    ///
    /// # Errors
    /// Returns [`ForgeError::Config`] if a numeric or boolean value is malformed
    pub fn apply_env(self) -> Result<Self, ForgeError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `FORGE_*` overrides from `lookup`
    ///
    /// # Errors
    /// Returns [`ForgeError::Config`] if a numeric or boolean value is
    /// malformed or the result fails [`ForgeConfig::validate`]
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ForgeError> {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };

        if let Some(v) = var("DATA_ROOT") {
            self.data_root = PathBuf::from(v);
        }
        if let Some(v) = var("MEDIA_PREFIX") {
            self.media_prefix = v;
        }
        if let Some(v) = var("RENDER_PROGRAM") {
            self.render_program = v.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = var("QUALITY") {
            self.quality = v;
        }
        if let Some(v) = var("DEFAULT_SCENE") {
            self.default_scene = v;
        }
        if let Some(v) = var("MAX_RETRIES") {
            self.max_retries = parse_value("MAX_RETRIES", &v)?;
        }
        if let Some(v) = var("HISTORY_CAPACITY") {
            self.history_capacity = parse_value("HISTORY_CAPACITY", &v)?;
        }
        if let Some(v) = var("CONTEXT_WINDOW") {
            self.context_window = parse_value("CONTEXT_WINDOW", &v)?;
        }
        if let Some(v) = var("MIN_ARTIFACT_LINES") {
            self.min_artifact_lines = parse_value("MIN_ARTIFACT_LINES", &v)?;
        }
        if let Some(v) = var("DIAGNOSTIC_LIMIT") {
            self.diagnostic_limit = parse_value("DIAGNOSTIC_LIMIT", &v)?;
        }
        if let Some(v) = var("SERVICE_NAME") {
            self.service_name = v;
        }
        if let Some(v) = var("MAX_LIVE_RENDERS") {
            self.max_live_renders = parse_value("MAX_LIVE_RENDERS", &v)?;
        }
        if let Some(v) = var("RENDER_TIMEOUT_SECS") {
            self.render_timeout_secs = parse_value("RENDER_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("PREVIEW_TIMEOUT_SECS") {
            self.preview_timeout_secs = parse_value("PREVIEW_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("PREVIEW_ENABLED") {
            self.preview_enabled = parse_value("PREVIEW_ENABLED", &v)?;
        }
        if let Some(v) = var("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = var("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = var("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = var("LLM_REQUEST_TIMEOUT_SECS") {
            self.llm.request_timeout_secs = parse_value("LLM_REQUEST_TIMEOUT_SECS", &v)?;
        }
        self.validate()?;
        Ok(self)
    }
}

fn parse_value<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ForgeError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ForgeError::Config(format!("{ENV_PREFIX}{name}={raw}: {e}")))
}
