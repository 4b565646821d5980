//! Service configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file
//! (`APPFORGE_CONFIG`, else `./appforge.toml` when present), then
//! environment variables (a `.env` file is loaded first via dotenvy).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::fixer::StylingPolicy;
use crate::error::AppError;

pub const DEFAULT_BIND: &str = "127.0.0.1:3001";
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "qwen/qwen3-coder:free";
pub const DEFAULT_CONFIG_FILE: &str = "appforge.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Socket address the HTTP server binds to.
    pub bind: String,
    /// Root for logs and crash reports.
    pub data_dir: PathBuf,
    /// One subdirectory per generated project.
    pub projects_dir: PathBuf,
    /// JSON sidecar mapping project ids to preview ports.
    pub port_mapping_file: PathBuf,
    pub styling: StylingPolicy,
    /// How many prior conversation messages are replayed to the model.
    pub history_window: usize,
    pub sentry_dsn: Option<String>,
    pub llm: LlmConfig,
    pub queue: QueueConfig,
    pub preview: PreviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub site_url: String,
    pub site_name: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub min_interval_ms: u64,
    pub max_queue_size: usize,
    pub max_wait_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub port_start: u16,
    pub npm_program: String,
    /// Start a dev server automatically after a project is saved.
    pub auto_start: bool,
    pub stop_grace_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("appforge");
        Self {
            bind: DEFAULT_BIND.into(),
            projects_dir: data_dir.join("ai-previews"),
            port_mapping_file: data_dir.join(".port-mapping.json"),
            data_dir,
            styling: StylingPolicy::default(),
            history_window: 10,
            sentry_dsn: None,
            llm: LlmConfig::default(),
            queue: QueueConfig::default(),
            preview: PreviewConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: None,
            model: DEFAULT_MODEL.into(),
            max_tokens: 15_000,
            temperature: 0.7,
            site_url: "http://localhost:3000".into(),
            site_name: "AI Agent".into(),
            request_timeout_secs: 300,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 3_000,
            max_queue_size: 50,
            max_wait_secs: 300,
            max_retries: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            port_start: 3002,
            npm_program: "npm".into(),
            auto_start: true,
            stop_grace_secs: 5,
        }
    }
}

impl AppConfig {
    /// Load configuration from `.env`, the optional TOML file, and the
    /// process environment.
    pub fn load() -> Result<Self, AppError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "Failed to read .env file");
            }
        }

        let explicit = std::env::var("APPFORGE_CONFIG").ok().map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::from_toml_file(&path)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::from_toml_file(fallback)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, AppError> {
        toml::from_str(raw).map_err(|e| AppError::Config(format!("invalid TOML: {}", e)))
    }

    /// Overlay environment variables. `lookup` is injected so tests do not
    /// depend on the real process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("APPFORGE_BIND") {
            self.bind = v;
        }
        if let Some(v) = get("APPFORGE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("APPFORGE_PROJECTS_DIR") {
            self.projects_dir = PathBuf::from(v);
        }
        if let Some(v) = get("APPFORGE_PORT_MAPPING_FILE") {
            self.port_mapping_file = PathBuf::from(v);
        }
        if let Some(v) = get("APPFORGE_STYLING") {
            self.styling = v.parse()?;
        }
        if let Some(v) = get("SENTRY_DSN") {
            self.sentry_dsn = Some(v);
        }
        if let Some(v) = get("OPENROUTER_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("APPFORGE_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("APPFORGE_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("SITE_URL") {
            self.llm.site_url = v;
        }
        if let Some(v) = get("SITE_NAME") {
            self.llm.site_name = v;
        }
        if let Some(v) = get("APPFORGE_PREVIEW_PORT_START") {
            self.preview.port_start = parse_number("APPFORGE_PREVIEW_PORT_START", &v)?;
        }
        if let Some(v) = get("APPFORGE_NPM") {
            self.preview.npm_program = v;
        }
        if let Some(v) = get("APPFORGE_AUTO_PREVIEW") {
            self.preview.auto_start = parse_bool("APPFORGE_AUTO_PREVIEW", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.bind_addr()?;
        let base = url::Url::parse(&self.llm.base_url)
            .map_err(|e| AppError::Config(format!("llm.base_url '{}': {}", self.llm.base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "llm.base_url must be http(s), got '{}'",
                base.scheme()
            )));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(AppError::Config(format!(
                "llm.temperature must be within 0..=2, got {}",
                self.llm.temperature
            )));
        }
        if self.queue.max_queue_size == 0 {
            return Err(AppError::Config("queue.max_queue_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, AppError> {
        self.bind
            .parse()
            .map_err(|e| AppError::Config(format!("bind '{}': {}", self.bind, e)))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, AppError> {
    raw.parse()
        .map_err(|_| AppError::Config(format!("{} must be a number, got '{}'", key, raw)))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, AppError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::Config(format!("{} must be a boolean, got '{}'", key, raw))),
    }
}
