/// Configuration module for agent-hub.
///
/// Handles loading, validating, and providing default configuration values.
/// Secrets are never required in the file: `apply_env` overlays them from the
/// process environment.
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "agent-hub.json";

// ── Default value functions ──────────────────────────────────────────

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_db_path() -> String {
    dirs::data_dir()
        .map(|d| d.join("agent-hub").join("hub.db"))
        .and_then(|p| p.to_str().map(str::to_string))
        .unwrap_or_else(|| "./hub.db".to_string())
}

fn default_company_domain() -> String {
    "positiveit.com.ar".to_string()
}

fn default_model() -> String {
    "gemini-1.5-flash-latest".to_string()
}

fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_knowledge_max_chars() -> usize {
    6000
}

fn default_refresh_secs() -> u64 {
    3600
}

fn default_search_engine() -> String {
    "google".to_string()
}

fn default_page_max_chars() -> usize {
    5000
}

// ── Config structs ───────────────────────────────────────────────────

/// Switch between real back ends and mock data.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Production,
    Test,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub mode: Mode,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Origins allowed by CORS. Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    /// Only accounts under this email domain may use the hub.
    #[serde(default = "default_company_domain")]
    pub company_domain: String,

    /// Explicit admin accounts. Empty means every company account is admin.
    #[serde(default)]
    pub admin_emails: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firebase_api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct KnowledgeConfig {
    /// Company website scraped as context for the general-knowledge agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,

    #[serde(default = "default_knowledge_max_chars")]
    pub max_chars: usize,

    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToolsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serp_api_key: Option<String>,

    #[serde(default = "default_search_engine")]
    pub search_engine: String,

    #[serde(default = "default_page_max_chars")]
    pub page_max_chars: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jira_url: Option<String>,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            db_path: default_db_path(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            llm: LlmConfig::default(),
            knowledge: KnowledgeConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            company_domain: default_company_domain(),
            admin_emails: Vec::new(),
            firebase_api_key: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            base_url: default_llm_base_url(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            website_url: None,
            max_chars: default_knowledge_max_chars(),
            refresh_secs: default_refresh_secs(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            serp_api_key: None,
            search_engine: default_search_engine(),
            page_max_chars: default_page_max_chars(),
            jira_url: None,
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    #[must_use]
    pub fn is_test_mode(&self) -> bool {
        self.mode == Mode::Test
    }

    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to [`DEFAULT_CONFIG_PATH`].
    /// If the file does not exist, returns a default config and generates a
    /// template file for the default path.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            DEFAULT_CONFIG_PATH
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == DEFAULT_CONFIG_PATH {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let mut cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");

        // Domains are compared without the leading '@'
        cfg.auth.company_domain = normalize_domain(&cfg.auth.company_domain);

        Ok(cfg)
    }

    /// Overlay secrets and deployment overrides from the environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Same as [`Config::apply_env`] with an explicit variable source.
    pub fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("GEMINI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = non_empty("FIREBASE_API_KEY") {
            self.auth.firebase_api_key = Some(v);
        }
        if let Some(v) = non_empty("SERP_API_KEY") {
            self.tools.serp_api_key = Some(v);
        }
        if let Some(v) = non_empty("JIRA_URL") {
            self.tools.jira_url = Some(v);
        }
        if let Some(v) = non_empty("AGENT_HUB_DB") {
            self.db_path = v;
        }
        if let Some(v) = non_empty("AGENT_HUB_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = non_empty("AGENT_HUB_MODE") {
            match v.to_lowercase().as_str() {
                "test" => self.mode = Mode::Test,
                "production" => self.mode = Mode::Production,
                other => warn!("Ignoring unknown AGENT_HUB_MODE: {other}"),
            }
        }
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.auth.company_domain.trim().is_empty(),
            "auth.company_domain must be set"
        );
        anyhow::ensure!(!self.db_path.is_empty(), "db_path must be set");
        anyhow::ensure!(
            (0.0..=2.0).contains(&self.llm.temperature),
            "llm.temperature must be within 0.0..=2.0"
        );
        anyhow::ensure!(self.llm.timeout_secs > 0, "llm.timeout_secs must be positive");
        anyhow::ensure!(
            self.knowledge.max_chars > 0,
            "knowledge.max_chars must be positive"
        );
        anyhow::ensure!(
            self.tools.page_max_chars > 0,
            "tools.page_max_chars must be positive"
        );
        self.server
            .bind
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("server.bind is not a socket address: {}", self.server.bind))?;

        // The Firebase key is checked when the HTTP server builds its authenticator
        if self.mode == Mode::Production && self.llm.api_key.is_none() {
            warn!("No Gemini API key configured; agents will answer with the fallback message");
        }
        Ok(())
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('@').to_lowercase()
}

// ── Tests ────────────────────────────────────────────────────────────
