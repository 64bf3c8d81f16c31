use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "confsync/0.1";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteConfig {
    #[serde(default)]
    pub confluence: ConfluenceSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ConfluenceSection {
    pub base_url: Option<String>,
    pub space_key: Option<String>,
    pub root_title: Option<String>,
    pub root_id: Option<String>,
    pub user_agent: Option<String>,
}

impl SiteConfig {
    /// Resolve user agent: config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        self.confluence
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

/// Load and parse a SiteConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_site_config(config_path: &Path) -> Result<SiteConfig> {
    if !config_path.exists() {
        return Ok(SiteConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SiteConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Fully resolved site coordinates for one run. The caller (CLI) merges
/// flags, environment, and config file before constructing this.
#[derive(Debug, Clone, Default)]
pub struct SiteSettings {
    pub base_url: String,
    pub space_key: String,
    pub root_title: String,
    pub root_id: Option<String>,
}

impl SiteSettings {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            bail!("Confluence base URL is required (set CONFLUENCE_BASE_URL or [confluence].base_url)");
        }
        if self.space_key.trim().is_empty() {
            bail!("Confluence space key is required (set CONFLUENCE_SPACE_KEY or pass --space)");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub email: String,
    pub api_token: String,
}

impl Credentials {
    pub fn validate(&self) -> Result<()> {
        if self.email.trim().is_empty() {
            bail!("Confluence account email is required (set CONFLUENCE_EMAIL)");
        }
        if self.api_token.trim().is_empty() {
            bail!("Confluence API token is required (set CONFLUENCE_API_TOKEN)");
        }
        Ok(())
    }
}

/// HTTP client tuning knobs. Defaults match interactive use against
/// Confluence Cloud; batch jobs usually raise the rate limits.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            rate_limit_read_ms: 300,
            rate_limit_write_ms: 1_000,
            max_retries: 2,
            max_write_retries: 1,
            retry_delay_ms: 500,
        }
    }
}
