use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Number of articles returned by `/articles/` when `count` is omitted
    #[serde(default = "default_article_count")]
    pub default_article_count: i64,
    /// Upper bound on feeds fetched in parallel for a single request
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Bearer tokens allowed to create, update and delete records
    #[serde(default)]
    pub api_tokens: Vec<String>,
    /// Accounts that can obtain a token from `/login`
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_database_url() -> String {
    "sqlite:rss_reader.db?mode=rwc".to_string()
}

fn default_article_count() -> i64 {
    10
}

fn default_fetch_concurrency() -> usize {
    8
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_visible")]
    pub is_visible: bool,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Passwords are hashed when the user is first stored.
#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            database_url: default_database_url(),
            default_article_count: default_article_count(),
            fetch_concurrency: default_fetch_concurrency(),
            api_tokens: Vec::new(),
            users: Vec::new(),
            categories: Vec::new(),
            feeds: Vec::new(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
