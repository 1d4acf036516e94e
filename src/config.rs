use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_github_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: default_github_api_base(),
            token_env: default_token_env(),
            lookback_days: default_lookback_days(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_lookback_days() -> i64 {
    30
}
fn default_page_size() -> usize {
    30
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_classifier_api_base")]
    pub api_base: String,
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_theme_concurrency")]
    pub theme_concurrency: usize,
    #[serde(default = "default_summary_concurrency")]
    pub summary_concurrency: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_base: default_classifier_api_base(),
            timeout_secs: default_classifier_timeout_secs(),
            theme_concurrency: default_theme_concurrency(),
            summary_concurrency: default_summary_concurrency(),
        }
    }
}

impl ClassifierConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_classifier_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_classifier_timeout_secs() -> u64 {
    60
}
fn default_theme_concurrency() -> usize {
    3
}
fn default_summary_concurrency() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulingConfig {
    /// Maximum tolerated age of a repository's index before a refresh is
    /// triggered, in seconds.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: i64,
    /// Maximum number of repositories processed per sweep pass.
    #[serde(default = "default_sweep_repo_cap")]
    pub sweep_repo_cap: i64,
    /// Batch size for backward pagination ("load older").
    #[serde(default = "default_older_page_size")]
    pub older_page_size: usize,
    /// Number of most-recent merged PRs ingested when a repository is first
    /// tracked.
    #[serde(default = "default_initial_pr_count")]
    pub initial_pr_count: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            staleness_secs: default_staleness_secs(),
            sweep_repo_cap: default_sweep_repo_cap(),
            older_page_size: default_older_page_size(),
            initial_pr_count: default_initial_pr_count(),
        }
    }
}

fn default_staleness_secs() -> i64 {
    3600
}
fn default_sweep_repo_cap() -> i64 {
    25
}
fn default_older_page_size() -> usize {
    10
}
fn default_initial_pr_count() -> usize {
    10
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.scheduling.staleness_secs < 1 {
        anyhow::bail!("scheduling.staleness_secs must be >= 1");
    }
    if config.scheduling.sweep_repo_cap < 1 {
        anyhow::bail!("scheduling.sweep_repo_cap must be >= 1");
    }
    if config.scheduling.older_page_size == 0 {
        anyhow::bail!("scheduling.older_page_size must be > 0");
    }
    if config.github.lookback_days < 1 {
        anyhow::bail!("github.lookback_days must be >= 1");
    }
    if config.classifier.theme_concurrency == 0 || config.classifier.summary_concurrency == 0 {
        anyhow::bail!("classifier concurrency caps must be > 0");
    }

    if config.classifier.is_enabled() && config.classifier.model.is_none() {
        anyhow::bail!(
            "classifier.model must be specified when provider is '{}'",
            config.classifier.provider
        );
    }

    match config.classifier.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown classifier provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let f = write_config("[db]\npath = \"/tmp/pulse.sqlite\"\n");
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.scheduling.staleness_secs, 3600);
        assert_eq!(cfg.classifier.theme_concurrency, 3);
        assert_eq!(cfg.classifier.summary_concurrency, 5);
        assert!(!cfg.classifier.is_enabled());
    }

    #[test]
    fn enabled_classifier_requires_model() {
        let f = write_config(
            "[db]\npath = \"/tmp/pulse.sqlite\"\n[classifier]\nprovider = \"openai\"\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        let f = write_config(
            "[db]\npath = \"/tmp/pulse.sqlite\"\n[classifier]\nprovider = \"bard\"\nmodel = \"x\"\n",
        );
        assert!(load_config(f.path()).is_err());
    }
}
