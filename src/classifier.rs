//! Classification service abstraction and implementations.
//!
//! Defines the [`Classifier`] trait and concrete implementations:
//! - **[`DisabledClassifier`]** — returns errors; every call site degrades
//!   to its documented deterministic fallback, so the pipeline stays usable
//!   (at finer granularity) with no API key.
//! - **[`OpenAiClassifier`]** — calls a chat-completions endpoint in JSON
//!   mode and validates every required field before anything reaches the
//!   persistence layer.
//!
//! All calls are structured request → structured response. A malformed or
//! empty response is an error here; the grouping and summarization engines
//! own the fallback behavior.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ClassifierConfig;
use crate::models::{
    Category, GroupSummary, PrBrief, PrDetail, PrGroup, ReleaseSummary, RepoMeta, Significance,
    Theme,
};

/// A release, reduced to what the summarization prompt needs.
#[derive(Debug, Clone)]
pub struct ReleaseBrief {
    pub tag_name: String,
    pub title: Option<String>,
    pub body: String,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Phase 1: partition PR briefs into named themes.
    async fn cluster_themes(&self, repo: &RepoMeta, briefs: &[PrBrief]) -> Result<Vec<Theme>>;

    /// Phase 2: merge PRs within one theme into coherent groups.
    async fn group_prs(&self, repo: &RepoMeta, details: &[PrDetail]) -> Result<Vec<PrGroup>>;

    /// Summarize one group of PRs as a single cohesive change.
    async fn summarize_group(&self, repo: &RepoMeta, details: &[PrDetail])
        -> Result<GroupSummary>;

    /// Summarize one standalone release.
    async fn summarize_release(
        &self,
        repo: &RepoMeta,
        release: &ReleaseBrief,
    ) -> Result<ReleaseSummary>;

    /// Summarize a cluster of sibling releases as one unified note.
    async fn summarize_release_cluster(
        &self,
        repo: &RepoMeta,
        releases: &[ReleaseBrief],
    ) -> Result<ReleaseSummary>;
}

/// Instantiate the classifier named by the configuration.
pub fn create_classifier(config: &ClassifierConfig) -> Result<Arc<dyn Classifier>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledClassifier)),
        "openai" => Ok(Arc::new(OpenAiClassifier::new(config)?)),
        other => bail!("Unknown classifier provider: {}", other),
    }
}

// ============ Disabled Classifier ============

/// A classifier that always errors, exercising every fallback path.
pub struct DisabledClassifier;

#[async_trait]
impl Classifier for DisabledClassifier {
    async fn cluster_themes(&self, _repo: &RepoMeta, _briefs: &[PrBrief]) -> Result<Vec<Theme>> {
        bail!("classifier provider is disabled")
    }

    async fn group_prs(&self, _repo: &RepoMeta, _details: &[PrDetail]) -> Result<Vec<PrGroup>> {
        bail!("classifier provider is disabled")
    }

    async fn summarize_group(
        &self,
        _repo: &RepoMeta,
        _details: &[PrDetail],
    ) -> Result<GroupSummary> {
        bail!("classifier provider is disabled")
    }

    async fn summarize_release(
        &self,
        _repo: &RepoMeta,
        _release: &ReleaseBrief,
    ) -> Result<ReleaseSummary> {
        bail!("classifier provider is disabled")
    }

    async fn summarize_release_cluster(
        &self,
        _repo: &RepoMeta,
        _releases: &[ReleaseBrief],
    ) -> Result<ReleaseSummary> {
        bail!("classifier provider is disabled")
    }
}

// ============ OpenAI Classifier ============

/// Classifier backed by an OpenAI-compatible chat-completions endpoint.
///
/// Requires `OPENAI_API_KEY` in the environment. Every call requests JSON
/// output and is parsed with required-field validation; unvalidated text
/// never flows into persisted fields.
pub struct OpenAiClassifier {
    client: reqwest::Client,
    api_base: String,
    model: String,
}

impl OpenAiClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("classifier.model required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model,
        })
    }

    async fn complete_json(&self, system: &str, user: &str) -> Result<Value> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!("classification API error {}: {}", status, body_text);
        }

        let json: Value = resp.json().await?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow::anyhow!("classification response missing message content"))?;

        serde_json::from_str(content).context("classification response is not valid JSON")
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn cluster_themes(&self, repo: &RepoMeta, briefs: &[PrBrief]) -> Result<Vec<Theme>> {
        let system = "You group merged pull requests of a software repository into broad themes. \
            Respond with JSON: {\"themes\": [{\"name\": string, \"numbers\": [int]}]}. \
            Every input PR number must appear in exactly one theme.";
        let user = format!(
            "Repository {} ({}). Cluster these pull requests into themes:\n{}",
            repo.full_name(),
            repo.description.as_deref().unwrap_or("no description"),
            serde_json::to_string(briefs)?,
        );

        let json = self.complete_json(system, &user).await?;
        parse_themes(&json)
    }

    async fn group_prs(&self, repo: &RepoMeta, details: &[PrDetail]) -> Result<Vec<PrGroup>> {
        let system = "You merge pull requests that implement the same feature, fix, or \
            follow-up into groups. Respond with JSON: \
            {\"groups\": [{\"numbers\": [int], \"reason\": string}]}. \
            A PR that stands alone gets its own group. \
            Every input PR number must appear in exactly one group.";
        let user = format!(
            "Repository {} ({}). Group these pull requests:\n{}",
            repo.full_name(),
            repo.description.as_deref().unwrap_or("no description"),
            serde_json::to_string(details)?,
        );

        let json = self.complete_json(system, &user).await?;
        parse_groups(&json)
    }

    async fn summarize_group(
        &self,
        repo: &RepoMeta,
        details: &[PrDetail],
    ) -> Result<GroupSummary> {
        let system = "You write a changelog entry for one coherent change, which may span \
            several pull requests. Treat them as a single change, not separate ones. \
            Respond with JSON: {\"title\": string, \"summary\": string, \
            \"category\": one of feature|enhancement|bugfix|breaking|deprecation|performance|security|docs, \
            \"significance\": one of major|minor|patch|internal}.";
        let user = format!(
            "Repository {} ({}). Summarize this change:\n{}",
            repo.full_name(),
            repo.description.as_deref().unwrap_or("no description"),
            serde_json::to_string(details)?,
        );

        let json = self.complete_json(system, &user).await?;
        parse_group_summary(&json)
    }

    async fn summarize_release(
        &self,
        repo: &RepoMeta,
        release: &ReleaseBrief,
    ) -> Result<ReleaseSummary> {
        let system = "You summarize a software release for end users in 2-3 sentences. \
            Respond with JSON: {\"summary\": string}.";
        let user = format!(
            "Repository {}. Release {} ({}):\n{}",
            repo.full_name(),
            release.tag_name,
            release.title.as_deref().unwrap_or(""),
            release.body,
        );

        let json = self.complete_json(system, &user).await?;
        parse_release_summary(&json)
    }

    async fn summarize_release_cluster(
        &self,
        repo: &RepoMeta,
        releases: &[ReleaseBrief],
    ) -> Result<ReleaseSummary> {
        let system = "You summarize a set of sibling releases (same version line, published \
            together) as one unified note in 2-3 sentences. \
            Respond with JSON: {\"summary\": string}.";
        let mut user = format!("Repository {}. Releases:\n", repo.full_name());
        for r in releases {
            user.push_str(&format!(
                "- {} {}\n{}\n",
                r.tag_name,
                r.title.as_deref().unwrap_or(""),
                r.body,
            ));
        }

        let json = self.complete_json(system, &user).await?;
        parse_release_summary(&json)
    }
}

// ---- Strict response parsing ----

fn parse_themes(json: &Value) -> Result<Vec<Theme>> {
    let themes = json
        .get("themes")
        .and_then(|t| t.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid theme response: missing themes array"))?;

    let mut out = Vec::with_capacity(themes.len());
    for theme in themes {
        let name = theme
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| anyhow::anyhow!("invalid theme response: missing name"))?;
        let numbers = parse_numbers(theme.get("numbers"))?;
        out.push(Theme {
            name: name.to_string(),
            numbers,
        });
    }

    if out.is_empty() {
        bail!("invalid theme response: empty themes array");
    }
    Ok(out)
}

fn parse_groups(json: &Value) -> Result<Vec<PrGroup>> {
    let groups = json
        .get("groups")
        .and_then(|g| g.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid group response: missing groups array"))?;

    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        let numbers = parse_numbers(group.get("numbers"))?;
        if numbers.is_empty() {
            continue;
        }
        let reason = group
            .get("reason")
            .and_then(|r| r.as_str())
            .unwrap_or("related changes")
            .to_string();
        out.push(PrGroup { numbers, reason });
    }

    if out.is_empty() {
        bail!("invalid group response: no usable groups");
    }
    Ok(out)
}

fn parse_group_summary(json: &Value) -> Result<GroupSummary> {
    let title = required_str(json, "title")?;
    let summary = required_str(json, "summary")?;
    let category = Category::parse(&required_str(json, "category")?)
        .ok_or_else(|| anyhow::anyhow!("invalid summary response: unknown category"))?;
    let significance = Significance::parse(&required_str(json, "significance")?)
        .ok_or_else(|| anyhow::anyhow!("invalid summary response: unknown significance"))?;

    Ok(GroupSummary {
        title,
        summary,
        category,
        significance,
    })
}

fn parse_release_summary(json: &Value) -> Result<ReleaseSummary> {
    let summary = required_str(json, "summary")?;
    Ok(ReleaseSummary { summary })
}

fn required_str(json: &Value, field: &str) -> Result<String> {
    let s = json
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("invalid response: missing field '{}'", field))?;
    Ok(s.to_string())
}

fn parse_numbers(value: Option<&Value>) -> Result<Vec<i64>> {
    let arr = value
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid response: missing numbers array"))?;
    Ok(arr.iter().filter_map(|n| n.as_i64()).collect())
}
