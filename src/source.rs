//! Change source abstraction and the GitHub implementation.
//!
//! Defines the [`ChangeSource`] trait consumed by the ingestion pipeline
//! and [`GithubSource`], a GitHub REST v3 client with bounded pagination.
//! Source errors are transient-assumed: no internal retry, the caller
//! records a failed ingestion attempt and tries again on the next trigger.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::config::GithubConfig;
use crate::models::{CommitInfo, FetchedRelease, MergedPr, RepoInfo};

/// Upper bound on list pages fetched per call; keeps one ingestion run from
/// walking an entire large repository's history.
const MAX_PAGES: usize = 10;

/// Commits fetched per pull request.
const COMMITS_PER_PR: usize = 50;

#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Repository metadata (description, avatar, default branch, stars).
    async fn repo_info(&self, owner: &str, name: &str) -> Result<RepoInfo>;

    /// Merged pull requests (with commits) merged after `since`,
    /// newest-first.
    async fn merged_prs_since(
        &self,
        owner: &str,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MergedPr>>;

    /// The `limit` most recently merged pull requests, newest-first.
    async fn recent_merged_prs(&self, owner: &str, name: &str, limit: usize)
        -> Result<Vec<MergedPr>>;

    /// Up to `limit` pull requests merged strictly before `before`,
    /// newest-first. Used for backward pagination.
    async fn older_merged_prs(
        &self,
        owner: &str,
        name: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MergedPr>>;

    /// Published releases after `since`, newest-first.
    async fn releases_since(
        &self,
        owner: &str,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchedRelease>>;
}

/// GitHub REST v3 change source.
///
/// Reads an optional bearer token from the environment variable named by
/// `github.token_env` (default `GITHUB_TOKEN`); unauthenticated requests
/// work but are heavily rate limited.
pub struct GithubSource {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
    page_size: usize,
}

impl GithubSource {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: std::env::var(&config.token_env).ok(),
            page_size: config.page_size.clamp(1, 100),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut req = self
            .client
            .get(url)
            .header("User-Agent", "repopulse")
            .header("Accept", "application/vnd.github+json");

        if let Some(ref token) = self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("GitHub API error {} for {}: {}", status, url, body);
        }

        Ok(resp.json::<T>().await?)
    }

    /// Walk the closed-PR listing newest-first, keeping merged PRs that
    /// `keep` accepts, until `stop` says the rest of the listing is too old
    /// or `limit` PRs have been collected.
    async fn collect_merged(
        &self,
        owner: &str,
        name: &str,
        limit: usize,
        keep: impl Fn(DateTime<Utc>) -> bool,
        stop: impl Fn(DateTime<Utc>) -> bool,
    ) -> Result<Vec<MergedPr>> {
        let mut out = Vec::new();

        for page in 1..=MAX_PAGES {
            let url = format!(
                "{}/repos/{}/{}/pulls?state=closed&sort=updated&direction=desc&per_page={}&page={}",
                self.api_base, owner, name, self.page_size, page
            );
            let batch: Vec<PullListItem> = self.get_json(&url).await?;
            let exhausted = batch.len() < self.page_size;

            let mut page_all_old = !batch.is_empty();
            for item in batch {
                let merged_at = match item.merged_at {
                    Some(ts) => ts,
                    // Closed without merging; says nothing about how old the
                    // rest of the listing is.
                    None => {
                        page_all_old = false;
                        continue;
                    }
                };
                if !stop(merged_at) {
                    page_all_old = false;
                }
                if !keep(merged_at) {
                    continue;
                }
                let commits = self.pr_commits(owner, name, item.number).await?;
                out.push(MergedPr {
                    number: item.number,
                    title: item.title,
                    body: item.body.unwrap_or_default(),
                    url: item.html_url,
                    author: item.user.map(|u| u.login),
                    merged_at,
                    labels: item.labels.into_iter().map(|l| l.name).collect(),
                    commits,
                });
                if out.len() >= limit {
                    out.sort_by(|a, b| b.merged_at.cmp(&a.merged_at));
                    return Ok(out);
                }
            }

            if exhausted || page_all_old {
                break;
            }
        }

        out.sort_by(|a, b| b.merged_at.cmp(&a.merged_at));
        Ok(out)
    }

    async fn pr_commits(&self, owner: &str, name: &str, number: i64) -> Result<Vec<CommitInfo>> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/commits?per_page={}",
            self.api_base, owner, name, number, COMMITS_PER_PR
        );
        let items: Vec<CommitListItem> = self.get_json(&url).await?;
        Ok(items
            .into_iter()
            .map(|c| CommitInfo {
                sha: c.sha,
                message: c.commit.message,
                url: c.html_url.unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl ChangeSource for GithubSource {
    async fn repo_info(&self, owner: &str, name: &str) -> Result<RepoInfo> {
        let url = format!("{}/repos/{}/{}", self.api_base, owner, name);
        let repo: RepoResponse = self.get_json(&url).await?;
        Ok(RepoInfo {
            description: repo.description,
            avatar_url: repo.owner.map(|o| o.avatar_url),
            default_branch: repo.default_branch,
            pushed_at: repo.pushed_at,
            star_count: repo.stargazers_count,
        })
    }

    async fn merged_prs_since(
        &self,
        owner: &str,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MergedPr>> {
        self.collect_merged(owner, name, usize::MAX, |m| m > since, |m| m <= since)
            .await
    }

    async fn recent_merged_prs(
        &self,
        owner: &str,
        name: &str,
        limit: usize,
    ) -> Result<Vec<MergedPr>> {
        self.collect_merged(owner, name, limit, |_| true, |_| false)
            .await
    }

    async fn older_merged_prs(
        &self,
        owner: &str,
        name: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MergedPr>> {
        self.collect_merged(owner, name, limit, |m| m < before, |_| false)
            .await
    }

    async fn releases_since(
        &self,
        owner: &str,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchedRelease>> {
        let url = format!(
            "{}/repos/{}/{}/releases?per_page={}",
            self.api_base, owner, name, self.page_size
        );
        let items: Vec<ReleaseListItem> = self.get_json(&url).await?;

        let mut out: Vec<FetchedRelease> = items
            .into_iter()
            .filter(|r| !r.draft)
            .filter_map(|r| {
                let published_at = r.published_at?;
                if published_at <= since {
                    return None;
                }
                Some(FetchedRelease {
                    tag_name: r.tag_name,
                    title: r.name,
                    url: r.html_url,
                    published_at,
                    body: r.body.unwrap_or_default(),
                })
            })
            .collect();

        out.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(out)
    }
}

// ---- GitHub response shapes ----

#[derive(Debug, Deserialize)]
struct RepoResponse {
    description: Option<String>,
    default_branch: String,
    pushed_at: Option<DateTime<Utc>>,
    stargazers_count: i64,
    owner: Option<OwnerResponse>,
}

#[derive(Debug, Deserialize)]
struct OwnerResponse {
    avatar_url: String,
}

#[derive(Debug, Deserialize)]
struct PullListItem {
    number: i64,
    title: String,
    body: Option<String>,
    html_url: String,
    merged_at: Option<DateTime<Utc>>,
    user: Option<UserResponse>,
    #[serde(default)]
    labels: Vec<LabelResponse>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CommitListItem {
    sha: String,
    commit: CommitDetail,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseListItem {
    tag_name: String,
    name: Option<String>,
    html_url: String,
    published_at: Option<DateTime<Utc>>,
    body: Option<String>,
    #[serde(default)]
    draft: bool,
}
