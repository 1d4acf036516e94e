//! Shared fixtures: a tempfile-backed database, a canned change source,
//! and scripted classifiers that stand in for the LLM service.

// Not every test crate uses every fixture.
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use repopulse::classifier::{Classifier, ReleaseBrief};
use repopulse::config::{Config, DbConfig};
use repopulse::migrate;
use repopulse::models::{
    CommitInfo, FetchedRelease, GroupSummary, MergedPr, PrBrief, PrDetail, PrGroup, RepoInfo,
    RepoMeta, ReleaseSummary, Theme,
};
use repopulse::source::ChangeSource;

pub async fn setup_db() -> (TempDir, SqlitePool, Config) {
    let tmp = TempDir::new().unwrap();
    let db_path: PathBuf = tmp.path().join("pulse.sqlite");
    let pool = repopulse::db::connect_path(&db_path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let config = Config {
        db: DbConfig { path: db_path },
        github: Default::default(),
        classifier: Default::default(),
        scheduling: Default::default(),
    };
    (tmp, pool, config)
}

pub fn merged_at(days_ago: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days_ago)
}

pub fn pr(number: i64, title: &str, days_ago: i64) -> MergedPr {
    MergedPr {
        number,
        title: title.to_string(),
        body: format!("body of PR {}", number),
        url: format!("https://example.com/pr/{}", number),
        author: Some("alice".to_string()),
        merged_at: merged_at(days_ago),
        labels: vec![],
        commits: vec![CommitInfo {
            sha: format!("sha{}", number),
            message: format!("commit for {}", number),
            url: String::new(),
        }],
    }
}

pub fn release(tag: &str, days_ago: i64, body: &str) -> FetchedRelease {
    FetchedRelease {
        tag_name: tag.to_string(),
        title: None,
        url: format!("https://example.com/releases/{}", tag),
        published_at: Utc::now() - Duration::days(days_ago),
        body: body.to_string(),
    }
}

pub fn meta() -> RepoMeta {
    RepoMeta {
        owner: "acme".to_string(),
        name: "widget".to_string(),
        description: Some("a widget factory".to_string()),
    }
}

/// Insert a tracked repo row directly, bypassing the network path.
pub async fn insert_repo(pool: &SqlitePool, owner: &str, name: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO repos (id, owner, name, interest_count) VALUES (?, ?, ?, 1)")
        .bind(&id)
        .bind(owner)
        .bind(name)
        .execute(pool)
        .await
        .unwrap();
    id
}

pub async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

// ---- Change source ----

/// Canned change source serving a fixed PR/release history. Repositories
/// owned by `fail_owner` error on every call, for failure-isolation tests.
pub struct StaticSource {
    pub prs: Vec<MergedPr>,
    pub releases: Vec<FetchedRelease>,
    pub fail_owner: Option<String>,
}

impl StaticSource {
    pub fn new(prs: Vec<MergedPr>, releases: Vec<FetchedRelease>) -> Self {
        Self {
            prs,
            releases,
            fail_owner: None,
        }
    }

    fn check(&self, owner: &str) -> Result<()> {
        if self.fail_owner.as_deref() == Some(owner) {
            bail!("simulated source outage for {}", owner);
        }
        Ok(())
    }

    fn sorted_desc(&self) -> Vec<MergedPr> {
        let mut prs = self.prs.clone();
        prs.sort_by(|a, b| b.merged_at.cmp(&a.merged_at));
        prs
    }
}

#[async_trait]
impl ChangeSource for StaticSource {
    async fn repo_info(&self, owner: &str, _name: &str) -> Result<RepoInfo> {
        self.check(owner)?;
        Ok(RepoInfo {
            description: Some("a widget factory".to_string()),
            avatar_url: None,
            default_branch: "main".to_string(),
            pushed_at: Some(Utc::now()),
            star_count: 42,
        })
    }

    async fn merged_prs_since(
        &self,
        owner: &str,
        _name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MergedPr>> {
        self.check(owner)?;
        Ok(self
            .sorted_desc()
            .into_iter()
            .filter(|p| p.merged_at > since)
            .collect())
    }

    async fn recent_merged_prs(
        &self,
        owner: &str,
        _name: &str,
        limit: usize,
    ) -> Result<Vec<MergedPr>> {
        self.check(owner)?;
        Ok(self.sorted_desc().into_iter().take(limit).collect())
    }

    async fn older_merged_prs(
        &self,
        owner: &str,
        _name: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MergedPr>> {
        self.check(owner)?;
        Ok(self
            .sorted_desc()
            .into_iter()
            .filter(|p| p.merged_at < before)
            .take(limit)
            .collect())
    }

    async fn releases_since(
        &self,
        owner: &str,
        _name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchedRelease>> {
        self.check(owner)?;
        Ok(self
            .releases
            .iter()
            .filter(|r| r.published_at > since)
            .cloned()
            .collect())
    }
}

// ---- Classifiers ----

/// Classifier with canned theme and group responses; summaries always fail
/// so fallback summaries make assertions deterministic.
pub struct Scripted {
    pub themes: Vec<Theme>,
    pub groups: Vec<PrGroup>,
}

#[async_trait]
impl Classifier for Scripted {
    async fn cluster_themes(&self, _repo: &RepoMeta, _briefs: &[PrBrief]) -> Result<Vec<Theme>> {
        if self.themes.is_empty() {
            bail!("no scripted themes");
        }
        Ok(self.themes.clone())
    }

    async fn group_prs(&self, _repo: &RepoMeta, details: &[PrDetail]) -> Result<Vec<PrGroup>> {
        let asked: Vec<i64> = details.iter().map(|d| d.number).collect();
        let scoped: Vec<PrGroup> = self
            .groups
            .iter()
            .map(|g| PrGroup {
                numbers: g
                    .numbers
                    .iter()
                    .copied()
                    .filter(|n| asked.contains(n))
                    .collect(),
                reason: g.reason.clone(),
            })
            .filter(|g| !g.numbers.is_empty())
            .collect();
        if scoped.is_empty() {
            bail!("no scripted groups matched");
        }
        Ok(scoped)
    }

    async fn summarize_group(&self, _repo: &RepoMeta, _details: &[PrDetail]) -> Result<GroupSummary> {
        bail!("summaries not scripted")
    }

    async fn summarize_release(
        &self,
        _repo: &RepoMeta,
        _release: &ReleaseBrief,
    ) -> Result<ReleaseSummary> {
        bail!("summaries not scripted")
    }

    async fn summarize_release_cluster(
        &self,
        _repo: &RepoMeta,
        _releases: &[ReleaseBrief],
    ) -> Result<ReleaseSummary> {
        bail!("summaries not scripted")
    }
}

/// Classifier that returns structurally valid but garbled content:
/// duplicate theme membership, hallucinated PR numbers, and groups that
/// silently drop PRs. The pipeline must still cover every input exactly
/// once.
pub struct Garbled;

#[async_trait]
impl Classifier for Garbled {
    async fn cluster_themes(&self, _repo: &RepoMeta, briefs: &[PrBrief]) -> Result<Vec<Theme>> {
        let numbers: Vec<i64> = briefs.iter().map(|b| b.number).collect();
        // First two PRs appear in both themes; last PR appears in neither;
        // 9999 exists nowhere.
        let n = numbers.len();
        Ok(vec![
            Theme {
                name: "One".to_string(),
                numbers: numbers.iter().take(2).copied().chain([9999]).collect(),
            },
            Theme {
                name: "Two".to_string(),
                numbers: numbers.iter().take(n.saturating_sub(1)).copied().collect(),
            },
        ])
    }

    async fn group_prs(&self, _repo: &RepoMeta, details: &[PrDetail]) -> Result<Vec<PrGroup>> {
        // Drop the last PR of whatever we were asked about.
        let mut numbers: Vec<i64> = details.iter().map(|d| d.number).collect();
        numbers.pop();
        numbers.push(8888);
        Ok(vec![PrGroup {
            numbers,
            reason: "garbled".to_string(),
        }])
    }

    async fn summarize_group(&self, _repo: &RepoMeta, _details: &[PrDetail]) -> Result<GroupSummary> {
        bail!("garbled")
    }

    async fn summarize_release(
        &self,
        _repo: &RepoMeta,
        _release: &ReleaseBrief,
    ) -> Result<ReleaseSummary> {
        bail!("garbled")
    }

    async fn summarize_release_cluster(
        &self,
        _repo: &RepoMeta,
        _releases: &[ReleaseBrief],
    ) -> Result<ReleaseSummary> {
        bail!("garbled")
    }
}

pub fn disabled_classifier() -> Arc<dyn Classifier> {
    Arc::new(repopulse::classifier::DisabledClassifier)
}
