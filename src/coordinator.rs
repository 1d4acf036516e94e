//! Staleness and scheduling coordinator.
//!
//! Entry point for every trigger path: tracking a repository, viewing it
//! (on-demand refresh), forced destructive refresh, backward pagination,
//! and the periodic sweep. A repository is `fresh`, `stale` (older than the
//! staleness threshold), or `indexing`; "indexing" is entered by stamping
//! `last_fetched_at` before any network call, so concurrent triggers see a
//! fresh repo and do not pile on. Correctness does not depend on that
//! stamp — racing runs converge through the hash-keyed upserts.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::config::Config;
use crate::feed;
use crate::ingest::{self, IngestOutcome};
use crate::models::{RepoMeta, Update};
use crate::persist;
use crate::source::ChangeSource;

/// A tracked repository row.
#[derive(Debug, Clone)]
pub struct RepoRow {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub interest_count: i64,
    pub last_fetched_at: Option<i64>,
}

impl RepoRow {
    pub fn meta(&self) -> RepoMeta {
        RepoMeta {
            owner: self.owner.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SweepStats {
    pub scanned: usize,
    pub refreshed: usize,
    pub skipped_fresh: usize,
    pub failed: usize,
}

pub struct Coordinator {
    pool: SqlitePool,
    config: Config,
    source: Arc<dyn ChangeSource>,
    classifier: Arc<dyn Classifier>,
}

impl Coordinator {
    pub fn new(
        pool: SqlitePool,
        config: Config,
        source: Arc<dyn ChangeSource>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            pool,
            config,
            source,
            classifier,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register a repository (or bump its interest count) and run an
    /// initial ingest of its most recent activity.
    pub async fn track(&self, owner: &str, name: &str) -> Result<IngestOutcome> {
        let info = self
            .source
            .repo_info(owner, name)
            .await
            .with_context(|| format!("failed to look up {}/{}", owner, name))?;

        sqlx::query(
            r#"
            INSERT INTO repos (id, owner, name, description, avatar_url, default_branch, star_count, interest_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT(owner, name) DO UPDATE SET
                description = excluded.description,
                avatar_url = excluded.avatar_url,
                default_branch = excluded.default_branch,
                star_count = excluded.star_count,
                interest_count = interest_count + 1
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(owner)
        .bind(name)
        .bind(&info.description)
        .bind(&info.avatar_url)
        .bind(&info.default_branch)
        .bind(info.star_count)
        .execute(&self.pool)
        .await?;

        let row = self
            .get_repo(owner, name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("repo row vanished after insert"))?;

        self.run_stamped(&row, |since| {
            let initial = self.config.scheduling.initial_pr_count;
            async move {
                let prs = self.source.recent_merged_prs(owner, name, initial).await?;
                let releases = self.source.releases_since(owner, name, since).await?;
                Ok((prs, releases))
            }
        })
        .await
    }

    /// On-demand refresh: ingest if (and only if) the repository is stale.
    /// Returns `None` when it was already fresh.
    pub async fn ensure_fresh(&self, owner: &str, name: &str) -> Result<Option<IngestOutcome>> {
        let row = self.require_repo(owner, name).await?;
        if !self.is_stale(&row) {
            return Ok(None);
        }
        Ok(Some(self.ingest_incremental(&row).await?))
    }

    /// Forced refresh: destructively rebuild the repository's derived
    /// index. All deletes commit atomically before any re-ingest starts;
    /// a failure mid-delete leaves prior data intact.
    pub async fn refresh(&self, owner: &str, name: &str) -> Result<IngestOutcome> {
        let row = self.require_repo(owner, name).await?;

        persist::delete_repo_data(&self.pool, &row.id).await?;
        info!(repo = %row.meta().full_name(), "derived data deleted, re-ingesting");

        // Metadata may have changed since the repo was tracked.
        if let Ok(info) = self.source.repo_info(owner, name).await {
            sqlx::query(
                "UPDATE repos SET description = ?, avatar_url = ?, default_branch = ?, star_count = ? WHERE id = ?",
            )
            .bind(&info.description)
            .bind(&info.avatar_url)
            .bind(&info.default_branch)
            .bind(info.star_count)
            .bind(&row.id)
            .execute(&self.pool)
            .await?;
        }

        let row = self.require_repo(owner, name).await?;
        self.run_stamped(&row, |_| async move {
            let since = self.lookback_start();
            let prs = self.source.merged_prs_since(owner, name, since).await?;
            let releases = self.source.releases_since(owner, name, since).await?;
            Ok((prs, releases))
        })
        .await
    }

    /// Backward pagination: ingest a fixed-size batch of PRs merged
    /// strictly before the oldest currently-known PR, returning only the
    /// newly created Updates.
    pub async fn load_older(&self, owner: &str, name: &str) -> Result<Vec<Update>> {
        let row = self.require_repo(owner, name).await?;
        let limit = self.config.scheduling.older_page_size;
        let oldest = persist::oldest_merged_at(&self.pool, &row.id).await?;

        let outcome = self
            .run_stamped(&row, |_| async move {
                let prs = match oldest {
                    Some(ts) => {
                        let before = Utc
                            .timestamp_opt(ts, 0)
                            .single()
                            .ok_or_else(|| anyhow::anyhow!("corrupt merged_at timestamp"))?;
                        self.source.older_merged_prs(owner, name, before, limit).await?
                    }
                    // Nothing ingested yet; seed from the most recent PRs.
                    None => self.source.recent_merged_prs(owner, name, limit).await?,
                };
                Ok((prs, Vec::new()))
            })
            .await?;

        feed::updates_by_ids(&self.pool, &outcome.new_update_ids).await
    }

    /// Periodic sweep: walk up to the configured cap of tracked
    /// repositories, highest interest first, refreshing the stale ones.
    /// One repository's failure never aborts the sweep; the failed repo is
    /// stamped anyway so it does not hot-loop.
    pub async fn sweep(&self) -> Result<SweepStats> {
        let rows = sqlx::query(
            "SELECT id, owner, name, description, interest_count, last_fetched_at
             FROM repos ORDER BY interest_count DESC, owner, name LIMIT ?",
        )
        .bind(self.config.scheduling.sweep_repo_cap)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = SweepStats::default();
        for row in rows.iter().map(repo_from_row) {
            stats.scanned += 1;
            if !self.is_stale(&row) {
                stats.skipped_fresh += 1;
                continue;
            }
            match self.ingest_incremental(&row).await {
                Ok(outcome) => {
                    stats.refreshed += 1;
                    info!(
                        repo = %row.meta().full_name(),
                        updates = outcome.stats.updates_created,
                        "sweep refreshed repository"
                    );
                }
                Err(e) => {
                    stats.failed += 1;
                    // run_stamped already stamped the repo, so a broken
                    // repository waits a full staleness window before the
                    // next attempt.
                    warn!(repo = %row.meta().full_name(), error = %e, "sweep failed for repository");
                }
            }
        }

        Ok(stats)
    }

    pub fn is_stale(&self, row: &RepoRow) -> bool {
        match row.last_fetched_at {
            None => true,
            Some(ts) => Utc::now().timestamp() - ts > self.config.scheduling.staleness_secs,
        }
    }

    pub async fn get_repo(&self, owner: &str, name: &str) -> Result<Option<RepoRow>> {
        let row = sqlx::query(
            "SELECT id, owner, name, description, interest_count, last_fetched_at
             FROM repos WHERE owner = ? AND name = ?",
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(repo_from_row))
    }

    async fn require_repo(&self, owner: &str, name: &str) -> Result<RepoRow> {
        self.get_repo(owner, name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("{}/{} is not tracked; run `pulse track` first", owner, name))
    }

    /// Incremental ingest: fetch activity since the previous stamp (or the
    /// lookback window on first ingest).
    async fn ingest_incremental(&self, row: &RepoRow) -> Result<IngestOutcome> {
        let owner = row.owner.clone();
        let name = row.name.clone();
        self.run_stamped(row, |since| {
            let source = Arc::clone(&self.source);
            async move {
                let prs = source.merged_prs_since(&owner, &name, since).await?;
                let releases = source.releases_since(&owner, &name, since).await?;
                Ok((prs, releases))
            }
        })
        .await
    }

    /// Shared ingest envelope. Stamps `last_fetched_at` on entry (before
    /// any network call) and re-stamps it as the final step regardless of
    /// success, then propagates the inner result.
    async fn run_stamped<F, Fut>(&self, row: &RepoRow, fetch: F) -> Result<IngestOutcome>
    where
        F: FnOnce(DateTime<Utc>) -> Fut,
        Fut: std::future::Future<
            Output = Result<(Vec<crate::models::MergedPr>, Vec<crate::models::FetchedRelease>)>,
        >,
    {
        let since = row
            .last_fetched_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(|| self.lookback_start());

        self.stamp(&row.id).await?;

        let meta = row.meta();
        let result = match fetch(since).await {
            Ok((prs, releases)) => {
                ingest::ingest_activity(
                    &self.pool,
                    &self.classifier,
                    &row.id,
                    &meta,
                    prs,
                    releases,
                    self.config.classifier.theme_concurrency,
                    self.config.classifier.summary_concurrency,
                )
                .await
            }
            Err(e) => Err(e),
        };

        // Freshness invariant: stamped even on failure, bounding retry
        // storms against a broken source.
        self.stamp(&row.id).await?;

        result
    }

    async fn stamp(&self, repo_id: &str) -> Result<()> {
        sqlx::query("UPDATE repos SET last_fetched_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp())
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn lookback_start(&self) -> DateTime<Utc> {
        Utc::now() - Duration::days(self.config.github.lookback_days)
    }
}

fn repo_from_row(row: &sqlx::sqlite::SqliteRow) -> RepoRow {
    RepoRow {
        id: row.get("id"),
        owner: row.get("owner"),
        name: row.get("name"),
        description: row.get("description"),
        interest_count: row.get("interest_count"),
        last_fetched_at: row.get("last_fetched_at"),
    }
}
