//! Ingestion run orchestration.
//!
//! One run takes fetched activity (merged PRs, releases) through the full
//! pipeline: unseen-PR filtering → semantic grouping → summarization →
//! hash-keyed persistence, plus release clustering. The run is idempotent:
//! feeding it activity that was already ingested creates nothing.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use crate::classifier::Classifier;
use crate::grouping;
use crate::models::{FetchedRelease, MergedPr, RepoMeta};
use crate::persist;
use crate::releases;
use crate::summarize;

#[derive(Debug, Default, Clone)]
pub struct IngestStats {
    pub fetched_prs: usize,
    pub new_prs: usize,
    pub groups: usize,
    pub updates_created: usize,
    pub fetched_releases: usize,
    pub releases_inserted: u64,
}

#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub stats: IngestStats,
    /// Ids of Updates created by this run (not ones that already existed).
    pub new_update_ids: Vec<String>,
}

/// Run the grouping → summarization → dedup pipeline over fetched activity.
pub async fn ingest_activity(
    pool: &SqlitePool,
    classifier: &Arc<dyn Classifier>,
    repo_id: &str,
    meta: &RepoMeta,
    prs: Vec<MergedPr>,
    fetched_releases: Vec<FetchedRelease>,
    theme_concurrency: usize,
    summary_concurrency: usize,
) -> Result<IngestOutcome> {
    let mut outcome = IngestOutcome::default();
    outcome.stats.fetched_prs = prs.len();
    outcome.stats.fetched_releases = fetched_releases.len();

    // PR-level idempotency: only never-before-seen PRs are grouped.
    let known = persist::known_pr_numbers(pool, repo_id).await?;
    let unseen = persist::filter_unseen(prs, &known);
    outcome.stats.new_prs = unseen.len();

    if !unseen.is_empty() {
        let groups = grouping::partition_prs(classifier, meta, unseen, theme_concurrency).await;
        outcome.stats.groups = groups.len();

        let summaries =
            summarize::summarize_groups(classifier, meta, &groups, summary_concurrency).await;

        for group in &groups {
            let key = summarize::group_key(&group.numbers());
            // summarize_groups guarantees an entry per group; the fallback
            // here only defends against a future regression.
            let summary = summaries
                .get(&key)
                .cloned()
                .unwrap_or_else(|| summarize::fallback_summary(group));

            if let Some(id) = persist::persist_group(pool, repo_id, group, &summary).await? {
                outcome.new_update_ids.push(id);
            }
        }
        outcome.stats.updates_created = outcome.new_update_ids.len();
    }

    if !fetched_releases.is_empty() {
        let records = releases::plan_releases(classifier, meta, fetched_releases).await;
        outcome.stats.releases_inserted = persist::persist_releases(pool, repo_id, &records).await?;
    }

    info!(
        repo = %meta.full_name(),
        fetched = outcome.stats.fetched_prs,
        new = outcome.stats.new_prs,
        updates = outcome.stats.updates_created,
        releases = outcome.stats.releases_inserted,
        "ingestion run complete"
    );

    Ok(outcome)
}
