//! Dedup and persistence layer.
//!
//! Owns every write of derived state. Updates are keyed by
//! `(repo_id, group_hash)` where the hash is a SHA-256 digest of the
//! group's sorted PR numbers; the upsert is a no-op when the hash already
//! exists, which is what lets overlapping ingestion runs race safely.
//! Pull requests and releases are write-once rows.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{GroupSummary, GroupedPrs, MergedPr};
use crate::releases::ReleaseRecord;

/// Deterministic digest of a group's sorted PR numbers; the dedup key for
/// Updates.
pub fn group_hash(numbers: &[i64]) -> String {
    let mut sorted = numbers.to_vec();
    sorted.sort_unstable();
    let joined = sorted
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// PR numbers already ingested for this repository. Computed before
/// grouping so repeated ingestion only processes unseen PRs.
pub async fn known_pr_numbers(pool: &SqlitePool, repo_id: &str) -> Result<HashSet<i64>> {
    let rows = sqlx::query("SELECT number FROM pull_requests WHERE repo_id = ?")
        .bind(repo_id)
        .fetch_all(pool)
        .await?;

    Ok(rows.iter().map(|r| r.get::<i64, _>("number")).collect())
}

pub fn filter_unseen(prs: Vec<MergedPr>, known: &HashSet<i64>) -> Vec<MergedPr> {
    prs.into_iter()
        .filter(|pr| !known.contains(&pr.number))
        .collect()
}

/// Persist one (group, summary) pair. Returns the Update id if this call
/// created it, `None` if an equal-hash Update already existed (another run
/// got there first).
///
/// Runs in a transaction: PR inserts, the Update upsert, and attachment
/// commit together or not at all, so an interrupted run never leaves an
/// Update referencing missing PRs.
pub async fn persist_group(
    pool: &SqlitePool,
    repo_id: &str,
    group: &GroupedPrs,
    summary: &GroupSummary,
) -> Result<Option<String>> {
    let numbers = group.numbers();
    let hash = group_hash(&numbers);
    let now = chrono::Utc::now().timestamp();

    let date = group
        .prs
        .iter()
        .map(|pr| pr.merged_at.timestamp())
        .max()
        .unwrap_or(now);
    let commit_count: i64 = group.prs.iter().map(|pr| pr.commits.len() as i64).sum();

    let mut tx = pool.begin().await?;

    // PRs are write-once; a concurrent run inserting the same number is
    // absorbed here.
    for pr in &group.prs {
        sqlx::query(
            r#"
            INSERT INTO pull_requests (id, repo_id, number, title, body, url, author, merged_at, labels_json, commits_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repo_id, number) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(repo_id)
        .bind(pr.number)
        .bind(&pr.title)
        .bind(&pr.body)
        .bind(&pr.url)
        .bind(&pr.author)
        .bind(pr.merged_at.timestamp())
        .bind(serde_json::to_string(&pr.labels)?)
        .bind(serde_json::to_string(&pr.commits)?)
        .execute(&mut *tx)
        .await?;
    }

    let update_id = Uuid::new_v4().to_string();
    let inserted = sqlx::query(
        r#"
        INSERT INTO updates (id, repo_id, group_hash, title, summary, category, significance, date, pr_count, commit_count, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(repo_id, group_hash) DO NOTHING
        "#,
    )
    .bind(&update_id)
    .bind(repo_id)
    .bind(&hash)
    .bind(&summary.title)
    .bind(&summary.summary)
    .bind(summary.category.as_str())
    .bind(summary.significance.as_str())
    .bind(date)
    .bind(group.prs.len() as i64)
    .bind(commit_count)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let created = inserted.rows_affected() > 0;

    // Resolve the winning id (ours or the concurrent run's) and attach
    // constituent PRs, skipping any already attached by a partial retry.
    let winning_id: String =
        sqlx::query_scalar("SELECT id FROM updates WHERE repo_id = ? AND group_hash = ?")
            .bind(repo_id)
            .bind(&hash)
            .fetch_one(&mut *tx)
            .await?;

    for number in &numbers {
        sqlx::query(
            "UPDATE pull_requests SET update_id = ? WHERE repo_id = ? AND number = ? AND update_id IS NULL",
        )
        .bind(&winning_id)
        .bind(repo_id)
        .bind(number)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(if created { Some(winning_id) } else { None })
}

/// Persist release records. Write-once on (repo_id, tag_name); returns the
/// number of newly inserted rows.
pub async fn persist_releases(
    pool: &SqlitePool,
    repo_id: &str,
    records: &[ReleaseRecord],
) -> Result<u64> {
    let mut inserted = 0u64;

    for record in records {
        let result = sqlx::query(
            r#"
            INSERT INTO releases (id, repo_id, tag_name, title, url, published_at, body, summary, release_type, base_version, cluster_id, is_cluster_head)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repo_id, tag_name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(repo_id)
        .bind(&record.release.tag_name)
        .bind(&record.release.title)
        .bind(&record.release.url)
        .bind(record.release.published_at.timestamp())
        .bind(&record.release.body)
        .bind(&record.summary)
        .bind(record.release_type.as_str())
        .bind(&record.base_version)
        .bind(&record.cluster_id)
        .bind(record.is_cluster_head as i64)
        .execute(pool)
        .await?;
        inserted += result.rows_affected();
    }

    Ok(inserted)
}

/// Destructive reset for a forced refresh: delete every derived row for the
/// repository and null out its freshness stamp, all-or-nothing.
pub async fn delete_repo_data(pool: &SqlitePool, repo_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    // PRs reference updates, so they go first.
    sqlx::query("DELETE FROM pull_requests WHERE repo_id = ?")
        .bind(repo_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM updates WHERE repo_id = ?")
        .bind(repo_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM releases WHERE repo_id = ?")
        .bind(repo_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE repos SET last_fetched_at = NULL WHERE id = ?")
        .bind(repo_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Oldest merged_at among this repo's ingested PRs; the cursor for
/// backward pagination.
pub async fn oldest_merged_at(pool: &SqlitePool, repo_id: &str) -> Result<Option<i64>> {
    let ts: Option<i64> =
        sqlx::query_scalar("SELECT MIN(merged_at) FROM pull_requests WHERE repo_id = ?")
            .bind(repo_id)
            .fetch_one(pool)
            .await?;
    Ok(ts)
}
