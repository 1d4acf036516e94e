//! Read side for the CLI: Update and Release listings.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::coordinator::Coordinator;
use crate::models::Update;

pub async fn updates_for_repo(
    pool: &SqlitePool,
    repo_id: &str,
    limit: i64,
) -> Result<Vec<Update>> {
    let rows = sqlx::query(
        "SELECT id, repo_id, group_hash, title, summary, category, significance, date, pr_count, commit_count
         FROM updates WHERE repo_id = ? ORDER BY date DESC LIMIT ?",
    )
    .bind(repo_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(update_from_row).collect())
}

pub async fn updates_by_ids(pool: &SqlitePool, ids: &[String]) -> Result<Vec<Update>> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let row = sqlx::query(
            "SELECT id, repo_id, group_hash, title, summary, category, significance, date, pr_count, commit_count
             FROM updates WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        if let Some(row) = row {
            out.push(update_from_row(&row));
        }
    }
    out.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(out)
}

fn update_from_row(row: &sqlx::sqlite::SqliteRow) -> Update {
    Update {
        id: row.get("id"),
        repo_id: row.get("repo_id"),
        group_hash: row.get("group_hash"),
        title: row.get("title"),
        summary: row.get("summary"),
        category: row.get("category"),
        significance: row.get("significance"),
        date: row.get("date"),
        pr_count: row.get("pr_count"),
        commit_count: row.get("commit_count"),
    }
}

/// Print the update feed for a repository. Release-cluster siblings are
/// suppressed; only cluster heads and standalone releases appear.
pub async fn run_updates(coordinator: &Coordinator, owner: &str, name: &str, limit: i64) -> Result<()> {
    let row = coordinator
        .get_repo(owner, name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("{}/{} is not tracked; run `pulse track` first", owner, name))?;

    let updates = updates_for_repo(coordinator.pool(), &row.id, limit).await?;

    println!("updates for {}/{}", owner, name);
    if updates.is_empty() {
        println!("  (none)");
    }
    for update in &updates {
        println!(
            "  [{}] {} ({} / {}, {} PRs, {} commits)",
            format_ts(update.date),
            update.title,
            update.category,
            update.significance,
            update.pr_count,
            update.commit_count,
        );
        for line in update.summary.lines() {
            println!("      {}", line);
        }
    }

    let releases = sqlx::query(
        "SELECT tag_name, release_type, summary, published_at
         FROM releases
         WHERE repo_id = ? AND (cluster_id IS NULL OR is_cluster_head = 1)
         ORDER BY published_at DESC LIMIT ?",
    )
    .bind(&row.id)
    .bind(limit)
    .fetch_all(coordinator.pool())
    .await?;

    if !releases.is_empty() {
        println!();
        println!("releases");
        for r in &releases {
            let tag: String = r.get("tag_name");
            let rtype: String = r.get("release_type");
            let published: i64 = r.get("published_at");
            println!("  [{}] {} ({})", format_ts(published), tag, rtype);
            if let Some(summary) = r.get::<Option<String>, _>("summary") {
                for line in summary.lines() {
                    println!("      {}", line);
                }
            }
        }
    }

    Ok(())
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ts.to_string())
}
