use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent; run by `pulse init` and by tests.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Tracked repositories, with freshness state
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repos (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            avatar_url TEXT,
            default_branch TEXT,
            star_count INTEGER NOT NULL DEFAULT 0,
            interest_count INTEGER NOT NULL DEFAULT 0,
            last_fetched_at INTEGER,
            UNIQUE(owner, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Derived Update records; (repo_id, group_hash) is the dedup key
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS updates (
            id TEXT PRIMARY KEY,
            repo_id TEXT NOT NULL,
            group_hash TEXT NOT NULL,
            title TEXT NOT NULL,
            summary TEXT NOT NULL,
            category TEXT NOT NULL,
            significance TEXT NOT NULL,
            date INTEGER NOT NULL,
            pr_count INTEGER NOT NULL,
            commit_count INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(repo_id, group_hash),
            FOREIGN KEY (repo_id) REFERENCES repos(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ingested pull requests; write-once, attached to at most one Update
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pull_requests (
            id TEXT PRIMARY KEY,
            repo_id TEXT NOT NULL,
            number INTEGER NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL,
            author TEXT,
            merged_at INTEGER NOT NULL,
            labels_json TEXT NOT NULL DEFAULT '[]',
            commits_json TEXT NOT NULL DEFAULT '[]',
            update_id TEXT,
            UNIQUE(repo_id, number),
            FOREIGN KEY (repo_id) REFERENCES repos(id),
            FOREIGN KEY (update_id) REFERENCES updates(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Releases; cluster_id links siblings, exactly one head per cluster
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS releases (
            id TEXT PRIMARY KEY,
            repo_id TEXT NOT NULL,
            tag_name TEXT NOT NULL,
            title TEXT,
            url TEXT NOT NULL,
            published_at INTEGER NOT NULL,
            body TEXT NOT NULL DEFAULT '',
            summary TEXT,
            release_type TEXT NOT NULL,
            base_version TEXT,
            cluster_id TEXT,
            is_cluster_head INTEGER NOT NULL DEFAULT 0,
            UNIQUE(repo_id, tag_name),
            FOREIGN KEY (repo_id) REFERENCES repos(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_updates_repo_date ON updates(repo_id, date DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pull_requests_repo ON pull_requests(repo_id, merged_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pull_requests_update ON pull_requests(update_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_releases_repo ON releases(repo_id, published_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
