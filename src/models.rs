//! Core data models used throughout Repopulse.
//!
//! These types represent the pull requests, updates, and releases that flow
//! through the ingestion and grouping pipeline, plus the structured DTOs
//! exchanged with the classification service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single commit belonging to a merged pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub url: String,
}

/// A merged pull request as fetched from the change source, before
/// persistence. Immutable once stored.
#[derive(Debug, Clone)]
pub struct MergedPr {
    pub number: i64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub author: Option<String>,
    pub merged_at: DateTime<Utc>,
    pub labels: Vec<String>,
    pub commits: Vec<CommitInfo>,
}

/// Repository metadata returned by the change source.
#[derive(Debug, Clone)]
pub struct RepoInfo {
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub default_branch: String,
    pub pushed_at: Option<DateTime<Utc>>,
    pub star_count: i64,
}

/// A release as fetched from the change source, before clustering.
#[derive(Debug, Clone)]
pub struct FetchedRelease {
    pub tag_name: String,
    pub title: Option<String>,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub body: String,
}

/// The kind of change an Update represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Feature,
    Enhancement,
    Bugfix,
    Breaking,
    Deprecation,
    Performance,
    Security,
    Docs,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Feature => "feature",
            Category::Enhancement => "enhancement",
            Category::Bugfix => "bugfix",
            Category::Breaking => "breaking",
            Category::Deprecation => "deprecation",
            Category::Performance => "performance",
            Category::Security => "security",
            Category::Docs => "docs",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feature" => Some(Category::Feature),
            "enhancement" => Some(Category::Enhancement),
            "bugfix" | "fix" => Some(Category::Bugfix),
            "breaking" => Some(Category::Breaking),
            "deprecation" => Some(Category::Deprecation),
            "performance" => Some(Category::Performance),
            "security" => Some(Category::Security),
            "docs" | "documentation" => Some(Category::Docs),
            _ => None,
        }
    }
}

/// How significant an Update is to a consumer of the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Significance {
    Major,
    Minor,
    Patch,
    Internal,
}

impl Significance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Significance::Major => "major",
            Significance::Minor => "minor",
            Significance::Patch => "patch",
            Significance::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Significance> {
        match s.trim().to_ascii_lowercase().as_str() {
            "major" => Some(Significance::Major),
            "minor" => Some(Significance::Minor),
            "patch" => Some(Significance::Patch),
            "internal" => Some(Significance::Internal),
            _ => None,
        }
    }
}

/// Release type classified from the tag string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseType {
    Stable,
    Nightly,
    Preview,
    Patch,
}

impl ReleaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseType::Stable => "stable",
            ReleaseType::Nightly => "nightly",
            ReleaseType::Preview => "preview",
            ReleaseType::Patch => "patch",
        }
    }
}

/// Repository context passed to the classification service so prompts can
/// reference what the project is.
#[derive(Debug, Clone)]
pub struct RepoMeta {
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
}

impl RepoMeta {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Lightweight PR signal used for Phase 1 theme clustering.
#[derive(Debug, Clone, Serialize)]
pub struct PrBrief {
    pub number: i64,
    pub title: String,
    pub labels: Vec<String>,
}

/// Full PR detail used for Phase 2 grouping and summarization.
#[derive(Debug, Clone, Serialize)]
pub struct PrDetail {
    pub number: i64,
    pub title: String,
    pub author: Option<String>,
    pub labels: Vec<String>,
    pub body: String,
    pub commit_messages: Vec<String>,
}

/// A named theme of PR numbers produced by Phase 1 clustering.
#[derive(Debug, Clone)]
pub struct Theme {
    pub name: String,
    pub numbers: Vec<i64>,
}

/// A group of PR numbers representing one coherent change, produced by
/// Phase 2 detailed grouping.
#[derive(Debug, Clone)]
pub struct PrGroup {
    pub numbers: Vec<i64>,
    pub reason: String,
}

/// The final output of the grouping engine: actual PRs, one coherent change.
#[derive(Debug, Clone)]
pub struct GroupedPrs {
    pub prs: Vec<MergedPr>,
    pub reason: String,
}

impl GroupedPrs {
    /// Sorted PR numbers of this group; the stable join key for
    /// summarization and the input to the group hash.
    pub fn numbers(&self) -> Vec<i64> {
        let mut nums: Vec<i64> = self.prs.iter().map(|p| p.number).collect();
        nums.sort_unstable();
        nums
    }
}

/// Structured summary of one group, as returned by the classification
/// service or synthesized by the deterministic fallback.
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub title: String,
    pub summary: String,
    pub category: Category,
    pub significance: Significance,
}

/// Structured summary for a release or release cluster.
#[derive(Debug, Clone)]
pub struct ReleaseSummary {
    pub summary: String,
}

/// An Update row read back from the database for display.
#[derive(Debug, Clone)]
pub struct Update {
    pub id: String,
    pub repo_id: String,
    pub group_hash: String,
    pub title: String,
    pub summary: String,
    pub category: String,
    pub significance: String,
    pub date: i64,
    pub pr_count: i64,
    pub commit_count: i64,
}
