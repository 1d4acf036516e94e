//! Release clustering.
//!
//! Classifies each release's type from its tag string, extracts a base
//! version, and groups releases sharing {base version, type, publish day}
//! into clusters. The clustering decision itself is a pure function with no
//! external calls; only the optional summaries go through the
//! classification service, and their failure degrades to "no summary".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Datelike;
use tracing::warn;

use crate::classifier::{Classifier, ReleaseBrief};
use crate::models::{FetchedRelease, ReleaseType, RepoMeta};

/// Release bodies shorter than this are not worth summarizing.
const MIN_BODY_FOR_SUMMARY: usize = 20;

/// A release annotated with everything the persistence layer needs.
#[derive(Debug, Clone)]
pub struct ReleaseRecord {
    pub release: FetchedRelease,
    pub release_type: ReleaseType,
    pub base_version: Option<String>,
    pub cluster_id: Option<String>,
    pub is_cluster_head: bool,
    pub summary: Option<String>,
}

/// Classify a release's type from its tag string.
///
/// Rule order: nightly markers, pre-release markers, strict semver
/// (stable), patch/hotfix markers, default stable.
pub fn classify_tag(tag: &str) -> ReleaseType {
    let lower = tag.to_ascii_lowercase();

    if lower.contains("nightly") || lower.contains("canary") || lower.contains("-dev") {
        return ReleaseType::Nightly;
    }
    if lower.contains("alpha")
        || lower.contains("beta")
        || lower.contains("rc")
        || lower.contains("preview")
        || lower.contains("-pre")
    {
        return ReleaseType::Preview;
    }
    if is_strict_semver(&lower) {
        return ReleaseType::Stable;
    }
    if lower.contains("patch") || lower.contains("hotfix") {
        return ReleaseType::Patch;
    }
    ReleaseType::Stable
}

/// `v1.2.3` or `1.2.3`, all three components numeric, nothing else.
fn is_strict_semver(tag: &str) -> bool {
    let tag = tag.strip_prefix('v').unwrap_or(tag);
    let parts: Vec<&str> = tag.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Extract `major.minor.x` from the first `major.minor` pair of digits in
/// the tag. Returns `None` when the tag carries no version at all.
pub fn base_version(tag: &str) -> Option<String> {
    let bytes: Vec<char> = tag.chars().collect();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let major: String = bytes[start..i].iter().collect();

            if i < bytes.len() && bytes[i] == '.' {
                let minor_start = i + 1;
                let mut j = minor_start;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j > minor_start {
                    let minor: String = bytes[minor_start..j].iter().collect();
                    return Some(format!("{}.{}.x", major, minor));
                }
            }
            return Some(format!("{}.0.x", major));
        }
        i += 1;
    }

    None
}

/// Partition releases into clusters (≥2 members sharing base version, type,
/// and publish day) and standalone releases. Pure; assigns no ids.
pub fn cluster_releases(
    releases: Vec<FetchedRelease>,
) -> (Vec<Vec<FetchedRelease>>, Vec<FetchedRelease>) {
    let mut buckets: HashMap<(String, ReleaseType, i32, u32, u32), Vec<FetchedRelease>> =
        HashMap::new();

    for release in releases {
        let rtype = classify_tag(&release.tag_name);
        let base = base_version(&release.tag_name).unwrap_or_else(|| release.tag_name.clone());
        let day = release.published_at.date_naive();
        buckets
            .entry((base, rtype, day.year(), day.month(), day.day()))
            .or_default()
            .push(release);
    }

    let mut clusters = Vec::new();
    let mut standalone = Vec::new();
    for (_, mut members) in buckets {
        if members.len() >= 2 {
            // Head first: the most recently published member is what
            // consumers see.
            members.sort_by(|a, b| b.published_at.cmp(&a.published_at));
            clusters.push(members);
        } else {
            standalone.extend(members);
        }
    }

    // Deterministic output order regardless of hash-map iteration.
    clusters.sort_by(|a, b| b[0].published_at.cmp(&a[0].published_at));
    standalone.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    (clusters, standalone)
}

fn brief(release: &FetchedRelease) -> ReleaseBrief {
    ReleaseBrief {
        tag_name: release.tag_name.clone(),
        title: release.title.clone(),
        body: release.body.clone(),
    }
}

/// Cluster `releases` and attach summaries: one unified summary on each
/// cluster head, one per standalone release with a meaningful body. Summary
/// failures degrade to `None` and never block persistence.
pub async fn plan_releases(
    classifier: &Arc<dyn Classifier>,
    repo: &RepoMeta,
    releases: Vec<FetchedRelease>,
) -> Vec<ReleaseRecord> {
    let (clusters, standalone) = cluster_releases(releases);
    let mut out = Vec::new();

    for members in clusters {
        let cluster_id = uuid::Uuid::new_v4().to_string();
        let briefs: Vec<ReleaseBrief> = members.iter().map(brief).collect();
        let summary = match classifier.summarize_release_cluster(repo, &briefs).await {
            Ok(s) => Some(s.summary),
            Err(e) => {
                warn!(repo = %repo.full_name(), error = %e, "release cluster summarization failed");
                None
            }
        };

        for (idx, release) in members.into_iter().enumerate() {
            let is_head = idx == 0;
            out.push(ReleaseRecord {
                release_type: classify_tag(&release.tag_name),
                base_version: base_version(&release.tag_name),
                cluster_id: Some(cluster_id.clone()),
                is_cluster_head: is_head,
                summary: if is_head { summary.clone() } else { None },
                release,
            });
        }
    }

    for release in standalone {
        let summary = if release.body.trim().chars().count() >= MIN_BODY_FOR_SUMMARY {
            match classifier.summarize_release(repo, &brief(&release)).await {
                Ok(s) => Some(s.summary),
                Err(e) => {
                    warn!(tag = %release.tag_name, error = %e, "release summarization failed");
                    None
                }
            }
        } else {
            None
        };

        out.push(ReleaseRecord {
            release_type: classify_tag(&release.tag_name),
            base_version: base_version(&release.tag_name),
            cluster_id: None,
            is_cluster_head: false,
            summary,
            release,
        });
    }

    out
}
