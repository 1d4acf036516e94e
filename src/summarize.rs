//! Group summarization engine.
//!
//! Produces a title, user-facing summary, category, and significance for
//! each semantic group. Calls run through a bounded fan-out and are joined
//! back by the sorted-PR-number group key, never by array index. A service
//! failure yields the deterministic fallback summary; summarization never
//! fails an ingestion run.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::classifier::Classifier;
use crate::grouping::pr_detail;
use crate::models::{Category, GroupSummary, GroupedPrs, PrDetail, RepoMeta, Significance};

/// Stable join key for a group: sorted PR numbers joined with commas.
pub fn group_key(numbers: &[i64]) -> String {
    let mut sorted = numbers.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Deterministic summary used when the classification service fails:
/// single-PR groups keep their PR title; multi-PR groups become
/// "N related changes" with a bullet list of constituent titles.
pub fn fallback_summary(group: &GroupedPrs) -> GroupSummary {
    let title = if group.prs.len() == 1 {
        group.prs[0].title.clone()
    } else {
        format!("{} related changes", group.prs.len())
    };

    let summary = group
        .prs
        .iter()
        .map(|pr| format!("- {}", pr.title))
        .collect::<Vec<_>>()
        .join("\n");

    GroupSummary {
        title,
        summary,
        category: Category::Enhancement,
        significance: Significance::Minor,
    }
}

/// Summarize every group, returning a map from group key to summary. The
/// result always contains one entry per input group.
pub async fn summarize_groups(
    classifier: &Arc<dyn Classifier>,
    repo: &RepoMeta,
    groups: &[GroupedPrs],
    concurrency: usize,
) -> HashMap<String, GroupSummary> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set: JoinSet<(String, GroupSummary)> = JoinSet::new();

    for group in groups {
        let key = group_key(&group.numbers());
        let details: Vec<PrDetail> = group.prs.iter().map(pr_detail).collect();
        let fallback = fallback_summary(group);
        let classifier = Arc::clone(classifier);
        let repo = repo.clone();
        let semaphore = Arc::clone(&semaphore);

        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let summary = match classifier.summarize_group(&repo, &details).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(group = %key, error = %e, "group summarization failed, using fallback");
                    fallback
                }
            };
            (key, summary)
        });
    }

    let mut out = HashMap::with_capacity(groups.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((key, summary)) => {
                out.insert(key, summary);
            }
            Err(e) => warn!(error = %e, "summarization task panicked"),
        }
    }

    // A panicked task would leave a hole; fill it with the fallback so the
    // caller can rely on full coverage.
    for group in groups {
        let key = group_key(&group.numbers());
        out.entry(key).or_insert_with(|| fallback_summary(group));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ReleaseBrief;
    use crate::models::{MergedPr, PrBrief, PrGroup, ReleaseSummary, Theme};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    fn pr(number: i64, title: &str) -> MergedPr {
        MergedPr {
            number,
            title: title.to_string(),
            body: String::new(),
            url: String::new(),
            author: None,
            merged_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            labels: vec![],
            commits: vec![],
        }
    }

    fn meta() -> RepoMeta {
        RepoMeta {
            owner: "acme".to_string(),
            name: "widget".to_string(),
            description: None,
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Classifier for AlwaysFails {
        async fn cluster_themes(&self, _: &RepoMeta, _: &[PrBrief]) -> Result<Vec<Theme>> {
            bail!("down")
        }
        async fn group_prs(&self, _: &RepoMeta, _: &[PrDetail]) -> Result<Vec<PrGroup>> {
            bail!("down")
        }
        async fn summarize_group(&self, _: &RepoMeta, _: &[PrDetail]) -> Result<GroupSummary> {
            bail!("down")
        }
        async fn summarize_release(
            &self,
            _: &RepoMeta,
            _: &ReleaseBrief,
        ) -> Result<ReleaseSummary> {
            bail!("down")
        }
        async fn summarize_release_cluster(
            &self,
            _: &RepoMeta,
            _: &[ReleaseBrief],
        ) -> Result<ReleaseSummary> {
            bail!("down")
        }
    }

    #[test]
    fn group_key_is_sorted() {
        assert_eq!(group_key(&[103, 101, 102]), "101,102,103");
        assert_eq!(group_key(&[7]), "7");
    }

    #[test]
    fn fallback_single_pr_keeps_title() {
        let g = GroupedPrs {
            prs: vec![pr(1, "Fix off-by-one in pager")],
            reason: String::new(),
        };
        let s = fallback_summary(&g);
        assert_eq!(s.title, "Fix off-by-one in pager");
        assert_eq!(s.summary, "- Fix off-by-one in pager");
        assert_eq!(s.category, Category::Enhancement);
        assert_eq!(s.significance, Significance::Minor);
    }

    #[test]
    fn fallback_multi_pr_counts_and_bullets() {
        let g = GroupedPrs {
            prs: vec![pr(1, "step one"), pr(2, "step two"), pr(3, "step three")],
            reason: String::new(),
        };
        let s = fallback_summary(&g);
        assert_eq!(s.title, "3 related changes");
        assert_eq!(s.summary, "- step one\n- step two\n- step three");
    }

    #[tokio::test]
    async fn failing_service_yields_fallback_for_every_group() {
        let classifier: Arc<dyn Classifier> = Arc::new(AlwaysFails);
        let groups = vec![
            GroupedPrs {
                prs: vec![pr(1, "a"), pr(2, "b")],
                reason: String::new(),
            },
            GroupedPrs {
                prs: vec![pr(3, "c")],
                reason: String::new(),
            },
        ];

        let summaries = summarize_groups(&classifier, &meta(), &groups, 5).await;
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries.get("1,2").unwrap().title, "2 related changes");
        assert_eq!(summaries.get("3").unwrap().title, "c");
    }
}
