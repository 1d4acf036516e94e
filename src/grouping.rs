//! Semantic grouping engine.
//!
//! Partitions a batch of newly-discovered pull requests into groups that
//! each represent one coherent change. Small batches (≤5) go straight to
//! detailed grouping; larger batches run two phases: theme clustering on
//! lightweight signals, then detailed grouping per theme with a bounded
//! fan-out.
//!
//! Hard postcondition, enforced here and not delegated to callers: every
//! input pull request appears in exactly one output group. Classification
//! failures never abort the run; they degrade to finer granularity (one
//! theme containing everything, or one group per pull request).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::classifier::Classifier;
use crate::models::{GroupedPrs, MergedPr, PrBrief, PrDetail, PrGroup, RepoMeta, Theme};

/// Batches at or below this size skip theme clustering entirely.
pub const SMALL_BATCH_MAX: usize = 5;

/// Body text sent to the classification service is truncated to this many
/// characters.
const BODY_MAX_CHARS: usize = 600;

/// At most this many commit headlines are included per PR detail.
const COMMIT_HEADLINES: usize = 5;

/// Synthesized theme for PRs the service failed to place in Phase 1.
const MISC_THEME: &str = "Miscellaneous";

pub fn pr_brief(pr: &MergedPr) -> PrBrief {
    PrBrief {
        number: pr.number,
        title: pr.title.clone(),
        labels: pr.labels.clone(),
    }
}

pub fn pr_detail(pr: &MergedPr) -> PrDetail {
    PrDetail {
        number: pr.number,
        title: pr.title.clone(),
        author: pr.author.clone(),
        labels: pr.labels.clone(),
        body: truncate_chars(&pr.body, BODY_MAX_CHARS),
        commit_messages: pr
            .commits
            .iter()
            .take(COMMIT_HEADLINES)
            .map(|c| headline(&c.message))
            .collect(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// First line of a commit message.
fn headline(message: &str) -> String {
    message.lines().next().unwrap_or("").to_string()
}

/// Partition `prs` into semantic groups. See the module docs for the policy
/// and the coverage postcondition.
pub async fn partition_prs(
    classifier: &Arc<dyn Classifier>,
    repo: &RepoMeta,
    prs: Vec<MergedPr>,
    theme_concurrency: usize,
) -> Vec<GroupedPrs> {
    if prs.is_empty() {
        return Vec::new();
    }
    if prs.len() == 1 {
        return vec![GroupedPrs {
            prs,
            reason: "single pull request".to_string(),
        }];
    }

    let plan = if prs.len() <= SMALL_BATCH_MAX {
        detail_group(classifier, repo, &prs).await
    } else {
        two_phase_plan(classifier, repo, &prs, theme_concurrency).await
    };

    materialize(prs, plan)
}

/// Single-phase path: one detailed-grouping call over the whole batch.
/// Falls back to one group per PR on any classification failure.
async fn detail_group(
    classifier: &Arc<dyn Classifier>,
    repo: &RepoMeta,
    prs: &[MergedPr],
) -> Vec<PrGroup> {
    let details: Vec<PrDetail> = prs.iter().map(pr_detail).collect();
    match classifier.group_prs(repo, &details).await {
        Ok(groups) => groups,
        Err(e) => {
            warn!(repo = %repo.full_name(), error = %e, "detailed grouping failed, one group per PR");
            singleton_plan(prs)
        }
    }
}

fn singleton_plan(prs: &[MergedPr]) -> Vec<PrGroup> {
    prs.iter()
        .map(|pr| PrGroup {
            numbers: vec![pr.number],
            reason: "standalone change".to_string(),
        })
        .collect()
}

/// Two-phase path: theme clustering, then per-theme detailed grouping with
/// a bounded fan-out joined by theme position (stable across runs).
async fn two_phase_plan(
    classifier: &Arc<dyn Classifier>,
    repo: &RepoMeta,
    prs: &[MergedPr],
    theme_concurrency: usize,
) -> Vec<PrGroup> {
    let briefs: Vec<PrBrief> = prs.iter().map(pr_brief).collect();
    let all_numbers: Vec<i64> = prs.iter().map(|p| p.number).collect();

    let raw_themes = match classifier.cluster_themes(repo, &briefs).await {
        Ok(themes) => themes,
        Err(e) => {
            warn!(repo = %repo.full_name(), error = %e, "theme clustering failed, using one theme");
            vec![Theme {
                name: "All changes".to_string(),
                numbers: all_numbers.clone(),
            }]
        }
    };

    let themes = normalize_themes(raw_themes, &all_numbers);

    let by_number: HashMap<i64, &MergedPr> = prs.iter().map(|p| (p.number, p)).collect();
    let semaphore = Arc::new(Semaphore::new(theme_concurrency.max(1)));
    let mut join_set: JoinSet<(usize, Vec<PrGroup>)> = JoinSet::new();
    let mut plan_slots: Vec<Vec<PrGroup>> = vec![Vec::new(); themes.len()];

    for (idx, theme) in themes.iter().enumerate() {
        // Trivial themes don't need a second classification pass.
        if theme.numbers.len() == 1 {
            plan_slots[idx] = vec![PrGroup {
                numbers: theme.numbers.clone(),
                reason: theme.name.clone(),
            }];
            continue;
        }

        let details: Vec<PrDetail> = theme
            .numbers
            .iter()
            .filter_map(|n| by_number.get(n))
            .map(|pr| pr_detail(pr))
            .collect();
        let theme_numbers = theme.numbers.clone();
        let theme_name = theme.name.clone();
        let classifier = Arc::clone(classifier);
        let repo = repo.clone();
        let semaphore = Arc::clone(&semaphore);

        join_set.spawn(async move {
            // Closed only on runtime shutdown; treat as a failed call.
            let _permit = semaphore.acquire_owned().await;
            let groups = match classifier.group_prs(&repo, &details).await {
                Ok(groups) => {
                    // Numbers outside the theme are hallucinated; anything
                    // the service failed to place becomes standalone.
                    let mut cleaned = Vec::new();
                    let mut placed: Vec<i64> = Vec::new();
                    for mut g in groups {
                        g.numbers.retain(|n| theme_numbers.contains(n));
                        if g.numbers.is_empty() {
                            continue;
                        }
                        placed.extend(&g.numbers);
                        cleaned.push(g);
                    }
                    for n in &theme_numbers {
                        if !placed.contains(n) {
                            cleaned.push(PrGroup {
                                numbers: vec![*n],
                                reason: format!("standalone change in {}", theme_name),
                            });
                        }
                    }
                    cleaned
                }
                Err(e) => {
                    warn!(theme = %theme_name, error = %e, "theme grouping failed, one group per PR");
                    theme_numbers
                        .iter()
                        .map(|n| PrGroup {
                            numbers: vec![*n],
                            reason: format!("standalone change in {}", theme_name),
                        })
                        .collect()
                }
            };
            (idx, groups)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((idx, groups)) => plan_slots[idx] = groups,
            Err(e) => warn!(error = %e, "theme grouping task panicked"),
        }
    }

    // Merge in theme order so output is deterministic regardless of task
    // completion order.
    plan_slots.into_iter().flatten().collect()
}

/// Enforce the "exactly one theme per PR" invariant before Phase 2 runs:
/// first-theme-wins on duplicates, unknown numbers dropped, unplaced
/// numbers collected into a synthesized Miscellaneous theme.
fn normalize_themes(themes: Vec<Theme>, all_numbers: &[i64]) -> Vec<Theme> {
    let mut seen: Vec<i64> = Vec::new();
    let mut out: Vec<Theme> = Vec::new();

    for mut theme in themes {
        theme
            .numbers
            .retain(|n| all_numbers.contains(n) && !seen.contains(n));
        seen.extend(&theme.numbers);
        if !theme.numbers.is_empty() {
            out.push(theme);
        }
    }

    let unplaced: Vec<i64> = all_numbers
        .iter()
        .copied()
        .filter(|n| !seen.contains(n))
        .collect();
    if !unplaced.is_empty() {
        out.push(Theme {
            name: MISC_THEME.to_string(),
            numbers: unplaced,
        });
    }

    out
}

/// Turn a plan of PR-number groups into groups of owned PRs, enforcing the
/// coverage postcondition: first-occurrence-wins on duplicates, unknown
/// numbers ignored, and every PR not covered by the plan appended as its
/// own standalone group.
fn materialize(prs: Vec<MergedPr>, plan: Vec<PrGroup>) -> Vec<GroupedPrs> {
    let order: Vec<i64> = prs.iter().map(|p| p.number).collect();
    let mut remaining: HashMap<i64, MergedPr> =
        prs.into_iter().map(|p| (p.number, p)).collect();
    let mut out = Vec::new();

    for group in plan {
        let members: Vec<MergedPr> = group
            .numbers
            .iter()
            .filter_map(|n| remaining.remove(n))
            .collect();
        if !members.is_empty() {
            out.push(GroupedPrs {
                prs: members,
                reason: group.reason,
            });
        }
    }

    // Anything the plan missed still gets exactly one group.
    for n in order {
        if let Some(pr) = remaining.remove(&n) {
            out.push(GroupedPrs {
                prs: vec![pr],
                reason: "standalone change".to_string(),
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ReleaseBrief;
    use crate::models::{GroupSummary, ReleaseSummary};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    fn pr(number: i64) -> MergedPr {
        MergedPr {
            number,
            title: format!("PR #{}", number),
            body: String::new(),
            url: format!("https://example.com/pr/{}", number),
            author: Some("alice".to_string()),
            merged_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
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

    fn numbers_of(groups: &[GroupedPrs]) -> Vec<Vec<i64>> {
        groups.iter().map(|g| g.numbers()).collect()
    }

    fn assert_covers_exactly(groups: &[GroupedPrs], expected: &[i64]) {
        let mut all: Vec<i64> = groups
            .iter()
            .flat_map(|g| g.prs.iter().map(|p| p.number))
            .collect();
        all.sort_unstable();
        let mut want = expected.to_vec();
        want.sort_unstable();
        assert_eq!(all, want, "groups must cover input exactly once");
    }

    /// Classifier whose theme and group responses are fixed up front.
    struct Scripted {
        themes: Result<Vec<Theme>, String>,
        groups: Result<Vec<PrGroup>, String>,
    }

    #[async_trait]
    impl Classifier for Scripted {
        async fn cluster_themes(
            &self,
            _repo: &RepoMeta,
            _briefs: &[PrBrief],
        ) -> Result<Vec<Theme>> {
            match &self.themes {
                Ok(t) => Ok(t.clone()),
                Err(e) => bail!("{}", e),
            }
        }

        async fn group_prs(&self, _repo: &RepoMeta, details: &[PrDetail]) -> Result<Vec<PrGroup>> {
            match &self.groups {
                Ok(g) => {
                    // Scope scripted groups to the numbers actually asked about,
                    // so one script serves multiple themes.
                    let asked: Vec<i64> = details.iter().map(|d| d.number).collect();
                    let scoped: Vec<PrGroup> = g
                        .iter()
                        .map(|grp| PrGroup {
                            numbers: grp
                                .numbers
                                .iter()
                                .copied()
                                .filter(|n| asked.contains(n))
                                .collect(),
                            reason: grp.reason.clone(),
                        })
                        .filter(|grp| !grp.numbers.is_empty())
                        .collect();
                    if scoped.is_empty() {
                        bail!("nothing matched");
                    }
                    Ok(scoped)
                }
                Err(e) => bail!("{}", e),
            }
        }

        async fn summarize_group(
            &self,
            _repo: &RepoMeta,
            _details: &[PrDetail],
        ) -> Result<GroupSummary> {
            bail!("not under test")
        }

        async fn summarize_release(
            &self,
            _repo: &RepoMeta,
            _release: &ReleaseBrief,
        ) -> Result<ReleaseSummary> {
            bail!("not under test")
        }

        async fn summarize_release_cluster(
            &self,
            _repo: &RepoMeta,
            _releases: &[ReleaseBrief],
        ) -> Result<ReleaseSummary> {
            bail!("not under test")
        }
    }

    fn scripted(
        themes: Result<Vec<Theme>, &str>,
        groups: Result<Vec<PrGroup>, &str>,
    ) -> Arc<dyn Classifier> {
        Arc::new(Scripted {
            themes: themes.map_err(str::to_string),
            groups: groups.map_err(str::to_string),
        })
    }

    fn group(numbers: &[i64]) -> PrGroup {
        PrGroup {
            numbers: numbers.to_vec(),
            reason: "scripted".to_string(),
        }
    }

    fn theme(name: &str, numbers: &[i64]) -> Theme {
        Theme {
            name: name.to_string(),
            numbers: numbers.to_vec(),
        }
    }

    #[tokio::test]
    async fn empty_input_empty_output() {
        let c = scripted(Err("unused"), Err("unused"));
        let groups = partition_prs(&c, &meta(), vec![], 3).await;
        assert!(groups.is_empty());
    }

    #[tokio::test]
    async fn single_pr_is_trivial_group() {
        let c = scripted(Err("unused"), Err("unused"));
        let groups = partition_prs(&c, &meta(), vec![pr(42)], 3).await;
        assert_eq!(numbers_of(&groups), vec![vec![42]]);
    }

    #[tokio::test]
    async fn small_batch_skips_clustering() {
        // Theme clustering is scripted to fail; a small batch must never
        // call it, so grouping still succeeds.
        let c = scripted(Err("must not be called"), Ok(vec![group(&[1, 2]), group(&[3])]));
        let groups = partition_prs(&c, &meta(), vec![pr(1), pr(2), pr(3)], 3).await;
        assert_eq!(numbers_of(&groups), vec![vec![1, 2], vec![3]]);
    }

    #[tokio::test]
    async fn seven_pr_migration_scenario() {
        // PRs 101-103 are one migration; 104-107 are unrelated fixes.
        let c = scripted(
            Ok(vec![
                theme("Migration", &[101, 102, 103]),
                theme("Fixes", &[104, 105, 106, 107]),
            ]),
            Ok(vec![
                group(&[101, 102, 103]),
                group(&[104]),
                group(&[105]),
                group(&[106]),
                group(&[107]),
            ]),
        );
        let input: Vec<MergedPr> = (101..=107).map(pr).collect();
        let groups = partition_prs(&c, &meta(), input, 3).await;

        assert_eq!(groups.len(), 5);
        assert_covers_exactly(&groups, &[101, 102, 103, 104, 105, 106, 107]);
        assert!(groups.iter().any(|g| g.numbers() == vec![101, 102, 103]));
    }

    #[tokio::test]
    async fn theme_failure_degrades_to_one_theme() {
        let c = scripted(Err("rate limited"), Ok(vec![group(&[1, 2, 3, 4, 5, 6])]));
        let input: Vec<MergedPr> = (1..=6).map(pr).collect();
        let groups = partition_prs(&c, &meta(), input, 3).await;
        assert_eq!(groups.len(), 1);
        assert_covers_exactly(&groups, &[1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn total_failure_degrades_to_singletons() {
        let c = scripted(Err("down"), Err("down"));
        let input: Vec<MergedPr> = (1..=7).map(pr).collect();
        let groups = partition_prs(&c, &meta(), input, 3).await;
        assert_eq!(groups.len(), 7);
        assert_covers_exactly(&groups, &[1, 2, 3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn duplicate_theme_membership_first_wins() {
        // PR 2 claimed by both themes; hallucinated 99 dropped; PR 6 never
        // placed and must surface via Miscellaneous.
        let c = scripted(
            Ok(vec![
                theme("A", &[1, 2, 3]),
                theme("B", &[2, 4, 5, 99]),
            ]),
            Err("grouping down"),
        );
        let input: Vec<MergedPr> = (1..=6).map(pr).collect();
        let groups = partition_prs(&c, &meta(), input, 3).await;
        assert_covers_exactly(&groups, &[1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn plan_duplicates_resolved_first_occurrence_wins() {
        let input: Vec<MergedPr> = vec![pr(1), pr(2), pr(3)];
        let plan = vec![group(&[1, 2]), group(&[2, 3])];
        let groups = materialize(input, plan);
        assert_eq!(numbers_of(&groups), vec![vec![1, 2], vec![3]]);
    }

    #[test]
    fn normalize_themes_synthesizes_miscellaneous() {
        let themes = normalize_themes(vec![theme("A", &[1])], &[1, 2, 3]);
        assert_eq!(themes.len(), 2);
        assert_eq!(themes[1].name, MISC_THEME);
        assert_eq!(themes[1].numbers, vec![2, 3]);
    }

    #[test]
    fn detail_truncates_body_and_commits() {
        let mut p = pr(1);
        p.body = "x".repeat(2000);
        p.commits = (0..10)
            .map(|i| crate::models::CommitInfo {
                sha: format!("sha{}", i),
                message: format!("commit {}\n\nlong body", i),
                url: String::new(),
            })
            .collect();
        let d = pr_detail(&p);
        assert_eq!(d.body.chars().count(), 600);
        assert_eq!(d.commit_messages.len(), 5);
        assert_eq!(d.commit_messages[0], "commit 0");
    }
}
