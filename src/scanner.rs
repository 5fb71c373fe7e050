use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

lazy_static! {
    static ref BPO_REFERENCE: Regex = Regex::new(r"(?i)^bpo-(\d+)").unwrap();
    static ref GH_REFERENCE: Regex = Regex::new(r"(?i)^gh-(\d+)").unwrap();
}

/// Branches tried, in order, when looking for the integration branch.
const MAIN_BRANCH_CANDIDATES: &[&str] = &["upstream/main", "origin/main"];
const MAIN_BRANCH_FALLBACK: &str = "main";

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error("`git {command}` failed in {}: {stderr}", .repo.display())]
    Command {
        command: String,
        repo: PathBuf,
        stderr: String,
    },
}

/// Which tracker's identifiers a commit subject is searched for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Tracker {
    /// bugs.python.org, `bpo-<n>`.
    Bpo,
    /// GitHub issues, `gh-<n>`.
    Github,
}

impl Tracker {
    fn pattern(self) -> &'static Regex {
        match self {
            Tracker::Bpo => &*BPO_REFERENCE,
            Tracker::Github => &*GH_REFERENCE,
        }
    }

    /// Commits older than this are not read. GitHub numbers only started
    /// appearing in commit subjects after the migration.
    fn history_start(self) -> Option<DateTime<Utc>> {
        match self {
            Tracker::Bpo => None,
            Tracker::Github => Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).single(),
        }
    }
}

/// Extracts the issue number a commit subject starts with, e.g. 123 from
/// `bpo-123: fix thing`. Matching is anchored at the start of the subject and
/// ignores case.
pub(crate) fn parse_reference(tracker: Tracker, subject: &str) -> Option<u64> {
    tracker
        .pattern()
        .captures(subject)
        .and_then(|caps| caps[1].parse().ok())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CommitReference {
    pub hash: String,
    pub title: String,
}

impl CommitReference {
    pub(crate) fn new(hash: &str, title: &str) -> CommitReference {
        CommitReference {
            hash: hash.to_string(),
            title: title.to_string(),
        }
    }
}

/// Commits grouped by the issue they reference. Issues iterate in the order
/// they were first seen, commits in log order.
#[derive(Debug, Default)]
pub(crate) struct References {
    order: Vec<u64>,
    by_issue: HashMap<u64, Vec<CommitReference>>,
}

impl References {
    pub(crate) fn push(&mut self, issue: u64, commit: CommitReference) {
        let commits = self.by_issue.entry(issue).or_insert_with(|| {
            self.order.push(issue);
            Vec::new()
        });
        commits.push(commit);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (u64, &[CommitReference])> {
        self.order
            .iter()
            .map(move |issue| (*issue, self.by_issue[issue].as_slice()))
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

impl FromIterator<(u64, CommitReference)> for References {
    fn from_iter<I: IntoIterator<Item = (u64, CommitReference)>>(iter: I) -> Self {
        let mut refs = References::default();
        for (issue, commit) in iter {
            refs.push(issue, commit);
        }
        refs
    }
}

pub(crate) struct CommitScanner {
    path: PathBuf,
    tracker: Tracker,
}

impl CommitScanner {
    pub(crate) fn new<P: AsRef<Path>>(path: P, tracker: Tracker) -> CommitScanner {
        CommitScanner {
            path: path.as_ref().to_path_buf(),
            tracker,
        }
    }

    /// Fetches every remote, then reads the integration branch's history.
    pub(crate) fn scan(&self) -> Result<References, Error> {
        self.fetch_all()?;
        let repo = git2::Repository::open(&self.path)?;
        let branch = main_branch(&repo);
        self.references(&repo, &branch)
    }

    fn fetch_all(&self) -> Result<(), Error> {
        info!(repo = %self.path.display(), "fetching all remotes");
        let output = Command::new("git")
            .args(["fetch", "--all"])
            .current_dir(&self.path)
            .output()?;
        if !output.status.success() {
            return Err(Error::Command {
                command: "fetch --all".to_string(),
                repo: self.path.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Walks `branch` newest first and groups commits by the issue their
    /// subject references.
    pub(crate) fn references(
        &self,
        repo: &git2::Repository,
        branch: &str,
    ) -> Result<References, Error> {
        let tip = repo.revparse_single(branch)?.peel_to_commit()?;
        let mut walk = repo.revwalk()?;
        walk.set_sorting(git2::Sort::TIME)?;
        walk.push(tip.id())?;

        let since = self.tracker.history_start().map(|t| t.timestamp());
        let mut refs = References::default();
        for oid in walk {
            let commit = repo.find_commit(oid?)?;
            if matches!(since, Some(since) if commit.time().seconds() < since) {
                continue;
            }
            let title = commit.summary().unwrap_or_default();
            if let Some(issue) = parse_reference(self.tracker, title) {
                let short = commit.as_object().short_id()?;
                let hash = short.as_str().unwrap_or_default();
                refs.push(issue, CommitReference::new(hash, title));
            }
        }
        debug!(issues = refs.len(), %branch, "collected commit references");
        Ok(refs)
    }
}

/// The first candidate branch that resolves, or the local `main`.
pub(crate) fn main_branch(repo: &git2::Repository) -> String {
    for candidate in MAIN_BRANCH_CANDIDATES {
        match repo.revparse_single(candidate) {
            Ok(_) => return candidate.to_string(),
            Err(e) => debug!(%candidate, error = %e, "branch not found"),
        }
    }
    MAIN_BRANCH_FALLBACK.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, RepositoryInitOptions, Signature};

    fn init() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(dir.path(), &opts).unwrap();
        (dir, repo)
    }

    fn commit(repo: &Repository, message: &str, seconds: i64) -> git2::Oid {
        let sig = Signature::new("Tester", "tester@example.com", &git2::Time::new(seconds, 0))
            .unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let parents = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().unwrap()],
            Err(_) => vec![],
        };
        let parents: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    #[test]
    fn parses_legacy_references() {
        assert_eq!(parse_reference(Tracker::Bpo, "bpo-123: fix thing"), Some(123));
        assert_eq!(parse_reference(Tracker::Bpo, "BPO-123 fix"), Some(123));
        assert_eq!(parse_reference(Tracker::Bpo, "Bpo-7"), Some(7));
        assert_eq!(parse_reference(Tracker::Bpo, "fix thing"), None);
        assert_eq!(parse_reference(Tracker::Bpo, "Revert bpo-123"), None);
        assert_eq!(parse_reference(Tracker::Bpo, "gh-123: fix"), None);
        assert_eq!(parse_reference(Tracker::Bpo, "bpo-: fix"), None);
    }

    #[test]
    fn parses_github_references() {
        assert_eq!(parse_reference(Tracker::Github, "gh-94512: Fix"), Some(94512));
        assert_eq!(parse_reference(Tracker::Github, "GH-1"), Some(1));
        assert_eq!(parse_reference(Tracker::Github, "bpo-1"), None);
        assert_eq!(
            parse_reference(Tracker::Github, "gh-99999999999999999999999"),
            None
        );
    }

    #[test]
    fn falls_back_to_local_main() {
        let (_dir, repo) = init();
        let head = commit(&repo, "initial", 1_600_000_000);
        assert_eq!(main_branch(&repo), "main");

        repo.reference("refs/remotes/origin/main", head, true, "test")
            .unwrap();
        assert_eq!(main_branch(&repo), "origin/main");

        repo.reference("refs/remotes/upstream/main", head, true, "test")
            .unwrap();
        assert_eq!(main_branch(&repo), "upstream/main");
    }

    #[test]
    fn groups_commits_by_issue_newest_first() {
        let (dir, repo) = init();
        commit(&repo, "bpo-1: first", 1_500_000_000);
        commit(&repo, "Unrelated change", 1_500_000_100);
        commit(&repo, "bpo-2: second\n\nlong description", 1_500_000_200);
        commit(&repo, "BPO-1: follow-up", 1_500_000_300);

        let scanner = CommitScanner::new(dir.path(), Tracker::Bpo);
        let refs = scanner.references(&repo, "main").unwrap();
        let grouped: Vec<(u64, Vec<&str>)> = refs
            .iter()
            .map(|(issue, commits)| (issue, commits.iter().map(|c| c.title.as_str()).collect()))
            .collect();
        assert_eq!(
            grouped,
            vec![
                (1, vec!["BPO-1: follow-up", "bpo-1: first"]),
                (2, vec!["bpo-2: second"]),
            ]
        );
        for (_, commits) in refs.iter() {
            for c in commits {
                assert!(c.hash.len() >= 7);
            }
        }
    }

    #[test]
    fn github_scan_skips_old_history() {
        let (dir, repo) = init();
        // 2021-06-01
        commit(&repo, "gh-10: before the migration", 1_622_505_600);
        // 2022-06-01
        commit(&repo, "gh-11: after the migration", 1_654_041_600);

        let scanner = CommitScanner::new(dir.path(), Tracker::Github);
        let refs = scanner.references(&repo, "main").unwrap();
        let issues: Vec<u64> = refs.iter().map(|(issue, _)| issue).collect();
        assert_eq!(issues, vec![11]);
    }

    #[test]
    fn unknown_branch_is_an_error() {
        let (dir, repo) = init();
        commit(&repo, "bpo-1: first", 1_500_000_000);
        let scanner = CommitScanner::new(dir.path(), Tracker::Bpo);
        assert!(matches!(
            scanner.references(&repo, "no-such-branch"),
            Err(Error::Git(_))
        ));
    }
}
