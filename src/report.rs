use std::io::Write;

use chrono::SecondsFormat;
use console::Style;
use indicatif::ProgressBar;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::{
    cache::{self, IssueCache, Store},
    issue::IssueRecord,
    mapping::IdentifierMapping,
    scanner::{self, CommitReference, References, Tracker},
};

lazy_static! {
    static ref BPO_PREFIX: Regex = Regex::new(r"(?i)bpo-\d+").unwrap();
}

const IDLE_LABEL: &str = "expert-IDLE";

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Cache(#[from] cache::Error),
    #[error("bpo-{bpo} is not in the issue mapping")]
    Unmapped { bpo: u64 },
}

/// Terminal styling for report output.
pub(crate) struct Styles {
    url: Style,
    faint: Style,
}

impl Styles {
    pub(crate) fn new(color: bool) -> Styles {
        Styles {
            url: Style::new().blue().bright().force_styling(color),
            faint: Style::new().dim().force_styling(color),
        }
    }
}

/// A migrated issue that is still open although exactly one commit
/// references its bugs.python.org number.
#[derive(Debug)]
pub(crate) struct ClosableBpo {
    pub bpo: u64,
    pub gh: u64,
    pub issue: IssueRecord,
}

/// Issues referenced by a single commit that are mapped to GitHub and still
/// open there, most recently updated first.
pub(crate) async fn closable_bpo(
    refs: &References,
    mapping: &IdentifierMapping,
    cache: &mut IssueCache,
) -> Result<Vec<ClosableBpo>, Error> {
    let candidates: Vec<(u64, u64)> = refs
        .iter()
        .filter(|(_, commits)| commits.len() == 1)
        .filter_map(|(bpo, _)| mapping.get(bpo).map(|gh| (bpo, gh)))
        .collect();
    debug!(candidates = candidates.len(), "single-commit issues with a GitHub number");

    let progress = ProgressBar::new(candidates.len() as u64);
    let mut open = Vec::new();
    for (bpo, gh) in candidates {
        let issue = cache.fetch(gh).await?;
        progress.inc(1);
        if !issue.is_closed() {
            open.push(ClosableBpo { bpo, gh, issue });
        }
    }
    progress.finish_and_clear();
    open.sort_by(|a, b| b.issue.updated_at.cmp(&a.issue.updated_at));
    Ok(open)
}

pub(crate) fn render_bpo<W: Write>(
    out: &mut W,
    closable: &[ClosableBpo],
    styles: &Styles,
) -> std::io::Result<()> {
    for c in closable {
        writeln!(
            out,
            "{} {} {} {} {}",
            c.bpo,
            c.gh,
            styles.url.apply_to(&c.issue.html_url),
            c.issue.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            c.issue.comments
        )?;
    }
    writeln!(out, "{}", closable.len())
}

/// An open GitHub issue together with the commits that mention it.
#[derive(Debug)]
pub(crate) struct OpenReferenced {
    pub issue: IssueRecord,
    pub commits: Vec<CommitReference>,
}

/// Every referenced GitHub issue that is not closed, in first-seen log order.
pub(crate) async fn open_referenced(
    refs: &References,
    cache: &mut IssueCache,
) -> Result<Vec<OpenReferenced>, Error> {
    let progress = ProgressBar::new(refs.len() as u64);
    let mut open = Vec::new();
    for (number, commits) in refs.iter() {
        let issue = cache.fetch(number).await?;
        progress.inc(1);
        if !issue.is_closed() {
            open.push(OpenReferenced {
                issue,
                commits: commits.to_vec(),
            });
        }
    }
    progress.finish_and_clear();
    Ok(open)
}

pub(crate) fn render_open_referenced<W: Write>(
    out: &mut W,
    open: &[OpenReferenced],
    styles: &Styles,
) -> std::io::Result<()> {
    for o in open {
        writeln!(out, "#{} {}", o.issue.number, o.issue.title)?;
        writeln!(out, "{}", styles.url.apply_to(&o.issue.html_url))?;
        for commit in &o.commits {
            writeln!(
                out,
                "    {}",
                styles.faint.apply_to(format!("{} {}", commit.hash, commit.title))
            )?;
        }
    }
    writeln!(out)?;
    writeln!(
        out,
        "{} open issues with commits that reference their Github issue number",
        open.len()
    )
}

/// An open IDLE pull request still titled with its bugs.python.org number.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct IdleRetitle {
    pub title: String,
    pub retitled: String,
    pub url: String,
}

fn is_idle(issue: &IssueRecord) -> bool {
    issue.title.to_lowercase().contains("idle") || issue.has_label(IDLE_LABEL)
}

/// Scans cached pull requests in file-name order.
pub(crate) fn idle_retitles(
    store: &Store,
    mapping: &IdentifierMapping,
) -> Result<Vec<IdleRetitle>, Error> {
    let mut found = Vec::new();
    for path in store.entry_paths()? {
        let issue = cache::read_entry(&path)?.issue;
        if !issue.is_pull_request() || issue.is_closed() || !is_idle(&issue) {
            continue;
        }
        let bpo = match scanner::parse_reference(Tracker::Bpo, &issue.title) {
            Some(bpo) => bpo,
            None => continue,
        };
        let gh = mapping.get(bpo).ok_or(Error::Unmapped { bpo })?;
        let retitled = BPO_PREFIX
            .replace_all(&issue.title, format!("gh-{}", gh).as_str())
            .into_owned();
        found.push(IdleRetitle {
            title: issue.title,
            retitled,
            url: issue.html_url,
        });
    }
    Ok(found)
}

pub(crate) fn render_idle<W: Write>(
    out: &mut W,
    retitles: &[IdleRetitle],
    styles: &Styles,
) -> std::io::Result<()> {
    for r in retitles {
        writeln!(out, "{}", r.title)?;
        writeln!(out, "{}", r.retitled)?;
        writeln!(out, "{}", styles.url.apply_to(&r.url))?;
        writeln!(out)?;
    }
    Ok(())
}
