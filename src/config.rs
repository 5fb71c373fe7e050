use std::path::PathBuf;

use thiserror::Error;

use crate::repo_name::RepoName;

const DEFAULT_REPO: &str = "dev/cpython";
const DEFAULT_CACHE_DIR: &str = ".cache/cpython_closable_issues";
const TOKEN_PREFIXES: &[&str] = &["ghp", "github"];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid repo path: {}", .0.display())]
    InvalidRepo(PathBuf),
    #[error("Invalid GitHub token")]
    InvalidToken,
    #[error("Invalid staleness {0}: must be a non-negative number")]
    InvalidStaleness(f64),
    #[error("cannot locate the home directory; pass {0} explicitly")]
    NoHome(&'static str),
}

/// Everything a run needs, resolved from flags and the environment and
/// checked before any work starts.
#[derive(Debug)]
pub(crate) struct Config {
    /// Unset means the home-relative default, resolved only by commands that
    /// scan the repository.
    pub repo: Option<PathBuf>,
    pub token: Option<String>,
    pub staleness: f64,
    pub cache_dir: PathBuf,
    pub api_url: String,
    pub github_repo: RepoName,
    pub color: bool,
    pub offline: bool,
}

impl Config {
    /// The repository to scan, which must be a git checkout.
    pub(crate) fn checked_repo(&self) -> Result<PathBuf, Error> {
        let repo = default_repo(self.repo.clone())?;
        if repo.is_dir() && repo.join(".git").is_dir() {
            Ok(repo)
        } else {
            Err(Error::InvalidRepo(repo))
        }
    }

    /// The access token, which must look like a GitHub personal token.
    pub(crate) fn checked_token(&self) -> Result<&str, Error> {
        match self.token.as_deref() {
            Some(token) if TOKEN_PREFIXES.iter().any(|p| token.starts_with(p)) => Ok(token),
            _ => Err(Error::InvalidToken),
        }
    }
}

pub(crate) fn check_staleness(staleness: f64) -> Result<f64, Error> {
    if staleness.is_finite() && staleness >= 0.0 {
        Ok(staleness)
    } else {
        Err(Error::InvalidStaleness(staleness))
    }
}

/// `path` if given, else `relative` under the home directory.
fn or_home(
    path: Option<PathBuf>,
    relative: &str,
    flag: &'static str,
) -> Result<PathBuf, Error> {
    match path {
        Some(path) => Ok(path),
        None => dirs::home_dir()
            .map(|home| home.join(relative))
            .ok_or(Error::NoHome(flag)),
    }
}

fn default_repo(path: Option<PathBuf>) -> Result<PathBuf, Error> {
    or_home(path, DEFAULT_REPO, "--repo")
}

pub(crate) fn default_cache_dir(path: Option<PathBuf>) -> Result<PathBuf, Error> {
    or_home(path, DEFAULT_CACHE_DIR, "--cache-dir")
}
