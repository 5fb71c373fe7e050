//! On-disk cache of GitHub issue records.
//!
//! Every issue lives in its own `gh-<n>.json` file holding the record and the
//! time it was fetched. An entry stays fresh for a fraction (the staleness
//! factor) of the time the issue had gone untouched when it was fetched,
//! capped at 30 days, so recently active issues are re-read sooner.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, FixedOffset, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{github, issue::IssueRecord};

const MAX_FRESHNESS_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Github(#[from] github::Error),
    #[error("corrupt cache entry {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("cannot serialize issue {number}: {source}")]
    Serialize {
        number: u64,
        source: serde_json::Error,
    },
    #[error("cache entry {} has a non-UTC {field} ({value})", .path.display())]
    NotUtc {
        path: PathBuf,
        field: &'static str,
        value: DateTime<FixedOffset>,
    },
    #[error("issue {number} has no cache entry")]
    Missing { number: u64 },
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub(crate) struct CacheEntry {
    pub fetch_time: DateTime<FixedOffset>,
    pub issue: IssueRecord,
}

impl CacheEntry {
    pub(crate) fn new(fetch_time: DateTime<Utc>, issue: IssueRecord) -> CacheEntry {
        CacheEntry {
            fetch_time: fetch_time.into(),
            issue,
        }
    }

    /// The instant after which this entry must be fetched again.
    pub(crate) fn deadline(&self, staleness: f64) -> DateTime<FixedOffset> {
        let quiet = (self.fetch_time - self.issue.updated_at).max(Duration::zero());
        let cap = Duration::days(MAX_FRESHNESS_DAYS);
        let cap_ns = cap.num_nanoseconds().unwrap_or(i64::MAX) as f64;
        let tolerated = match quiet.num_nanoseconds() {
            Some(ns) => {
                let scaled = ns as f64 * staleness.max(0.0);
                if scaled.is_finite() && scaled < cap_ns {
                    Duration::nanoseconds(scaled as i64)
                } else {
                    cap
                }
            }
            None => cap,
        };
        self.fetch_time + tolerated
    }

    pub(crate) fn is_fresh(&self, now: DateTime<Utc>, staleness: f64) -> bool {
        now < self.deadline(staleness).with_timezone(&Utc)
    }

    fn check_utc(&self, path: &Path) -> Result<(), Error> {
        for (field, value) in [
            ("fetch_time", self.fetch_time),
            ("updated_at", self.issue.updated_at),
        ] {
            if value.offset().local_minus_utc() != 0 {
                return Err(Error::NotUtc {
                    path: path.to_path_buf(),
                    field,
                    value,
                });
            }
        }
        Ok(())
    }
}

/// The directory of cache files.
pub(crate) struct Store {
    dir: PathBuf,
}

impl Store {
    pub(crate) fn open<P: AsRef<Path>>(dir: P) -> Result<Store, Error> {
        std::fs::create_dir_all(&dir)?;
        Ok(Store {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub(crate) fn path_for(&self, number: u64) -> PathBuf {
        self.dir.join(format!("gh-{}.json", number))
    }

    fn temp_path_for(&self, number: u64) -> PathBuf {
        self.dir.join(format!("gh-{}.json.tmp", number))
    }

    pub(crate) fn load(&self, number: u64) -> Result<Option<CacheEntry>, Error> {
        let path = self.path_for(number);
        if !path.is_file() {
            return Ok(None);
        }
        read_entry(&path).map(Some)
    }

    /// Writes the entry next to its slot and renames it into place, so the
    /// slot always holds either the previous entry or the complete new one.
    pub(crate) fn save(&self, entry: &CacheEntry) -> Result<(), Error> {
        let tmp = self.write_temp(entry)?;
        std::fs::rename(tmp, self.path_for(entry.issue.number))?;
        Ok(())
    }

    fn write_temp(&self, entry: &CacheEntry) -> Result<PathBuf, Error> {
        let number = entry.issue.number;
        let tmp = self.temp_path_for(number);
        let bytes =
            serde_json::to_vec(entry).map_err(|source| Error::Serialize { number, source })?;
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(tmp)
    }

    /// Every cache file in the directory, in file-name order.
    pub(crate) fn entry_paths(&self) -> Result<Vec<PathBuf>, Error> {
        let mut paths = Vec::new();
        for file in std::fs::read_dir(&self.dir)? {
            let path = file?.path();
            let is_entry = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("gh-") && n.ends_with(".json"))
                .unwrap_or(false);
            if is_entry && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

pub(crate) fn read_entry(path: &Path) -> Result<CacheEntry, Error> {
    let bytes = std::fs::read(path)?;
    let entry: CacheEntry = serde_json::from_slice(&bytes).map_err(|source| Error::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    entry.check_utc(path)?;
    Ok(entry)
}

/// Read-through cache of issue records: memory first, then disk, then GitHub.
pub(crate) struct IssueCache {
    store: Store,
    client: Option<github::Client>,
    staleness: f64,
    memo: HashMap<u64, IssueRecord>,
}

impl IssueCache {
    pub(crate) fn new(store: Store, client: github::Client, staleness: f64) -> IssueCache {
        IssueCache {
            store,
            client: Some(client),
            staleness,
            memo: HashMap::new(),
        }
    }

    /// A cache that answers from disk only, however stale the entries are.
    pub(crate) fn offline(store: Store, staleness: f64) -> IssueCache {
        IssueCache {
            store,
            client: None,
            staleness,
            memo: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    /// The current record for `number`, fetched again if the cached copy
    /// has gone stale.
    pub(crate) async fn fetch(&mut self, number: u64) -> Result<IssueRecord, Error> {
        if let Some(record) = self.memo.get(&number) {
            return Ok(record.clone());
        }
        let now = Utc::now();
        match self.store.load(number)? {
            Some(entry) if self.client.is_none() || entry.is_fresh(now, self.staleness) => {
                debug!(number, "cache hit");
                self.memo.insert(number, entry.issue.clone());
                return Ok(entry.issue);
            }
            Some(entry) => debug!(number, fetched = %entry.fetch_time, "cache entry stale"),
            None => debug!(number, "cache miss"),
        }

        let client = self.client.as_ref().ok_or(Error::Missing { number })?;
        info!(number, "fetching issue");
        let fetched = client.get_issue(number).await?;
        if fetched.rate_limit.is_low() {
            let delay = fetched.rate_limit.backoff(Utc::now(), fetched.elapsed);
            warn!(
                remaining = fetched.rate_limit.remaining,
                delay_secs = delay.as_secs_f64(),
                "rate limit running low, backing off"
            );
            tokio::time::sleep(delay).await;
        }

        let entry = CacheEntry::new(now, fetched.record);
        self.store.save(&entry)?;
        self.memo.insert(number, entry.issue.clone());
        Ok(entry.issue)
    }
}
