//! The bugs.python.org → GitHub issue number table.
//!
//! Stored as a gzip-compressed JSON object whose keys and values are issue
//! numbers (keys as strings, values as strings or numbers).

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use futures::stream::{self, StreamExt};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::debug;

use crate::cache::{self, CacheEntry};

lazy_static! {
    static ref MIGRATED_BODY: Regex =
        Regex::new(r"^BPO \| \[(\d+)\]\(https://bugs\.python\.org/issue(\d+)\)").unwrap();
}

/// Cache files read at once when deriving the table.
const DERIVE_WORKERS: usize = 16;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Cache(#[from] cache::Error),
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error("mapping entry {key:?} -> {value} is not a pair of issue numbers")]
    NotANumber {
        key: String,
        value: serde_json::Value,
    },
    #[error("issue {gh} links to bpo-{text} but its URL says bpo-{url}")]
    InconsistentLink { gh: u64, text: u64, url: u64 },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct IdentifierMapping(HashMap<u64, u64>);

impl IdentifierMapping {
    pub(crate) fn load<P: AsRef<Path>>(path: P) -> Result<IdentifierMapping, Error> {
        let file = std::fs::File::open(&path)?;
        let mut json = Vec::new();
        GzDecoder::new(file).read_to_end(&mut json)?;
        Self::from_json(&json)
    }

    fn from_json(json: &[u8]) -> Result<IdentifierMapping, Error> {
        let raw: HashMap<String, serde_json::Value> = serde_json::from_slice(json)?;
        let mut table = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            let gh = match &value {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
            match (key.trim().parse::<u64>(), gh) {
                (Ok(bpo), Some(gh)) => {
                    table.insert(bpo, gh);
                }
                _ => return Err(Error::NotANumber { key, value }),
            }
        }
        Ok(IdentifierMapping(table))
    }

    /// Writes the table in the format `load` reads, keys in numeric order.
    pub(crate) fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let ordered: BTreeMap<u64, u64> = self.0.iter().map(|(k, v)| (*k, *v)).collect();
        let as_strings: BTreeMap<String, u64> = ordered
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let mut encoder = GzEncoder::new(std::fs::File::create(path)?, Compression::default());
        serde_json::to_writer(&mut encoder, &as_strings)?;
        encoder.finish()?.flush()?;
        Ok(())
    }

    pub(crate) fn get(&self, bpo: u64) -> Option<u64> {
        self.0.get(&bpo).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(u64, u64)> for IdentifierMapping {
    fn from_iter<I: IntoIterator<Item = (u64, u64)>>(iter: I) -> Self {
        IdentifierMapping(iter.into_iter().collect())
    }
}

/// The bugs.python.org number a migrated issue was created from, read from
/// the header the migration put at the top of its body. Pull requests and
/// issues opened on GitHub have none.
pub(crate) fn bpo_from_entry(entry: &CacheEntry) -> Result<Option<u64>, Error> {
    let issue = &entry.issue;
    if issue.is_pull_request() {
        return Ok(None);
    }
    let body = issue.body.as_deref().unwrap_or_default();
    let caps = match MIGRATED_BODY.captures(body) {
        Some(caps) => caps,
        None => return Ok(None),
    };
    match (caps[1].parse::<u64>(), caps[2].parse::<u64>()) {
        (Ok(text), Ok(url)) if text == url => Ok(Some(text)),
        (Ok(text), Ok(url)) => Err(Error::InconsistentLink {
            gh: issue.number,
            text,
            url,
        }),
        _ => Ok(None),
    }
}

fn pair_from_file(path: PathBuf) -> Result<Option<(u64, u64)>, Error> {
    let entry = cache::read_entry(&path)?;
    Ok(bpo_from_entry(&entry)?.map(|bpo| (bpo, entry.issue.number)))
}

/// Rebuilds the table from cache files. Files are independent, so they are
/// parsed on the blocking pool a bounded number at a time.
pub(crate) async fn derive(paths: Vec<PathBuf>) -> Result<IdentifierMapping, Error> {
    let total = paths.len();
    let mut pairs = stream::iter(paths)
        .map(|path| tokio::task::spawn_blocking(move || pair_from_file(path)))
        .buffer_unordered(DERIVE_WORKERS);

    let mut table = HashMap::new();
    while let Some(joined) = pairs.next().await {
        if let Some((bpo, gh)) = joined?? {
            table.insert(bpo, gh);
        }
    }
    debug!(files = total, mapped = table.len(), "derived mapping");
    Ok(IdentifierMapping(table))
}
