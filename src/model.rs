// src/model.rs

use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};

/// Format used for first/last commit dates in the metadata bundle
pub const COMMIT_DATE_FORMAT: &str = "%Y-%m-%d %z";

/// Format used for the timestamp of each commit record
pub const COMMIT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Language name (lowercased) to byte count, as a decimal string, largest first as the API reports them
pub type Languages = IndexMap<String, String>;

/// A raw package entry as emitted by the SBOM tool. Any key may be missing.
pub type RawPackage = serde_json::Map<String, serde_json::Value>;

/// A single commit read from history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    #[serde(with = "committed_at")]
    pub committed_at: DateTime<FixedOffset>,
    pub author: String,
    pub message: String,
}

/// An element of the `commits` sequence. `Unavailable` renders as `{}` and
/// stands in for the whole history when it could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommitEntry {
    Record(CommitRecord),
    Unavailable {},
}

/// Outcome of walking a branch's history, newest commit first
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum History {
    Found(Vec<CommitRecord>),
    Unavailable { reason: String },
}

impl History {
    /// The non-empty commit list, if there is one
    pub fn commits(&self) -> Option<&[CommitRecord]> {
        match self {
            History::Found(commits) if !commits.is_empty() => Some(commits),
            _ => None,
        }
    }

    pub fn newest(&self) -> Option<&CommitRecord> {
        self.commits().and_then(|c| c.first())
    }

    pub fn oldest(&self) -> Option<&CommitRecord> {
        self.commits().and_then(|c| c.last())
    }

    /// Commit entries for the output record; never empty
    pub fn entries(&self) -> Vec<CommitEntry> {
        match self.commits() {
            Some(commits) => commits.iter().cloned().map(CommitEntry::Record).collect(),
            None => vec![CommitEntry::Unavailable {}],
        }
    }
}

/// Everything the analyzer and the hosting API know about a repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub created_at: Option<String>,
    pub first_commit_date: Option<String>,
    pub last_commit_date: Option<String>,
    pub age: f64,
    pub commit_rate: f64,
    pub commits: Vec<CommitEntry>,
}

/// A package reduced to the four fields downstream consumers read.
/// All keys are always serialized, `null` when unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedPackage {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub version: Option<String>,
    pub bom_ref: Option<String>,
}

/// The record persisted to object storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub repo: String,
    pub metadata: RepoMetadata,
    pub languages: Languages,
    pub packages: Vec<NormalizedPackage>,
}

mod committed_at {
    use super::{COMMIT_TIMESTAMP_FORMAT, DateTime, FixedOffset, Serializer};
    use serde::{Deserialize, Deserializer};

    pub fn serialize<S: Serializer>(value: &DateTime<FixedOffset>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(COMMIT_TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_str(&raw, COMMIT_TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}
