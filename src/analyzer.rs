// src/analyzer.rs

use crate::error::HostingError;
use crate::hosting::{Aggregator, HostingApi, Sleeper};
use crate::model::*;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use git2::{Commit, Oid, Repository, Sort};
use indicatif::ProgressBar;
use std::path::Path;
use tracing::{debug, info, warn};

const DAYS_PER_YEAR: f64 = 365.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Shortest span, in days, a commit rate is averaged over
pub const MIN_RATE_SPAN_DAYS: f64 = 1.0;

/// An open repository together with the branch being measured
pub struct RepoHandle {
    repo: Repository,
    branch: String,
}

impl RepoHandle {
    pub fn open(path: &Path, branch: &str) -> Result<Self, git2::Error> {
        let repo = Repository::open(path)?;
        info!(path = %path.display(), branch, "opened repository");
        Ok(Self { repo, branch: branch.to_string() })
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Reads the branch history newest-first. Any failure, such as an unborn
    /// branch, yields `History::Unavailable` instead of an error.
    pub fn read_history(&self) -> History {
        match self.walk() {
            Ok(commits) if commits.is_empty() => History::Unavailable { reason: format!("branch {} has no commits", self.branch) },
            Ok(commits) => History::Found(commits),
            Err(e) => {
                warn!(branch = %self.branch, error = %e, "commit history unavailable");
                History::Unavailable { reason: e.message().to_string() }
            }
        }
    }

    fn walk(&self) -> Result<Vec<CommitRecord>, git2::Error> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push(self.tip()?)?;
        revwalk.set_sorting(Sort::TIME)?;

        let bar = ProgressBar::new_spinner();
        bar.set_message(format!("Reading history of {}", self.branch));

        let mut commits = Vec::new();
        for oid in revwalk {
            let commit = self.repo.find_commit(oid?)?;
            commits.push(to_record(&commit)?);
            bar.inc(1);
        }
        bar.finish_and_clear();

        debug!(count = commits.len(), "walked history");
        Ok(commits)
    }

    fn tip(&self) -> Result<Oid, git2::Error> {
        let local = format!("refs/heads/{}", self.branch);
        match self.repo.refname_to_id(&local) {
            Ok(oid) => Ok(oid),
            Err(_) => Ok(self.repo.revparse_single(&self.branch)?.peel_to_commit()?.id()),
        }
    }
}

fn to_record(commit: &Commit) -> Result<CommitRecord, git2::Error> {
    let time = commit.time();
    let offset = FixedOffset::east_opt(time.offset_minutes() * 60)
        .ok_or_else(|| git2::Error::from_str("commit timezone offset out of range"))?;
    let committed_at = offset
        .timestamp_opt(time.seconds(), 0)
        .single()
        .ok_or_else(|| git2::Error::from_str("commit timestamp out of range"))?;

    Ok(CommitRecord {
        sha: commit.id().to_string(),
        committed_at,
        author: commit.author().name().unwrap_or("Unknown").to_string(),
        message: commit.message().unwrap_or_default().trim_end().to_string(),
    })
}

/// Years between the oldest commit and `now`, rounded to two decimals
pub fn age(history: &History, now: DateTime<Utc>) -> f64 {
    match history.oldest() {
        Some(oldest) => round(days_since(&oldest.committed_at, now) / DAYS_PER_YEAR, 2),
        None => 0.0,
    }
}

pub fn first_commit_date(history: &History) -> Option<String> {
    history.oldest().map(|c| c.committed_at.format(COMMIT_DATE_FORMAT).to_string())
}

pub fn last_commit_date(history: &History) -> Option<String> {
    history.newest().map(|c| c.committed_at.format(COMMIT_DATE_FORMAT).to_string())
}

/// Commits per day since the oldest commit, rounded to one decimal.
/// The span is floored at `MIN_RATE_SPAN_DAYS`.
pub fn commit_rate(history: &History, now: DateTime<Utc>) -> f64 {
    let (Some(commits), Some(oldest)) = (history.commits(), history.oldest()) else {
        return 0.0;
    };
    let span = days_since(&oldest.committed_at, now).max(MIN_RATE_SPAN_DAYS);
    round(commits.len() as f64 / span, 1)
}

/// Reads history once, derives the commit metrics from it and asks the hosting
/// API for the creation date. Unreadable history never fails this call.
pub fn repo_metadata<A: HostingApi, S: Sleeper>(
    handle: &RepoHandle,
    hosting: &Aggregator<A, S>,
    repo_name: &str,
    now: DateTime<Utc>,
) -> Result<RepoMetadata, HostingError> {
    let history = handle.read_history();
    let created_at = hosting.creation_date(repo_name)?;
    Ok(summarize(&history, Some(created_at), now))
}

/// Collapses a history into the metadata bundle
pub fn summarize(history: &History, created_at: Option<String>, now: DateTime<Utc>) -> RepoMetadata {
    if let History::Unavailable { reason } = history {
        debug!(reason = %reason, "using empty-history defaults");
    }
    RepoMetadata {
        created_at,
        first_commit_date: first_commit_date(history),
        last_commit_date: last_commit_date(history),
        age: age(history, now),
        commit_rate: commit_rate(history, now),
        commits: history.entries(),
    }
}

fn days_since(then: &DateTime<FixedOffset>, now: DateTime<Utc>) -> f64 {
    let elapsed = now.signed_duration_since(then.with_timezone(&Utc));
    (elapsed.num_seconds() as f64 / SECONDS_PER_DAY).max(0.0)
}

fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
