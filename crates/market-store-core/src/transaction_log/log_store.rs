//! The commit log of one table.
//!
//! `_timeseries_log/` holds one JSON file per version next to `CURRENT`,
//! which names the newest published version. A table without `CURRENT` has
//! no commits and reports version 0.
//!
//! Writers claim a version by creating its commit file with create-new
//! semantics, then publish it by atomically replacing `CURRENT`. Readers only
//! replay up to `CURRENT`, so a claimed but unpublished file is invisible.
use std::path::PathBuf;

use chrono::Utc;
use snafu::prelude::*;

use crate::storage::{self, TableLocation};
use crate::transaction_log::actions::{Commit, LogAction};
use crate::transaction_log::*;

/// Reads and appends the commit log below a table root.
#[derive(Debug, Clone)]
pub struct TransactionLogStore {
    location: TableLocation,
}

fn commit_path(version: u64) -> PathBuf {
    let name = format!(
        "{version:0width$}.json",
        width = TransactionLogStore::COMMIT_FILENAME_DIGITS
    );
    PathBuf::from(TransactionLogStore::LOG_DIR_NAME).join(name)
}

fn current_path() -> PathBuf {
    PathBuf::from(TransactionLogStore::LOG_DIR_NAME).join(TransactionLogStore::CURRENT_FILE_NAME)
}

fn corrupt(msg: String) -> CommitError {
    CorruptStateSnafu { msg }.build()
}

impl TransactionLogStore {
    /// Directory below the table root that holds the log.
    pub const LOG_DIR_NAME: &str = "_timeseries_log";
    /// Pointer file naming the newest published version.
    pub const CURRENT_FILE_NAME: &str = "CURRENT";
    /// Commit files are named by their version, zero-padded to this width.
    pub const COMMIT_FILENAME_DIGITS: usize = 10;

    /// Log of the table rooted at `location`.
    pub fn new(location: TableLocation) -> Self {
        Self { location }
    }

    /// Table root this log belongs to.
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    /// Read and parse the commit for `version`.
    pub async fn load_commit(&self, version: u64) -> Result<Commit, CommitError> {
        let text = storage::read_to_string(self.location.as_ref(), &commit_path(version))
            .await
            .context(StorageSnafu)?;
        serde_json::from_str(&text)
            .map_err(|e| corrupt(format!("commit {version} is unreadable: {e}")))
    }

    /// Newest published version; 0 when `CURRENT` does not exist.
    pub async fn load_current_version(&self) -> Result<u64, CommitError> {
        let text = match storage::read_to_string(self.location.as_ref(), &current_path()).await {
            Ok(text) => text,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(source) => return Err(CommitError::Storage { source }),
        };
        let text = text.trim();
        ensure!(
            !text.is_empty(),
            CorruptStateSnafu {
                msg: format!("{} is empty", current_path().display()),
            }
        );
        text.parse::<u64>()
            .map_err(|e| corrupt(format!("CURRENT holds {text:?}: {e}")))
    }

    async fn publish(&self, version: u64) -> Result<(), CommitError> {
        storage::write_atomic(
            self.location.as_ref(),
            &current_path(),
            format!("{version}\n").as_bytes(),
        )
        .await
        .context(StorageSnafu)
    }

    /// Append `actions` as version `expected + 1`.
    ///
    /// Fails with `Conflict` when `CURRENT` is no longer `expected`, and with
    /// `Storage(AlreadyExists)` when another writer claimed the version
    /// first. Either way the caller must reload state before trying again.
    ///
    /// A claimed version whose writer died before publishing is published by
    /// the next writer that collides with it, so the table does not stay
    /// stuck behind the orphan.
    pub async fn commit_with_expected_version(
        &self,
        expected: u64,
        actions: Vec<LogAction>,
    ) -> Result<u64, CommitError> {
        let found = self.load_current_version().await?;
        ensure!(found == expected, ConflictSnafu { expected, found });

        let version = expected
            .checked_add(1)
            .ok_or_else(|| corrupt("version counter overflow".to_string()))?;
        let commit = Commit {
            version,
            base_version: expected,
            timestamp: Utc::now(),
            actions,
        };
        let json = serde_json::to_vec(&commit)
            .map_err(|e| corrupt(format!("commit {version} cannot be encoded: {e}")))?;

        let claimed = storage::write_new(self.location.as_ref(), &commit_path(version), &json).await;
        if let Err(source) = claimed {
            if source.is_already_exists() {
                self.roll_forward_orphan(expected, version).await?;
            }
            return Err(CommitError::Storage { source });
        }

        self.publish(version).await?;
        log::debug!(
            "committed version {version} of {}",
            self.location.root().display()
        );
        Ok(version)
    }

    async fn roll_forward_orphan(&self, expected: u64, version: u64) -> Result<(), CommitError> {
        if self.load_current_version().await? != expected {
            return Ok(());
        }
        // Only a complete commit built on `expected` is safe to publish;
        // anything else may still be in the middle of being written.
        let Ok(commit) = self.load_commit(version).await else {
            return Ok(());
        };
        if commit.version != version || commit.base_version != expected {
            return Ok(());
        }
        log::warn!(
            "publishing orphaned commit {version} of {}",
            self.location.root().display()
        );
        self.publish(version).await
    }
}
