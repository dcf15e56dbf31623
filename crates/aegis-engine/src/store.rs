//! Durable per-user snapshot storage with a journal-and-commit protocol.
//!
//! Each record is one JSON file: `user_<id>.json` for per-user snapshots
//! and `owners.json` for the process-wide ownership record. A save writes
//! the serialized record to `<file>.journal`, fsyncs it, and atomically
//! renames it over the live file; a crash before the rename leaves the
//! prior file intact, and a leftover journal is discarded on the next
//! load. Absence of a file is "no policy yet", and a file that fails to
//! parse is treated the same way rather than refusing to start.
//!
//! The store takes an exclusive `fs2` lock on the data directory for its
//! lifetime so a second engine instance fails fast instead of interleaving
//! commits.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use aegis_core::identity::UserId;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ownership::OwnershipRecord;
use crate::snapshot::UserPolicySnapshot;

/// Name of the directory lock file.
const LOCK_FILE: &str = ".store.lock";

/// Name of the ownership record file.
const OWNERS_FILE: &str = "owners.json";

/// Errors from the persistence store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The data directory could not be created or opened.
    #[error("cannot open policy store at {path}: {source}")]
    Open {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Another engine instance holds the directory lock.
    #[error("policy store at {path} is locked by another instance")]
    Locked {
        /// The directory path.
        path: PathBuf,
    },

    /// A record could not be serialized or written.
    #[error("cannot commit {path}: {source}")]
    Commit {
        /// The target file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Atomic, versioned load/save of policy records.
#[derive(Debug)]
pub struct PersistenceStore {
    dir: PathBuf,
    _dir_lock: File,
}

impl PersistenceStore {
    /// Opens (creating if needed) the store at `dir` and takes the
    /// directory lock.
    ///
    /// # Errors
    ///
    /// [`StoreError::Open`] on I/O failure, [`StoreError::Locked`] when
    /// another instance holds the lock.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Open {
            path: dir.clone(),
            source,
        })?;
        let lock_path = dir.join(LOCK_FILE);
        let dir_lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| StoreError::Open {
                path: dir.clone(),
                source,
            })?;
        if dir_lock.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked { path: dir });
        }
        Ok(Self {
            dir,
            _dir_lock: dir_lock,
        })
    }

    fn user_path(&self, user: UserId) -> PathBuf {
        self.dir.join(format!("user_{}.json", user.raw()))
    }

    fn journal_path(path: &Path) -> PathBuf {
        let mut journal = path.as_os_str().to_owned();
        journal.push(".journal");
        PathBuf::from(journal)
    }

    /// Loads the snapshot for `user`; `None` when nothing (usable) is on
    /// disk.
    #[must_use]
    pub fn load_user(&self, user: UserId) -> Option<UserPolicySnapshot> {
        self.load_json(&self.user_path(user))
    }

    /// Commits the snapshot for `user`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Commit`] on I/O failure; the caller keeps in-memory
    /// state authoritative and retries on the next mutation.
    pub fn save_user(&self, user: UserId, snapshot: &UserPolicySnapshot) -> Result<(), StoreError> {
        self.commit(&self.user_path(user), snapshot)
    }

    /// Deletes the snapshot for a removed user. Missing files are fine.
    pub fn delete_user(&self, user: UserId) {
        let path = self.user_path(user);
        for target in [Self::journal_path(&path), path] {
            if let Err(err) = fs::remove_file(&target) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %target.display(), error = %err, "cannot delete policy file");
                }
            }
        }
    }

    /// Loads the process-wide ownership record.
    #[must_use]
    pub fn load_ownership(&self) -> Option<OwnershipRecord> {
        self.load_json(&self.dir.join(OWNERS_FILE))
    }

    /// Commits the process-wide ownership record.
    ///
    /// # Errors
    ///
    /// [`StoreError::Commit`] on I/O failure.
    pub fn save_ownership(&self, record: &OwnershipRecord) -> Result<(), StoreError> {
        self.commit(&self.dir.join(OWNERS_FILE), record)
    }

    fn load_json<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        // An uncommitted journal is a write that never happened.
        let journal = Self::journal_path(path);
        if journal.exists() {
            warn!(path = %journal.display(), "discarding uncommitted journal");
            let _ = fs::remove_file(&journal);
        }
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot read policy file");
                return None;
            },
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                // Corrupt state must not brick the device; start over.
                warn!(path = %path.display(), error = %err, "unparseable policy file, treating as absent");
                None
            },
        }
    }

    fn commit<T: Serialize>(&self, path: &Path, record: &T) -> Result<(), StoreError> {
        let wrap = |source: std::io::Error| StoreError::Commit {
            path: path.to_path_buf(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|err| wrap(std::io::Error::other(err)))?;
        let journal = Self::journal_path(path);
        let mut file = File::create(&journal).map_err(wrap)?;
        file.write_all(&bytes).map_err(wrap)?;
        file.sync_all().map_err(wrap)?;
        drop(file);
        fs::rename(&journal, path).map_err(wrap)?;
        debug!(path = %path.display(), bytes = bytes.len(), "committed policy record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use aegis_core::admin::Admin;
    use aegis_core::identity::{AdminIdentity, ComponentName};

    use super::*;

    fn store() -> (tempfile::TempDir, PersistenceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn sample_snapshot() -> UserPolicySnapshot {
        let mut snapshot = UserPolicySnapshot::new();
        snapshot.push_admin(Admin::new(AdminIdentity::new(
            ComponentName::new("com.example.mdm", ".Admin").unwrap(),
            UserId(0),
            10_001,
        )));
        snapshot.failed_password_attempts = 2;
        snapshot
    }

    #[test]
    fn save_load_round_trip() {
        let (_dir, store) = store();
        store.save_user(UserId(0), &sample_snapshot()).unwrap();
        let loaded = store.load_user(UserId(0)).unwrap();
        assert_eq!(loaded.failed_password_attempts, 2);
        assert_eq!(loaded.admins().len(), 1);
    }

    #[test]
    fn absent_file_is_none() {
        let (_dir, store) = store();
        assert!(store.load_user(UserId(42)).is_none());
    }

    #[test]
    fn corrupt_file_is_treated_as_absent() {
        let (dir, store) = store();
        fs::write(dir.path().join("user_0.json"), b"{not json").unwrap();
        assert!(store.load_user(UserId(0)).is_none());
    }

    #[test]
    fn leftover_journal_is_discarded_and_live_file_wins() {
        let (dir, store) = store();
        store.save_user(UserId(0), &sample_snapshot()).unwrap();
        // Simulate a crash mid-save: a journal with newer-but-uncommitted
        // contents sits beside the live file.
        fs::write(dir.path().join("user_0.json.journal"), b"garbage").unwrap();

        let loaded = store.load_user(UserId(0)).unwrap();
        assert_eq!(loaded.failed_password_attempts, 2);
        assert!(!dir.path().join("user_0.json.journal").exists());
    }

    #[test]
    fn delete_removes_file_and_is_idempotent() {
        let (dir, store) = store();
        store.save_user(UserId(10), &sample_snapshot()).unwrap();
        store.delete_user(UserId(10));
        assert!(!dir.path().join("user_10.json").exists());
        store.delete_user(UserId(10));
    }

    #[test]
    fn second_instance_is_locked_out() {
        let (dir, _store) = store();
        match PersistenceStore::open(dir.path()) {
            Err(StoreError::Locked { .. }) => {},
            other => panic!("expected Locked, got {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_in_record_are_skipped() {
        let (dir, store) = store();
        fs::write(
            dir.path().join("user_0.json"),
            br#"{"failed_password_attempts":3,"field_from_the_future":{"a":1}}"#,
        )
        .unwrap();
        let loaded = store.load_user(UserId(0)).unwrap();
        assert_eq!(loaded.failed_password_attempts, 3);
    }
}
