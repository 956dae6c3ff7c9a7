//! On-disk cache of provisioned contexts
//!
//! Layout under the work directory, one directory per environment:
//!
//! ```text
//! <work_dir>/<env>/env            the isolated context itself
//! <work_dir>/<env>/context.json   ContextRecord of the last successful build
//! <work_dir>/<env>/.provisioning  present while a build is in progress
//! <work_dir>/<env>/.lock          advisory lock serializing builds
//! ```
//!
//! A leftover `.provisioning` marker means a build was interrupted, and the
//! context is rebuilt regardless of its record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use matrix_fs::io::{remove_dir_all_if_exists, write_atomic};
use matrix_fs::{ConfigStore, FileLock, NormalizedPath};
use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;

const CONTEXT_DIR: &str = "env";
const RECORD_FILE: &str = "context.json";
const MARKER_FILE: &str = ".provisioning";
const LOCK_FILE: &str = ".lock";

const LOCK_POLL_MIN: Duration = Duration::from_millis(20);
const LOCK_POLL_MAX: Duration = Duration::from_millis(500);

/// Persisted description of a provisioned context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRecord {
    /// Record format version
    pub version: String,
    pub env: String,
    pub fingerprint: String,
    pub backend: String,
    pub interpreter_request: String,
    pub interpreter_path: String,
    pub interpreter_version: String,
    pub packages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Handle on the work directory's contexts.
///
/// Opened once per invocation and passed to whoever needs it.
#[derive(Debug, Clone)]
pub struct ContextCache {
    work_dir: NormalizedPath,
}

impl ContextCache {
    /// Open (creating if needed) the cache rooted at `work_dir`.
    pub fn open(work_dir: &NormalizedPath) -> Result<Self, ProvisionError> {
        let native = work_dir.to_native();
        std::fs::create_dir_all(&native).map_err(|e| matrix_fs::Error::io(&native, e))?;
        tracing::debug!(work_dir = %work_dir, "context cache opened");
        Ok(Self {
            work_dir: work_dir.clone(),
        })
    }

    pub fn work_dir(&self) -> &NormalizedPath {
        &self.work_dir
    }

    fn env_dir(&self, env: &str) -> NormalizedPath {
        self.work_dir.join(env)
    }

    /// Location of the isolated context for `env`.
    pub fn context_dir(&self, env: &str) -> NormalizedPath {
        self.env_dir(env).join(CONTEXT_DIR)
    }

    fn record_path(&self, env: &str) -> NormalizedPath {
        self.env_dir(env).join(RECORD_FILE)
    }

    fn marker_path(&self, env: &str) -> NormalizedPath {
        self.env_dir(env).join(MARKER_FILE)
    }

    /// The record of the last successful build, if any.
    ///
    /// An unreadable record is treated as absent.
    pub fn record(&self, env: &str) -> Option<ContextRecord> {
        let path = self.record_path(env);
        if !path.is_file() {
            return None;
        }
        match ConfigStore::new().load(&path) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(env, error = %e, "ignoring unreadable context record");
                None
            }
        }
    }

    /// Records of all provisioned contexts, sorted by environment name.
    pub fn records(&self) -> Vec<ContextRecord> {
        let Ok(entries) = std::fs::read_dir(self.work_dir.to_native()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names.iter().filter_map(|name| self.record(name)).collect()
    }

    pub(crate) fn save_record(&self, record: &ContextRecord) -> Result<(), ProvisionError> {
        ConfigStore::new().save(&self.record_path(&record.env), record)?;
        Ok(())
    }

    /// Whether an interrupted build left its marker behind.
    pub fn is_marked(&self, env: &str) -> bool {
        self.marker_path(env).exists()
    }

    pub(crate) fn mark(&self, env: &str) -> Result<(), ProvisionError> {
        write_atomic(&self.marker_path(env), Utc::now().to_rfc3339().as_bytes())?;
        Ok(())
    }

    pub(crate) fn unmark(&self, env: &str) -> Result<(), ProvisionError> {
        let path = self.marker_path(env).to_native();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(matrix_fs::Error::io(path, e).into()),
        }
    }

    /// Remove the context and its record, keeping the lock file.
    pub(crate) fn reset(&self, env: &str) -> Result<(), ProvisionError> {
        remove_dir_all_if_exists(&self.context_dir(env))?;
        let record = self.record_path(env).to_native();
        match std::fs::remove_file(&record) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(matrix_fs::Error::io(record, e).into()),
        }
    }

    /// Take the exclusive build lock for `env`.
    ///
    /// Polls with a growing delay instead of blocking a thread, so dropping
    /// the future abandons the wait.
    pub async fn lock(&self, env: &str) -> Result<FileLock, ProvisionError> {
        let path = self.env_dir(env).join(LOCK_FILE);
        let mut delay = LOCK_POLL_MIN;
        let mut announced = false;
        loop {
            if let Some(lock) = FileLock::try_acquire(&path)? {
                return Ok(lock);
            }
            if !announced {
                tracing::info!(env, "waiting for another build of this context");
                announced = true;
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(LOCK_POLL_MAX);
        }
    }

    /// Drop the record so the next run rebuilds, leaving files in place.
    ///
    /// Returns whether a record existed.
    pub fn invalidate(&self, env: &str) -> Result<bool, ProvisionError> {
        let path = self.record_path(env).to_native();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(env, "context invalidated");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(matrix_fs::Error::io(path, e).into()),
        }
    }

    /// Delete everything cached for `env`. Returns whether anything existed.
    pub fn destroy(&self, env: &str) -> Result<bool, ProvisionError> {
        let removed = remove_dir_all_if_exists(&self.env_dir(env))?;
        if removed {
            tracing::info!(env, "context destroyed");
        }
        Ok(removed)
    }

    /// Delete every cached context. Returns the number removed.
    pub fn clear(&self) -> Result<usize, ProvisionError> {
        let native = self.work_dir.to_native();
        let entries = match std::fs::read_dir(&native) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(matrix_fs::Error::io(native, e).into()),
        };

        let mut removed = 0;
        for entry in entries.filter_map(|entry| entry.ok()) {
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if self.destroy(name)? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(env: &str) -> ContextRecord {
        ContextRecord {
            version: "1".into(),
            env: env.into(),
            fingerprint: "sha256:abc".into(),
            backend: "venv".into(),
            interpreter_request: "3.6".into(),
            interpreter_path: "/usr/bin/python3.6".into(),
            interpreter_version: "3.6.15".into(),
            packages: vec!["pytest".into()],
            created_at: Utc::now(),
        }
    }

    fn cache(dir: &TempDir) -> ContextCache {
        ContextCache::open(&NormalizedPath::new(dir.path().join("work"))).unwrap()
    }

    #[test]
    fn test_records_round_trip_and_list_sorted() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.save_record(&record("unit")).unwrap();
        cache.save_record(&record("lint")).unwrap();

        let stored = cache.record("unit").unwrap();
        assert_eq!(stored.fingerprint, "sha256:abc");
        assert_eq!(stored.packages, vec!["pytest".to_string()]);
        let envs: Vec<String> = cache.records().into_iter().map(|r| r.env).collect();
        assert_eq!(envs, vec!["lint", "unit"]);
    }

    #[test]
    fn test_corrupt_record_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let path = dir.path().join("work/unit/context.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(cache.record("unit"), None);
    }

    #[test]
    fn test_marker_lifecycle() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        assert!(!cache.is_marked("unit"));
        cache.mark("unit").unwrap();
        assert!(cache.is_marked("unit"));
        cache.unmark("unit").unwrap();
        cache.unmark("unit").unwrap();
        assert!(!cache.is_marked("unit"));
    }

    #[test]
    fn test_invalidate_keeps_context_files() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        std::fs::create_dir_all(cache.context_dir("unit").to_native()).unwrap();
        cache.save_record(&record("unit")).unwrap();

        assert!(cache.invalidate("unit").unwrap());
        assert!(!cache.invalidate("unit").unwrap());
        assert!(cache.record("unit").is_none());
        assert!(cache.context_dir("unit").is_dir());
    }

    #[test]
    fn test_destroy_and_clear() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        for env in ["a", "b", "c"] {
            cache.save_record(&record(env)).unwrap();
        }

        assert!(cache.destroy("a").unwrap());
        assert!(!cache.destroy("a").unwrap());
        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.records().is_empty());
    }

    #[tokio::test]
    async fn test_lock_is_reacquirable_after_drop() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let lock = cache.lock("unit").await.unwrap();
        drop(lock);
        let _again = cache.lock("unit").await.unwrap();
    }

    #[tokio::test]
    async fn test_contended_lock_wait_can_be_abandoned() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let held = cache.lock("unit").await.unwrap();

        let waited =
            tokio::time::timeout(Duration::from_millis(150), cache.lock("unit")).await;
        assert!(waited.is_err(), "lock should still be held elsewhere");

        drop(held);
        let _lock = tokio::time::timeout(Duration::from_secs(5), cache.lock("unit"))
            .await
            .expect("lock should be granted once released")
            .unwrap();
    }

    #[test]
    fn test_runtime_shuts_down_while_lock_is_contended() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let _held = runtime.block_on(cache.lock("unit")).unwrap();

        let waiter = cache.clone();
        let _waiting = runtime.spawn(async move { waiter.lock("unit").await });
        runtime.block_on(async { tokio::time::sleep(Duration::from_millis(50)).await });

        let started = std::time::Instant::now();
        drop(runtime);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
