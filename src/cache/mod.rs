//! Content-addressed execution cache
//!
//! Outputs are stored under `cache_root/<hex key>/` with the layout
//!
//! ```text
//! <key>/inputs.json    canonical input record
//! <key>/outputs.json   output bindings
//! <key>/files/         materialized file outputs
//! <key>/status         claimed | done | failed
//! <key>/.lock          exclusive claim
//! ```
//!
//! The claim is atomic: `create_new` of the `.lock` file. That gives
//! cross-process at-most-once execution; an in-process map of
//! [`Notify`] handles lets same-process waiters sleep without polling
//! (cross-process waiters fall back to a bounded re-poll).

pub mod digest;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::{BraidError, Result};
use crate::task::TaskDef;
use crate::types::TypeSpec;
use crate::value::Bindings;

pub use digest::{cache_key, canonical_record, file_digest, sha256_hex, structural_digest};

/// Re-poll interval for claims held by another process (and a backstop
/// against missed in-process notifications)
const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of [`ExecutionCache::acquire`]
pub enum CacheAcquire {
    /// Outputs already materialized
    Hit(Bindings),
    /// This caller holds the exclusive claim and must execute
    Claimed(CacheClaim),
}

/// Non-blocking probe result
#[derive(Debug, PartialEq, Eq)]
pub enum CacheProbe {
    Hit,
    InFlight,
    Miss,
}

/// Exclusive claim on a cache key.
///
/// Dropping an unpublished claim releases the lock (the entry stays
/// `failed`-free, so the next claimant simply re-executes).
pub struct CacheClaim {
    key: String,
    dir: Utf8PathBuf,
    in_flight: Arc<DashMap<String, Arc<Notify>>>,
    released: bool,
}

impl CacheClaim {
    pub fn key(&self) -> &str {
        &self.key
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = fs::remove_file(self.dir.join(".lock"));
        if let Some((_, notify)) = self.in_flight.remove(&self.key) {
            notify.notify_waiters();
        }
    }
}

impl Drop for CacheClaim {
    fn drop(&mut self) {
        self.release();
    }
}

/// Content-addressed store with exclusive claims
#[derive(Clone)]
pub struct ExecutionCache {
    root: Utf8PathBuf,
    in_flight: Arc<DashMap<String, Arc<Notify>>>,
}

impl ExecutionCache {
    pub fn new(root: impl AsRef<Utf8Path>) -> Result<Self> {
        let root = root.as_ref().to_owned();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            in_flight: Arc::new(DashMap::new()),
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn entry_dir(&self, key: &str) -> Utf8PathBuf {
        self.root.join(key)
    }

    /// Directory for a key's materialized file outputs
    pub fn files_dir(&self, key: &str) -> Utf8PathBuf {
        self.entry_dir(key).join("files")
    }

    /// Non-blocking probe: hit / in-flight / miss
    pub fn probe(&self, key: &str) -> CacheProbe {
        if self.read_done(key).ok().flatten().is_some() {
            CacheProbe::Hit
        } else if self.entry_dir(key).join(".lock").exists() {
            CacheProbe::InFlight
        } else {
            CacheProbe::Miss
        }
    }

    /// Acquire a key: return cached outputs, or the exclusive claim.
    ///
    /// Awaits in-flight computations by other claimants; after their
    /// claim resolves the lookup is retried, so at most one execution
    /// per key happens across all schedulers sharing this root.
    pub async fn acquire(&self, key: &str) -> Result<CacheAcquire> {
        loop {
            if let Some(outputs) = self.read_done(key)? {
                trace!(key, "cache hit");
                return Ok(CacheAcquire::Hit(outputs));
            }

            let dir = self.entry_dir(key);
            fs::create_dir_all(&dir)?;
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(dir.join(".lock"))
            {
                Ok(_) => {
                    self.in_flight
                        .entry(key.to_string())
                        .or_insert_with(|| Arc::new(Notify::new()));
                    fs::write(dir.join("status"), "claimed\n")?;
                    debug!(key, "cache claim acquired");
                    return Ok(CacheAcquire::Claimed(CacheClaim {
                        key: key.to_string(),
                        dir,
                        in_flight: Arc::clone(&self.in_flight),
                        released: false,
                    }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    // Someone else computes this key. Await their signal
                    // when in-process, bounded re-poll otherwise.
                    let notify = self.in_flight.get(key).map(|n| Arc::clone(n.value()));
                    match notify {
                        Some(notify) => {
                            let _ = tokio::time::timeout(CLAIM_POLL_INTERVAL, notify.notified())
                                .await;
                        }
                        None => tokio::time::sleep(CLAIM_POLL_INTERVAL).await,
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Publish outputs under a held claim.
    ///
    /// File-typed outputs are copied into `<key>/files/` and their
    /// bindings rewritten to the stable cache paths, so cached entries
    /// survive scratch-directory cleanup. Returns the final bindings.
    pub fn publish(
        &self,
        mut claim: CacheClaim,
        record: &Value,
        outputs: &Bindings,
        task: &TaskDef,
    ) -> Result<Bindings> {
        let dir = claim.dir.clone();
        let mut published = outputs.clone();

        for field in &task.outputs {
            if !matches!(field.ty, TypeSpec::File(_)) {
                continue;
            }
            let Some(Value::String(path)) = outputs.get(&field.name) else {
                continue;
            };
            let files = self.files_dir(&claim.key);
            fs::create_dir_all(&files)?;
            let file_name = Utf8Path::new(path)
                .file_name()
                .unwrap_or(field.name.as_str());
            let dest = files.join(file_name);
            fs::copy(path, &dest)?;
            published.insert(field.name.clone(), Value::String(dest.to_string()));
        }

        fs::write(dir.join("inputs.json"), serde_json::to_vec_pretty(record)?)?;
        fs::write(
            dir.join("outputs.json"),
            serde_json::to_vec_pretty(&published)?,
        )?;
        fs::write(
            dir.join("status"),
            format!("done\n{}\n", chrono::Utc::now().to_rfc3339()),
        )?;
        debug!(key = claim.key(), "cache entry published");
        claim.release();
        Ok(published)
    }

    /// Release a claim after a failed execution.
    ///
    /// The failure is recorded but not negatively cached: the next
    /// claimant re-executes.
    pub fn release_failed(&self, mut claim: CacheClaim, error: &str) -> Result<()> {
        fs::write(
            claim.dir.join("status"),
            format!("failed\n{}\n{error}\n", chrono::Utc::now().to_rfc3339()),
        )?;
        debug!(key = claim.key(), "cache claim released after failure");
        claim.release();
        Ok(())
    }

    /// Drop one cache entry
    pub fn purge(&self, key: &str) -> Result<()> {
        let dir = self.entry_dir(key);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Drop every cache entry under the root
    pub fn purge_all(&self) -> Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }

    fn read_done(&self, key: &str) -> Result<Option<Bindings>> {
        let dir = self.entry_dir(key);
        let status_path = dir.join("status");
        if !status_path.exists() {
            return Ok(None);
        }
        let status = fs::read_to_string(&status_path)?;
        if status.lines().next() != Some("done") {
            return Ok(None);
        }
        let outputs_path = dir.join("outputs.json");
        let bytes = fs::read(&outputs_path).map_err(|e| BraidError::CacheCorruption {
            key: key.to_string(),
            reason: format!("status is done but outputs.json unreadable: {e}"),
        })?;
        let outputs: Bindings =
            serde_json::from_slice(&bytes).map_err(|e| BraidError::CacheCorruption {
                key: key.to_string(),
                reason: format!("outputs.json is not valid bindings: {e}"),
            })?;
        Ok(Some(outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_cache() -> (tempfile::TempDir, ExecutionCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ExecutionCache::new(Utf8Path::new(dir.path().to_str().unwrap())).unwrap();
        (dir, cache)
    }

    fn sample_task() -> TaskDef {
        TaskDef::function("t", |_| Ok(Bindings::new()))
    }

    fn sample_outputs() -> Bindings {
        let mut outputs = Bindings::new();
        outputs.insert("out".into(), json!(15));
        outputs
    }

    #[tokio::test]
    async fn miss_then_hit_round_trip() {
        let (_dir, cache) = test_cache();
        let key = sha256_hex(b"round-trip");

        assert_eq!(cache.probe(&key), CacheProbe::Miss);
        let claim = match cache.acquire(&key).await.unwrap() {
            CacheAcquire::Claimed(claim) => claim,
            CacheAcquire::Hit(_) => panic!("expected claim on empty cache"),
        };
        assert_eq!(cache.probe(&key), CacheProbe::InFlight);

        cache
            .publish(claim, &json!({"task": "t"}), &sample_outputs(), &sample_task())
            .unwrap();
        assert_eq!(cache.probe(&key), CacheProbe::Hit);

        match cache.acquire(&key).await.unwrap() {
            CacheAcquire::Hit(outputs) => assert_eq!(outputs["out"], json!(15)),
            CacheAcquire::Claimed(_) => panic!("expected hit after publish"),
        }
    }

    #[tokio::test]
    async fn failed_release_allows_reexecution() {
        let (_dir, cache) = test_cache();
        let key = sha256_hex(b"failed-entry");

        let claim = match cache.acquire(&key).await.unwrap() {
            CacheAcquire::Claimed(claim) => claim,
            CacheAcquire::Hit(_) => unreachable!(),
        };
        cache.release_failed(claim, "worker exploded").unwrap();

        // No negative caching: the next claimant re-executes
        match cache.acquire(&key).await.unwrap() {
            CacheAcquire::Claimed(claim) => {
                cache
                    .publish(claim, &json!({}), &sample_outputs(), &sample_task())
                    .unwrap();
            }
            CacheAcquire::Hit(_) => panic!("failed entry must not hit"),
        }
        assert_eq!(cache.probe(&key), CacheProbe::Hit);
    }

    #[tokio::test]
    async fn dropped_claim_releases_lock() {
        let (_dir, cache) = test_cache();
        let key = sha256_hex(b"dropped-claim");

        {
            let _claim = match cache.acquire(&key).await.unwrap() {
                CacheAcquire::Claimed(claim) => claim,
                CacheAcquire::Hit(_) => unreachable!(),
            };
        }
        // Lock released on drop; a new claim succeeds immediately
        match cache.acquire(&key).await.unwrap() {
            CacheAcquire::Claimed(_) => {}
            CacheAcquire::Hit(_) => panic!("unpublished drop must not produce a hit"),
        }
    }

    #[tokio::test]
    async fn concurrent_claimants_execute_once() {
        let (_dir, cache) = test_cache();
        let key = sha256_hex(b"at-most-once");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                match cache.acquire(&key).await.unwrap() {
                    CacheAcquire::Claimed(claim) => {
                        // Simulate work while holding the claim
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        cache
                            .publish(claim, &json!({}), &sample_outputs(), &sample_task())
                            .unwrap();
                        true
                    }
                    CacheAcquire::Hit(outputs) => {
                        assert_eq!(outputs["out"], json!(15));
                        false
                    }
                }
            }));
        }

        let mut executions = 0;
        for handle in handles {
            if handle.await.unwrap() {
                executions += 1;
            }
        }
        assert_eq!(executions, 1, "exactly one claimant executes");
    }

    #[tokio::test]
    async fn purge_removes_entry() {
        let (_dir, cache) = test_cache();
        let key = sha256_hex(b"purge-me");

        let claim = match cache.acquire(&key).await.unwrap() {
            CacheAcquire::Claimed(claim) => claim,
            CacheAcquire::Hit(_) => unreachable!(),
        };
        cache
            .publish(claim, &json!({}), &sample_outputs(), &sample_task())
            .unwrap();
        assert_eq!(cache.probe(&key), CacheProbe::Hit);

        cache.purge(&key).unwrap();
        assert_eq!(cache.probe(&key), CacheProbe::Miss);
    }

    #[tokio::test]
    async fn file_outputs_copied_into_cache() {
        use crate::task::FieldSpec;

        let (_dir, cache) = test_cache();
        let scratch = tempfile::tempdir().unwrap();
        let produced = scratch.path().join("result.txt");
        std::fs::write(&produced, b"file body").unwrap();

        let task = TaskDef::function("t", |_| Ok(Bindings::new()))
            .with_output(FieldSpec::out("result", TypeSpec::file("file")));
        let mut outputs = Bindings::new();
        outputs.insert("result".into(), json!(produced.to_str().unwrap()));

        let key = sha256_hex(b"file-output");
        let claim = match cache.acquire(&key).await.unwrap() {
            CacheAcquire::Claimed(claim) => claim,
            CacheAcquire::Hit(_) => unreachable!(),
        };
        let published = cache.publish(claim, &json!({}), &outputs, &task).unwrap();

        let cached_path = published["result"].as_str().unwrap().to_string();
        assert!(cached_path.contains("files"));
        assert_eq!(std::fs::read(&cached_path).unwrap(), b"file body");

        // The hit returns the rewritten path even after scratch cleanup
        drop(scratch);
        match cache.acquire(&key).await.unwrap() {
            CacheAcquire::Hit(outputs) => {
                assert_eq!(outputs["result"].as_str().unwrap(), cached_path)
            }
            CacheAcquire::Claimed(_) => panic!("expected hit"),
        }
    }
}
