//! Milestone ledger — which run has passed which checkpoint.
//!
//! Each pipeline (keyed by release id) has a monotonically increasing run
//! ordinal and, per checkpoint, the highest ordinal that has passed it.
//! A run that sees a higher ordinal at a checkpoint it is waiting at has
//! been superseded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tracing::debug;

use crate::error::GateResult;

/// Ordered checkpoints around the operator decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    /// Passed just before blocking on the operator.
    Entry,
    /// Passed right after approval.
    Approved,
}

#[async_trait]
pub trait MilestoneLedger: Send + Sync {
    /// Allocate the next run ordinal for `pipeline`, starting at 1.
    async fn next_ordinal(&self, pipeline: &str) -> GateResult<u64>;

    /// Record that run `ordinal` passed `checkpoint`.
    ///
    /// Returns the highest ordinal that has passed it, this run included.
    async fn pass(&self, pipeline: &str, checkpoint: Checkpoint, ordinal: u64) -> GateResult<u64>;

    /// Highest ordinal that has passed `checkpoint`, or 0.
    async fn highest(&self, pipeline: &str, checkpoint: Checkpoint) -> GateResult<u64>;

    /// Resolves with the newer ordinal once a run newer than `ordinal`
    /// passes `checkpoint`. Never resolves otherwise.
    async fn superseded(&self, pipeline: &str, checkpoint: Checkpoint, ordinal: u64) -> GateResult<u64>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PipelineMarks {
    last_ordinal: u64,
    #[serde(default)]
    passed: BTreeMap<Checkpoint, u64>,
}

impl PipelineMarks {
    fn highest(&self, checkpoint: Checkpoint) -> u64 {
        self.passed.get(&checkpoint).copied().unwrap_or(0)
    }

    fn pass(&mut self, checkpoint: Checkpoint, ordinal: u64) -> u64 {
        let entry = self.passed.entry(checkpoint).or_insert(0);
        *entry = (*entry).max(ordinal);
        self.last_ordinal = self.last_ordinal.max(ordinal);
        *entry
    }

    fn next_ordinal(&mut self) -> u64 {
        self.last_ordinal += 1;
        self.last_ordinal
    }
}

/// Process-local ledger. Runs sharing one instance observe each other
/// immediately.
pub struct MemoryLedger {
    marks: Mutex<BTreeMap<String, PipelineMarks>>,
    changed: watch::Sender<u64>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            marks: Mutex::new(BTreeMap::new()),
            changed,
        }
    }
}

#[async_trait]
impl MilestoneLedger for MemoryLedger {
    async fn next_ordinal(&self, pipeline: &str) -> GateResult<u64> {
        let mut marks = self.marks.lock().await;
        Ok(marks.entry(pipeline.to_string()).or_default().next_ordinal())
    }

    async fn pass(&self, pipeline: &str, checkpoint: Checkpoint, ordinal: u64) -> GateResult<u64> {
        let highest = {
            let mut marks = self.marks.lock().await;
            marks.entry(pipeline.to_string()).or_default().pass(checkpoint, ordinal)
        };
        self.changed.send_modify(|version| *version += 1);
        debug!(%pipeline, ?checkpoint, ordinal, highest, "checkpoint passed");
        Ok(highest)
    }

    async fn highest(&self, pipeline: &str, checkpoint: Checkpoint) -> GateResult<u64> {
        let marks = self.marks.lock().await;
        Ok(marks.get(pipeline).map(|m| m.highest(checkpoint)).unwrap_or(0))
    }

    async fn superseded(&self, pipeline: &str, checkpoint: Checkpoint, ordinal: u64) -> GateResult<u64> {
        // Subscribe before the first read so no pass can slip in between.
        let mut rx = self.changed.subscribe();
        loop {
            let highest = self.highest(pipeline, checkpoint).await?;
            if highest > ordinal {
                return Ok(highest);
            }
            if rx.changed().await.is_err() {
                // The sender lives as long as `self`; unreachable in practice.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Ledger persisted as a JSON file, shared by separate `ladder` processes
/// on the same host or volume.
///
/// Writes go to a temporary file that is renamed into place, so readers
/// never see a partial document. Waiters poll at `poll_interval`.
pub struct FileLedger {
    path: PathBuf,
    poll_interval: Duration,
    write_lock: Mutex<()>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    pipelines: BTreeMap<String, PipelineMarks>,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_secs(2),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> GateResult<LedgerFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(LedgerFile::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LedgerFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, file: &LedgerFile) -> GateResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension(format!("tmp.{}", std::process::id()));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(file)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn update<T>(&self, pipeline: &str, f: impl FnOnce(&mut PipelineMarks) -> T) -> GateResult<T> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await?;
        let out = f(file.pipelines.entry(pipeline.to_string()).or_default());
        self.store(&file).await?;
        Ok(out)
    }
}

#[async_trait]
impl MilestoneLedger for FileLedger {
    async fn next_ordinal(&self, pipeline: &str) -> GateResult<u64> {
        self.update(pipeline, PipelineMarks::next_ordinal).await
    }

    async fn pass(&self, pipeline: &str, checkpoint: Checkpoint, ordinal: u64) -> GateResult<u64> {
        let highest = self.update(pipeline, |m| m.pass(checkpoint, ordinal)).await?;
        debug!(%pipeline, ?checkpoint, ordinal, highest, path = %self.path.display(), "checkpoint passed");
        Ok(highest)
    }

    async fn highest(&self, pipeline: &str, checkpoint: Checkpoint) -> GateResult<u64> {
        let file = self.load().await?;
        Ok(file.pipelines.get(pipeline).map(|m| m.highest(checkpoint)).unwrap_or(0))
    }

    async fn superseded(&self, pipeline: &str, checkpoint: Checkpoint, ordinal: u64) -> GateResult<u64> {
        loop {
            let highest = self.highest(pipeline, checkpoint).await?;
            if highest > ordinal {
                return Ok(highest);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
