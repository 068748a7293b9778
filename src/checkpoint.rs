use crate::config::CHECKPOINT_VERSION;
use crate::stats::ExtractionStats;
use anyhow::{Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Clone, Default)]
pub struct CheckpointStats {
    pub pages_processed: u64,
    pub sections_skipped: u64,
    pub links_resolved: u64,
    pub links_stored: u64,
    pub unresolvable_links: u64,
    pub spans_not_found: u64,
    pub span_mismatches: u64,
}

/// Progress of one extraction worker over its claimed page-id range.
#[derive(Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub database: String,
    pub language: String,
    pub end_at: Option<i64>,
    pub last_processed_id: i64,
    pub stats: CheckpointStats,
}

/// Identifies the run a checkpoint belongs to; a checkpoint from another run is ignored.
#[derive(Clone, Debug)]
pub struct RunKey {
    pub database: String,
    pub language: String,
    pub end_at: Option<i64>,
}

pub fn checkpoint_path(state_dir: &str) -> PathBuf {
    Path::new(state_dir).join("checkpoint.bin")
}

pub fn load_if_valid(state_dir: &str, key: &RunKey) -> Result<Option<Checkpoint>> {
    let path = checkpoint_path(state_dir);

    if !path.exists() {
        return Ok(None);
    }

    let file_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

    let file = File::open(&path).context("Failed to open checkpoint file")?;
    let reader = BufReader::new(file);

    let options = bincode::options().with_limit(file_size.saturating_add(1024));

    let checkpoint: Checkpoint = match options.deserialize_from(reader) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Checkpoint file is corrupt or unreadable");
            return Ok(None);
        }
    };

    if checkpoint.version != CHECKPOINT_VERSION {
        info!(
            cached = checkpoint.version,
            current = CHECKPOINT_VERSION,
            "Checkpoint version mismatch"
        );
        return Ok(None);
    }

    if checkpoint.database != key.database {
        info!(
            cached = checkpoint.database,
            current = key.database,
            "Checkpoint database mismatch"
        );
        return Ok(None);
    }

    if checkpoint.language != key.language {
        info!(
            cached = checkpoint.language,
            current = key.language,
            "Checkpoint language mismatch"
        );
        return Ok(None);
    }

    if checkpoint.end_at != key.end_at {
        info!(
            cached = ?checkpoint.end_at,
            current = ?key.end_at,
            "Checkpoint page range mismatch"
        );
        return Ok(None);
    }

    info!(
        last_id = checkpoint.last_processed_id,
        pages = checkpoint.stats.pages_processed,
        "Loaded valid checkpoint"
    );

    Ok(Some(checkpoint))
}

pub fn clear(state_dir: &str) -> Result<()> {
    let path = checkpoint_path(state_dir);
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove checkpoint file: {:?}", path))?;
        info!("Checkpoint cleared");
    }
    Ok(())
}

pub struct CheckpointManager {
    checkpoint_path: PathBuf,
    state_dir: String,
    key: RunKey,
    interval: u32,
    last_saved_id: AtomicI64,
    chunks_since_save: AtomicU32,
}

impl CheckpointManager {
    pub fn new(state_dir: &str, key: RunKey, interval: u32) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state directory: {}", state_dir))?;
        Ok(Self {
            checkpoint_path: checkpoint_path(state_dir),
            state_dir: state_dir.to_string(),
            key,
            interval: interval.max(1),
            last_saved_id: AtomicI64::new(0),
            chunks_since_save: AtomicU32::new(0),
        })
    }

    pub fn set_last_id(&self, id: i64) {
        self.last_saved_id.store(id, Ordering::Relaxed);
    }

    pub fn last_saved_id(&self) -> i64 {
        self.last_saved_id.load(Ordering::Relaxed)
    }

    /// Saves once every `interval` chunks.
    pub fn maybe_save(&self, page_id: i64, stats: &ExtractionStats) -> Result<bool> {
        let count = self.chunks_since_save.fetch_add(1, Ordering::Relaxed) + 1;
        if count < self.interval {
            return Ok(false);
        }

        self.save(page_id, stats)?;
        self.chunks_since_save.store(0, Ordering::Relaxed);
        Ok(true)
    }

    pub fn save(&self, page_id: i64, stats: &ExtractionStats) -> Result<()> {
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            database: self.key.database.clone(),
            language: self.key.language.clone(),
            end_at: self.key.end_at,
            last_processed_id: page_id,
            stats: stats.to_checkpoint(),
        };

        let tmp_path = self.checkpoint_path.with_extension("bin.tmp");
        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create temp checkpoint file: {:?}", tmp_path))?;
        let writer = BufWriter::new(file);

        bincode::DefaultOptions::new()
            .serialize_into(writer, &checkpoint)
            .context("Failed to serialize checkpoint")?;

        fs::rename(&tmp_path, &self.checkpoint_path).with_context(|| {
            format!(
                "Failed to rename temp checkpoint: {:?}",
                self.checkpoint_path
            )
        })?;

        self.last_saved_id.store(page_id, Ordering::Relaxed);

        debug!(page_id = page_id, pages = stats.pages(), "Checkpoint saved");

        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        clear(&self.state_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn key() -> RunKey {
        RunKey {
            database: "wiki.sqlite".to_string(),
            language: "en".to_string(),
            end_at: None,
        }
    }

    #[test]
    fn checkpoint_path_returns_correct_path() {
        let path = checkpoint_path("/state/dir");
        assert_eq!(path, PathBuf::from("/state/dir/checkpoint.bin"));
    }

    #[test]
    fn load_if_valid_returns_none_when_no_checkpoint() {
        let dir = TempDir::new().unwrap();
        let result = load_if_valid(dir.path().to_str().unwrap(), &key()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn save_and_load() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().to_str().unwrap();
        let manager = CheckpointManager::new(state_dir, key(), 5).unwrap();

        let stats = ExtractionStats::new();
        stats.inc_pages();
        stats.inc_pages();
        stats.add_stored(9);

        manager.save(42, &stats).unwrap();
        assert_eq!(manager.last_saved_id(), 42);

        let loaded = load_if_valid(state_dir, &key()).unwrap().unwrap();
        assert_eq!(loaded.last_processed_id, 42);
        assert_eq!(loaded.stats.pages_processed, 2);
        assert_eq!(loaded.stats.links_stored, 9);
    }

    #[test]
    fn invalidated_by_language_change() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().to_str().unwrap();
        let manager = CheckpointManager::new(state_dir, key(), 5).unwrap();
        manager.save(42, &ExtractionStats::new()).unwrap();

        let other = RunKey {
            language: "de".to_string(),
            ..key()
        };
        assert!(load_if_valid(state_dir, &other).unwrap().is_none());
    }

    #[test]
    fn invalidated_by_range_change() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().to_str().unwrap();
        let manager = CheckpointManager::new(state_dir, key(), 5).unwrap();
        manager.save(42, &ExtractionStats::new()).unwrap();

        let other = RunKey {
            end_at: Some(1000),
            ..key()
        };
        assert!(load_if_valid(state_dir, &other).unwrap().is_none());
    }

    #[test]
    fn clear_removes_checkpoint() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().to_str().unwrap();
        let manager = CheckpointManager::new(state_dir, key(), 5).unwrap();
        manager.save(42, &ExtractionStats::new()).unwrap();

        assert!(checkpoint_path(state_dir).exists());
        manager.clear().unwrap();
        assert!(!checkpoint_path(state_dir).exists());
        assert!(clear(state_dir).is_ok());
    }

    #[test]
    fn maybe_save_respects_interval() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path().to_str().unwrap(), key(), 3).unwrap();
        let stats = ExtractionStats::new();

        assert!(!manager.maybe_save(1, &stats).unwrap());
        assert!(!manager.maybe_save(2, &stats).unwrap());
        assert!(manager.maybe_save(3, &stats).unwrap());

        // Counter resets
        assert!(!manager.maybe_save(4, &stats).unwrap());
        assert!(!manager.maybe_save(5, &stats).unwrap());
        assert!(manager.maybe_save(6, &stats).unwrap());
    }

    #[test]
    fn corrupt_checkpoint_returns_none() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().to_str().unwrap();
        let mut file = File::create(checkpoint_path(state_dir)).unwrap();
        file.write_all(b"not valid bincode").unwrap();

        assert!(load_if_valid(state_dir, &key()).unwrap().is_none());
    }
}
