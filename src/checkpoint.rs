use crate::archive::{ArchiveWriter, CommitPoint};
use crate::config::CHECKPOINT_VERSION;
use crate::stats::PipelineStats;
use anyhow::{Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Clone, Default, Debug)]
pub struct CheckpointStats {
    pub ids_processed: u64,
    pub entries_written: u64,
    pub entries_empty: u64,
    pub connections_written: u64,
    pub fetch_failures: u64,
    pub normalize_failures: u64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Checkpoint {
    pub version: u32,
    pub input_path: String,
    pub input_mtime: u64,
    pub archive_path: String,
    /// Identifiers consumed from the export, failures included.
    pub position: u64,
    /// Archive position after the last flushed record.
    pub archive: CommitPoint,
    pub stats: CheckpointStats,
}

/// The checkpoint lives next to the archive: `graph.arkv` -> `graph.arkv.checkpoint`.
pub fn checkpoint_path(archive_path: &str) -> PathBuf {
    let mut path = PathBuf::from(archive_path).into_os_string();
    path.push(".checkpoint");
    PathBuf::from(path)
}

fn get_input_mtime(input_path: &str) -> Result<u64> {
    let metadata = fs::metadata(input_path)
        .with_context(|| format!("Failed to get metadata for: {}", input_path))?;
    let mtime = metadata
        .modified()
        .context("Failed to get modification time")?
        .duration_since(SystemTime::UNIX_EPOCH)
        .context("Invalid modification time")?
        .as_secs();
    Ok(mtime)
}

pub fn load_if_valid(input_path: &str, archive_path: &str) -> Result<Option<Checkpoint>> {
    let path = checkpoint_path(archive_path);

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

    if checkpoint.input_path != input_path {
        info!(
            cached = checkpoint.input_path,
            current = input_path,
            "Checkpoint input path mismatch"
        );
        return Ok(None);
    }

    let current_mtime = get_input_mtime(input_path)?;
    if checkpoint.input_mtime != current_mtime {
        info!(
            cached_mtime = checkpoint.input_mtime,
            current_mtime = current_mtime,
            "Input file has changed since checkpoint was created"
        );
        return Ok(None);
    }

    if checkpoint.archive_path != archive_path {
        info!(
            cached = checkpoint.archive_path,
            current = archive_path,
            "Checkpoint archive path mismatch"
        );
        return Ok(None);
    }

    let archive_len = fs::metadata(archive_path).map(|m| m.len()).unwrap_or(0);
    if archive_len < checkpoint.archive.len {
        info!(
            expected = checkpoint.archive.len,
            actual = archive_len,
            "Archive is shorter than the checkpoint"
        );
        return Ok(None);
    }

    info!(
        position = checkpoint.position,
        entries = checkpoint.stats.entries_written,
        "Loaded valid checkpoint"
    );

    Ok(Some(checkpoint))
}

pub fn clear(archive_path: &str) -> Result<()> {
    let path = checkpoint_path(archive_path);
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove checkpoint file: {:?}", path))?;
        info!("Checkpoint cleared");
    }
    Ok(())
}

/// Opens the archive for a run. With `resume` and a valid checkpoint the archive is
/// reopened at the checkpoint's commit point; a checkpoint that does not match the
/// archive's contents is an error and leaves the archive untouched. Otherwise any
/// checkpoint left by an earlier run is removed and the archive is created fresh.
pub fn open_archive(
    input_path: &str,
    archive_path: &str,
    resume: bool,
) -> Result<(ArchiveWriter, Option<Checkpoint>)> {
    if resume {
        if let Some(checkpoint) = load_if_valid(input_path, archive_path)? {
            let writer = ArchiveWriter::resume(archive_path, checkpoint.archive).with_context(|| {
                format!(
                    "Checkpoint does not match archive {}; start a fresh run instead",
                    archive_path
                )
            })?;
            return Ok((writer, Some(checkpoint)));
        }
        info!("No valid checkpoint found, starting fresh");
    }

    clear(archive_path)?;
    let writer = ArchiveWriter::create(archive_path)
        .with_context(|| format!("Failed to create archive: {}", archive_path))?;
    Ok((writer, None))
}

pub struct CheckpointManager {
    checkpoint_path: PathBuf,
    input_path: String,
    input_mtime: u64,
    archive_path: String,
    interval: u32,
    ids_since_save: AtomicU32,
}

impl CheckpointManager {
    pub fn new(input_path: &str, archive_path: &str, interval: u32) -> Result<Self> {
        let input_mtime = get_input_mtime(input_path)?;
        Ok(Self {
            checkpoint_path: checkpoint_path(archive_path),
            input_path: input_path.to_string(),
            input_mtime,
            archive_path: archive_path.to_string(),
            interval,
            ids_since_save: AtomicU32::new(0),
        })
    }

    /// Counts one processed id; true once `interval` ids have gone by since the last save.
    /// The caller flushes the archive and then calls [`save`](Self::save).
    pub fn tick(&self) -> bool {
        let count = self.ids_since_save.fetch_add(1, Ordering::Relaxed) + 1;
        self.interval > 0 && count >= self.interval
    }

    pub fn save(&self, position: u64, archive: CommitPoint, stats: &PipelineStats) -> Result<()> {
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            input_path: self.input_path.clone(),
            input_mtime: self.input_mtime,
            archive_path: self.archive_path.clone(),
            position,
            archive,
            stats: stats.to_checkpoint(),
        };

        if let Some(parent) = self.checkpoint_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let tmp_path = self.checkpoint_path.with_extension("checkpoint.tmp");
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

        self.ids_since_save.store(0, Ordering::Relaxed);

        debug!(
            position = position,
            archive_len = archive.len,
            entries = stats.written(),
            "Checkpoint saved"
        );

        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        clear(&self.archive_path)
    }
}
