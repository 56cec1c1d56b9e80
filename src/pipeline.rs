//! Pipeline driver: export ids -> fetch -> normalize -> archive.
//!
//! Fetch and normalize run on a rayon pool one batch at a time; results are
//! consumed in source order on the calling thread, which is the only owner of
//! the [`ArchiveWriter`]. Record order therefore matches the export order no
//! matter how many workers are used.

use crate::archive::{ArchiveError, ArchiveSink, ArchiveSummary, ArchiveWriter};
use crate::checkpoint::CheckpointManager;
use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_WORKERS, PROGRESS_INTERVAL, RECENT_FAILURES_CAPACITY};
use crate::fetch::{FetchError, FetchService};
use crate::models::{EntityType, Entry, EntryId};
use crate::normalize::{normalize, NormalizeError};
use crate::ring::BoundedQueue;
use crate::source::{count_ids, ExportSource, SourceError};
use crate::stats::PipelineStats;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Downloading,
    Extracting,
    Processing,
    Closing,
    Done,
    Failed,
}

impl PipelineState {
    fn can_move_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Downloading)
                | (Downloading, Extracting)
                | (Extracting, Processing)
                | (Idle, Processing)
                | (Processing, Closing)
                | (Closing, Done)
        ) || (next == Failed && self != Done)
    }
}

/// What happens when fetching or normalizing one identifier fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first failure; everything appended so far is flushed and closed.
    #[default]
    Halt,
    /// Log, count and continue with the next identifier.
    Skip,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub progress_interval: u64,
    pub batch_size: usize,
    pub workers: usize,
    pub failure_policy: FailurePolicy,
    /// Maximum number of identifiers to process in this run.
    pub limit: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            progress_interval: PROGRESS_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            failure_policy: FailurePolicy::Halt,
            limit: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("Failed to fetch {id}: {source}")]
    Fetch {
        id: EntryId,
        #[source]
        source: FetchError,
    },
    #[error("Failed to normalize {id}: {source}")]
    Normalize {
        id: EntryId,
        #[source]
        source: NormalizeError,
    },
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),
    #[error("Invalid pipeline transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub processed: u64,
    pub total: u64,
    pub elapsed: Duration,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 / self.total as f64 * 100.0
    }
}

/// Observer of a run. Nothing it does can influence the archive.
pub trait ProgressSink {
    fn state_changed(&self, _state: PipelineState) {}
    fn progress(&self, progress: &Progress);
    fn finish(&self) {}
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&self, _progress: &Progress) {}
}

/// Reports through `tracing` at INFO level.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn state_changed(&self, state: PipelineState) {
        debug!(state = ?state, "Pipeline state changed");
    }

    fn progress(&self, p: &Progress) {
        info!(
            processed = p.processed,
            total = p.total,
            "{}/{} ({:.3}%) - elapsed: {:.1?}",
            p.processed,
            p.total,
            p.percent(),
            p.elapsed
        );
    }
}

/// Terminal progress bar.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} ({percent}%) {msg}",
        ) {
            bar.set_style(style);
        }
        Self { bar }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn state_changed(&self, state: PipelineState) {
        self.bar.set_message(format!("{state:?}"));
    }

    fn progress(&self, p: &Progress) {
        self.bar.set_length(p.total);
        self.bar.set_position(p.processed);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[derive(Debug, Clone)]
pub struct FailedId {
    pub id: EntryId,
    pub reason: String,
}

#[derive(Debug)]
pub struct RunSummary {
    pub stats: PipelineStats,
    pub archive: ArchiveSummary,
    /// Most recent skipped identifiers, oldest first.
    pub recent_failures: Vec<FailedId>,
    /// Source position after the last consumed identifier.
    pub position: u64,
    pub elapsed: Duration,
}

fn resolve<F: FetchService + ?Sized>(
    fetcher: &F,
    entity_type: EntityType,
    id: u64,
) -> Result<Entry, PipelineError> {
    let requested = EntryId::new(entity_type, id);
    let raw = fetcher
        .fetch(entity_type, id)
        .map_err(|source| PipelineError::Fetch {
            id: requested,
            source,
        })?;
    normalize(raw).map_err(|source| PipelineError::Normalize {
        id: requested,
        source,
    })
}

pub struct Pipeline<'a, F: FetchService + ?Sized> {
    fetcher: &'a F,
    sink: &'a dyn ProgressSink,
    config: PipelineConfig,
    state: PipelineState,
    stats: PipelineStats,
    failures: BoundedQueue<FailedId>,
}

impl<'a, F: FetchService + ?Sized> Pipeline<'a, F> {
    pub fn new(fetcher: &'a F, sink: &'a dyn ProgressSink, config: PipelineConfig) -> Self {
        Self {
            fetcher,
            sink,
            config,
            state: PipelineState::Idle,
            stats: PipelineStats::new(),
            failures: BoundedQueue::new(RECENT_FAILURES_CAPACITY),
        }
    }

    /// Continues counting from earlier totals (resume).
    pub fn with_stats(mut self, stats: PipelineStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    fn transition(&mut self, next: PipelineState) -> Result<(), PipelineError> {
        if !self.state.can_move_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = ?self.state, to = ?next, "Pipeline transition");
        self.state = next;
        self.sink.state_changed(next);
        Ok(())
    }

    /// Full run over a local export file. `start_position` identifiers are
    /// skipped (resume).
    pub fn run_export<S: ArchiveSink>(
        mut self,
        export_path: &Path,
        entity_type: EntityType,
        writer: ArchiveWriter<S>,
        checkpoint: Option<&CheckpointManager>,
        start_position: u64,
    ) -> Result<RunSummary, PipelineError> {
        // The export is fetched by the surrounding tooling; here it only has to exist.
        self.transition(PipelineState::Downloading)?;
        if let Err(e) = std::fs::metadata(export_path) {
            return Err(self.abort(writer, SourceError::Io(e).into()));
        }
        info!(path = ?export_path, kind = %entity_type, "Export located");

        self.transition(PipelineState::Extracting)?;
        let total = match count_ids(export_path) {
            Ok(total) => total,
            Err(e) => return Err(self.abort(writer, e.into())),
        };
        let source = match ExportSource::open(export_path, entity_type) {
            Ok(source) => source,
            Err(e) => return Err(self.abort(writer, e.into())),
        };
        info!(total, start_position, "Export opened");

        let skip = usize::try_from(start_position).unwrap_or(usize::MAX);
        self.process(source.skip(skip), total, writer, checkpoint, start_position)
    }

    /// Runs over any identifier sequence, starting from `Idle`.
    pub fn run<I, S>(
        mut self,
        ids: I,
        total: u64,
        writer: ArchiveWriter<S>,
    ) -> Result<RunSummary, PipelineError>
    where
        I: IntoIterator<Item = Result<(EntityType, u64), SourceError>>,
        S: ArchiveSink,
    {
        self.process(ids, total, writer, None, 0)
    }

    fn process<I, S>(
        &mut self,
        ids: I,
        total: u64,
        mut writer: ArchiveWriter<S>,
        checkpoint: Option<&CheckpointManager>,
        start_position: u64,
    ) -> Result<RunSummary, PipelineError>
    where
        I: IntoIterator<Item = Result<(EntityType, u64), SourceError>>,
        S: ArchiveSink,
    {
        self.transition(PipelineState::Processing)?;

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .thread_name(|i| format!("arachne-fetch-{i}"))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => return Err(self.abort(writer, PipelineError::ThreadPool(e.to_string()))),
        };

        let started = Instant::now();
        let batch_size = self.config.batch_size.max(1);
        let mut ids = ids.into_iter();
        let mut position = start_position;
        let mut taken = 0u64;
        let mut batch: Vec<(EntityType, u64)> = Vec::with_capacity(batch_size);
        let mut exhausted = false;

        while !exhausted {
            batch.clear();
            while batch.len() < batch_size {
                if self.config.limit.is_some_and(|limit| taken >= limit) {
                    exhausted = true;
                    break;
                }
                match ids.next() {
                    Some(Ok(pair)) => {
                        batch.push(pair);
                        taken += 1;
                    }
                    Some(Err(e)) => return Err(self.abort(writer, e.into())),
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            if batch.is_empty() {
                break;
            }

            let fetcher = self.fetcher;
            let results: Vec<Result<Entry, PipelineError>> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|&(entity_type, id)| resolve(fetcher, entity_type, id))
                    .collect()
            });

            for result in results {
                position += 1;
                self.stats.inc_processed();

                match result {
                    Ok(entry) => {
                        if let Err(e) = self.write_entry(&mut writer, &entry) {
                            return Err(self.abort(writer, e.into()));
                        }
                    }
                    Err(e) => {
                        if let Err(e) = self.handle_failure(e) {
                            return Err(self.abort(writer, e));
                        }
                    }
                }

                self.report(total, started);

                if let Some(cp) = checkpoint {
                    if cp.tick() {
                        if let Err(e) = writer.flush() {
                            return Err(self.abort(writer, e.into()));
                        }
                        if let Err(e) = cp.save(position, writer.commit_point(), &self.stats) {
                            warn!(error = %e, "Failed to save checkpoint");
                        }
                    }
                }
            }
        }

        self.transition(PipelineState::Closing)?;
        let archive = match writer.close() {
            Ok(archive) => archive,
            Err(e) => {
                warn!(error = %e, "Archive could not be closed");
                self.fail();
                return Err(e.into());
            }
        };
        self.transition(PipelineState::Done)?;
        self.sink.progress(&Progress {
            processed: self.stats.processed(),
            total,
            elapsed: started.elapsed(),
        });
        self.sink.finish();

        info!(
            processed = self.stats.processed(),
            written = self.stats.written(),
            empty = self.stats.empty(),
            failures = self.stats.failures(),
            "Pipeline done"
        );

        let failures = std::mem::replace(&mut self.failures, BoundedQueue::new(0));
        Ok(RunSummary {
            stats: std::mem::take(&mut self.stats),
            archive,
            recent_failures: failures.into_vec(),
            position,
            elapsed: started.elapsed(),
        })
    }

    fn write_entry<S: ArchiveSink>(
        &self,
        writer: &mut ArchiveWriter<S>,
        entry: &Entry,
    ) -> Result<(), ArchiveError> {
        if entry.connections.is_empty() {
            debug!(entry = %entry.id, "No connections, skipping");
            self.stats.inc_empty();
            return Ok(());
        }

        for connection in &entry.connections {
            debug!(
                entry = %entry.id,
                label = connection.label.as_str(),
                connected = %connection.connected_id,
                "Connection"
            );
        }

        writer.append(&entry.id, &entry.connections)?;
        self.stats.inc_written();
        self.stats.add_connections(entry.connections.len() as u64);
        Ok(())
    }

    /// Applies the failure policy; `Err` means the run must stop.
    fn handle_failure(&mut self, error: PipelineError) -> Result<(), PipelineError> {
        let id = match &error {
            PipelineError::Fetch { id, .. } => {
                self.stats.inc_fetch_failures();
                Some(*id)
            }
            PipelineError::Normalize { id, .. } => {
                self.stats.inc_normalize_failures();
                Some(*id)
            }
            _ => None,
        };
        let Some(id) = id else {
            return Err(error);
        };

        match self.config.failure_policy {
            FailurePolicy::Halt => Err(error),
            FailurePolicy::Skip => {
                warn!(id = %id, error = %error, "Skipping identifier");
                self.failures.push(FailedId {
                    id,
                    reason: error.to_string(),
                });
                Ok(())
            }
        }
    }

    fn report(&self, total: u64, started: Instant) {
        let processed = self.stats.processed();
        let interval = self.config.progress_interval;
        if interval > 0 && processed % interval == 0 {
            self.sink.progress(&Progress {
                processed,
                total,
                elapsed: started.elapsed(),
            });
        }
    }

    /// Closes whatever was written so far and moves to `Failed`.
    fn abort<S: ArchiveSink>(&mut self, writer: ArchiveWriter<S>, error: PipelineError) -> PipelineError {
        match writer.close() {
            Ok(summary) => info!(
                records = summary.records,
                bytes = summary.bytes,
                "Archive closed after failure"
            ),
            Err(e) => warn!(error = %e, "Archive could not be closed cleanly"),
        }
        self.fail();
        error
    }

    fn fail(&mut self) {
        self.state = PipelineState::Failed;
        self.sink.state_changed(PipelineState::Failed);
        self.sink.finish();
    }
}
