/// Progress report cadence (report every N processed identifiers)
pub const PROGRESS_INTERVAL: u64 = 25;

/// Identifiers pulled from the source per fetch/normalize batch
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Worker threads used to fetch and normalize a batch
pub const DEFAULT_WORKERS: usize = 4;

/// Checkpoint interval in identifiers processed
pub const CHECKPOINT_INTERVAL: u32 = 5_000;

/// Bumped whenever the checkpoint layout changes
pub const CHECKPOINT_VERSION: u32 = 2;

/// First four bytes of every archive file
pub const ARCHIVE_MAGIC: [u8; 4] = *b"ARKV";

/// Archive format version written after the magic
pub const ARCHIVE_VERSION: u16 = 1;

/// Upper bound for a single compressed record or the symbol table
pub const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

/// Buffer size for the archive writer
pub const WRITE_BUFFER_SIZE: usize = 128 * 1024;

/// Buffer size for export and archive readers
pub const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Failed identifiers kept for the run summary
pub const RECENT_FAILURES_CAPACITY: usize = 32;

/// Label carried by every creator edge of a TV series
pub const CREATED_BY_LABEL: &str = "Created by";
