//! Streaming graph archive.
//!
//! Layout (integers little-endian):
//!
//! ```text
//! header  = "ARKV" | version: u16 | table_len: u32 | bincode(SymbolTable)
//! record  = payload_len: u32 | crc32(payload): u32 | payload
//! payload = bzip2(bincode(RecordBody))
//! ```
//!
//! Each record is compressed on its own, so a reader only ever holds the header and
//! one record in memory. Symbol codes index into the header table and are resolved
//! by name on the read side.

use crate::config::{
    ARCHIVE_MAGIC, ARCHIVE_VERSION, MAX_RECORD_LEN, READ_BUFFER_SIZE, WRITE_BUFFER_SIZE,
};
use crate::models::{Connection, ConnectionType, EntityType, EntryId};
use bincode::Options;
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const FRAME_HEADER_LEN: usize = 8;
const FILE_HEADER_FIXED_LEN: usize = 4 + 2 + 4;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Not an archive file (bad magic)")]
    BadMagic,
    #[error("Unsupported archive version {0}")]
    UnsupportedVersion(u16),
    #[error("Truncated record at offset {offset}")]
    Truncated { offset: u64 },
    #[error("Corrupt data at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },
    #[error("Archive writer was poisoned by an earlier write failure")]
    Poisoned,
}

/// Names of every variant, written once at the start of the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    pub entity_types: Vec<String>,
    pub connection_types: Vec<String>,
}

impl SymbolTable {
    pub fn current() -> Self {
        Self {
            entity_types: EntityType::ALL
                .iter()
                .map(|t| t.prefix().to_string())
                .collect(),
            connection_types: ConnectionType::ALL
                .iter()
                .map(|t| t.name().to_string())
                .collect(),
        }
    }

    fn entity_code(&self, entity_type: EntityType) -> Result<u8, ArchiveError> {
        code_of(&self.entity_types, entity_type.prefix())
    }

    fn connection_code(&self, connection_type: ConnectionType) -> Result<u8, ArchiveError> {
        code_of(&self.connection_types, connection_type.name())
    }
}

fn code_of(table: &[String], name: &str) -> Result<u8, ArchiveError> {
    let index = table
        .iter()
        .position(|n| n == name)
        .ok_or_else(|| ArchiveError::Encoding(format!("\"{name}\" is not in the symbol table")))?;
    u8::try_from(index)
        .map_err(|_| ArchiveError::Encoding(format!("symbol index {index} exceeds u8")))
}

/// Borrows labels so appending never clones connection strings.
#[derive(Serialize)]
struct RecordBodySer<'a> {
    entry: (u8, u64),
    connections: Vec<(u8, u64, u8, &'a str)>,
}

#[derive(Deserialize)]
struct RecordBodyDe {
    entry: (u8, u64),
    connections: Vec<(u8, u64, u8, String)>,
}

/// One decoded record: a node id and its outgoing edges, in written order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveRecord {
    pub id: EntryId,
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub records: u64,
    pub bytes: u64,
}

fn encode_header(symbols: &SymbolTable) -> Result<Vec<u8>, ArchiveError> {
    let table = bincode::DefaultOptions::new()
        .serialize(symbols)
        .map_err(|e| ArchiveError::Encoding(e.to_string()))?;
    let table_len =
        u32::try_from(table.len()).map_err(|_| ArchiveError::Encoding("symbol table too large".into()))?;

    let mut header = Vec::with_capacity(FILE_HEADER_FIXED_LEN + table.len());
    header.extend_from_slice(&ARCHIVE_MAGIC);
    header.extend_from_slice(&ARCHIVE_VERSION.to_le_bytes());
    header.extend_from_slice(&table_len.to_le_bytes());
    header.extend_from_slice(&table);
    Ok(header)
}

/// Encodes a complete frame. Nothing is written until this has succeeded.
fn encode_record(
    symbols: &SymbolTable,
    id: &EntryId,
    connections: &[Connection],
) -> Result<Vec<u8>, ArchiveError> {
    let body = RecordBodySer {
        entry: (symbols.entity_code(id.entity_type)?, id.id),
        connections: connections
            .iter()
            .map(|c| -> Result<_, ArchiveError> {
                Ok((
                    symbols.entity_code(c.connected_id.entity_type)?,
                    c.connected_id.id,
                    symbols.connection_code(c.connection_type)?,
                    c.label.as_str(),
                ))
            })
            .collect::<Result<_, ArchiveError>>()?,
    };

    let raw = bincode::DefaultOptions::new()
        .serialize(&body)
        .map_err(|e| ArchiveError::Encoding(e.to_string()))?;

    let mut encoder = BzEncoder::new(Vec::with_capacity(raw.len() / 2 + 64), Compression::best());
    encoder
        .write_all(&raw)
        .map_err(|e| ArchiveError::Encoding(e.to_string()))?;
    let payload = encoder
        .finish()
        .map_err(|e| ArchiveError::Encoding(e.to_string()))?;

    let payload_len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_LEN)
        .ok_or_else(|| ArchiveError::Encoding(format!("record for {id} is too large")))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&payload_len.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Start offset and checksum of one written frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMark {
    pub offset: u64,
    pub crc: u32,
}

/// Where a writer can be reopened: the byte length after the last complete
/// record, plus that record's mark (`None` while the archive holds only its header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPoint {
    pub len: u64,
    pub last_frame: Option<FrameMark>,
}

/// Storage an [`ArchiveWriter`] appends to.
pub trait ArchiveSink: Write {
    /// Cuts the storage back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl ArchiveSink for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

fn frame_crc(frame: &[u8]) -> u32 {
    u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]])
}

/// Single-writer archive. Complete frames are staged in memory and written to the
/// sink in whole-frame chunks, so the archive always ends on a record boundary unless
/// the write itself fails, in which case the sink is truncated back.
pub struct ArchiveWriter<S: ArchiveSink = File> {
    path: PathBuf,
    sink: Option<S>,
    symbols: SymbolTable,
    pending: Vec<u8>,
    pending_records: u64,
    flushed_len: u64,
    flushed_tail: Option<FrameMark>,
    tail: Option<FrameMark>,
    records: u64,
}

impl ArchiveWriter<File> {
    /// Creates (or truncates) the archive and writes its header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Self::with_sink(path, file)
    }

    /// Reopens an archive written by an earlier run at `point`, dropping everything
    /// after it. The record at the commit point must match `point.last_frame`;
    /// nothing is truncated otherwise. The record counter restarts at zero.
    pub fn resume(path: impl AsRef<Path>, point: CommitPoint) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let (symbols, header_len) = read_header(&mut file)?;
        if symbols != SymbolTable::current() {
            return Err(ArchiveError::Corrupt {
                offset: FILE_HEADER_FIXED_LEN as u64,
                reason: "symbol table differs from the current build".to_string(),
            });
        }

        let file_len = file.metadata()?.len();
        if point.len < header_len || point.len > file_len {
            return Err(ArchiveError::Corrupt {
                offset: point.len,
                reason: format!("resume offset outside of archive (header {header_len}, file {file_len})"),
            });
        }
        verify_commit_point(&mut file, header_len, point)?;

        file.set_len(point.len)?;
        file.seek(SeekFrom::End(0))?;

        info!(
            path = ?path,
            committed_len = point.len,
            dropped = file_len - point.len,
            "Archive resumed"
        );

        Ok(Self {
            path,
            sink: Some(file),
            symbols,
            pending: Vec::with_capacity(WRITE_BUFFER_SIZE),
            pending_records: 0,
            flushed_len: point.len,
            flushed_tail: point.last_frame,
            tail: point.last_frame,
            records: 0,
        })
    }
}

/// Checks that the frame recorded in `point` ends exactly at `point.len` and still
/// carries the same checksum.
fn verify_commit_point(
    file: &mut File,
    header_len: u64,
    point: CommitPoint,
) -> Result<(), ArchiveError> {
    let mismatch = |reason: &str| ArchiveError::Corrupt {
        offset: point.len,
        reason: reason.to_string(),
    };

    let Some(mark) = point.last_frame else {
        if point.len != header_len {
            return Err(mismatch("commit point without a record must end at the header"));
        }
        return Ok(());
    };
    if mark.offset < header_len || mark.offset + FRAME_HEADER_LEN as u64 > point.len {
        return Err(mismatch("last record lies outside the committed range"));
    }

    file.seek(SeekFrom::Start(mark.offset))?;
    let mut frame = [0u8; FRAME_HEADER_LEN];
    file.read_exact(&mut frame)?;
    let payload_len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    if mark.offset + (FRAME_HEADER_LEN as u64) + u64::from(payload_len) != point.len
        || frame_crc(&frame) != mark.crc
    {
        return Err(mismatch("record at the commit point differs from the checkpoint"));
    }

    let mut payload = vec![0u8; payload_len as usize];
    file.read_exact(&mut payload)?;
    if crc32fast::hash(&payload) != mark.crc {
        return Err(mismatch("record at the commit point fails its checksum"));
    }
    Ok(())
}

impl<S: ArchiveSink> ArchiveWriter<S> {
    /// Writes the header to `sink` and appends after it. `path` is only reported.
    pub fn with_sink(path: impl Into<PathBuf>, mut sink: S) -> Result<Self, ArchiveError> {
        let path = path.into();
        let symbols = SymbolTable::current();
        let header = encode_header(&symbols)?;
        sink.write_all(&header)?;

        debug!(path = ?path, header_len = header.len(), "Archive created");

        Ok(Self {
            path,
            sink: Some(sink),
            symbols,
            pending: Vec::with_capacity(WRITE_BUFFER_SIZE),
            pending_records: 0,
            flushed_len: header.len() as u64,
            flushed_tail: None,
            tail: None,
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this writer.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Byte length of the archive once every appended record is written out.
    pub fn committed_len(&self) -> u64 {
        self.flushed_len + self.pending.len() as u64
    }

    /// Commit point after the last appended record. Only durable after [`flush`](Self::flush).
    pub fn commit_point(&self) -> CommitPoint {
        CommitPoint {
            len: self.committed_len(),
            last_frame: self.tail,
        }
    }

    pub fn append(&mut self, id: &EntryId, connections: &[Connection]) -> Result<(), ArchiveError> {
        if self.sink.is_none() {
            return Err(ArchiveError::Poisoned);
        }

        let frame = encode_record(&self.symbols, id, connections)?;
        self.tail = Some(FrameMark {
            offset: self.committed_len(),
            crc: frame_crc(&frame),
        });
        self.pending.extend_from_slice(&frame);
        self.pending_records += 1;
        self.records += 1;

        if self.pending.len() >= WRITE_BUFFER_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes staged records to the sink.
    pub fn flush(&mut self) -> Result<(), ArchiveError> {
        let sink = self.sink.as_mut().ok_or(ArchiveError::Poisoned)?;
        if self.pending.is_empty() {
            return Ok(());
        }

        if let Err(e) = sink.write_all(&self.pending) {
            self.rollback();
            return Err(ArchiveError::Io(e));
        }

        self.flushed_len += self.pending.len() as u64;
        self.flushed_tail = self.tail;
        self.pending.clear();
        self.pending_records = 0;
        Ok(())
    }

    /// Flushes, syncs and releases the sink.
    pub fn close(mut self) -> Result<ArchiveSummary, ArchiveError> {
        self.flush()?;
        if let Some(mut sink) = self.sink.take() {
            sink.sync()?;
        }

        info!(
            path = ?self.path,
            records = self.records,
            bytes = self.flushed_len,
            "Archive closed"
        );

        Ok(ArchiveSummary {
            path: self.path.clone(),
            records: self.records,
            bytes: self.flushed_len,
        })
    }

    /// Cuts the sink back to the last fully written frame and poisons the writer.
    fn rollback(&mut self) {
        let lost = self.pending_records;
        self.pending.clear();
        self.pending_records = 0;
        self.records = self.records.saturating_sub(lost);
        self.tail = self.flushed_tail;

        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.truncate(self.flushed_len) {
                warn!(error = %e, path = ?self.path, "Failed to truncate archive after write error");
            }
        }
        warn!(
            path = ?self.path,
            valid_len = self.flushed_len,
            lost_records = lost,
            "Archive write failed, writer poisoned"
        );
    }
}

impl<S: ArchiveSink> Drop for ArchiveWriter<S> {
    fn drop(&mut self) {
        if self.sink.is_some() && !self.pending.is_empty() {
            if let Err(e) = self.flush() {
                warn!(error = %e, "Failed to flush archive on drop");
            }
        }
    }
}

/// Reads as many bytes as are available up to `buf.len()`; a short count means EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_header<R: Read>(reader: &mut R) -> Result<(SymbolTable, u64), ArchiveError> {
    let mut fixed = [0u8; FILE_HEADER_FIXED_LEN];
    let n = read_full(reader, &mut fixed)?;
    if n < 4 || fixed[..4] != ARCHIVE_MAGIC {
        return Err(ArchiveError::BadMagic);
    }
    if n < FILE_HEADER_FIXED_LEN {
        return Err(ArchiveError::Truncated { offset: 0 });
    }

    let version = u16::from_le_bytes([fixed[4], fixed[5]]);
    if version != ARCHIVE_VERSION {
        return Err(ArchiveError::UnsupportedVersion(version));
    }

    let table_len = u32::from_le_bytes([fixed[6], fixed[7], fixed[8], fixed[9]]);
    if table_len > MAX_RECORD_LEN {
        return Err(ArchiveError::Corrupt {
            offset: 6,
            reason: format!("symbol table length {table_len} exceeds limit"),
        });
    }

    let mut table = vec![0u8; table_len as usize];
    if read_full(reader, &mut table)? < table.len() {
        return Err(ArchiveError::Truncated { offset: 0 });
    }

    let symbols: SymbolTable = bincode::DefaultOptions::new()
        .with_limit(u64::from(table_len))
        .deserialize(&table)
        .map_err(|e| ArchiveError::Corrupt {
            offset: FILE_HEADER_FIXED_LEN as u64,
            reason: e.to_string(),
        })?;

    Ok((symbols, (FILE_HEADER_FIXED_LEN + table.len()) as u64))
}

/// Maps header codes back to this build's variants; unknown names stay `None`
/// and only fail when a record actually uses them.
struct SymbolResolver {
    entity_types: Vec<Option<EntityType>>,
    connection_types: Vec<Option<ConnectionType>>,
}

impl SymbolResolver {
    fn new(table: &SymbolTable) -> Self {
        Self {
            entity_types: table
                .entity_types
                .iter()
                .map(|n| EntityType::from_prefix(n))
                .collect(),
            connection_types: table
                .connection_types
                .iter()
                .map(|n| ConnectionType::from_name(n))
                .collect(),
        }
    }

    fn entity(&self, code: u8, offset: u64) -> Result<EntityType, ArchiveError> {
        self.entity_types
            .get(code as usize)
            .copied()
            .flatten()
            .ok_or_else(|| ArchiveError::Corrupt {
                offset,
                reason: format!("unknown entity type code {code}"),
            })
    }

    fn connection(&self, code: u8, offset: u64) -> Result<ConnectionType, ArchiveError> {
        self.connection_types
            .get(code as usize)
            .copied()
            .flatten()
            .ok_or_else(|| ArchiveError::Corrupt {
                offset,
                reason: format!("unknown connection type code {code}"),
            })
    }
}

/// Streaming reader. Iteration stops after the first error.
pub struct ArchiveReader<R> {
    reader: R,
    symbols: SymbolTable,
    resolver: SymbolResolver,
    offset: u64,
    done: bool,
}

impl ArchiveReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::with_capacity(READ_BUFFER_SIZE, file))
    }
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(mut reader: R) -> Result<Self, ArchiveError> {
        let (symbols, header_len) = read_header(&mut reader)?;
        let resolver = SymbolResolver::new(&symbols);
        Ok(Self {
            reader,
            symbols,
            resolver,
            offset: header_len,
            done: false,
        })
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Offset of the next unread record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn next_record(&mut self) -> Result<Option<ArchiveRecord>, ArchiveError> {
        if self.done {
            return Ok(None);
        }
        let result = self.read_record();
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }

    fn read_record(&mut self) -> Result<Option<ArchiveRecord>, ArchiveError> {
        let start = self.offset;

        let mut frame = [0u8; FRAME_HEADER_LEN];
        match read_full(&mut self.reader, &mut frame)? {
            0 => return Ok(None),
            n if n < FRAME_HEADER_LEN => return Err(ArchiveError::Truncated { offset: start }),
            _ => {}
        }

        let payload_len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let crc = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        if payload_len > MAX_RECORD_LEN {
            return Err(ArchiveError::Corrupt {
                offset: start,
                reason: format!("record length {payload_len} exceeds limit"),
            });
        }

        let mut payload = vec![0u8; payload_len as usize];
        if read_full(&mut self.reader, &mut payload)? < payload.len() {
            return Err(ArchiveError::Truncated { offset: start });
        }
        if crc32fast::hash(&payload) != crc {
            return Err(ArchiveError::Corrupt {
                offset: start,
                reason: "CRC mismatch".to_string(),
            });
        }

        let body: RecordBodyDe = bincode::DefaultOptions::new()
            .with_limit(u64::from(MAX_RECORD_LEN))
            .deserialize_from(BzDecoder::new(payload.as_slice()))
            .map_err(|e| ArchiveError::Corrupt {
                offset: start,
                reason: e.to_string(),
            })?;

        let id = EntryId::new(self.resolver.entity(body.entry.0, start)?, body.entry.1);
        let connections = body
            .connections
            .into_iter()
            .map(|(entity_code, target, type_code, label)| -> Result<_, ArchiveError> {
                Ok(Connection {
                    connected_id: EntryId::new(self.resolver.entity(entity_code, start)?, target),
                    connection_type: self.resolver.connection(type_code, start)?,
                    label,
                })
            })
            .collect::<Result<Vec<_>, ArchiveError>>()?;

        self.offset = start + (FRAME_HEADER_LEN + payload.len()) as u64;
        Ok(Some(ArchiveRecord { id, connections }))
    }
}

impl<R: Read> Iterator for ArchiveReader<R> {
    type Item = Result<ArchiveRecord, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
