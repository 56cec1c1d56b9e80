//! Identifier source over a daily id export.
//!
//! Exports are JSON lines (`{"id": 550, "original_title": "Fight Club", ...}`),
//! one per entity. Only `id` is read. Files ending in `.bz2` are decompressed on
//! the fly.

use crate::config::READ_BUFFER_SIZE;
use crate::models::EntityType;
use bzip2::read::BzDecoder;
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error reading export: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid export line {line}: {source}")]
    Parse {
        line: u64,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct ExportLine {
    id: u64,
}

pub fn is_bz2(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "bz2")
}

fn open_reader(path: &Path) -> io::Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    if is_bz2(path) {
        Ok(Box::new(BufReader::with_capacity(
            READ_BUFFER_SIZE,
            BzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file)))
    }
}

/// Canonical name of the export published for `date`.
pub fn export_file_name(entity_type: EntityType, year: u16, month: u8, day: u8) -> String {
    format!(
        "{}_ids_{:02}_{:02}_{:04}.json.gz",
        entity_type.export_resource(),
        month,
        day,
        year
    )
}

/// Infers the entity type from an export file name such as `person_ids_05_01_2024.json`.
pub fn entity_type_from_export_name(path: &Path) -> Option<EntityType> {
    let name = path.file_name()?.to_str()?;
    let resource = name.split_once("_ids_")?.0;
    EntityType::ALL
        .into_iter()
        .find(|t| t.export_resource() == resource)
}

/// Counts non-blank lines without parsing them.
pub fn count_ids(path: &Path) -> Result<u64, SourceError> {
    let mut reader = open_reader(path)?;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut count = 0u64;
    let mut line_has_content = false;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        let chunk = &buf[..n];
        let mut start = 0;
        for nl in memchr::memchr_iter(b'\n', chunk) {
            if line_has_content || !is_blank(&chunk[start..nl]) {
                count += 1;
            }
            line_has_content = false;
            start = nl + 1;
        }
        line_has_content |= !is_blank(&chunk[start..]);
    }

    if line_has_content {
        count += 1;
    }
    Ok(count)
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b.is_ascii_whitespace())
}

/// Lazy, finite sequence of `(EntityType, id)` pairs read from one export file.
pub struct ExportSource {
    entity_type: EntityType,
    lines: io::Lines<Box<dyn BufRead + Send>>,
    line_no: u64,
}

impl ExportSource {
    pub fn open(path: &Path, entity_type: EntityType) -> Result<Self, SourceError> {
        Ok(Self::from_reader(open_reader(path)?, entity_type))
    }

    pub fn from_reader(reader: Box<dyn BufRead + Send>, entity_type: EntityType) -> Self {
        Self {
            entity_type,
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl Iterator for ExportSource {
    type Item = Result<(EntityType, u64), SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return Some(
                serde_json::from_str::<ExportLine>(trimmed)
                    .map(|l| (self.entity_type, l.id))
                    .map_err(|source| SourceError::Parse {
                        line: self.line_no,
                        source,
                    }),
            );
        }
    }
}
