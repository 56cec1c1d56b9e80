//! Archive format tests against files on disk: many records, torn tails, resume.

use arachne::archive::{ArchiveError, ArchiveReader, ArchiveWriter, CommitPoint};
use arachne::models::{Connection, ConnectionType, EntryId};
use std::fs::{self, OpenOptions};
use std::path::Path;
use tempfile::TempDir;

fn connections_for(id: u64) -> Vec<Connection> {
    (0..(id % 4) + 1)
        .map(|i| {
            Connection::new(
                EntryId::artist(id * 10 + i),
                if i == 0 {
                    ConnectionType::Director
                } else {
                    ConnectionType::Actor
                },
                format!("Character {i} of {id}"),
            )
        })
        .collect()
}

fn write_archive(path: &Path, ids: &[u64]) -> u64 {
    let mut writer = ArchiveWriter::create(path).unwrap();
    for &id in ids {
        writer.append(&EntryId::movie(id), &connections_for(id)).unwrap();
    }
    writer.close().unwrap().records
}

#[test]
fn many_records_decode_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.arkv");
    let ids: Vec<u64> = (1..=500).collect();

    assert_eq!(write_archive(&path, &ids), 500);

    let mut decoded = 0u64;
    for (record, &id) in ArchiveReader::open(&path).unwrap().zip(&ids) {
        let record = record.unwrap();
        assert_eq!(record.id, EntryId::movie(id));
        assert_eq!(record.connections, connections_for(id));
        decoded += 1;
    }
    assert_eq!(decoded, 500);
}

#[test]
fn truncated_tail_keeps_earlier_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.arkv");
    write_archive(&path, &[1, 2, 3]);

    // Offset where the third record starts.
    let mut reader = ArchiveReader::open(&path).unwrap();
    reader.next_record().unwrap().unwrap();
    reader.next_record().unwrap().unwrap();
    let third_start = reader.offset();
    drop(reader);

    let full_len = fs::metadata(&path).unwrap().len();
    // Longest cut first so each set_len only shrinks the file.
    for cut in [full_len - 1, third_start + 8, third_start + 3] {
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(cut).unwrap();
        drop(file);

        let mut reader = ArchiveReader::open(&path).unwrap();
        assert_eq!(reader.next_record().unwrap().unwrap().id, EntryId::movie(1));
        assert_eq!(reader.next_record().unwrap().unwrap().id, EntryId::movie(2));
        match reader.next_record() {
            Err(ArchiveError::Truncated { offset }) => assert_eq!(offset, third_start),
            other => panic!("expected truncated record, got {other:?}"),
        }
        // Iteration ends after the error.
        assert!(reader.next_record().unwrap().is_none());
    }
}

#[test]
fn flipped_payload_byte_is_reported_as_corrupt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.arkv");
    write_archive(&path, &[7]);

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let results: Vec<_> = ArchiveReader::open(&path).unwrap().collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(ArchiveError::Corrupt { .. })));
}

#[test]
fn non_archive_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("not_an_archive");
    fs::write(&path, b"{\"id\":550}\n").unwrap();

    assert!(matches!(
        ArchiveReader::open(&path),
        Err(ArchiveError::BadMagic)
    ));
}

#[test]
fn resume_drops_bytes_past_committed_length() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.arkv");

    let mut writer = ArchiveWriter::create(&path).unwrap();
    writer.append(&EntryId::movie(1), &connections_for(1)).unwrap();
    writer.flush().unwrap();
    let committed = writer.commit_point();
    writer.append(&EntryId::movie(2), &connections_for(2)).unwrap();
    writer.close().unwrap();

    let mut writer = ArchiveWriter::resume(&path, committed).unwrap();
    writer.append(&EntryId::movie(3), &connections_for(3)).unwrap();
    writer.close().unwrap();

    let ids: Vec<EntryId> = ArchiveReader::open(&path)
        .unwrap()
        .map(|r| r.unwrap().id)
        .collect();
    assert_eq!(ids, vec![EntryId::movie(1), EntryId::movie(3)]);
}

#[test]
fn resume_rejects_offset_beyond_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.arkv");
    write_archive(&path, &[1]);
    let len = fs::metadata(&path).unwrap().len();
    let beyond = CommitPoint {
        len: len + 1,
        last_frame: None,
    };

    assert!(matches!(
        ArchiveWriter::resume(&path, beyond),
        Err(ArchiveError::Corrupt { .. })
    ));
}
