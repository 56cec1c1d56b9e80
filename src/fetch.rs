use crate::models::EntityType;
use crate::tmdb::{RawEntity, RawMovie, RawPerson, RawTvSeries};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: EntityType, id: u64 },
    #[error("IO error fetching {entity_type} {id}: {source}")]
    Io {
        entity_type: EntityType,
        id: u64,
        #[source]
        source: io::Error,
    },
    #[error("Invalid document for {entity_type} {id}: {source}")]
    Decode {
        entity_type: EntityType,
        id: u64,
        #[source]
        source: serde_json::Error,
    },
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Entity-by-id lookup against the metadata service. Must be callable from
/// several worker threads at once.
pub trait FetchService: Sync {
    fn fetch(&self, entity_type: EntityType, id: u64) -> Result<RawEntity, FetchError>;
}

pub fn parse_document(
    entity_type: EntityType,
    id: u64,
    reader: impl io::Read,
) -> Result<RawEntity, FetchError> {
    let decode = |source| FetchError::Decode {
        entity_type,
        id,
        source,
    };
    Ok(match entity_type {
        EntityType::Movie => RawEntity::Movie(serde_json::from_reader::<_, RawMovie>(reader).map_err(decode)?),
        EntityType::Artist => {
            RawEntity::Person(serde_json::from_reader::<_, RawPerson>(reader).map_err(decode)?)
        }
        EntityType::TvSeries => {
            RawEntity::TvSeries(serde_json::from_reader::<_, RawTvSeries>(reader).map_err(decode)?)
        }
    })
}

/// Top-level folder of a crawl holding the entity documents.
pub const ENTITIES_DIR: &str = "Entities";

/// Serves crawled documents laid out as `{root}/Entities/{Movie|Person|TvSeries}/{id}.json`.
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn document_path(&self, entity_type: EntityType, id: u64) -> PathBuf {
        let mut buf = itoa::Buffer::new();
        let mut path = self.root.join(ENTITIES_DIR).join(entity_type.crawl_folder());
        path.push(format!("{}.json", buf.format(id)));
        path
    }
}

impl FetchService for DirectoryFetcher {
    fn fetch(&self, entity_type: EntityType, id: u64) -> Result<RawEntity, FetchError> {
        let path = self.document_path(entity_type, id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FetchError::NotFound { entity_type, id })
            }
            Err(source) => {
                return Err(FetchError::Io {
                    entity_type,
                    id,
                    source,
                })
            }
        };
        parse_document(entity_type, id, BufReader::new(file))
    }
}
