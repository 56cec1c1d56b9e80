use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Movie,
    Artist,
    TvSeries,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Movie, EntityType::Artist, EntityType::TvSeries];

    /// Prefix used in the textual identifier (`Movie-550`).
    pub fn prefix(self) -> &'static str {
        match self {
            EntityType::Movie => "Movie",
            EntityType::Artist => "Artist",
            EntityType::TvSeries => "TvSeries",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "Movie" => Some(EntityType::Movie),
            "Artist" => Some(EntityType::Artist),
            "TvSeries" => Some(EntityType::TvSeries),
            _ => None,
        }
    }

    /// Resource name of the daily id export (`movie_ids_05_01_2024.json.gz`).
    pub fn export_resource(self) -> &'static str {
        match self {
            EntityType::Movie => "movie",
            EntityType::Artist => "person",
            EntityType::TvSeries => "tv_series",
        }
    }

    /// Folder under `Entities/` where the crawler stores documents of this kind.
    pub fn crawl_folder(self) -> &'static str {
        match self {
            EntityType::Movie => "Movie",
            EntityType::Artist => "Person",
            EntityType::TvSeries => "TvSeries",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    pub entity_type: EntityType,
    pub id: u64,
}

impl EntryId {
    pub fn new(entity_type: EntityType, id: u64) -> Self {
        Self { entity_type, id }
    }

    pub fn movie(id: u64) -> Self {
        Self::new(EntityType::Movie, id)
    }

    pub fn artist(id: u64) -> Self {
        Self::new(EntityType::Artist, id)
    }

    pub fn tv_series(id: u64) -> Self {
        Self::new(EntityType::TvSeries, id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionType {
    Actor,
    Director,
    BoomOperator,
    /// Any crew job without a dedicated variant; the job survives as the label.
    Crew,
    CreatedBy,
}

impl ConnectionType {
    pub const ALL: [ConnectionType; 5] = [
        ConnectionType::Actor,
        ConnectionType::Director,
        ConnectionType::BoomOperator,
        ConnectionType::Crew,
        ConnectionType::CreatedBy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConnectionType::Actor => "Actor",
            ConnectionType::Director => "Director",
            ConnectionType::BoomOperator => "BoomOperator",
            ConnectionType::Crew => "Crew",
            ConnectionType::CreatedBy => "CreatedBy",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub connected_id: EntryId,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub label: String,
}

impl Connection {
    pub fn new(connected_id: EntryId, connection_type: ConnectionType, label: impl Into<String>) -> Self {
        Self {
            connected_id,
            connection_type,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryDetails {
    Movie {
        original_title: Option<String>,
        release_date: Option<String>,
        overview: Option<String>,
        runtime: u32,
    },
    Artist {
        nick_names: Vec<String>,
        birthday: Option<String>,
        deathday: Option<String>,
        place_of_birth: Option<String>,
        biography: Option<String>,
    },
    TvSeries {
        original_name: Option<String>,
        first_air_date: Option<String>,
        overview: Option<String>,
        episode_run_time: Vec<u32>,
    },
}

/// A graph node; only `id` and `connections` end up in the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: EntryId,
    pub title: String,
    pub tags: Vec<String>,
    pub main_image_path: Option<String>,
    pub details: EntryDetails,
    pub connections: Vec<Connection>,
}

impl Entry {
    pub fn runtime(&self) -> Option<u32> {
        match self.details {
            EntryDetails::Movie { runtime, .. } => Some(runtime),
            _ => None,
        }
    }

    pub fn nick_names(&self) -> &[String] {
        match &self.details {
            EntryDetails::Artist { nick_names, .. } => nick_names,
            _ => &[],
        }
    }
}
