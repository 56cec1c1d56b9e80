//! Typed shapes of the upstream TMDb documents.
//!
//! Every field the normalizer reads is declared here; anything else in the
//! upstream JSON is ignored. Optional values default instead of failing so a
//! sparse document still normalizes.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Genre {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

/// Cast entry of a movie or TV series `credits` block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CastMember {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub profile_path: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrewMember {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credits {
    #[serde(default)]
    pub cast: Vec<CastMember>,
    #[serde(default)]
    pub crew: Vec<CrewMember>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMovie {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub credits: Credits,
}

/// Declared media kind of a person's combined credit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Movie,
    Tv,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CombinedCast {
    pub id: u64,
    #[serde(default)]
    pub media_type: MediaKind,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CombinedCrew {
    pub id: u64,
    #[serde(default)]
    pub media_type: MediaKind,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CombinedCredits {
    #[serde(default)]
    pub cast: Vec<CombinedCast>,
    #[serde(default)]
    pub crew: Vec<CombinedCrew>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPerson {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub also_known_as: Vec<String>,
    #[serde(default)]
    pub profile_path: Option<String>,
    #[serde(default)]
    pub birthday: Option<String>,
    #[serde(default)]
    pub deathday: Option<String>,
    #[serde(default)]
    pub place_of_birth: Option<String>,
    #[serde(default)]
    pub biography: Option<String>,
    #[serde(default)]
    pub combined_credits: CombinedCredits,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Creator {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTvSeries {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub episode_run_time: Vec<u32>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub created_by: Vec<Creator>,
    #[serde(default)]
    pub credits: Credits,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCollection {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawKeyword {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

/// A document as returned by one upstream endpoint.
#[derive(Debug, Clone)]
pub enum RawEntity {
    Movie(RawMovie),
    Person(RawPerson),
    TvSeries(RawTvSeries),
    Collection(RawCollection),
    Keyword(RawKeyword),
}

impl RawEntity {
    pub fn kind(&self) -> &'static str {
        match self {
            RawEntity::Movie(_) => "movie",
            RawEntity::Person(_) => "person",
            RawEntity::TvSeries(_) => "tv",
            RawEntity::Collection(_) => "collection",
            RawEntity::Keyword(_) => "keyword",
        }
    }
}

/// Returns the path only when it is present and non-empty.
pub(crate) fn non_empty(path: &Option<String>) -> Option<&str> {
    path.as_deref().filter(|p| !p.is_empty())
}
