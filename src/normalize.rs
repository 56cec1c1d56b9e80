use crate::config::CREATED_BY_LABEL;
use crate::models::{Connection, ConnectionType, EntityType, Entry, EntryDetails, EntryId};
use crate::tmdb::{
    non_empty, CastMember, CrewMember, MediaKind, RawCollection, RawEntity, RawKeyword, RawMovie,
    RawPerson, RawTvSeries,
};
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::trace;

/// Crew jobs with a dedicated connection type. Every other job becomes `Crew`.
static HANDLED_CREW_JOBS: Lazy<FxHashMap<&'static str, ConnectionType>> = Lazy::new(|| {
    let mut jobs = FxHashMap::default();
    jobs.insert("Director", ConnectionType::Director);
    jobs.insert("Boom Operator", ConnectionType::BoomOperator);
    jobs
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("{kind} {id} cannot be normalized: no conversion rule for this entity kind")]
    UnsupportedEntityKind { kind: &'static str, id: u64 },
}

pub fn resolve_job(job: &str) -> ConnectionType {
    HANDLED_CREW_JOBS
        .get(job)
        .copied()
        .unwrap_or(ConnectionType::Crew)
}

pub fn normalize(raw: RawEntity) -> Result<Entry, NormalizeError> {
    let kind = raw.kind();
    match raw {
        RawEntity::Movie(movie) => Ok(convert_movie(movie)),
        RawEntity::Person(person) => Ok(convert_artist(person)),
        RawEntity::TvSeries(series) => Ok(convert_tv_series(series)),
        RawEntity::Collection(RawCollection { id, .. })
        | RawEntity::Keyword(RawKeyword { id, .. }) => {
            Err(NormalizeError::UnsupportedEntityKind { kind, id })
        }
    }
}

fn genre_names(genres: Vec<crate::tmdb::Genre>) -> Vec<String> {
    genres.into_iter().map(|g| g.name).collect()
}

/// Cast and crew of a movie or series both point at artists.
fn credit_connections(cast: &[CastMember], crew: &[CrewMember]) -> Vec<Connection> {
    let mut connections = Vec::with_capacity(cast.len() + crew.len());

    for member in cast.iter().filter(|m| non_empty(&m.profile_path).is_some()) {
        connections.push(Connection::new(
            EntryId::artist(member.id),
            ConnectionType::Actor,
            member.character.clone().unwrap_or_default(),
        ));
    }

    for member in crew.iter().filter(|m| non_empty(&m.profile_path).is_some()) {
        let job = member.job.clone().unwrap_or_default();
        connections.push(Connection::new(
            EntryId::artist(member.id),
            resolve_job(&job),
            job,
        ));
    }

    connections
}

fn convert_movie(movie: RawMovie) -> Entry {
    let connections = credit_connections(&movie.credits.cast, &movie.credits.crew);
    trace!(id = movie.id, connections = connections.len(), "Converted movie");

    Entry {
        id: EntryId::movie(movie.id),
        title: movie.title,
        tags: genre_names(movie.genres),
        main_image_path: movie.poster_path,
        details: EntryDetails::Movie {
            original_title: movie.original_title,
            release_date: movie.release_date,
            overview: movie.overview,
            runtime: movie.runtime.unwrap_or(0),
        },
        connections,
    }
}

fn convert_artist(person: RawPerson) -> Entry {
    let credits = &person.combined_credits;
    let mut connections = Vec::with_capacity(credits.cast.len() + credits.crew.len());

    for credit in credits
        .cast
        .iter()
        .filter(|c| non_empty(&c.poster_path).is_some())
    {
        let target = match credit.media_type {
            MediaKind::Tv => EntryId::new(EntityType::TvSeries, credit.id),
            MediaKind::Movie | MediaKind::Other => EntryId::movie(credit.id),
        };
        connections.push(Connection::new(
            target,
            ConnectionType::Actor,
            credit.character.clone().unwrap_or_default(),
        ));
    }

    // Crew credits always target a movie, whatever their media kind.
    for credit in credits
        .crew
        .iter()
        .filter(|c| non_empty(&c.poster_path).is_some())
    {
        let job = credit.job.clone().unwrap_or_default();
        connections.push(Connection::new(
            EntryId::movie(credit.id),
            resolve_job(&job),
            job,
        ));
    }
    trace!(id = person.id, connections = connections.len(), "Converted artist");

    Entry {
        id: EntryId::artist(person.id),
        title: person.name,
        tags: Vec::new(),
        main_image_path: person.profile_path,
        details: EntryDetails::Artist {
            nick_names: person.also_known_as,
            birthday: person.birthday,
            deathday: person.deathday,
            place_of_birth: person.place_of_birth,
            biography: person.biography,
        },
        connections,
    }
}

fn convert_tv_series(series: RawTvSeries) -> Entry {
    let mut connections = credit_connections(&series.credits.cast, &series.credits.crew);
    connections.extend(series.created_by.iter().map(|creator| {
        Connection::new(
            EntryId::artist(creator.id),
            ConnectionType::CreatedBy,
            CREATED_BY_LABEL,
        )
    }));
    trace!(id = series.id, connections = connections.len(), "Converted tv series");

    Entry {
        id: EntryId::tv_series(series.id),
        title: series.name,
        tags: genre_names(series.genres),
        main_image_path: series.poster_path,
        details: EntryDetails::TvSeries {
            original_name: series.original_name,
            first_air_date: series.first_air_date,
            overview: series.overview,
            episode_run_time: series.episode_run_time,
        },
        connections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmdb::{
        CombinedCast, CombinedCredits, CombinedCrew, Creator, Credits, Genre,
    };

    fn cast(id: u64, character: &str, profile: Option<&str>) -> CastMember {
        CastMember {
            id,
            character: Some(character.to_string()),
            profile_path: profile.map(str::to_string),
            ..Default::default()
        }
    }

    fn crew(id: u64, job: &str, profile: Option<&str>) -> CrewMember {
        CrewMember {
            id,
            job: Some(job.to_string()),
            profile_path: profile.map(str::to_string),
            ..Default::default()
        }
    }

    fn fight_club() -> RawMovie {
        RawMovie {
            id: 550,
            title: "Fight Club".to_string(),
            runtime: Some(139),
            poster_path: Some("/poster.jpg".to_string()),
            genres: vec![
                Genre { id: 18, name: "Drama".to_string() },
                Genre { id: 53, name: "Thriller".to_string() },
            ],
            credits: Credits {
                cast: vec![cast(819, "The Narrator", Some("/norton.jpg"))],
                crew: vec![crew(7467, "Director", Some("/fincher.jpg"))],
            },
            ..Default::default()
        }
    }

    #[test]
    fn movie_produces_actor_and_director_edges() {
        let entry = normalize(RawEntity::Movie(fight_club())).unwrap();

        assert_eq!(entry.id.to_string(), "Movie-550");
        assert_eq!(
            entry.connections,
            vec![
                Connection::new(EntryId::artist(819), ConnectionType::Actor, "The Narrator"),
                Connection::new(EntryId::artist(7467), ConnectionType::Director, "Director"),
            ]
        );
        assert_eq!(entry.tags, vec!["Drama", "Thriller"]);
        assert_eq!(entry.main_image_path.as_deref(), Some("/poster.jpg"));
        assert_eq!(entry.runtime(), Some(139));
    }

    #[test]
    fn missing_runtime_defaults_to_zero() {
        let movie = RawMovie {
            runtime: None,
            ..fight_club()
        };
        let entry = normalize(RawEntity::Movie(movie)).unwrap();
        assert_eq!(entry.runtime(), Some(0));
    }

    #[test]
    fn records_without_images_are_dropped() {
        let movie = RawMovie {
            credits: Credits {
                cast: vec![cast(1, "A", None), cast(2, "B", Some(""))],
                crew: vec![crew(3, "Director", None), crew(4, "Editor", Some(""))],
            },
            ..fight_club()
        };
        let entry = normalize(RawEntity::Movie(movie)).unwrap();
        assert!(entry.connections.is_empty());
    }

    #[test]
    fn job_mapping() {
        assert_eq!(resolve_job("Director"), ConnectionType::Director);
        assert_eq!(resolve_job("Boom Operator"), ConnectionType::BoomOperator);
        assert_eq!(resolve_job("Screenplay"), ConnectionType::Crew);
        assert_eq!(resolve_job("director"), ConnectionType::Crew);
        assert_eq!(resolve_job(""), ConnectionType::Crew);
    }

    #[test]
    fn unmapped_job_keeps_label_verbatim() {
        let movie = RawMovie {
            credits: Credits {
                cast: vec![],
                crew: vec![
                    crew(10, "Boom Operator", Some("/a.jpg")),
                    crew(11, "Director of Photography", Some("/b.jpg")),
                ],
            },
            ..fight_club()
        };
        let entry = normalize(RawEntity::Movie(movie)).unwrap();
        assert_eq!(
            entry.connections,
            vec![
                Connection::new(EntryId::artist(10), ConnectionType::BoomOperator, "Boom Operator"),
                Connection::new(
                    EntryId::artist(11),
                    ConnectionType::Crew,
                    "Director of Photography"
                ),
            ]
        );
    }

    #[test]
    fn artist_edges_follow_media_kind() {
        let person = RawPerson {
            id: 819,
            name: "Edward Norton".to_string(),
            also_known_as: vec!["Edward Harrison Norton".to_string()],
            profile_path: Some("/norton.jpg".to_string()),
            combined_credits: CombinedCredits {
                cast: vec![
                    CombinedCast {
                        id: 550,
                        media_type: MediaKind::Movie,
                        character: Some("The Narrator".to_string()),
                        poster_path: Some("/fc.jpg".to_string()),
                    },
                    CombinedCast {
                        id: 1400,
                        media_type: MediaKind::Tv,
                        character: Some("Himself".to_string()),
                        poster_path: Some("/tv.jpg".to_string()),
                    },
                    CombinedCast {
                        id: 9,
                        media_type: MediaKind::Movie,
                        character: Some("Hidden".to_string()),
                        poster_path: None,
                    },
                ],
                crew: vec![CombinedCrew {
                    id: 1401,
                    media_type: MediaKind::Tv,
                    job: Some("Producer".to_string()),
                    poster_path: Some("/p.jpg".to_string()),
                }],
            },
            ..Default::default()
        };

        let entry = normalize(RawEntity::Person(person)).unwrap();
        assert_eq!(entry.id, EntryId::artist(819));
        assert_eq!(entry.nick_names(), ["Edward Harrison Norton".to_string()]);
        assert_eq!(entry.main_image_path.as_deref(), Some("/norton.jpg"));
        assert_eq!(
            entry.connections,
            vec![
                Connection::new(EntryId::movie(550), ConnectionType::Actor, "The Narrator"),
                Connection::new(EntryId::tv_series(1400), ConnectionType::Actor, "Himself"),
                Connection::new(EntryId::movie(1401), ConnectionType::Crew, "Producer"),
            ]
        );
    }

    #[test]
    fn tv_series_adds_creator_edges_last() {
        let series = RawTvSeries {
            id: 1396,
            name: "Breaking Bad".to_string(),
            poster_path: Some("/bb.jpg".to_string()),
            created_by: vec![Creator {
                id: 66633,
                name: "Vince Gilligan".to_string(),
                profile_path: None,
            }],
            credits: Credits {
                cast: vec![cast(17419, "Walter White", Some("/bc.jpg"))],
                crew: vec![crew(29779, "Director", Some("/d.jpg"))],
            },
            ..Default::default()
        };

        let entry = normalize(RawEntity::TvSeries(series)).unwrap();
        assert_eq!(entry.id.to_string(), "TvSeries-1396");
        assert_eq!(
            entry.connections,
            vec![
                Connection::new(EntryId::artist(17419), ConnectionType::Actor, "Walter White"),
                Connection::new(EntryId::artist(29779), ConnectionType::Director, "Director"),
                Connection::new(EntryId::artist(66633), ConnectionType::CreatedBy, "Created by"),
            ]
        );
    }

    #[test]
    fn missing_character_becomes_empty_label() {
        let movie = RawMovie {
            credits: Credits {
                cast: vec![CastMember {
                    id: 5,
                    profile_path: Some("/x.jpg".to_string()),
                    ..Default::default()
                }],
                crew: vec![],
            },
            ..fight_club()
        };
        let entry = normalize(RawEntity::Movie(movie)).unwrap();
        assert_eq!(entry.connections[0].label, "");
    }

    #[test]
    fn unsupported_kinds_fail() {
        let err = normalize(RawEntity::Collection(RawCollection {
            id: 10,
            name: "Star Wars Collection".to_string(),
        }))
        .unwrap_err();
        assert_eq!(
            err,
            NormalizeError::UnsupportedEntityKind {
                kind: "collection",
                id: 10
            }
        );

        let err = normalize(RawEntity::Keyword(RawKeyword {
            id: 818,
            name: "based on novel".to_string(),
        }))
        .unwrap_err();
        assert_eq!(
            err,
            NormalizeError::UnsupportedEntityKind {
                kind: "keyword",
                id: 818
            }
        );
    }
}
