//! Arachne: TMDb export to media graph archive pipeline
//!
//! This crate turns a daily TMDb id export into a single compact archive holding the
//! cast/crew/creator graph between movies, artists and TV series:
//!
//! 1. **Source** -- Stream `(EntityType, id)` pairs out of the export (JSON lines,
//!    optionally bzip2 compressed) without loading it into memory
//! 2. **Fetch** -- Resolve each id to its detailed upstream document through a
//!    [`fetch::FetchService`]
//! 3. **Normalize** -- Convert movie, person and TV documents into one [`models::Entry`]
//!    with typed, labelled [`models::Connection`]s
//! 4. **Archive** -- Append every entry with at least one connection as an
//!    independently compressed record
//!
//! # Architecture
//!
//! - **Streaming both ends** -- The export is read lazily and the archive is written
//!   record by record; memory stays bounded by one batch
//! - **Parallel fetch** -- A rayon pool fetches and normalizes a batch at a time while a
//!   single thread appends, so record order follows export order
//! - **Self-delimiting records** -- Length + CRC32 framing around a bzip2 payload; a
//!   torn tail never affects the records before it
//! - **Resumable runs** -- Checkpoints store the export position and archive length
//! - **Injected progress** -- The driver reports to a [`pipeline::ProgressSink`] instead of a
//!   global logger
//!
//! # Key Modules
//!
//! - [`ids`] -- `{EntityType}-{NumericId}` identifier codec
//! - [`models`] -- Entity types, entries and connections
//! - [`tmdb`] -- Typed upstream document shapes
//! - [`normalize`] -- Raw document to entry conversion and crew job mapping
//! - [`archive`] -- Archive writer and streaming reader
//! - [`source`] -- Export reader and export naming
//! - [`fetch`] -- Fetch service trait and crawled-directory implementation
//! - [`pipeline`] -- Driver state machine, failure policy and progress sinks
//! - [`checkpoint`] -- Run checkpointing for resume
//! - [`stats`] -- Thread-safe atomic counters
//! - [`ring`] -- Bounded evict-oldest queue
//! - [`config`] -- Constants
//!
//! # Example Usage
//!
//! ```bash
//! # Build the movie graph from a crawled entity directory
//! arachne run -i movie_ids_05_01_2024.json -e crawl/ -o movies.arkv
//!
//! # Dump the archive as JSON lines
//! arachne inspect -i movies.arkv --limit 10
//! ```

pub mod archive;
pub mod checkpoint;
pub mod config;
pub mod fetch;
pub mod ids;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod ring;
pub mod source;
pub mod stats;
pub mod tmdb;
