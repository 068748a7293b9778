//! Wikimention: Wikipedia link resolution and entity-linking dataset builder
//!
//! This crate turns a parsed Wikipedia export into a store of resolved mention spans and
//! then into an entity-linking dataset:
//!
//! 1. **Load Pass** -- Stream page records (JSON lines, optionally bz2) into an embedded
//!    SQLite page store
//! 2. **Extraction Pass** -- For every section, locate each internal link's text in the
//!    cleaned content with a forward-only cursor, resolve its target through at most one
//!    redirect, and upsert the resulting spans keyed by a stable id
//! 3. **Rank Pass** -- Count distinct inbound mentions per target and write a
//!    `reference_rank` on each page
//! 4. **Dataset Pass** -- Pick top-ranked pages as candidates, sample mentions of them,
//!    cut context windows and split the result into train/validation/test files
//!
//! # Architecture
//!
//! - **Linear span search** -- Links arrive in document order, so each search resumes
//!   where the last match ended
//! - **Narrow store seams** -- The resolver only needs [`index::PageLookup`]; the SQLite
//!   store and the in-memory index both implement it
//! - **Idempotent upserts** -- Link ids are derived from span start and source page, so
//!   re-running a page range rewrites the same records
//! - **Resumable extraction** -- The last processed page id is checkpointed
//! - **Bounded sampling** -- Reservoir sampling and fixed-size batches keep the dataset
//!   pass from materializing the full link join
//!
//! # Key Modules
//!
//! - [`content`] -- Storage encoding, display decoding and content cleanup
//! - [`models`] -- Raw export records and the page, section, link and redirect types
//! - [`extract`] -- Span search, link resolution and the chunked extraction driver
//! - [`redirect`] -- Single-hop redirect translation
//! - [`store`] -- SQLite page and link store
//! - [`index`] -- Page lookup trait and in-memory title index
//! - [`rank`] -- Inbound-link ranking
//! - [`sampler`] -- Mention sampling and context windows
//! - [`dataset`] -- Candidates, splits and dataset files
//! - [`parser`] -- Streaming page export reader
//! - [`checkpoint`] -- Extraction progress checkpointing
//! - [`stats`] -- Atomic counters for extraction metrics
//! - [`error`] -- Link diagnostics and dataset errors
//! - [`config`] -- Constants and run configuration
//!
//! # Example Usage
//!
//! ```bash
//! wikimention load-pages -i enwiki-pages.jsonl.bz2 --database enwiki.sqlite
//! wikimention extract-links --database enwiki.sqlite --language en --resume
//! wikimention rank --database enwiki.sqlite
//! wikimention build-dataset --database enwiki.sqlite -o data/el_dataset --seed 42
//! ```

pub mod checkpoint;
pub mod config;
pub mod content;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod index;
pub mod models;
pub mod parser;
pub mod rank;
pub mod redirect;
pub mod sampler;
pub mod stats;
pub mod store;
