//! # Goldie
//!
//! **A local retrieval-augmented-generation (RAG) service for AI assistants.**
//!
//! Goldie ingests text (inline content, single files, directory trees),
//! computes dense vector embeddings, persists documents with their vectors
//! in an embedded SQLite database, and answers semantic-similarity queries
//! over a line-delimited tool protocol on stdin/stdout.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ stdio tool │──▶│ Queue (1 wkr) │──▶│   Indexer     │
//! │  protocol  │   │  jobs table   │   │ chunk+embed  │
//! └─────┬──────┘   └───────────────┘   └──────┬───────┘
//!       │                                     │
//!       │  queries (embed once + search)      ▼
//!       │                              ┌──────────────┐
//!       └─────────────────────────────▶│    SQLite     │
//!                                      │ docs+vec+jobs│
//!                                      └──────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. A tool handler enqueues a job into the **queue** via the **store**,
//!    or indexes inline content synchronously.
//! 2. The single background worker claims jobs in arrival order, invokes
//!    the **indexer**, which chunks text ([`chunk`]), calls the
//!    **embedder** ([`embedding`]), and persists via the **store**.
//! 3. Directory jobs fan out into one child `index_file` job per
//!    discovered path; aggregate completion is observed through child job
//!    statistics.
//! 4. Query requests embed once and run a cosine nearest-neighbor search
//!    synchronously.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, defaults, and validation |
//! | [`models`] | Core data types: `Document`, `SearchResult`, `Job` |
//! | [`chunk`] | Overlapping-window chunker with word-boundary breaks |
//! | [`embedding`] | `Embedder` trait, Ollama backend, shared-mutex wrapper |
//! | [`skiplist`] | `.goldieskip` pattern loading and matching |
//! | [`index`] | Content/file/directory ingestion with checksum dedup |
//! | [`store`] | Documents, vectors, and jobs over SQLite |
//! | [`queue`] | Single-worker job runner with parent/child fan-out |
//! | [`tools`] | The tool trait, registry, and built-in tools |
//! | [`server`] | Line-delimited JSON protocol loop over stdio |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Idempotent schema creation and dimension guard |
//! | [`error`] | Typed errors with stable wire codes |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod migrate;
pub mod models;
pub mod queue;
pub mod server;
pub mod skiplist;
pub mod store;
pub mod tools;

pub use error::{Error, Result};
pub use index::Indexer;
pub use queue::Queue;
pub use store::Store;
