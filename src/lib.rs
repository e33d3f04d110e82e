//! # Research Assistant
//!
//! Retrieval-augmented question answering over a directory of research
//! papers.
//!
//! Papers are split into chunks, embedded and kept in an in-memory vector
//! index that is persisted to a SQLite snapshot. A question is embedded,
//! the closest chunks are placed in a prompt, and a language model answers
//! from them. The chunks are returned as sources with every answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Chunk+Embed │──▶│ VectorIndex  │◀──▶ SQLite snapshot
//! │ PDF/DOCX │   │             │   │ (in memory)  │
//! └──────────┘   └─────────────┘   └──────┬───────┘
//!                                         │ top_k
//!                 ┌──────────────┐   ┌────▼─────────┐   ┌───────────┐
//!                 │ Conversation │──▶│ QueryService │──▶│ Generator │
//!                 │  (ra chat)   │   └──────────────┘   └───────────┘
//!                 └──────────────┘
//! ```
//!
//! Components are wired together explicitly: `main` builds one
//! [`manager::IndexManager`] and hands it to the [`query::QueryService`],
//! which the [`chat::Conversation`] owns.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error categories |
//! | [`models`] | Core data types |
//! | [`loader`] | Walks the papers directory |
//! | [`extract`] | PDF and DOCX text extraction |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Answer generation, complete or streamed |
//! | [`index`] | In-memory vector index |
//! | [`store`] | Index persistence |
//! | [`manager`] | Index lifecycle |
//! | [`query`] | Retrieval and prompting |
//! | [`chat`] | Conversation history and settings |
//! | [`repl`] | Interactive terminal session |
//! | [`stats`] | Index statistics |
//! | [`progress`] | Build progress reporting |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Snapshot schema |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
mod http;
pub mod index;
pub mod llm;
pub mod loader;
pub mod manager;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod query;
pub mod repl;
pub mod stats;
pub mod store;
