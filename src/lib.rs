//! # askdoc
//!
//! Single-document retrieval-augmented question answering.
//!
//! Upload one document, have it indexed for semantic search, and ask
//! questions answered from its content. The crate is the indexing and
//! retrieval core plus thin adapters around it (text extraction, answer
//! generation, an HTTP API and a CLI).
//!
//! ## Architecture
//!
//! ```text
//!  upload ─▶ extract ─▶ normalize ─▶ chunk ─▶ embed (bounded pool) ─▶ FlatIndex
//!                                                                       │ atomic swap
//!                                                                       ▼
//!  query  ─▶ normalize ─▶ embed ─▶ search top-K ─▶ assemble context ─▶ generate
//! ```
//!
//! A [`session::Session`] owns the active document and its index; a
//! [`session::SessionRegistry`] keeps one session per client id.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline error type |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF / DOCX / text extraction |
//! | [`normalize`] | Text cleanup before chunking |
//! | [`chunk`] | Overlapping, boundary-aware chunking |
//! | [`embedding`] | Embedding providers with retry and timeout |
//! | [`index`] | In-memory vector index |
//! | [`session`] | Index lifecycle (upload, clear, query) |
//! | [`retrieve`] | Query → top-K chunks |
//! | [`context`] | Top-K chunks → bounded context string |
//! | [`generate`] | Context → answer via an LLM |
//! | [`progress`] | Indexing progress on stderr |
//! | [`server`] | HTTP API |

pub mod ask;
pub mod chunk;
pub mod chunk_cmd;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod index;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod retrieve;
pub mod server;
pub mod session;
