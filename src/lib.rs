//! # docbot
//!
//! Document-grounded question answering: ingest `.docx` files, index them
//! as embedding vectors, and answer questions with a language model using
//! the closest chunks as context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌───────────────┐
//! │ .docx    │──▶│ Extract │──▶│ Chunk + Embed │──▶ EmbeddingIndex
//! │ docs dir │   │         │   │               │    (flat | remote)
//! └──────────┘   └─────────┘   └───────────────┘          │
//!                                                         ▼
//!   question ──▶ Retriever ──▶ PromptBuilder ──▶ AnswerGenerator ──▶ answer
//! ```
//!
//! [`bot::ChatBot`] ties the stages together and is what the CLI and the
//! HTTP server drive.
//!
//! ## Quick Start
//!
//! ```bash
//! docbot ingest                 # index ./docs
//! docbot ask "Quais planos existem?"
//! docbot serve                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | `.docx` text extraction |
//! | [`chunk`] | Word-window chunking and character splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Flat and remote embedding indexes |
//! | [`retriever`] | Top-k context retrieval |
//! | [`prompt`] | Prompt templates |
//! | [`generate`] | Language-model answer generation |
//! | [`bot`] | Ingestion and question-answering orchestrator |
//! | [`server`] | HTTP server |

pub mod bot;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod index;
pub mod models;
pub mod prompt;
pub mod retriever;
pub mod server;
