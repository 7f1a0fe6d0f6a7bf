//! # Tenant RAG
//!
//! A multi-tenant retrieval-augmented generation service. Each tenant
//! uploads a spreadsheet; its rows are embedded into a per-tenant vector
//! index, and questions against that tenant are answered by a language
//! model conditioned on the most similar rows.
//!
//! ## Architecture
//!
//! ```text
//! upload ──▶ loader ──▶ records ──▶ embedding ──▶ store (per tenant)
//!                                                   │
//! query ──▶ embedding ──▶ retriever ◀───────────────┘
//!                            │
//!                            ▼
//!                       generation ──▶ answer
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! trag ingest alice ./products.xlsx
//! trag query alice "How much does the two-person tent cost?"
//! trag query alice "tent" --link
//! trag serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed error taxonomy |
//! | [`models`] | Core data types |
//! | [`tenant`] | Tenant storage keys and filename sanitization |
//! | [`loader`] | CSV / TSV / XLSX loading |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index and its on-disk format |
//! | [`store`] | Per-tenant index lifecycle |
//! | [`retriever`] | Top-K cosine search |
//! | [`generation`] | Prompt building and chat-model providers |
//! | [`pipeline`] | The query pipeline |
//! | [`service`] | Operations exposed by the CLI and server |
//! | [`server`] | HTTP server |

pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
mod http;
pub mod index;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod retriever;
pub mod server;
pub mod service;
pub mod store;
pub mod tenant;
