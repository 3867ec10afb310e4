#![deny(missing_docs)]

//! Core library for Rusty RAG: chat with your PDF documents.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Document acceptance and per-page text extraction.
pub mod extraction;
/// Language-model client abstraction and adapters.
pub mod generation;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Chunking, knowledge base, and answer generation.
pub mod processing;
/// Sessions, their lifecycle, and the session registry.
pub mod session;
