#![deny(missing_docs)]

//! Core library for the docpipe document-ingestion server.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Document entities, lifecycle state machine, and persistence seam.
pub mod document;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics counters.
pub mod metrics;
/// Best-effort progress notification channel.
pub mod notify;
/// The ingestion pipeline stages and orchestration.
pub mod pipeline;
/// Object storage client abstraction.
pub mod storage;
/// Vector store client and chunk record payloads.
pub mod vectors;
