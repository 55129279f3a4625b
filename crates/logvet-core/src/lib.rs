//! logvet-core: Core library for logvet
//!
//! logvet validates the quality of a semantic log-search backend by replaying
//! live log lines against it and, for misses, sweeping the source tree with
//! ripgrep to separate genuine index gaps (false negatives) from dynamic,
//! unindexable messages.
//!
//! # Architecture
//!
//! ```text
//! Log Store ──→ Orchestrator ──→ Search Backend
//!                    │                 │ miss
//!                    │                 ▼
//!                    │           Code Fallback (ripgrep)
//!                    ▼
//!           Checkpoint + Metrics ──→ JSON / Markdown / CSV
//! ```
//!
//! # Modules
//!
//! - `logstore`: Log store client (ground-truth candidate logs)
//! - `backend`: Search backend client (system under test)
//! - `fallback`: Keyword extraction, ripgrep sweep, similarity scoring
//! - `orchestrator`: Bounded-concurrency resolution pipeline
//! - `checkpoint`: Resumable run state with atomic persistence
//! - `metrics`: Aggregate statistics over a completed run
//! - `report`: JSON / Markdown / CSV artifact generation
//! - `retry`: Exponential backoff for the network clients
//! - `config`: logvet.toml loading and validation
//! - `logging`: tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

use std::future::Future;
use std::pin::Pin;

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod logstore;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod report;
pub mod retry;

/// Boxed future used by the object-safe collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use error::{Error, Result};
