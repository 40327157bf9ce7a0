//! Concurrent build engine for kiln
//!
//! Walks release declarations, acquires charts through single-flight
//! caches, renders each release and assembles the output stream. The
//! artifact caches are the only mutable shared state; the resource
//! database is read-only throughout.

pub mod chart_builder;
pub mod error;
pub mod graph;
pub mod orchestrator;

pub use chart_builder::{ChartBuild, ChartBuilder, ChartKey, DefaultSourceFactory, SourceFactory};
pub use error::{BuildError, ReleaseFailure, Result};
pub use graph::DependencyGraph;
pub use orchestrator::{BuildConfig, BuildReport, Orchestrator, ReleaseOutput};
