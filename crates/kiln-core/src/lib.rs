//! Core data model for kiln
//!
//! This crate holds everything the build pipeline reads but never
//! mutates: the resource database populated by the overlay ingester, the
//! typed HelmRelease / HelmRepository declarations, and the values tree
//! with its deep-merge semantics.

pub mod database;
pub mod envsubst;
pub mod error;
pub mod ingest;
pub mod release;
pub mod repository;
pub mod resource;
pub mod values;

pub use database::ResourceDatabase;
pub use error::{CoreError, Result};
pub use ingest::Ingester;
pub use release::{
    ChartSpec, CrdPolicy, HelmRelease, Install, ObjectMeta, SourceRef, ValuesReference,
    HELM_RELEASE_GROUP, HELM_RELEASE_KIND,
};
pub use repository::{
    HelmRepository, LocalObjectReference, Provider, RepositoryType, HELM_REPOSITORY_KIND,
    OCI_PREFIX, SOURCE_GROUP,
};
pub use resource::{Document, ResourceId};
pub use values::Values;
