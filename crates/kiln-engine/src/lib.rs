//! Chart rendering for kiln
//!
//! Takes a resolved chart build and a HelmRelease declaration through
//! the dry-run pipeline: values composition, templating against a
//! synthetic install context, post-render transformation and Kustomize
//! fusion into the final YAML stream.

pub mod chart;
pub mod context;
pub mod engine;
pub mod error;
pub mod kustomize;
pub mod postrender;
pub mod render;

pub use chart::{Chart, ChartFile, ChartMetadata};
pub use context::{Capabilities, ChartInfo, InstallContext, KubeVersion, ReleaseInfo};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use kustomize::{fuse, Kustomization};
pub use postrender::{NamespaceTransformer, PostRenderer};
pub use render::{ReleaseRenderer, RenderOptions, RenderedRelease};
