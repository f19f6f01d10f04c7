//! Collection of job listings from rendered pages.
//!
//! This crate provides:
//! - [`surface`]: the [`RenderSurface`] seam and its factory
//! - [`adapters`]: per-source extraction of candidate records
//! - [`engine`]: the incremental [`Collector`] for virtualized lists
//! - [`static_surface`]: an HTTP-backed surface for server-rendered pages

pub mod adapters;
pub mod engine;
pub mod static_surface;
pub mod surface;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapters::{ExtractionAdapter, SelectorAdapter};
pub use engine::{CollectionOutcome, CollectionSession, Collector, Termination};
pub use static_surface::{StaticSurface, StaticSurfaceFactory};
pub use surface::{
    ContainerMetrics, ItemHandle, PROBE_SCRIPT, RenderSurface, SurfaceFactory, bounded,
};
