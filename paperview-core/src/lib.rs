//! Core of a continuous-scroll document viewer.
//!
//! The crate knows nothing about file formats or windowing. A
//! [`DocumentBackend`] supplies pages, text layouts and a renderer; the
//! [`Viewer`] turns input into view changes and produces [`Frame`]s that an
//! embedder paints. Rendering happens on a background pool and is announced
//! through [`ViewEvent`]s or a redraw hook.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod geometry;
pub mod links;
pub mod location;
pub mod page;
pub mod render;
pub mod search;
pub mod selection;
pub mod sync;
pub mod transform;
pub mod viewer;

#[cfg(test)]
mod testing;

pub use backend::{
    DocumentBackend, DocumentProvider, Link, LinkTarget, LoadedPage, PageRenderer, RenderTransform,
};
pub use cache::{PageCache, PageHandle};
pub use config::{Size, ViewerConfig};
pub use error::ViewerError;
pub use geometry::{Matrix, Point, Quad, Rect};
pub use links::{LinkActivation, LinkDestination};
pub use location::{DocumentMap, Location};
pub use page::{Page, QuadCache};
pub use render::{PageImage, RedrawHook, RenderPhase, ViewEvent};
pub use search::SearchState;
pub use selection::{Selection, SelectionMode, SelectionOutcome, SelectionPoint};
pub use sync::{JobTracker, LockTable};
pub use transform::ViewState;
pub use viewer::{Command, Frame, Viewer, VisiblePage};
