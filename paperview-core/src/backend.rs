use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use image::RgbaImage;

use crate::geometry::{Matrix, Point, Quad, Rect};
use crate::location::Location;
use crate::selection::SelectionMode;
use crate::sync::LockTable;

/// A hyperlink area on a page, in page space.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub rect: Rect,
    pub uri: String,
}

/// Where an internal link points: a page and the scroll offset on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkTarget {
    pub location: Location,
    pub scroll: Point,
}

pub struct LoadedPage<C> {
    pub content: C,
    pub bounds: Rect,
    pub links: Vec<Link>,
}

/// Transform snapshot handed to a render job. `ctm` maps page space onto the
/// target buffer; `zoom` and `rotation` are the values it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTransform {
    pub ctm: Matrix,
    pub zoom: f32,
    pub rotation: f32,
}

/// Per-job rendering context. Each job gets a fresh one from
/// [`DocumentBackend::renderer`] so scratch state is never shared between
/// worker threads.
pub trait PageRenderer<C>: Send {
    /// Draws the complete page into `target`, which arrives sized to the
    /// transformed page bounds and cleared to white.
    fn render(&mut self, content: &C, transform: &RenderTransform, target: &mut RgbaImage)
        -> Result<()>;
}

/// The document engine the viewer drives. Implementations share their
/// document structures across the render pool and are expected to guard them
/// with the [`LockTable`] received at open time.
///
/// `highlight_selection` and `search` are capacity bounded: returning exactly
/// `capacity` results means the output was truncated and the caller retries
/// with a larger capacity.
pub trait DocumentBackend: Send + Sync + 'static {
    type Content: Send + Sync + 'static;
    type TextLayout: Send + 'static;
    type Renderer: PageRenderer<Self::Content> + 'static;

    fn count_chapters(&self) -> u32;
    fn count_pages(&self, chapter: u32) -> u32;
    fn load_page(&self, location: Location) -> Result<LoadedPage<Self::Content>>;
    fn text_layout(&self, content: &Self::Content) -> Result<Self::TextLayout>;
    fn renderer(&self) -> Result<Self::Renderer>;
    fn resolve_link(&self, uri: &str) -> Option<LinkTarget>;

    fn is_external_link(&self, uri: &str) -> bool {
        is_external_uri(uri)
    }

    fn highlight_selection(
        &self,
        layout: &Self::TextLayout,
        start: Point,
        end: Point,
        mode: SelectionMode,
        capacity: usize,
    ) -> Vec<Quad>;

    fn search(&self, layout: &Self::TextLayout, query: &str, capacity: usize) -> Vec<Quad>;

    fn snap_selection(
        &self,
        layout: &Self::TextLayout,
        start: &mut Point,
        end: &mut Point,
        mode: SelectionMode,
    );

    fn copy_selection(&self, layout: &Self::TextLayout, start: Point, end: Point) -> String;
}

pub trait DocumentProvider {
    type Backend: DocumentBackend;

    fn open(&self, path: &Path, locks: Arc<LockTable>) -> Result<Self::Backend>;
}

/// True when `uri` starts with a URI scheme (`scheme:`), which is how
/// documents mark links leaving the document.
pub fn is_external_uri(uri: &str) -> bool {
    let Some((scheme, _)) = uri.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
