use std::sync::Arc;

use anyhow::{Context, Result};
use image::RgbaImage;
use parking_lot::Mutex;

use crate::backend::{DocumentBackend, Link};
use crate::geometry::{Quad, Rect};
use crate::location::Location;
use crate::render::{RenderPhase, RenderSlot};

/// Generation stored in freshly reset caches. Live generations start at 1.
pub(crate) const STALE_GENERATION: u64 = 0;

/// Highlight geometry tagged with the generation it was computed for.
#[derive(Debug, Clone, Default)]
pub struct QuadCache {
    generation: u64,
    quads: Vec<Quad>,
}

impl QuadCache {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn quads(&self) -> &[Quad] {
        &self.quads
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub(crate) fn store(&mut self, generation: u64, quads: Vec<Quad>) {
        self.generation = generation;
        self.quads = quads;
    }
}

/// Interim image synthesized from an outdated render while the real one is
/// in flight.
pub(crate) struct Approximation {
    pub(crate) generation: u64,
    pub(crate) source_generation: u64,
    pub(crate) image: Arc<RgbaImage>,
}

/// One resident page and everything derived from it.
pub struct Page<B: DocumentBackend> {
    location: Location,
    content: Arc<B::Content>,
    text: B::TextLayout,
    links: Vec<Link>,
    bounds: Rect,
    pub(crate) rendered: Arc<Mutex<RenderSlot>>,
    pub(crate) approximation: Option<Approximation>,
    pub(crate) selection: QuadCache,
    pub(crate) search: QuadCache,
    pub(crate) highlighted_link: Option<usize>,
}

impl<B: DocumentBackend> Page<B> {
    pub(crate) fn load(backend: &B, location: Location) -> Result<Self> {
        let loaded = backend
            .load_page(location)
            .with_context(|| format!("failed to load page {}", location))?;
        let text = backend
            .text_layout(&loaded.content)
            .with_context(|| format!("failed to extract text layout for page {}", location))?;
        Ok(Self {
            location,
            content: Arc::new(loaded.content),
            text,
            links: loaded.links,
            bounds: loaded.bounds,
            rendered: Arc::new(Mutex::new(RenderSlot::default())),
            approximation: None,
            selection: QuadCache {
                generation: STALE_GENERATION,
                quads: Vec::new(),
            },
            search: QuadCache {
                generation: STALE_GENERATION,
                quads: Vec::new(),
            },
            highlighted_link: None,
        })
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn content(&self) -> &Arc<B::Content> {
        &self.content
    }

    pub fn text(&self) -> &B::TextLayout {
        &self.text
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn highlighted_link(&self) -> Option<&Link> {
        self.highlighted_link.and_then(|index| self.links.get(index))
    }

    pub fn selection_quads(&self) -> &QuadCache {
        &self.selection
    }

    pub fn search_quads(&self) -> &QuadCache {
        &self.search
    }

    /// True while a render is queued or running for this page.
    pub fn is_busy(&self) -> bool {
        self.rendered.lock().is_busy()
    }

    /// True while a started render job writes into this page.
    pub fn is_rendering(&self) -> bool {
        self.rendered.lock().is_rendering()
    }

    pub fn render_state(&self) -> RenderPhase {
        self.rendered.lock().phase()
    }
}

/// Runs a capacity-bounded backend query, doubling the capacity until the
/// backend returns fewer results than it was allowed to.
pub(crate) fn collect_quads(initial: usize, mut query: impl FnMut(usize) -> Vec<Quad>) -> Vec<Quad> {
    let mut capacity = initial.max(1);
    loop {
        let quads = query(capacity);
        if quads.len() < capacity || capacity == usize::MAX {
            return quads;
        }
        capacity = capacity.saturating_mul(2);
    }
}
