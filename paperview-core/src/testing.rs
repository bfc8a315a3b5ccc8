//! Scripted document backend shared by the unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::{Rgba, RgbaImage};
use parking_lot::{Condvar, Mutex};

use crate::backend::{
    DocumentBackend, DocumentProvider, Link, LinkTarget, LoadedPage, PageRenderer, RenderTransform,
};
use crate::cache::PageCache;
use crate::geometry::{Point, Quad, Rect};
use crate::location::Location;
use crate::selection::SelectionMode;
use crate::sync::{JobTracker, LockTable};

/// Colour every pixel of a rendered fake page is filled with.
pub(crate) fn page_color(location: Location) -> Rgba<u8> {
    Rgba([location.chapter as u8, location.page as u8, 0, 255])
}

pub(crate) fn test_cache(
    backend: &Arc<FakeBackend>,
    capacity: usize,
    tracker: &Arc<JobTracker>,
) -> PageCache<FakeBackend> {
    PageCache::new(
        Arc::clone(backend),
        capacity,
        Arc::clone(tracker),
        Duration::from_millis(5),
        200,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenderFault {
    Error,
    Panic,
}

#[derive(Debug, Clone)]
pub(crate) struct FakePage {
    size: (f32, f32),
    links: Vec<Link>,
    matches: usize,
    fail_load: bool,
    fault: Option<RenderFault>,
}

impl FakePage {
    pub(crate) fn new(width: f32, height: f32) -> Self {
        Self {
            size: (width, height),
            links: Vec::new(),
            matches: 0,
            fail_load: false,
            fault: None,
        }
    }

    pub(crate) fn with_link(mut self, rect: Rect, uri: &str) -> Self {
        self.links.push(Link {
            rect,
            uri: uri.to_string(),
        });
        self
    }

    pub(crate) fn with_matches(mut self, matches: usize) -> Self {
        self.matches = matches;
        self
    }

    pub(crate) fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub(crate) fn failing_render(mut self) -> Self {
        self.fault = Some(RenderFault::Error);
        self
    }

    pub(crate) fn panicking_render(mut self) -> Self {
        self.fault = Some(RenderFault::Panic);
        self
    }
}

/// Holds render jobs back until opened.
#[derive(Default)]
pub(crate) struct RenderGate {
    closed: Mutex<bool>,
    changed: Condvar,
}

impl RenderGate {
    pub(crate) fn open(&self) {
        *self.closed.lock() = false;
        self.changed.notify_all();
    }

    pub(crate) fn close(&self) {
        *self.closed.lock() = true;
    }

    fn pass(&self) {
        let mut closed = self.closed.lock();
        while *closed {
            self.changed.wait(&mut closed);
        }
    }
}

pub(crate) struct FakeContent {
    location: Location,
    bounds: Rect,
    matches: usize,
    fault: Option<RenderFault>,
}

pub(crate) struct FakeLayout {
    location: Location,
    bounds: Rect,
    matches: usize,
}

pub(crate) struct FakeRenderer {
    gate: Arc<RenderGate>,
    renders: Arc<AtomicUsize>,
    locks: Option<Arc<LockTable>>,
    exclusive: Arc<ExclusiveCheck>,
}

/// Counts renders that overlapped while they should have held lock domain 0.
#[derive(Default)]
pub(crate) struct ExclusiveCheck {
    inside: AtomicBool,
    violations: AtomicUsize,
}

impl ExclusiveCheck {
    fn enter(&self) {
        if self.inside.swap(true, Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn leave(&self) {
        self.inside.store(false, Ordering::SeqCst);
    }
}

impl FakeRenderer {
    fn paint(&self, content: &FakeContent, target: &mut RgbaImage) -> Result<()> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        match content.fault {
            Some(RenderFault::Error) => bail!("cannot render page {}", content.location),
            Some(RenderFault::Panic) => panic!("renderer blew up on page {}", content.location),
            None => {
                let color = page_color(content.location);
                for pixel in target.pixels_mut() {
                    *pixel = color;
                }
                Ok(())
            }
        }
    }
}

impl PageRenderer<FakeContent> for FakeRenderer {
    fn render(
        &mut self,
        content: &FakeContent,
        _transform: &RenderTransform,
        target: &mut RgbaImage,
    ) -> Result<()> {
        self.gate.pass();
        let Some(locks) = self.locks.as_ref() else {
            return self.paint(content, target);
        };
        let _guard = locks.lock(0);
        self.exclusive.enter();
        thread::sleep(Duration::from_millis(2));
        let painted = self.paint(content, target);
        if !locks.is_locked(0) {
            self.exclusive.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.exclusive.leave();
        painted
    }
}

/// In-memory document with scripted pages.
///
/// Links use `#chapter,page` URIs. Selection highlights are one quad spanning
/// the requested range; word snapping rounds to a 10 unit grid and line
/// snapping widens to the page edges.
pub(crate) struct FakeBackend {
    chapters: Vec<Vec<FakePage>>,
    gate: Arc<RenderGate>,
    locks: Option<Arc<LockTable>>,
    loads: AtomicUsize,
    renders: Arc<AtomicUsize>,
    exclusive: Arc<ExclusiveCheck>,
    highlights: AtomicUsize,
    searches: AtomicUsize,
}

impl FakeBackend {
    pub(crate) fn new(chapters: Vec<Vec<FakePage>>) -> Self {
        Self {
            chapters,
            gate: Arc::new(RenderGate::default()),
            locks: None,
            loads: AtomicUsize::new(0),
            renders: Arc::new(AtomicUsize::new(0)),
            exclusive: Arc::new(ExclusiveCheck::default()),
            highlights: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
        }
    }

    /// One chapter of `pages` identical pages.
    pub(crate) fn uniform(pages: u32, width: f32, height: f32) -> Self {
        Self::new(vec![(0..pages).map(|_| FakePage::new(width, height)).collect()])
    }

    pub(crate) fn with_page(mut self, location: Location, page: FakePage) -> Self {
        self.chapters[location.chapter as usize][location.page as usize] = page;
        self
    }

    pub(crate) fn with_locks(mut self, locks: Arc<LockTable>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub(crate) fn locks(&self) -> Option<&Arc<LockTable>> {
        self.locks.as_ref()
    }

    /// Closes the render gate and hands it out.
    pub(crate) fn gate(&self) -> Arc<RenderGate> {
        self.gate.close();
        Arc::clone(&self.gate)
    }

    pub(crate) fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub(crate) fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    /// Renders that ran while another render was inside lock domain 0.
    pub(crate) fn lock_violations(&self) -> usize {
        self.exclusive.violations.load(Ordering::SeqCst)
    }

    pub(crate) fn highlight_count(&self) -> usize {
        self.highlights.load(Ordering::SeqCst)
    }

    pub(crate) fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

impl DocumentBackend for FakeBackend {
    type Content = FakeContent;
    type TextLayout = FakeLayout;
    type Renderer = FakeRenderer;

    fn count_chapters(&self) -> u32 {
        self.chapters.len() as u32
    }

    fn count_pages(&self, chapter: u32) -> u32 {
        self.chapters
            .get(chapter as usize)
            .map_or(0, |pages| pages.len() as u32)
    }

    fn load_page(&self, location: Location) -> Result<LoadedPage<FakeContent>> {
        let _guard = self.locks.as_ref().map(|locks| locks.lock(0));
        self.loads.fetch_add(1, Ordering::SeqCst);
        let page = self
            .chapters
            .get(location.chapter as usize)
            .and_then(|pages| pages.get(location.page as usize))
            .with_context(|| format!("no page {}", location))?;
        if page.fail_load {
            bail!("page {} is corrupt", location);
        }
        let bounds = Rect::from_size(page.size.0, page.size.1);
        Ok(LoadedPage {
            content: FakeContent {
                location,
                bounds,
                matches: page.matches,
                fault: page.fault,
            },
            bounds,
            links: page.links.clone(),
        })
    }

    fn text_layout(&self, content: &FakeContent) -> Result<FakeLayout> {
        Ok(FakeLayout {
            location: content.location,
            bounds: content.bounds,
            matches: content.matches,
        })
    }

    fn renderer(&self) -> Result<FakeRenderer> {
        Ok(FakeRenderer {
            gate: Arc::clone(&self.gate),
            renders: Arc::clone(&self.renders),
            locks: self.locks.clone(),
            exclusive: Arc::clone(&self.exclusive),
        })
    }

    fn resolve_link(&self, uri: &str) -> Option<LinkTarget> {
        let (chapter, page) = uri.strip_prefix('#')?.split_once(',')?;
        Some(LinkTarget {
            location: Location::new(chapter.parse().ok()?, page.parse().ok()?),
            scroll: Point::default(),
        })
    }

    fn highlight_selection(
        &self,
        _layout: &FakeLayout,
        start: Point,
        end: Point,
        _mode: SelectionMode,
        capacity: usize,
    ) -> Vec<Quad> {
        self.highlights.fetch_add(1, Ordering::SeqCst);
        if start == end || capacity == 0 {
            return Vec::new();
        }
        vec![Quad::from_rect(Rect::new(
            start.x.min(end.x),
            start.y.min(end.y),
            start.x.max(end.x),
            start.y.max(end.y),
        ))]
    }

    fn search(&self, layout: &FakeLayout, _query: &str, capacity: usize) -> Vec<Quad> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        (0..layout.matches.min(capacity))
            .map(|i| Quad::from_rect(Rect::new(0.0, i as f32, 10.0, i as f32 + 1.0)))
            .collect()
    }

    fn snap_selection(&self, layout: &FakeLayout, start: &mut Point, end: &mut Point, mode: SelectionMode) {
        match mode {
            SelectionMode::Chars => {}
            SelectionMode::Words => {
                start.x = (start.x / 10.0).floor() * 10.0;
                end.x = (end.x / 10.0).floor() * 10.0 + 10.0;
            }
            SelectionMode::Lines => {
                start.x = layout.bounds.x0;
                end.x = layout.bounds.x1;
            }
        }
    }

    fn copy_selection(&self, layout: &FakeLayout, start: Point, end: Point) -> String {
        format!(
            "[{} {},{}-{},{}]",
            layout.location, start.x, start.y, end.x, end.y
        )
    }
}

/// Opens `.pdf` paths as a single chapter of US letter pages.
pub(crate) struct FakeProvider {
    pub(crate) pages: u32,
}

impl DocumentProvider for FakeProvider {
    type Backend = FakeBackend;

    fn open(&self, path: &Path, locks: Arc<LockTable>) -> Result<FakeBackend> {
        if path.extension().and_then(|ext| ext.to_str()) != Some("pdf") {
            bail!("unsupported document type: {}", path.display());
        }
        Ok(FakeBackend::uniform(self.pages, 612.0, 792.0).with_locks(locks))
    }
}
