use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::backend::{DocumentBackend, DocumentProvider, Link};
use crate::cache::PageCache;
use crate::config::{Size, ViewerConfig};
use crate::error::ViewerError;
use crate::geometry::{Matrix, Point, Quad, Rect};
use crate::links::{classify, hit_test, tooltip, LinkActivation, LinkDestination};
use crate::location::{DocumentMap, Location};
use crate::render::{PageImage, RenderScheduler, ViewEvent};
use crate::search::{ensure_search_quads, SearchState};
use crate::selection::{
    ensure_selection_quads, selection_text, Selection, SelectionMode, SelectionOutcome,
    SelectionPoint,
};
use crate::sync::{JobTracker, LockTable};
use crate::transform::{self, layout_size, page_ctm, PageGeometry, ViewState};

/// One page as it should appear on screen. Quads and the link rectangle are
/// already in screen coordinates.
#[derive(Debug, Clone)]
pub struct VisiblePage {
    pub location: Location,
    /// Page space to screen.
    pub ctm: Matrix,
    pub bounds: Rect,
    pub image: PageImage,
    pub selection: Vec<Quad>,
    pub search: Vec<Quad>,
    pub highlighted_link: Option<Rect>,
    /// The page failed to load and is laid out with the fallback size.
    pub unavailable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub pages: Vec<VisiblePage>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ScrollBy { dx: f32, dy: f32 },
    ScrollPages { count: i32 },
    PageStart,
    PageEnd,
    FirstPage,
    LastPage,
    Goto { location: Location },
    ZoomBy { factor: f32 },
    Zoom { zoom: f32 },
    RotateBy { degrees: f32 },
    FitWidth,
    FitHeight,
    Center,
    Search { query: String },
    ClearSearch,
    ClearSelection,
}

/// Page geometry backed by the page cache. Pages that cannot be loaded take
/// the fallback size so layout keeps moving past them.
struct CacheGeometry<'a, B: DocumentBackend> {
    cache: &'a mut PageCache<B>,
    map: &'a DocumentMap,
    fallback: Rect,
}

impl<B: DocumentBackend> PageGeometry for CacheGeometry<'_, B> {
    fn bounds(&mut self, location: Location) -> Rect {
        match self.cache.get(location) {
            Ok(page) => page.bounds(),
            Err(err) => {
                debug!(%location, "using fallback page size: {err}");
                self.fallback
            }
        }
    }

    fn next(&self, location: Location) -> Option<Location> {
        self.map.next(location)
    }

    fn previous(&self, location: Location) -> Option<Location> {
        self.map.previous(location)
    }

    fn first(&self) -> Location {
        self.map.first().unwrap_or(Location::new(0, 0))
    }

    fn last(&self) -> Location {
        self.map.last().unwrap_or(Location::new(0, 0))
    }
}

/// A continuous, vertically scrolling view of one document.
pub struct Viewer<B: DocumentBackend> {
    backend: Arc<B>,
    config: ViewerConfig,
    map: DocumentMap,
    cache: PageCache<B>,
    scheduler: RenderScheduler<B>,
    view: ViewState,
    selection: Selection,
    search: SearchState,
    viewport: Size,
    fallback: Rect,
    hovered: Option<Location>,
}

impl<B: DocumentBackend> Viewer<B> {
    #[instrument(skip(provider, config))]
    pub fn open<P>(provider: &P, path: &Path, config: ViewerConfig) -> Result<Self, ViewerError>
    where
        P: DocumentProvider<Backend = B>,
    {
        config.validate()?;
        let locks = Arc::new(LockTable::new(config.lock_domains));
        let backend = provider
            .open(path, locks)
            .with_context(|| format!("failed to open document {:?}", path))?;
        Self::new(Arc::new(backend), config)
    }

    pub fn new(backend: Arc<B>, config: ViewerConfig) -> Result<Self, ViewerError> {
        config.validate()?;
        let map = DocumentMap::from_backend(&*backend);
        let first = map.first().ok_or(ViewerError::EmptyDocument)?;
        let tracker = Arc::new(JobTracker::new());
        let cache = PageCache::new(
            Arc::clone(&backend),
            config.cache_capacity,
            Arc::clone(&tracker),
            config.eviction_wait(),
            config.eviction_retries,
        );
        let scheduler = RenderScheduler::new(Arc::clone(&backend), config.render_threads(), tracker)?;
        let view = ViewState::new(first, config.page_separator);
        scheduler.publish_generation(view.render_generation);
        info!(
            chapters = map.chapter_count(),
            pages = map.total_pages(),
            render_threads = scheduler.threads(),
            cache_capacity = config.cache_capacity,
            "document opened"
        );
        Ok(Self {
            backend,
            map,
            cache,
            scheduler,
            view,
            selection: Selection::new(),
            search: SearchState::new(),
            viewport: config.viewport,
            fallback: config.fallback_bounds(),
            hovered: None,
            config,
        })
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn document(&self) -> &DocumentMap {
        &self.map
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn location(&self) -> Location {
        self.view.location
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn search(&self) -> &SearchState {
        &self.search
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    pub fn cache(&self) -> &PageCache<B> {
        &self.cache
    }

    fn geometry(&mut self) -> (&mut ViewState, CacheGeometry<'_, B>) {
        (
            &mut self.view,
            CacheGeometry {
                cache: &mut self.cache,
                map: &self.map,
                fallback: self.fallback,
            },
        )
    }

    /// Publishes the render generation when a view change bumped it.
    fn sync_generation(&self, before: u64) -> bool {
        if self.view.render_generation == before {
            return false;
        }
        debug!(
            generation = self.view.render_generation,
            zoom = self.view.zoom,
            rotation = self.view.rotation,
            "render generation bumped"
        );
        self.scheduler.publish_generation(self.view.render_generation);
        true
    }

    /// Lays out every page from the current one down to the bottom of the
    /// viewport, queueing renders as needed.
    #[instrument(skip(self), fields(location = %self.view.location, generation = self.view.render_generation))]
    pub fn frame(&mut self) -> Result<Frame, ViewerError> {
        let bottom = self.view.scroll.y + self.viewport.height / self.view.zoom;
        let mut pages = Vec::new();
        let mut top = 0.0;
        let mut location = Some(self.view.location);
        while let Some(current) = location.filter(|_| top < bottom) {
            let page = self.frame_page(current, top)?;
            top += layout_size(&page.bounds, self.view.rotation).1 + self.view.separator;
            pages.push(page);
            location = self.map.next(current);
        }
        Ok(Frame { pages })
    }

    fn frame_page(&mut self, location: Location, top: f32) -> Result<VisiblePage, ViewerError> {
        let image = match self
            .scheduler
            .request_with_neighbours(&mut self.cache, &self.map, &self.view, location)
        {
            Ok(image) => image,
            Err(err) if err.is_page_unavailable() => {
                return Ok(self.placeholder(location, top, PageImage::Unavailable));
            }
            Err(err) if err.is_backpressure() => {
                debug!(%location, "no cache slot for visible page: {err}");
                return Ok(self.placeholder(location, top, PageImage::Pending));
            }
            Err(err) => return Err(err),
        };

        let capacity = self.config.highlight_capacity;
        let page = self.cache.get(location)?;
        let bounds = page.bounds();
        let ctm = page_ctm(&bounds, &self.view, top);
        let to_screen = |quads: &[Quad]| quads.iter().map(|q| q.transform(&ctm)).collect::<Vec<_>>();
        let selection = to_screen(ensure_selection_quads(page, &self.selection, &*self.backend, capacity));
        let search = to_screen(ensure_search_quads(page, &self.search, &*self.backend, capacity));
        let highlighted_link = page.highlighted_link().map(|link| link.rect.transform(&ctm));
        Ok(VisiblePage {
            location,
            ctm,
            bounds,
            image,
            selection,
            search,
            highlighted_link,
            unavailable: false,
        })
    }

    /// A visible page laid out with the fallback size and no highlights.
    fn placeholder(&self, location: Location, top: f32, image: PageImage) -> VisiblePage {
        VisiblePage {
            location,
            ctm: page_ctm(&self.fallback, &self.view, top),
            bounds: self.fallback,
            unavailable: matches!(image, PageImage::Unavailable),
            image,
            selection: Vec::new(),
            search: Vec::new(),
            highlighted_link: None,
        }
    }

    /// Scrolls by `delta` layout units.
    pub fn scroll_by(&mut self, delta: Point) {
        let (view, mut geometry) = self.geometry();
        transform::scroll_by(view, &mut geometry, delta);
    }

    /// Scrolls by a fraction of the viewport size.
    pub fn scroll_relatively(&mut self, fraction: Point) {
        let viewport = (self.viewport.width, self.viewport.height);
        let (view, mut geometry) = self.geometry();
        transform::scroll_relatively(view, &mut geometry, fraction, viewport);
    }

    pub fn scroll_whole_pages(&mut self, count: i32) {
        let height = self.viewport.height;
        let (view, mut geometry) = self.geometry();
        transform::scroll_whole_pages(view, &mut geometry, count, height);
    }

    pub fn scroll_to_page_start(&mut self) {
        transform::scroll_to_page_start(&mut self.view);
    }

    pub fn scroll_to_page_end(&mut self) {
        let height = self.viewport.height;
        let (view, mut geometry) = self.geometry();
        transform::scroll_to_page_end(view, &mut geometry, height);
    }

    pub fn goto_first_page(&mut self) {
        let (view, mut geometry) = self.geometry();
        transform::goto_first_page(view, &mut geometry);
    }

    pub fn goto_last_page(&mut self) {
        let height = self.viewport.height;
        let (view, mut geometry) = self.geometry();
        transform::goto_last_page(view, &mut geometry, height);
    }

    pub fn goto(&mut self, location: Location) -> Result<(), ViewerError> {
        if !self.map.contains(location) {
            return Err(ViewerError::InvalidLocation(location));
        }
        let (view, mut geometry) = self.geometry();
        transform::goto(view, &mut geometry, location, Point::default());
        Ok(())
    }

    /// Zooms so the content under the screen `point` stays put. The zoom is
    /// clamped to the configured range.
    pub fn zoom_around_point(&mut self, zoom: f32, point: Point) -> bool {
        let zoom = self.config.clamp_zoom(zoom);
        let before = self.view.render_generation;
        let (view, mut geometry) = self.geometry();
        transform::zoom_around_point(view, &mut geometry, zoom, point);
        self.sync_generation(before)
    }

    pub fn zoom_relatively(&mut self, factor: f32, point: Point) -> bool {
        self.zoom_around_point(self.view.zoom * factor, point)
    }

    pub fn zoom_to_center(&mut self, zoom: f32) -> bool {
        let center = Point::new(self.viewport.width / 2.0, self.viewport.height / 2.0);
        self.zoom_around_point(zoom, center)
    }

    pub fn set_rotation(&mut self, degrees: f32) -> bool {
        let before = self.view.render_generation;
        let (view, mut geometry) = self.geometry();
        if view.set_rotation(degrees) {
            transform::scroll_pages(view, &mut geometry);
        }
        self.sync_generation(before)
    }

    pub fn rotate_by(&mut self, degrees: f32) -> bool {
        self.set_rotation(self.view.rotation + degrees)
    }

    /// Zooms so the current page fills the viewport width.
    pub fn fit_width(&mut self) -> bool {
        let width = self.current_layout_size().0;
        let zoom = self.config.clamp_zoom(self.viewport.width / width);
        let before = self.view.render_generation;
        self.view.set_zoom(zoom);
        self.view.scroll.x = 0.0;
        let (view, mut geometry) = self.geometry();
        transform::scroll_pages(view, &mut geometry);
        self.sync_generation(before)
    }

    /// Zooms so the whole current page fits the viewport height and centers
    /// it horizontally.
    pub fn fit_height(&mut self) -> bool {
        let height = self.current_layout_size().1;
        let zoom = self.config.clamp_zoom(self.viewport.height / height);
        let before = self.view.render_generation;
        self.view.set_zoom(zoom);
        self.view.scroll.y = 0.0;
        self.center();
        self.sync_generation(before)
    }

    pub fn center(&mut self) {
        let width = self.viewport.width;
        let (view, mut geometry) = self.geometry();
        transform::center_page(view, &mut geometry, width);
    }

    fn current_layout_size(&mut self) -> (f32, f32) {
        let location = self.view.location;
        let rotation = self.view.rotation;
        let (_, mut geometry) = self.geometry();
        layout_size(&geometry.bounds(location), rotation)
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        if width > 0.0 && height > 0.0 {
            self.viewport = Size::new(width, height);
        }
    }

    /// Resolves a screen point to a point in the space of the page below it.
    pub fn trace_point(&mut self, point: Point) -> (Point, Location) {
        let (view, mut geometry) = self.geometry();
        transform::trace_point_to_page(view, &mut geometry, point)
    }

    /// Page space to screen for `location`, if it can be reached from the
    /// current page.
    pub fn page_transform(&mut self, location: Location) -> Option<Matrix> {
        let (view, mut geometry) = self.geometry();
        transform::page_screen_ctm(view, &mut geometry, location)
    }

    /// Starts a selection at the screen `point`. Double and triple clicks
    /// select whole words and lines right away.
    pub fn press(&mut self, point: Point, click_count: u32) {
        let (page_point, location) = self.trace_point(point);
        let mode = SelectionMode::from_click_count(click_count);
        self.selection
            .begin(SelectionPoint::new(location, page_point), mode);
        if mode == SelectionMode::Chars {
            return;
        }
        match self.cache.get(location) {
            Ok(page) => {
                let (mut start, mut end) = (page_point, page_point);
                self.backend
                    .snap_selection(page.text(), &mut start, &mut end, mode);
                self.selection.set_range(
                    SelectionPoint::new(location, start),
                    SelectionPoint::new(location, end),
                );
            }
            Err(err) => debug!(%location, "cannot snap selection: {err}"),
        }
    }

    pub fn drag(&mut self, point: Point) {
        if !self.selection.is_in_progress() {
            return;
        }
        let (page_point, location) = self.trace_point(point);
        self.selection.extend(SelectionPoint::new(location, page_point));
    }

    /// Ends the selection. A release on the spot of the press is a click and
    /// follows the link under the pointer, if any.
    pub fn release(&mut self, point: Point) -> Result<Option<LinkActivation>, ViewerError> {
        if self.selection.finish() == SelectionOutcome::Selected {
            return Ok(None);
        }
        self.update_hovered_link(point)?;
        let link = self.hovered_link().cloned();
        match link {
            Some(link) => Ok(Some(self.follow_link(&link))),
            None => Ok(None),
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection_text(&mut self) -> Result<Option<String>, ViewerError> {
        selection_text(&mut self.cache, &self.map, &self.selection, &*self.backend)
    }

    pub fn set_search(&mut self, query: &str) -> bool {
        self.search.set(query)
    }

    pub fn clear_search(&mut self) -> bool {
        self.search.clear()
    }

    /// Tracks the link under the screen `point`. Returns true when the
    /// highlighted link changed.
    pub fn update_hovered_link(&mut self, point: Point) -> Result<bool, ViewerError> {
        let (page_point, location) = self.trace_point(point);
        let hit = match self.cache.get(location) {
            Ok(page) => hit_test(page.links(), page_point).map(|index| (location, index)),
            Err(err) if err.is_page_unavailable() => None,
            Err(err) => return Err(err),
        };
        let current = self.hovered_index();
        if hit == current {
            return Ok(false);
        }
        self.set_hovered(hit);
        Ok(true)
    }

    fn hovered_index(&self) -> Option<(Location, usize)> {
        let location = self.hovered?;
        let index = self.cache.peek(location)?.highlighted_link?;
        Some((location, index))
    }

    fn set_hovered(&mut self, hit: Option<(Location, usize)>) {
        if let Some(page) = self.hovered.and_then(|loc| self.cache.peek_mut(loc)) {
            page.highlighted_link = None;
        }
        self.hovered = None;
        if let Some((location, index)) = hit {
            if let Some(page) = self.cache.peek_mut(location) {
                page.highlighted_link = Some(index);
                self.hovered = Some(location);
            }
        }
    }

    pub fn hovered_link(&self) -> Option<&Link> {
        self.cache.peek(self.hovered?)?.highlighted_link()
    }

    /// Hover text for the highlighted link on the page below `point`.
    pub fn link_tooltip(&mut self, point: Point) -> Option<String> {
        let (_, location) = self.trace_point(point);
        let link = self.cache.peek(location)?.highlighted_link()?;
        let destination = classify(&*self.backend, &self.map, link);
        tooltip(
            &destination,
            self.view.location.chapter,
            self.map.chapter_count(),
        )
    }

    /// Jumps to the target of an internal link, centering the page when it is
    /// narrower than the viewport. External links are handed back.
    #[instrument(skip(self), fields(uri = %link.uri))]
    pub fn follow_link(&mut self, link: &Link) -> LinkActivation {
        match classify(&*self.backend, &self.map, link) {
            LinkDestination::External(uri) => LinkActivation::External(uri),
            LinkDestination::Invalid => {
                warn!("ignoring link with an invalid target");
                LinkActivation::Invalid
            }
            LinkDestination::Internal(target) => {
                self.set_hovered(None);
                let width = self.viewport.width;
                let (view, mut geometry) = self.geometry();
                transform::goto(view, &mut geometry, target.location, target.scroll);
                let page_width = layout_size(&geometry.bounds(view.location), view.rotation).0 * view.zoom;
                if width > page_width {
                    transform::center_page(view, &mut geometry, width);
                }
                debug!(location = %target.location, "followed link");
                LinkActivation::Followed(target.location)
            }
        }
    }

    /// Applies a navigation command. Returns true when the view should be
    /// redrawn.
    pub fn apply(&mut self, command: Command) -> Result<bool, ViewerError> {
        let before = (self.view.clone(), self.search.generation(), self.selection.generation());
        match command {
            Command::ScrollBy { dx, dy } => self.scroll_by(Point::new(dx, dy)),
            Command::ScrollPages { count } => self.scroll_whole_pages(count),
            Command::PageStart => self.scroll_to_page_start(),
            Command::PageEnd => self.scroll_to_page_end(),
            Command::FirstPage => self.goto_first_page(),
            Command::LastPage => self.goto_last_page(),
            Command::Goto { location } => self.goto(location)?,
            Command::ZoomBy { factor } => {
                self.zoom_to_center(self.view.zoom * factor);
            }
            Command::Zoom { zoom } => {
                self.zoom_to_center(zoom);
            }
            Command::RotateBy { degrees } => {
                self.rotate_by(degrees);
            }
            Command::FitWidth => {
                self.fit_width();
            }
            Command::FitHeight => {
                self.fit_height();
            }
            Command::Center => self.center(),
            Command::Search { query } => {
                self.set_search(&query);
            }
            Command::ClearSearch => {
                self.clear_search();
            }
            Command::ClearSelection => self.clear_selection(),
        }
        Ok(before != (self.view.clone(), self.search.generation(), self.selection.generation()))
    }

    /// Redraw notifications from finished renders.
    pub fn events(&self) -> Arc<Mutex<Vec<ViewEvent>>> {
        self.scheduler.events()
    }

    /// Calls `hook` from a render thread whenever a page finished rendering.
    pub fn on_redraw(&self, hook: impl Fn(Location) + Send + Sync + 'static) {
        self.scheduler.set_redraw_hook(Some(Arc::new(hook)));
    }

    pub fn renders_in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }
}
