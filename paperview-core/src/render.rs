//! Background page rendering.
//!
//! Every resident page owns a [`RenderSlot`] shared with at most the jobs
//! rendering it. The foreground thread marks the slot queued and records the
//! requested generation before dispatching; a finished job only commits when
//! that generation is still the one requested and still the one published by
//! the view. Superseded jobs run to completion and their output is dropped.
//!
//! Only a job that has started pins its page in the cache. Queued jobs hold
//! their own references to the content and the slot, so their page may be
//! evicted; a later request for it starts over with a fresh slot.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::backend::{DocumentBackend, PageRenderer, RenderTransform};
use crate::cache::PageCache;
use crate::error::ViewerError;
use crate::geometry::{Matrix, Point};
use crate::location::{DocumentMap, Location};
use crate::page::{Approximation, Page, STALE_GENERATION};
use crate::sync::JobTracker;
use crate::transform::{pixel_size, scale_ctm, ViewState};

const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderPhase {
    #[default]
    Idle,
    Queued,
    Rendering,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub image: Arc<RgbaImage>,
    pub generation: u64,
    pub zoom: f32,
    pub rotation: f32,
}

/// Render state of one page, shared between the foreground and render jobs.
#[derive(Debug, Default)]
pub struct RenderSlot {
    requested: u64,
    phase: RenderPhase,
    image: Option<RenderedImage>,
}

impl RenderSlot {
    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    pub fn requested(&self) -> u64 {
        self.requested
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.phase, RenderPhase::Queued | RenderPhase::Rendering)
    }

    /// A job is running against this slot right now.
    pub fn is_rendering(&self) -> bool {
        self.phase == RenderPhase::Rendering
    }

    pub fn image(&self) -> Option<&RenderedImage> {
        self.image.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn force_phase(&mut self, phase: RenderPhase) {
        self.phase = phase;
    }
}

/// What a frame can show for one page.
#[derive(Debug, Clone)]
pub enum PageImage {
    Ready(Arc<RgbaImage>),
    /// An older render resampled to the current zoom and rotation.
    Approximate(Arc<RgbaImage>),
    /// A render is in flight and there is nothing to show yet.
    Pending,
    Unavailable,
}

impl PageImage {
    pub fn image(&self) -> Option<&Arc<RgbaImage>> {
        match self {
            PageImage::Ready(image) | PageImage::Approximate(image) => Some(image),
            PageImage::Pending | PageImage::Unavailable => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, PageImage::Ready(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    RedrawNeeded(Location),
}

pub type RedrawHook = Arc<dyn Fn(Location) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Committed,
    Superseded,
    Stale,
    Failed,
}

struct RenderJob<C> {
    location: Location,
    generation: u64,
    transform: RenderTransform,
    size: (u32, u32),
    content: Arc<C>,
    slot: Arc<Mutex<RenderSlot>>,
}

pub struct RenderScheduler<B: DocumentBackend> {
    backend: Arc<B>,
    pool: rayon::ThreadPool,
    tracker: Arc<JobTracker>,
    published: Arc<AtomicU64>,
    events: Arc<Mutex<Vec<ViewEvent>>>,
    hook: Arc<Mutex<Option<RedrawHook>>>,
}

impl<B: DocumentBackend> RenderScheduler<B> {
    pub fn new(backend: Arc<B>, threads: usize, tracker: Arc<JobTracker>) -> Result<Self, ViewerError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|index| format!("paperview-render-{index}"))
            .build()?;
        Ok(Self {
            backend,
            pool,
            tracker,
            published: Arc::new(AtomicU64::new(STALE_GENERATION)),
            events: Arc::new(Mutex::new(Vec::new())),
            hook: Arc::new(Mutex::new(None)),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Announces the view's current render generation. Jobs finishing for any
    /// other generation are discarded.
    pub fn publish_generation(&self, generation: u64) {
        self.published.store(generation, Ordering::Release);
    }

    pub fn published_generation(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    pub fn events(&self) -> Arc<Mutex<Vec<ViewEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn set_redraw_hook(&self, hook: Option<RedrawHook>) {
        *self.hook.lock() = hook;
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight()
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.tracker.wait_idle(timeout)
    }

    /// Returns whatever can be shown for `page` right now and queues a render
    /// when the page has not been requested at the current generation.
    /// `required` pages get an approximation while their render is pending.
    #[instrument(skip_all, fields(location = %page.location(), generation = view.render_generation, required = required))]
    pub fn request(&self, page: &mut Page<B>, view: &ViewState, required: bool) -> PageImage {
        let generation = view.render_generation;
        let queue = {
            let mut slot = page.rendered.lock();
            if slot.requested != generation {
                slot.requested = generation;
                slot.phase = RenderPhase::Queued;
                true
            } else {
                false
            }
        };
        if queue {
            self.spawn(page, view);
        }

        let (previous, settled) = {
            let slot = page.rendered.lock();
            if let Some(done) = slot.image.as_ref().filter(|img| img.generation == generation) {
                return PageImage::Ready(Arc::clone(&done.image));
            }
            (
                slot.image.clone(),
                matches!(slot.phase, RenderPhase::Failed | RenderPhase::Idle),
            )
        };

        match previous {
            Some(previous) if required => PageImage::Approximate(approximate(page, &previous, view)),
            _ if settled => PageImage::Unavailable,
            _ => PageImage::Pending,
        }
    }

    /// Prefetches the pages around `location` and then resolves the image of
    /// `location` itself. Neighbours that cannot be loaded or cannot get a
    /// cache slot are skipped.
    pub fn request_with_neighbours(
        &self,
        cache: &mut PageCache<B>,
        map: &DocumentMap,
        view: &ViewState,
        location: Location,
    ) -> Result<PageImage, ViewerError> {
        for neighbour in [map.next(location), map.previous(location)].into_iter().flatten() {
            match cache.get(neighbour) {
                Ok(page) => {
                    self.request(page, view, false);
                }
                Err(err) if err.is_page_unavailable() || err.is_backpressure() => {
                    debug!(%neighbour, "skipping prefetch: {err}");
                }
                Err(err) => return Err(err),
            }
        }
        let page = cache.get(location)?;
        Ok(self.request(page, view, true))
    }

    fn spawn(&self, page: &Page<B>, view: &ViewState) {
        let bounds = page.bounds();
        let ctm = scale_ctm(&bounds, view.zoom, view.rotation);
        let job = RenderJob {
            location: page.location(),
            generation: view.render_generation,
            transform: RenderTransform {
                ctm,
                zoom: view.zoom,
                rotation: view.rotation,
            },
            size: pixel_size(&bounds, &ctm),
            content: Arc::clone(page.content()),
            slot: Arc::clone(&page.rendered),
        };
        debug!(location = %job.location, generation = job.generation, width = job.size.0, height = job.size.1, "queueing render");

        let backend = Arc::clone(&self.backend);
        let tracker = Arc::clone(&self.tracker);
        let published = Arc::clone(&self.published);
        let events = Arc::clone(&self.events);
        let hook = Arc::clone(&self.hook);
        tracker.start();
        self.pool.spawn(move || {
            let location = job.location;
            let outcome = job.run(&*backend, &published);
            if outcome == JobOutcome::Committed {
                events.lock().push(ViewEvent::RedrawNeeded(location));
                let hook = hook.lock().clone();
                if let Some(hook) = hook {
                    if panic::catch_unwind(AssertUnwindSafe(|| hook(location))).is_err() {
                        warn!(%location, "redraw hook panicked");
                    }
                }
            }
            tracker.finish();
        });
    }
}

impl<C: Send + Sync + 'static> RenderJob<C> {
    fn run<B>(self, backend: &B, published: &AtomicU64) -> JobOutcome
    where
        B: DocumentBackend<Content = C>,
    {
        {
            let mut slot = self.slot.lock();
            if slot.requested == self.generation {
                slot.phase = RenderPhase::Rendering;
            }
        }

        let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
            render_page(backend, self.content.as_ref(), &self.transform, self.size)
        }))
        .unwrap_or_else(|_| Err(anyhow!("renderer panicked")));

        let mut slot = self.slot.lock();
        if slot.requested != self.generation {
            debug!(location = %self.location, generation = self.generation, "dropping superseded render");
            return JobOutcome::Superseded;
        }
        match rendered {
            Err(err) => {
                slot.phase = RenderPhase::Failed;
                warn!(location = %self.location, generation = self.generation, "render failed: {err:#}");
                JobOutcome::Failed
            }
            Ok(_) if published.load(Ordering::Acquire) != self.generation => {
                slot.phase = RenderPhase::Idle;
                debug!(location = %self.location, generation = self.generation, "dropping stale render");
                JobOutcome::Stale
            }
            Ok(image) => {
                slot.image = Some(RenderedImage {
                    image: Arc::new(image),
                    generation: self.generation,
                    zoom: self.transform.zoom,
                    rotation: self.transform.rotation,
                });
                slot.phase = RenderPhase::Ready;
                debug!(location = %self.location, generation = self.generation, "render committed");
                JobOutcome::Committed
            }
        }
    }
}

fn render_page<B: DocumentBackend>(
    backend: &B,
    content: &B::Content,
    transform: &RenderTransform,
    (width, height): (u32, u32),
) -> Result<RgbaImage> {
    let mut renderer = backend
        .renderer()
        .context("failed to create a render context")?;
    let mut target = RgbaImage::from_pixel(width, height, PAPER);
    renderer.render(content, transform, &mut target)?;
    Ok(target)
}

/// Builds (or reuses) the interim image for `page` from an older render.
fn approximate<B: DocumentBackend>(
    page: &mut Page<B>,
    previous: &RenderedImage,
    view: &ViewState,
) -> Arc<RgbaImage> {
    if let Some(cached) = page.approximation.as_ref() {
        if cached.generation == view.render_generation
            && cached.source_generation == previous.generation
        {
            return Arc::clone(&cached.image);
        }
    }
    let bounds = page.bounds();
    let source_ctm = scale_ctm(&bounds, previous.zoom, previous.rotation);
    let target_ctm = scale_ctm(&bounds, view.zoom, view.rotation);
    let image = Arc::new(resample(
        &previous.image,
        &source_ctm,
        &target_ctm,
        pixel_size(&bounds, &target_ctm),
    ));
    page.approximation = Some(Approximation {
        generation: view.render_generation,
        source_generation: previous.generation,
        image: Arc::clone(&image),
    });
    image
}

/// Nearest-neighbour resampling of an image rendered at `source_ctm` into a
/// buffer laid out for `target_ctm`. Pixels the source does not cover stay
/// white.
pub fn resample(
    source: &RgbaImage,
    source_ctm: &Matrix,
    target_ctm: &Matrix,
    (width, height): (u32, u32),
) -> RgbaImage {
    let mut target = RgbaImage::from_pixel(width, height, PAPER);
    let Some(target_inverse) = target_ctm.invert() else {
        return target;
    };
    let to_source = target_inverse.concat(source_ctm);
    for (x, y, pixel) in target.enumerate_pixels_mut() {
        let p = Point::new(x as f32 + 0.5, y as f32 + 0.5).transform(&to_source);
        if p.x < 0.0 || p.y < 0.0 {
            continue;
        }
        let (sx, sy) = (p.x as u32, p.y as u32);
        if sx < source.width() && sy < source.height() {
            *pixel = *source.get_pixel(sx, sy);
        }
    }
    target
}
