//! Multi-page text selection.
//!
//! A selection runs from an anchor (where the button went down) to a focus
//! (where the pointer is now); either may come first in document order. Pages
//! strictly between the two ends are selected whole. Each page keeps the quads
//! it highlighted together with the selection generation they belong to, so
//! redrawing an unchanged selection never goes back to the backend.

use tracing::debug;

use crate::backend::DocumentBackend;
use crate::cache::PageCache;
use crate::error::ViewerError;
use crate::geometry::{Point, Quad, Rect};
use crate::location::{DocumentMap, Location};
use crate::page::{collect_quads, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    #[default]
    Chars,
    Words,
    Lines,
}

impl SelectionMode {
    pub fn from_click_count(clicks: u32) -> Self {
        match clicks {
            0 | 1 => SelectionMode::Chars,
            2 => SelectionMode::Words,
            _ => SelectionMode::Lines,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionPoint {
    pub location: Location,
    pub point: Point,
}

impl SelectionPoint {
    pub fn new(location: Location, point: Point) -> Self {
        Self { location, point }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// The pointer moved between press and release.
    Selected,
    /// Press and release happened on the same spot.
    Click,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    anchor: SelectionPoint,
    focus: SelectionPoint,
    mode: SelectionMode,
    active: bool,
    in_progress: bool,
    generation: u64,
}

impl Default for Selection {
    fn default() -> Self {
        let nowhere = SelectionPoint::new(Location::INVALID, Point::default());
        Self {
            anchor: nowhere,
            focus: nowhere,
            mode: SelectionMode::Chars,
            active: false,
            in_progress: false,
            generation: 1,
        }
    }
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn anchor(&self) -> SelectionPoint {
        self.anchor
    }

    pub fn focus(&self) -> SelectionPoint {
        self.focus
    }

    fn touch(&mut self) {
        self.generation += 1;
    }

    pub fn begin(&mut self, at: SelectionPoint, mode: SelectionMode) {
        self.anchor = at;
        self.focus = at;
        self.mode = mode;
        self.in_progress = true;
        self.touch();
    }

    pub fn extend(&mut self, to: SelectionPoint) {
        self.focus = to;
        self.touch();
    }

    /// Replaces both ends, e.g. with the result of word or line snapping.
    pub fn set_range(&mut self, anchor: SelectionPoint, focus: SelectionPoint) {
        self.anchor = anchor;
        self.focus = focus;
        self.touch();
    }

    pub fn finish(&mut self) -> SelectionOutcome {
        self.in_progress = false;
        let outcome = if self.anchor == self.focus {
            self.active = false;
            SelectionOutcome::Click
        } else {
            self.active = true;
            SelectionOutcome::Selected
        };
        self.touch();
        outcome
    }

    pub fn clear(&mut self) {
        self.active = false;
        self.in_progress = false;
        self.touch();
    }

    /// True when there is something to highlight.
    pub fn is_visible(&self) -> bool {
        (self.active || self.in_progress) && self.anchor != self.focus
    }

    fn ordered(&self) -> (SelectionPoint, SelectionPoint) {
        if self.focus.location < self.anchor.location {
            (self.focus, self.anchor)
        } else {
            (self.anchor, self.focus)
        }
    }

    pub fn loc_start(&self) -> Location {
        self.ordered().0.location
    }

    pub fn loc_end(&self) -> Location {
        self.ordered().1.location
    }

    pub fn point_start(&self) -> Point {
        self.ordered().0.point
    }

    pub fn point_end(&self) -> Point {
        self.ordered().1.point
    }

    pub fn contains(&self, location: Location) -> bool {
        let (start, end) = self.ordered();
        start.location <= location && location <= end.location
    }

    /// Range to select on the page at `location`, before snapping. Boundary
    /// pages use the literal end points, interior pages are covered whole.
    pub fn bounds_for_page(&self, location: Location, page_bounds: Rect) -> Option<(Point, Point)> {
        if !self.is_visible() || !self.contains(location) {
            return None;
        }
        let (start, end) = self.ordered();
        let from = if location == start.location {
            start.point
        } else {
            page_bounds.top_left()
        };
        let to = if location == end.location {
            end.point
        } else {
            page_bounds.bottom_right()
        };
        Some((from, to))
    }
}

fn snapped_range<B: DocumentBackend>(
    page: &Page<B>,
    selection: &Selection,
    backend: &B,
) -> Option<(Point, Point)> {
    let (mut from, mut to) = selection.bounds_for_page(page.location(), page.bounds())?;
    backend.snap_selection(page.text(), &mut from, &mut to, selection.mode());
    Some((from, to))
}

/// Highlight quads of `selection` on `page`, recomputed only when the
/// selection changed since they were last stored.
pub fn ensure_selection_quads<'p, B: DocumentBackend>(
    page: &'p mut Page<B>,
    selection: &Selection,
    backend: &B,
    initial_capacity: usize,
) -> &'p [Quad] {
    if !page.selection.is_current(selection.generation()) {
        let quads = match snapped_range(page, selection, backend) {
            Some((from, to)) => collect_quads(initial_capacity, |capacity| {
                backend.highlight_selection(page.text(), from, to, selection.mode(), capacity)
            }),
            None => Vec::new(),
        };
        page.selection.store(selection.generation(), quads);
    }
    page.selection.quads()
}

/// Text of the whole selection, page by page in document order. Pages that
/// cannot be loaded contribute nothing.
pub fn selection_text<B: DocumentBackend>(
    cache: &mut PageCache<B>,
    map: &DocumentMap,
    selection: &Selection,
    backend: &B,
) -> Result<Option<String>, ViewerError> {
    if !selection.is_visible() {
        return Ok(None);
    }
    let end = selection.loc_end();
    let mut text = String::new();
    let mut location = Some(selection.loc_start());
    while let Some(current) = location.filter(|loc| *loc <= end) {
        match cache.get(current) {
            Ok(page) => {
                if let Some((from, to)) = snapped_range(page, selection, backend) {
                    text.push_str(&backend.copy_selection(page.text(), from, to));
                }
            }
            Err(err) if err.is_page_unavailable() => {
                debug!(location = %current, "skipping unavailable page in selection");
            }
            Err(err) => return Err(err),
        }
        location = map.next(current);
    }
    Ok(Some(text))
}
