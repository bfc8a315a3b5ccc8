//! Coordinate transforms between page space, the virtual scroll axis and the
//! screen.
//!
//! Pages are stacked vertically, separated by `ViewState::separator`. The
//! scroll offset is expressed in layout units (screen pixels divided by the
//! zoom) relative to the top-left corner of the current page, and is kept in
//! `[0, page_height + separator)` by [`scroll_pages`]. Layout sizes are the
//! page bounds after rotation, so a landscape page turned 90 degrees takes
//! the vertical room of its width.

use crate::geometry::{normalize_degrees, Matrix, Point, Rect};
use crate::location::Location;

/// Pages never take less vertical room than this, which keeps every walk along
/// the scroll axis strictly advancing.
const MIN_LAYOUT_EXTENT: f32 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub location: Location,
    pub scroll: Point,
    pub zoom: f32,
    pub rotation: f32,
    pub separator: f32,
    /// Bumped on zoom and rotation changes only; scrolling never invalidates
    /// rendered pages.
    pub render_generation: u64,
}

impl ViewState {
    pub fn new(location: Location, separator: f32) -> Self {
        Self {
            location,
            scroll: Point::default(),
            zoom: 1.0,
            rotation: 0.0,
            separator,
            render_generation: 1,
        }
    }

    pub fn set_zoom(&mut self, zoom: f32) -> bool {
        if !zoom.is_finite() || zoom <= 0.0 || zoom == self.zoom {
            return false;
        }
        self.zoom = zoom;
        self.render_generation += 1;
        true
    }

    pub fn set_rotation(&mut self, degrees: f32) -> bool {
        let degrees = normalize_degrees(degrees);
        if degrees == self.rotation {
            return false;
        }
        self.rotation = degrees;
        self.render_generation += 1;
        true
    }
}

/// What the transform functions need to know about the document: page bounds
/// and the order of pages.
pub trait PageGeometry {
    fn bounds(&mut self, location: Location) -> Rect;
    fn next(&self, location: Location) -> Option<Location>;
    fn previous(&self, location: Location) -> Option<Location>;
    fn first(&self) -> Location;
    fn last(&self) -> Location;
}

/// Page space to unscrolled page pixels: rotate about the origin, scale by the
/// zoom, then shift so the transformed bounds start at (0, 0).
pub fn scale_ctm(bounds: &Rect, zoom: f32, rotation: f32) -> Matrix {
    let m = Matrix::rotate(rotation).concat(&Matrix::scale(zoom, zoom));
    let moved = bounds.transform(&m);
    m.concat(&Matrix::translate(-moved.x0, -moved.y0))
}

/// Size of the page after rotation, in layout units.
pub fn layout_size(bounds: &Rect, rotation: f32) -> (f32, f32) {
    let rotated = bounds.transform(&Matrix::rotate(rotation));
    (
        rotated.width().max(MIN_LAYOUT_EXTENT),
        rotated.height().max(MIN_LAYOUT_EXTENT),
    )
}

/// Page space to screen for a page whose top edge is `top` layout units below
/// the top of the current page.
pub fn page_ctm(bounds: &Rect, view: &ViewState, top: f32) -> Matrix {
    scale_ctm(bounds, view.zoom, view.rotation).concat(&Matrix::translate(
        -view.scroll.x * view.zoom,
        (top - view.scroll.y) * view.zoom,
    ))
}

/// Pixel dimensions of the rendered page at the given transform.
pub fn pixel_size(bounds: &Rect, ctm: &Matrix) -> (u32, u32) {
    let area = bounds.transform(ctm);
    (
        area.width().round().max(1.0) as u32,
        area.height().round().max(1.0) as u32,
    )
}

fn layout_height<G: PageGeometry + ?Sized>(view: &ViewState, geometry: &mut G, loc: Location) -> f32 {
    layout_size(&geometry.bounds(loc), view.rotation).1
}

/// Resolves a screen point to the page below it and the point in that page's
/// space. Walks forward from the current page; points past the end of the
/// document resolve against the last page.
pub fn trace_point_to_page<G: PageGeometry + ?Sized>(
    view: &ViewState,
    geometry: &mut G,
    point: Point,
) -> (Point, Location) {
    let y = point.y / view.zoom + view.scroll.y;
    let mut location = view.location;
    let mut top = 0.0;
    loop {
        let bounds = geometry.bounds(location);
        let height = layout_size(&bounds, view.rotation).1;
        let next = match geometry.next(location) {
            Some(next) if y >= top + height + view.separator => next,
            _ => {
                let inverse = page_ctm(&bounds, view, top)
                    .invert()
                    .unwrap_or(Matrix::IDENTITY);
                return (point.transform(&inverse), location);
            }
        };
        top += height + view.separator;
        location = next;
    }
}

/// Signed distance, in layout units, from the top of the current page to the
/// top of `target`. `None` when `target` cannot be reached by walking the
/// document.
pub fn layout_offset<G: PageGeometry + ?Sized>(
    view: &ViewState,
    geometry: &mut G,
    target: Location,
) -> Option<f32> {
    let mut location = view.location;
    let mut offset = 0.0;
    if target >= location {
        while location != target {
            offset += layout_height(view, geometry, location) + view.separator;
            location = geometry.next(location)?;
        }
    } else {
        while location != target {
            location = geometry.previous(location)?;
            offset -= layout_height(view, geometry, location) + view.separator;
        }
    }
    Some(offset)
}

/// Page-to-screen transform of any page, current or not.
pub fn page_screen_ctm<G: PageGeometry + ?Sized>(
    view: &ViewState,
    geometry: &mut G,
    location: Location,
) -> Option<Matrix> {
    let top = layout_offset(view, geometry, location)?;
    let bounds = geometry.bounds(location);
    Some(page_ctm(&bounds, view, top))
}

/// Moves to neighbouring pages until `scroll.y` lies within the current page
/// and its trailing separator. Clamps to the top of the first page and to the
/// bottom of the last one.
pub fn scroll_pages<G: PageGeometry + ?Sized>(view: &mut ViewState, geometry: &mut G) {
    if !view.scroll.y.is_finite() {
        view.scroll.y = 0.0;
    }
    if !view.scroll.x.is_finite() {
        view.scroll.x = 0.0;
    }
    loop {
        let height = layout_height(view, geometry, view.location);
        if view.scroll.y < height + view.separator {
            break;
        }
        match geometry.next(view.location) {
            Some(next) => {
                view.scroll.y -= height + view.separator;
                view.location = next;
            }
            None => {
                view.scroll.y = height;
                break;
            }
        }
    }
    while view.scroll.y < 0.0 {
        match geometry.previous(view.location) {
            Some(previous) => {
                view.location = previous;
                view.scroll.y += layout_height(view, geometry, previous) + view.separator;
            }
            None => {
                view.scroll.y = 0.0;
                break;
            }
        }
    }
}

pub fn scroll_by<G: PageGeometry + ?Sized>(view: &mut ViewState, geometry: &mut G, delta: Point) {
    view.scroll.x += delta.x;
    view.scroll.y += delta.y;
    scroll_pages(view, geometry);
}

/// Scrolls by a fraction of the viewport: `fraction.y = 0.1` moves down by a
/// tenth of the viewport height.
pub fn scroll_relatively<G: PageGeometry + ?Sized>(
    view: &mut ViewState,
    geometry: &mut G,
    fraction: Point,
    viewport: (f32, f32),
) {
    let delta = Point::new(
        fraction.x * viewport.0 / view.zoom,
        fraction.y * viewport.1 / view.zoom,
    );
    scroll_by(view, geometry, delta);
}

pub fn scroll_to_page_start(view: &mut ViewState) {
    view.scroll.y = 0.0;
}

/// Aligns the bottom of the current page with the bottom of the viewport.
pub fn scroll_to_page_end<G: PageGeometry + ?Sized>(
    view: &mut ViewState,
    geometry: &mut G,
    viewport_height: f32,
) {
    let height = layout_height(view, geometry, view.location);
    view.scroll.y = height - viewport_height / view.zoom;
    scroll_pages(view, geometry);
}

/// Moves `count` pages forward (positive) or backward (negative), keeping the
/// offset within the page. Running into either end of the document scrolls to
/// the end of the last page or the start of the first one.
pub fn scroll_whole_pages<G: PageGeometry + ?Sized>(
    view: &mut ViewState,
    geometry: &mut G,
    count: i32,
    viewport_height: f32,
) {
    for _ in 0..count.unsigned_abs() {
        let neighbour = if count > 0 {
            geometry.next(view.location)
        } else {
            geometry.previous(view.location)
        };
        match neighbour {
            Some(location) => view.location = location,
            None if count > 0 => {
                scroll_to_page_end(view, geometry, viewport_height);
                return;
            }
            None => {
                scroll_to_page_start(view);
                return;
            }
        }
    }
    scroll_pages(view, geometry);
}

pub fn goto_first_page<G: PageGeometry + ?Sized>(view: &mut ViewState, geometry: &mut G) {
    view.location = geometry.first();
    view.scroll.y = 0.0;
}

pub fn goto_last_page<G: PageGeometry + ?Sized>(
    view: &mut ViewState,
    geometry: &mut G,
    viewport_height: f32,
) {
    view.location = geometry.last();
    scroll_to_page_end(view, geometry, viewport_height);
}

pub fn goto<G: PageGeometry + ?Sized>(
    view: &mut ViewState,
    geometry: &mut G,
    location: Location,
    scroll: Point,
) {
    view.location = location;
    view.scroll = scroll;
    scroll_pages(view, geometry);
}

/// Sets `scroll.x` so the current page is horizontally centered in a viewport
/// `viewport_width` pixels wide.
pub fn center_page<G: PageGeometry + ?Sized>(
    view: &mut ViewState,
    geometry: &mut G,
    viewport_width: f32,
) {
    let width = layout_size(&geometry.bounds(view.location), view.rotation).0 * view.zoom;
    view.scroll.x = (width - viewport_width) / (2.0 * view.zoom);
}

/// Changes the zoom while keeping whatever is under `point` on the same
/// screen pixel. Returns false when the zoom did not change.
pub fn zoom_around_point<G: PageGeometry + ?Sized>(
    view: &mut ViewState,
    geometry: &mut G,
    new_zoom: f32,
    point: Point,
) -> bool {
    let (page_point, location) = trace_point_to_page(view, geometry, point);
    let offset = layout_offset(view, geometry, location).unwrap_or(0.0);
    if !view.set_zoom(new_zoom) {
        return false;
    }
    let bounds = geometry.bounds(location);
    let scaled = page_point.transform(&scale_ctm(&bounds, view.zoom, view.rotation));
    view.scroll.x = (scaled.x - point.x) / view.zoom;
    view.scroll.y = offset + (scaled.y - point.y) / view.zoom;
    scroll_pages(view, geometry);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::DocumentMap;

    struct Sizes {
        map: DocumentMap,
        sizes: Vec<Vec<(f32, f32)>>,
    }

    impl Sizes {
        fn uniform(pages: usize, width: f32, height: f32) -> Self {
            Self::chapters(vec![vec![(width, height); pages]])
        }

        fn chapters(sizes: Vec<Vec<(f32, f32)>>) -> Self {
            let map = DocumentMap::new(sizes.iter().map(|c| c.len() as u32).collect());
            Self { map, sizes }
        }
    }

    impl PageGeometry for Sizes {
        fn bounds(&mut self, location: Location) -> Rect {
            let (w, h) = self.sizes[location.chapter as usize][location.page as usize];
            Rect::from_size(w, h)
        }

        fn next(&self, location: Location) -> Option<Location> {
            self.map.next(location)
        }

        fn previous(&self, location: Location) -> Option<Location> {
            self.map.previous(location)
        }

        fn first(&self) -> Location {
            self.map.first().unwrap()
        }

        fn last(&self) -> Location {
            self.map.last().unwrap()
        }
    }

    fn view() -> ViewState {
        ViewState::new(Location::new(0, 0), 18.0)
    }

    fn assert_close(a: Point, b: Point) {
        assert!(a.distance(b) < 1e-2, "expected {:?}, got {:?}", b, a);
    }

    #[test]
    fn scrolling_one_page_and_separator_lands_on_next_page() {
        let mut geometry = Sizes::uniform(3, 612.0, 792.0);
        let mut view = view();
        scroll_by(&mut view, &mut geometry, Point::new(0.0, 810.0));
        assert_eq!(view.location, Location::new(0, 1));
        assert_eq!(view.scroll.y, 0.0);
    }

    #[test]
    fn scroll_pages_is_idempotent() {
        let mut geometry = Sizes::chapters(vec![
            vec![(600.0, 800.0), (600.0, 300.0)],
            vec![(400.0, 500.0)],
        ]);
        for start in [-2000.0, -10.0, 0.0, 799.0, 1130.0, 5000.0] {
            let mut view = view();
            view.location = Location::new(0, 1);
            view.scroll.y = start;
            scroll_pages(&mut view, &mut geometry);
            let once = view.clone();
            scroll_pages(&mut view, &mut geometry);
            assert_eq!(view, once, "start offset {start}");
        }
    }

    #[test]
    fn scrolling_clamps_at_document_ends() {
        let mut geometry = Sizes::uniform(2, 612.0, 792.0);
        let mut view = view();
        scroll_by(&mut view, &mut geometry, Point::new(0.0, -50.0));
        assert_eq!((view.location, view.scroll.y), (Location::new(0, 0), 0.0));

        scroll_by(&mut view, &mut geometry, Point::new(0.0, 10_000.0));
        assert_eq!((view.location, view.scroll.y), (Location::new(0, 1), 792.0));
    }

    #[test]
    fn scrolling_crosses_chapters_with_varying_heights() {
        let mut geometry = Sizes::chapters(vec![vec![(100.0, 100.0)], vec![(100.0, 400.0)]]);
        let mut view = view();
        view.separator = 10.0;
        scroll_by(&mut view, &mut geometry, Point::new(0.0, 150.0));
        assert_eq!(view.location, Location::new(1, 0));
        assert_eq!(view.scroll.y, 40.0);

        scroll_by(&mut view, &mut geometry, Point::new(0.0, -60.0));
        assert_eq!(view.location, Location::new(0, 0));
        assert_eq!(view.scroll.y, 90.0);
    }

    #[test]
    fn trace_round_trips_through_page_transform() {
        let mut geometry = Sizes::chapters(vec![
            vec![(612.0, 792.0), (612.0, 300.0)],
            vec![(500.0, 900.0), (700.0, 400.0)],
        ]);
        for rotation in [0.0, 90.0, 180.0, 270.0] {
            for zoom in [0.5, 1.0, 2.25] {
                let mut view = view();
                view.zoom = zoom;
                view.rotation = rotation;
                view.scroll = Point::new(-12.0, 140.0);
                for screen in [
                    Point::new(10.0, 10.0),
                    Point::new(300.0, 700.0),
                    Point::new(50.0, 1600.0),
                ] {
                    let (page_point, location) = trace_point_to_page(&view, &mut geometry, screen);
                    let ctm = page_screen_ctm(&view, &mut geometry, location).unwrap();
                    assert_close(page_point.transform(&ctm), screen);
                }
            }
        }
    }

    #[test]
    fn trace_picks_page_below_separator_boundary() {
        let mut geometry = Sizes::uniform(3, 612.0, 792.0);
        let view = view();
        let (_, location) = trace_point_to_page(&view, &mut geometry, Point::new(5.0, 805.0));
        assert_eq!(location, Location::new(0, 0));
        let (point, location) = trace_point_to_page(&view, &mut geometry, Point::new(5.0, 815.0));
        assert_eq!(location, Location::new(0, 1));
        assert_close(point, Point::new(5.0, 5.0));
        let (_, location) = trace_point_to_page(&view, &mut geometry, Point::new(5.0, 1e7));
        assert_eq!(location, Location::new(0, 2));
    }

    #[test]
    fn layout_offset_walks_both_directions() {
        let mut geometry = Sizes::uniform(4, 100.0, 200.0);
        let mut view = view();
        view.location = Location::new(0, 2);
        assert_eq!(layout_offset(&view, &mut geometry, Location::new(0, 3)), Some(218.0));
        assert_eq!(layout_offset(&view, &mut geometry, Location::new(0, 0)), Some(-436.0));
        assert_eq!(layout_offset(&view, &mut geometry, Location::new(5, 0)), None);
    }

    #[test]
    fn zoom_keeps_point_under_cursor() {
        let mut geometry = Sizes::uniform(5, 612.0, 792.0);
        let mut view = view();
        view.scroll = Point::new(20.0, 700.0);
        let cursor = Point::new(300.0, 400.0);
        let (before, before_loc) = trace_point_to_page(&view, &mut geometry, cursor);
        let generation = view.render_generation;

        assert!(zoom_around_point(&mut view, &mut geometry, 2.0, cursor));
        assert_eq!(view.render_generation, generation + 1);
        let ctm = page_screen_ctm(&view, &mut geometry, before_loc).unwrap();
        assert_close(before.transform(&ctm), cursor);
        assert!(view.scroll.y >= 0.0 && view.scroll.y < 792.0 + 18.0);

        assert!(!zoom_around_point(&mut view, &mut geometry, 2.0, cursor));
        assert_eq!(view.render_generation, generation + 1);
    }

    #[test]
    fn center_page_splits_margin() {
        let mut geometry = Sizes::uniform(1, 600.0, 800.0);
        let mut view = view();
        view.zoom = 2.0;
        center_page(&mut view, &mut geometry, 1000.0);
        // 1200 px page in a 1000 px viewport leaves 100 px hanging off each side.
        assert_eq!(view.scroll.x, 50.0);
        let left = page_ctm(&geometry.bounds(view.location), &view, 0.0);
        assert_close(Point::new(0.0, 0.0).transform(&left), Point::new(-100.0, 0.0));
    }

    #[test]
    fn whole_page_scrolling_stops_at_ends() {
        let mut geometry = Sizes::uniform(3, 612.0, 792.0);
        let mut view = view();
        view.scroll.y = 100.0;
        scroll_whole_pages(&mut view, &mut geometry, 1, 600.0);
        assert_eq!((view.location, view.scroll.y), (Location::new(0, 1), 100.0));
        scroll_whole_pages(&mut view, &mut geometry, 5, 600.0);
        assert_eq!((view.location, view.scroll.y), (Location::new(0, 2), 192.0));
        scroll_whole_pages(&mut view, &mut geometry, -9, 600.0);
        assert_eq!((view.location, view.scroll.y), (Location::new(0, 0), 0.0));
    }

    #[test]
    fn first_and_last_page_jumps() {
        let mut geometry = Sizes::chapters(vec![vec![(10.0, 10.0)], vec![(612.0, 792.0); 2]]);
        let mut view = view();
        goto_last_page(&mut view, &mut geometry, 500.0);
        assert_eq!(view.location, Location::new(1, 1));
        assert_eq!(view.scroll.y, 292.0);
        goto_first_page(&mut view, &mut geometry);
        assert_eq!((view.location, view.scroll.y), (Location::new(0, 0), 0.0));
    }

    #[test]
    fn rotation_swaps_layout_axes() {
        let bounds = Rect::from_size(612.0, 792.0);
        assert_eq!(layout_size(&bounds, 90.0), (792.0, 612.0));
        let ctm = scale_ctm(&bounds, 2.0, 90.0);
        assert_eq!(bounds.transform(&ctm), Rect::new(0.0, 0.0, 1584.0, 1224.0));
        assert_eq!(pixel_size(&bounds, &ctm), (1584, 1224));
    }

    #[test]
    fn generation_moves_only_on_zoom_or_rotation() {
        let mut geometry = Sizes::uniform(3, 612.0, 792.0);
        let mut view = view();
        scroll_by(&mut view, &mut geometry, Point::new(3.0, 900.0));
        assert_eq!(view.render_generation, 1);
        assert!(view.set_rotation(450.0));
        assert_eq!(view.rotation, 90.0);
        assert!(!view.set_rotation(90.0));
        assert!(!view.set_zoom(0.0));
        assert_eq!(view.render_generation, 2);
    }
}
