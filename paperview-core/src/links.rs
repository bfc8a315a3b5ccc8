use crate::backend::{DocumentBackend, Link, LinkTarget};
use crate::geometry::Point;
use crate::location::{DocumentMap, Location};

/// Index of the first link whose area contains `point`, both in page space.
pub fn hit_test(links: &[Link], point: Point) -> Option<usize> {
    links.iter().position(|link| link.rect.contains(point))
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkDestination {
    External(String),
    Internal(LinkTarget),
    Invalid,
}

/// Decides where `link` leads. Internal targets outside the document count as
/// invalid.
pub fn classify<B: DocumentBackend + ?Sized>(backend: &B, map: &DocumentMap, link: &Link) -> LinkDestination {
    if backend.is_external_link(&link.uri) {
        return LinkDestination::External(link.uri.clone());
    }
    match backend.resolve_link(&link.uri) {
        Some(target) if map.contains(target.location) => LinkDestination::Internal(target),
        _ => LinkDestination::Invalid,
    }
}

/// Hover text for a link. Chapters and pages are shown 1-based; the chapter is
/// left out when the document has only one or the target is in `current_chapter`.
pub fn tooltip(destination: &LinkDestination, current_chapter: u32, chapter_count: u32) -> Option<String> {
    match destination {
        LinkDestination::External(uri) => Some(format!("↪{uri}")),
        LinkDestination::Internal(LinkTarget { location, .. }) if chapter_count > 1 => {
            if location.chapter == current_chapter {
                Some(format!("↪Page {} in current chapter", location.page + 1))
            } else {
                Some(format!(
                    "↪Chapter {}, page {}",
                    location.chapter + 1,
                    location.page + 1
                ))
            }
        }
        LinkDestination::Internal(LinkTarget { location, .. }) => {
            Some(format!("↪Page {}", location.page + 1))
        }
        LinkDestination::Invalid => None,
    }
}

/// What happened when a link was clicked.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkActivation {
    /// The link leaves the document; opening it is up to the embedder.
    External(String),
    Followed(Location),
    Invalid,
}
