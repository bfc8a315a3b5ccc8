use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::DocumentBackend;

/// Address of a page inside a document. Ordering is chapter first, then page,
/// which is what every "before/after" decision in the viewer relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub chapter: u32,
    pub page: u32,
}

impl Location {
    /// Tag for empty cache slots; no document can contain it.
    pub const INVALID: Location = Location {
        chapter: u32::MAX,
        page: u32::MAX,
    };

    pub const fn new(chapter: u32, page: u32) -> Self {
        Self { chapter, page }
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}:{}", self.chapter, self.page)
        } else {
            f.write_str("<invalid>")
        }
    }
}

/// Page counts per chapter, captured once when the document is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMap {
    pages_per_chapter: Vec<u32>,
}

impl DocumentMap {
    pub fn new(pages_per_chapter: Vec<u32>) -> Self {
        Self { pages_per_chapter }
    }

    pub fn from_backend<B: DocumentBackend + ?Sized>(backend: &B) -> Self {
        let chapters = backend.count_chapters();
        Self::new((0..chapters).map(|c| backend.count_pages(c)).collect())
    }

    pub fn chapter_count(&self) -> u32 {
        self.pages_per_chapter.len() as u32
    }

    pub fn page_count(&self, chapter: u32) -> u32 {
        self.pages_per_chapter
            .get(chapter as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_pages(&self) -> u64 {
        self.pages_per_chapter.iter().map(|&n| u64::from(n)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_pages() == 0
    }

    pub fn contains(&self, location: Location) -> bool {
        location.page < self.page_count(location.chapter)
    }

    pub fn first(&self) -> Option<Location> {
        self.first_page_from(0)
    }

    pub fn last(&self) -> Option<Location> {
        self.last_page_until(self.chapter_count())
    }

    /// Following page, crossing into the next non-empty chapter. `None` at the
    /// end of the document.
    pub fn next(&self, location: Location) -> Option<Location> {
        if !self.contains(location) {
            return None;
        }
        if location.page + 1 < self.page_count(location.chapter) {
            return Some(Location::new(location.chapter, location.page + 1));
        }
        self.first_page_from(location.chapter + 1)
    }

    /// Preceding page, crossing into the previous non-empty chapter. `None` at
    /// the start of the document.
    pub fn previous(&self, location: Location) -> Option<Location> {
        if !self.contains(location) {
            return None;
        }
        if location.page > 0 {
            return Some(Location::new(location.chapter, location.page - 1));
        }
        self.last_page_until(location.chapter)
    }

    fn first_page_from(&self, chapter: u32) -> Option<Location> {
        (chapter..self.chapter_count())
            .find(|&c| self.page_count(c) > 0)
            .map(|c| Location::new(c, 0))
    }

    fn last_page_until(&self, chapter_exclusive: u32) -> Option<Location> {
        (0..chapter_exclusive)
            .rev()
            .find(|&c| self.page_count(c) > 0)
            .map(|c| Location::new(c, self.page_count(c) - 1))
    }
}
