use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::backend::DocumentBackend;
use crate::error::ViewerError;
use crate::location::Location;
use crate::page::Page;
use crate::sync::JobTracker;

enum Slot<B: DocumentBackend> {
    Empty,
    Loaded(Box<Page<B>>),
    Failed(String),
}

impl<B: DocumentBackend> Slot<B> {
    fn is_pinned(&self) -> bool {
        match self {
            Slot::Loaded(page) => page.is_rendering(),
            Slot::Empty | Slot::Failed(_) => false,
        }
    }
}

/// Refers to a cache slot as it was when the handle was issued. Reloading the
/// slot invalidates the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHandle {
    slot: usize,
    version: u64,
}

/// Fixed-size page store. Slots are filled in rotation: the next victim is the
/// slot loaded longest ago, skipping any a running render job writes into.
pub struct PageCache<B: DocumentBackend> {
    backend: Arc<B>,
    slots: Vec<Slot<B>>,
    locations: Vec<Location>,
    versions: Vec<u64>,
    first: usize,
    tracker: Arc<JobTracker>,
    eviction_wait: Duration,
    eviction_retries: u32,
}

impl<B: DocumentBackend> PageCache<B> {
    pub fn new(
        backend: Arc<B>,
        capacity: usize,
        tracker: Arc<JobTracker>,
        eviction_wait: Duration,
        eviction_retries: u32,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            backend,
            slots: (0..capacity).map(|_| Slot::Empty).collect(),
            locations: vec![Location::INVALID; capacity],
            versions: vec![0; capacity],
            first: 0,
            tracker,
            eviction_wait,
            eviction_retries,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots holding a page or a load failure.
    pub fn len(&self) -> usize {
        self.locations.iter().filter(|loc| loc.is_valid()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, location: Location) -> bool {
        self.find(location).is_some()
    }

    /// Locations currently tagged in the cache, in slot order.
    pub fn resident(&self) -> Vec<Location> {
        self.locations
            .iter()
            .copied()
            .filter(Location::is_valid)
            .collect()
    }

    fn find(&self, location: Location) -> Option<usize> {
        if !location.is_valid() {
            return None;
        }
        self.locations.iter().position(|tag| *tag == location)
    }

    /// Looks `location` up, loading it into a free or evicted slot on a miss.
    pub fn fetch(&mut self, location: Location) -> Result<PageHandle, ViewerError> {
        let slot = match self.find(location) {
            Some(slot) => slot,
            None => {
                let slot = self.victim()?;
                self.load(slot, location);
                slot
            }
        };
        match &self.slots[slot] {
            Slot::Loaded(_) => Ok(PageHandle {
                slot,
                version: self.versions[slot],
            }),
            Slot::Failed(reason) => Err(ViewerError::PageUnavailable {
                location,
                reason: reason.clone(),
            }),
            Slot::Empty => Err(ViewerError::PageUnavailable {
                location,
                reason: "slot is empty".to_string(),
            }),
        }
    }

    pub fn get(&mut self, location: Location) -> Result<&mut Page<B>, ViewerError> {
        let handle = self.fetch(location)?;
        self.page_mut(handle)
            .ok_or_else(|| ViewerError::PageUnavailable {
                location,
                reason: "slot was reloaded".to_string(),
            })
    }

    pub fn page(&self, handle: PageHandle) -> Option<&Page<B>> {
        if self.versions.get(handle.slot) != Some(&handle.version) {
            return None;
        }
        match &self.slots[handle.slot] {
            Slot::Loaded(page) => Some(&**page),
            _ => None,
        }
    }

    pub fn page_mut(&mut self, handle: PageHandle) -> Option<&mut Page<B>> {
        if self.versions.get(handle.slot) != Some(&handle.version) {
            return None;
        }
        match &mut self.slots[handle.slot] {
            Slot::Loaded(page) => Some(&mut **page),
            _ => None,
        }
    }

    /// Resident page at `location`, without loading anything.
    pub fn peek(&self, location: Location) -> Option<&Page<B>> {
        let slot = self.find(location)?;
        match &self.slots[slot] {
            Slot::Loaded(page) => Some(&**page),
            _ => None,
        }
    }

    pub fn peek_mut(&mut self, location: Location) -> Option<&mut Page<B>> {
        let slot = self.find(location)?;
        match &mut self.slots[slot] {
            Slot::Loaded(page) => Some(&mut **page),
            _ => None,
        }
    }

    /// Drops every slot. Pages still referenced by running render jobs stay
    /// alive until those jobs finish.
    pub fn clear(&mut self) {
        for slot in 0..self.slots.len() {
            self.slots[slot] = Slot::Empty;
            self.locations[slot] = Location::INVALID;
            self.versions[slot] += 1;
        }
        self.first = 0;
    }

    /// Picks the slot to load into: the oldest one without a running render,
    /// walking backwards from `first`. Waits for render completions while
    /// every slot is pinned.
    fn victim(&mut self) -> Result<usize, ViewerError> {
        let capacity = self.capacity();
        let mut waited = Duration::ZERO;
        for attempt in 0..=self.eviction_retries {
            let seen = self.tracker.completions();
            let candidate = (1..=capacity)
                .map(|back| (self.first + capacity - back) % capacity)
                .find(|&slot| !self.slots[slot].is_pinned());
            if let Some(slot) = candidate {
                return Ok(slot);
            }
            if attempt == self.eviction_retries {
                break;
            }
            debug!(attempt, "every cache slot is busy, waiting for a render to finish");
            self.tracker.wait_for_completion(seen, self.eviction_wait);
            waited += self.eviction_wait;
        }
        warn!(capacity, ?waited, "page cache backpressure");
        Err(ViewerError::CacheBackpressure { capacity, waited })
    }

    #[instrument(skip(self), fields(chapter = location.chapter, page = location.page))]
    fn load(&mut self, slot: usize, location: Location) {
        let evicted = self.locations[slot];
        if evicted.is_valid() {
            debug!(%evicted, slot, "evicting page");
        }
        self.slots[slot] = match Page::load(&*self.backend, location) {
            Ok(page) => {
                debug!(slot, "page loaded");
                Slot::Loaded(Box::new(page))
            }
            Err(err) => {
                warn!(slot, "page load failed: {err:#}");
                Slot::Failed(format!("{err:#}"))
            }
        };
        self.locations[slot] = location;
        self.versions[slot] += 1;
        self.first = slot;
    }
}
