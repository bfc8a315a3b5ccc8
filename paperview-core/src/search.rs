use crate::backend::DocumentBackend;
use crate::geometry::Quad;
use crate::page::{collect_quads, Page};

/// The active search query. The generation moves whenever the query does, which
/// is what per-page result caches compare against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchState {
    query: Option<String>,
    generation: u64,
}

impl Default for SearchState {
    fn default() -> Self {
        Self {
            query: None,
            generation: 1,
        }
    }
}

impl SearchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false when `query` is already the active one. An empty query
    /// clears the search.
    pub fn set(&mut self, query: &str) -> bool {
        if query.is_empty() {
            return self.clear();
        }
        if self.query.as_deref() == Some(query) {
            return false;
        }
        self.query = Some(query.to_string());
        self.generation += 1;
        true
    }

    pub fn clear(&mut self) -> bool {
        if self.query.take().is_none() {
            return false;
        }
        self.generation += 1;
        true
    }
}

/// Search hits of `state` on `page`, recomputed only when the query changed
/// since they were last stored.
pub fn ensure_search_quads<'p, B: DocumentBackend>(
    page: &'p mut Page<B>,
    state: &SearchState,
    backend: &B,
    initial_capacity: usize,
) -> &'p [Quad] {
    if !page.search.is_current(state.generation()) {
        let quads = match state.query() {
            Some(query) => collect_quads(initial_capacity, |capacity| {
                backend.search(page.text(), query, capacity)
            }),
            None => Vec::new(),
        };
        page.search.store(state.generation(), quads);
    }
    page.search.quads()
}
