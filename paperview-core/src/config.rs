use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ViewerError;
use crate::geometry::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    fn is_positive(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Viewer tuning. Every field has a default, so a TOML file only needs the
/// keys it changes:
///
/// ```toml
/// cache_capacity = 48
/// render_threads = 4
/// page_separator = 12.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Number of page slots kept resident.
    pub cache_capacity: usize,
    /// Gap between consecutive pages, in layout units.
    pub page_separator: f32,
    /// Render pool size; defaults to the available parallelism. Always kept
    /// below `cache_capacity`.
    pub render_threads: Option<usize>,
    /// How long one eviction attempt waits for a busy slot to free up.
    pub eviction_wait_ms: u64,
    /// Eviction attempts before giving up with a backpressure error.
    pub eviction_retries: u32,
    /// Initial result capacity for highlight and search queries.
    pub highlight_capacity: usize,
    pub min_zoom: f32,
    pub max_zoom: f32,
    /// Number of backend lock domains.
    pub lock_domains: usize,
    /// Size assumed for pages that failed to load, so layout keeps moving.
    pub fallback_page_size: Size,
    /// Viewport size until the embedder reports a real one.
    pub viewport: Size,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 32,
            page_separator: 18.0,
            render_threads: None,
            eviction_wait_ms: 25,
            eviction_retries: 40,
            highlight_capacity: 256,
            min_zoom: 0.1,
            max_zoom: 16.0,
            lock_domains: 4,
            fallback_page_size: Size::new(612.0, 792.0),
            viewport: Size::new(900.0, 900.0),
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ViewerError> {
        let config: ViewerConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ViewerError> {
        let source = fs::read_to_string(path).map_err(|source| ViewerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Loads `config.toml` from the platform configuration directory, falling
    /// back to defaults when there is none.
    pub fn discover() -> Result<Self, ViewerError> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "loading viewer configuration");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("net", "paperview", "paperview")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ViewerError> {
        if self.cache_capacity < 2 {
            return Err(ViewerError::Config(format!(
                "cache_capacity must be at least 2, got {}",
                self.cache_capacity
            )));
        }
        if let Some(threads) = self.render_threads {
            if threads == 0 || threads >= self.cache_capacity {
                return Err(ViewerError::Config(format!(
                    "render_threads must be between 1 and cache_capacity - 1 ({}), got {}",
                    self.cache_capacity - 1,
                    threads
                )));
            }
        }
        if !self.page_separator.is_finite() || self.page_separator < 0.0 {
            return Err(ViewerError::Config(format!(
                "page_separator must be a non-negative number, got {}",
                self.page_separator
            )));
        }
        if !(self.min_zoom.is_finite() && self.max_zoom.is_finite())
            || self.min_zoom <= 0.0
            || self.min_zoom > self.max_zoom
        {
            return Err(ViewerError::Config(format!(
                "zoom range {}..{} is invalid",
                self.min_zoom, self.max_zoom
            )));
        }
        if self.highlight_capacity == 0 {
            return Err(ViewerError::Config(
                "highlight_capacity must be at least 1".to_string(),
            ));
        }
        if self.lock_domains == 0 {
            return Err(ViewerError::Config(
                "lock_domains must be at least 1".to_string(),
            ));
        }
        if !self.fallback_page_size.is_positive() || !self.viewport.is_positive() {
            return Err(ViewerError::Config(
                "page and viewport sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Render pool size, kept strictly below the cache capacity. Only running
    /// jobs pin a slot, so at least one slot is always evictable.
    pub fn render_threads(&self) -> usize {
        let requested = self.render_threads.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        requested.clamp(1, self.cache_capacity.saturating_sub(1).max(1))
    }

    pub fn eviction_wait(&self) -> Duration {
        Duration::from_millis(self.eviction_wait_ms)
    }

    pub fn clamp_zoom(&self, zoom: f32) -> f32 {
        if zoom.is_finite() {
            zoom.clamp(self.min_zoom, self.max_zoom)
        } else {
            1.0_f32.clamp(self.min_zoom, self.max_zoom)
        }
    }

    pub fn fallback_bounds(&self) -> Rect {
        Rect::from_size(self.fallback_page_size.width, self.fallback_page_size.height)
    }
}
