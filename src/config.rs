use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CrawlError, CrawlResult};
use crate::geo::RegionBounds;
use crate::models::AssetType;

/// Environment prefix for overrides, e.g. `GAP_SCOUT__DETAIL_WORKERS=4`
pub const ENV_PREFIX: &str = "GAP_SCOUT";

/// Session configuration. Read once when a session starts and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrawlConfig {
    /// Every navigation target is clamped into this region
    pub region: RegionBounds,
    /// Max complexes admitted to detail ranking
    pub max_complexes: usize,
    /// Max article detail fetches
    pub max_articles: usize,
    pub require_prior_jeonse: bool,
    /// Keep only candidates whose previous jeonse covers the sale price
    pub require_jeonse_at_least_sale: bool,
    pub min_listing_count: u32,
    pub prioritize_by_count: bool,
    pub detail_workers: usize,
    pub block_heavy_resources: bool,
    pub grid_rings: u32,
    pub grid_step_px: f64,
    pub sweep_dwell_ms: u64,
    /// Dwell after opening a complex, waiting for its article list
    pub complex_dwell_ms: u64,
    pub zoom_min: u8,
    pub zoom_max: u8,
    /// Random zoom-out before each move, in levels below the target zoom
    pub zoom_out_drop_min: u8,
    pub zoom_out_drop_max: u8,
    pub pointer_steps: u32,
    pub max_drag_px: f64,
    pub navigation_attempts: u32,
    pub fetch_timeout_ms: u64,
    /// Colon separated asset codes, e.g. `APT:VL`
    pub asset_types: String,
    pub headless: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            region: RegionBounds::default(),
            max_complexes: 800,
            max_articles: 10_000,
            require_prior_jeonse: true,
            require_jeonse_at_least_sale: true,
            min_listing_count: 2,
            prioritize_by_count: false,
            detail_workers: 12,
            block_heavy_resources: true,
            grid_rings: 1,
            grid_step_px: 480.0,
            sweep_dwell_ms: 600,
            complex_dwell_ms: 1_000,
            zoom_min: 15,
            zoom_max: 17,
            zoom_out_drop_min: 3,
            zoom_out_drop_max: 6,
            pointer_steps: 20,
            max_drag_px: 800.0,
            navigation_attempts: 2,
            fetch_timeout_ms: 15_000,
            asset_types: "APT:VL".to_string(),
            headless: true,
        }
    }
}

impl CrawlConfig {
    /// Layer defaults, an optional TOML file and `GAP_SCOUT__*` environment variables
    pub fn load(path: Option<&Path>) -> CrawlResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: CrawlConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CrawlError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CrawlResult<()> {
        let fail = |msg: String| Err(CrawlError::Configuration(msg));

        if !self.region.is_valid() {
            return fail(format!("invalid region bounds {:?}", self.region));
        }
        if self.max_complexes == 0 {
            return fail("max_complexes must be positive".into());
        }
        if self.max_articles == 0 {
            return fail("max_articles must be positive".into());
        }
        if self.detail_workers == 0 {
            return fail("detail_workers must be positive".into());
        }
        if !(self.grid_step_px > 0.0) {
            return fail(format!("grid_step_px must be positive, got {}", self.grid_step_px));
        }
        if self.zoom_min > self.zoom_max {
            return fail(format!(
                "zoom_min {} exceeds zoom_max {}",
                self.zoom_min, self.zoom_max
            ));
        }
        if self.zoom_out_drop_min == 0 || self.zoom_out_drop_min > self.zoom_out_drop_max {
            return fail(format!(
                "zoom-out drop range {}..={} is empty or zero",
                self.zoom_out_drop_min, self.zoom_out_drop_max
            ));
        }
        if self.pointer_steps < 10 {
            return fail(format!(
                "pointer_steps must be at least 10, got {}",
                self.pointer_steps
            ));
        }
        if !(self.max_drag_px > 0.0) {
            return fail("max_drag_px must be positive".into());
        }
        if self.navigation_attempts == 0 {
            return fail("navigation_attempts must be at least 1".into());
        }
        if self.fetch_timeout_ms == 0 {
            return fail("fetch_timeout_ms must be positive".into());
        }
        self.asset_selection().map(|_| ())
    }

    /// Parsed asset selector, in selector order without duplicates
    pub fn asset_selection(&self) -> CrawlResult<Vec<AssetType>> {
        let mut selected = Vec::new();
        for code in self.asset_types.split(':').filter(|s| !s.trim().is_empty()) {
            let asset = AssetType::from_code(code).ok_or_else(|| {
                CrawlError::Configuration(format!("unknown asset type '{}'", code.trim()))
            })?;
            if !selected.contains(&asset) {
                selected.push(asset);
            }
        }
        if selected.is_empty() {
            return Err(CrawlError::Configuration("no asset types selected".into()));
        }
        Ok(selected)
    }

    /// Clamp a requested zoom into the allowed range
    pub fn clamp_zoom(&self, zoom: u8) -> u8 {
        zoom.clamp(self.zoom_min, self.zoom_max)
    }

    pub fn sweep_dwell(&self) -> Duration {
        Duration::from_millis(self.sweep_dwell_ms)
    }

    pub fn complex_dwell(&self) -> Duration {
        Duration::from_millis(self.complex_dwell_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}
