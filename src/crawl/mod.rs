//! Crawl session: sweep the map, visit complexes, fetch details, filter, emit.

pub mod collector;
pub mod gap;
pub mod navigation;
pub mod pool;
pub mod results;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::CrawlConfig;
use crate::error::{CrawlError, CrawlResult};
use crate::models::{AssetType, GeoPoint, MapView};
use crate::scrapers::{DetailSource, MapSurface, ResultSink};

use collector::{ComplexCollector, ComplexRegistry, StubBook, SweepStats};
use gap::{lowest_gap_ratio, GapFilter, GapRow};
use navigation::{NavigationSettings, NavigationSimulator};
use pool::{DetailWorkerPool, FetchStats};
use results::ResultSet;

/// Candidates listed in the summary
const TOP_CANDIDATES: usize = 5;

/// One of the lowest-gap candidates, flattened for the summary
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub price: Option<i64>,
    pub previous_jeonse: Option<i64>,
    pub gap_amount: i64,
    pub gap_ratio: f64,
}

impl Candidate {
    fn from_row(row: &GapRow<'_>) -> Option<Self> {
        let gap = row.gap?;
        Some(Self {
            id: row.record.id.clone(),
            name: row.record.name.clone(),
            price: row.record.price,
            previous_jeonse: row.previous_jeonse,
            gap_amount: gap.gap_amount,
            gap_ratio: gap.gap_ratio,
        })
    }
}

/// Everything a run did, including every non-fatal error it absorbed
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub center: GeoPoint,
    pub zoom: u8,
    pub asset_types: Vec<AssetType>,
    pub sweep: SweepStats,
    pub fetch: FetchStats,
    pub records_emitted: usize,
    pub top_candidates: Vec<Candidate>,
}

impl RunSummary {
    pub fn log(&self) {
        info!("📊 Run summary");
        info!(
            "   Sweep points: {} planned, {} visited, {} skipped ({} navigation failures)",
            self.sweep.points_planned,
            self.sweep.points_visited,
            self.sweep.points_skipped,
            self.sweep.navigation_failures
        );
        info!(
            "   Complexes: {} discovered, {} visited, {} rejected at cap",
            self.sweep.complexes_discovered, self.sweep.complexes_visited, self.sweep.complexes_rejected
        );
        info!(
            "   Articles: {} collected, {} dispatched, {} stored",
            self.sweep.stubs_collected, self.fetch.dispatched, self.fetch.stored
        );
        info!(
            "   Dropped: {} fetch failures, {} malformed, {} duplicates ({} handles retired)",
            self.fetch.fetch_failures,
            self.fetch.malformed_payloads,
            self.fetch.duplicates,
            self.fetch.handles_retired
        );
        info!("   Emitted: {}", self.records_emitted);

        for (i, c) in self.top_candidates.iter().enumerate() {
            info!(
                "   {}. {} ({}) price {:?} / jeonse {:?} / gap {} ({:.2}%)",
                i + 1,
                c.name,
                c.id,
                c.price,
                c.previous_jeonse,
                c.gap_amount,
                c.gap_ratio * 100.0
            );
        }
    }
}

/// One crawl over one region. Configuration is fixed for the session's lifetime.
pub struct CrawlSession {
    config: CrawlConfig,
    assets: Vec<AssetType>,
    registry: ComplexRegistry,
    results: Arc<Mutex<ResultSet>>,
    seed: Option<u64>,
}

impl CrawlSession {
    /// Rejects invalid configuration before anything touches the surface
    pub fn new(config: CrawlConfig) -> CrawlResult<Self> {
        config.validate()?;
        let assets = config.asset_selection()?;
        Ok(Self {
            registry: ComplexRegistry::new(config.max_complexes),
            assets,
            config,
            results: Arc::new(Mutex::new(ResultSet::default())),
            seed: None,
        })
    }

    /// Fix the navigation randomness, for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn registry(&self) -> &ComplexRegistry {
        &self.registry
    }

    /// Every resolved record, filtered or not
    pub fn results(&self) -> Arc<Mutex<ResultSet>> {
        Arc::clone(&self.results)
    }

    fn navigator(&self) -> NavigationSimulator {
        let settings = NavigationSettings::from_config(&self.config);
        match self.seed {
            Some(seed) => NavigationSimulator::with_rng(settings, StdRng::seed_from_u64(seed)),
            None => NavigationSimulator::new(settings),
        }
    }

    /// Run the whole pipeline and hand the filtered rows to `sink`.
    ///
    /// Only configuration errors, losing the automation surface, or a failing
    /// sink end the run early.
    pub async fn run<S, D>(
        &mut self,
        surface: &mut S,
        source: Arc<D>,
        sink: &dyn ResultSink,
        center: GeoPoint,
        zoom: u8,
    ) -> CrawlResult<RunSummary>
    where
        S: MapSurface + ?Sized,
        D: DetailSource,
    {
        let started_at = Utc::now();
        let center = self.config.region.clamp(center);
        let zoom = self.config.clamp_zoom(zoom);
        info!(
            "🗺️  Crawling around ({:.5}, {:.5}) at zoom {} for {:?}",
            center.lat, center.lon, zoom, self.assets
        );

        let (sweep, stubs) = self.discover(surface, center, zoom).await?;
        let fetch = self.fetch_details(source, stubs).await?;

        let results = self.results.lock().await;
        let rows = GapFilter::from_config(&self.config).apply(results.iter());
        info!("🔎 {} of {} records pass the gap filters", rows.len(), results.len());

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            center,
            zoom,
            asset_types: self.assets.clone(),
            sweep,
            fetch,
            records_emitted: rows.len(),
            top_candidates: lowest_gap_ratio(&rows, TOP_CANDIDATES)
                .into_iter()
                .filter_map(|row| Candidate::from_row(row))
                .collect(),
        };
        summary.log();

        sink.emit(&rows, &summary)
            .await
            .map_err(|e| CrawlError::Output(format!("{}: {:#}", sink.sink_name(), e)))?;
        info!("💾 Results written by {}", sink.sink_name());
        Ok(summary)
    }

    /// Sweep every selected asset type, then visit the ranked complexes
    async fn discover<S>(
        &mut self,
        surface: &mut S,
        center: GeoPoint,
        zoom: u8,
    ) -> CrawlResult<(SweepStats, StubBook)>
    where
        S: MapSurface + ?Sized,
    {
        let mut navigator = self.navigator();
        let mut collector = ComplexCollector::new(&self.config);
        let mut stubs = StubBook::default();
        let mut opened = 0;

        for asset in &self.assets {
            if self.registry.is_full() {
                break;
            }
            info!("🏢 Sweeping {:?} ({})", asset, asset.endpoint());
            if let Err(e) = surface.open_map(*asset, center, zoom).await {
                warn!("Could not open the {:?} map: {}", asset, e);
                continue;
            }
            opened += 1;
            navigator.reset_view(Some(MapView {
                center,
                zoom: f64::from(zoom),
            }));
            collector
                .sweep(surface, &mut navigator, &mut self.registry, &mut stubs, center, zoom)
                .await?;
        }
        if opened == 0 {
            return Err(CrawlError::SurfaceLost(
                "map could not be opened for any asset type".into(),
            ));
        }

        let ranked = self.registry.ranked(
            self.config.min_listing_count,
            self.config.prioritize_by_count,
            self.config.max_complexes,
        );
        info!(
            "📋 {} complexes discovered, visiting up to {}",
            self.registry.len(),
            ranked.len()
        );
        collector
            .visit_ranked(surface, &mut self.registry, &mut stubs, &ranked)
            .await;

        Ok((collector.into_stats(), stubs))
    }

    /// Resolve stubs to records, then close every handle
    async fn fetch_details<D: DetailSource>(
        &self,
        source: Arc<D>,
        stubs: StubBook,
    ) -> CrawlResult<FetchStats> {
        if stubs.is_empty() {
            info!("No sale listings collected, skipping detail fetch");
            return Ok(FetchStats::default());
        }
        let known: Arc<HashSet<String>> =
            Arc::new(self.registry.iter().map(|c| c.id.clone()).collect());
        let items = stubs.into_work_items();
        info!(
            "🚀 Fetching details for up to {} of {} listings with {} workers",
            self.config.max_articles.min(items.len()),
            items.len(),
            self.config.detail_workers
        );

        let pool = DetailWorkerPool::open(
            source,
            self.config.detail_workers,
            self.config.fetch_timeout(),
        )
        .await?;
        let mut stats = pool
            .run(items, known, Arc::clone(&self.results), self.config.max_articles)
            .await;
        stats.handles_closed = pool.shutdown().await;
        info!("✅ Detail phase done: {} stored", stats.stored);
        Ok(stats)
    }
}
