//! Complex discovery: sweep the map, register every complex that shows up,
//! rank them and open the best ones to collect their article lists.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CrawlConfig;
use crate::crawl::navigation::NavigationSimulator;
use crate::error::{CrawlError, CrawlResult, NavigationFailure};
use crate::geo::GridSweepPlanner;
use crate::models::{ArticleStub, ComplexRecord, DealType, GeoPoint};
use crate::scrapers::types::{ComplexSighting, NetworkPayload};
use crate::scrapers::MapSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
    /// New complex seen after the registry hit its cap
    Rejected,
}

/// Every complex seen during a run, keyed by the site's complex id, in discovery order
#[derive(Debug, Clone)]
pub struct ComplexRegistry {
    order: Vec<String>,
    by_id: HashMap<String, ComplexRecord>,
    limit: usize,
}

impl ComplexRegistry {
    pub fn new(limit: usize) -> Self {
        Self {
            order: Vec::new(),
            by_id: HashMap::new(),
            limit,
        }
    }

    /// Insert a new complex, or raise the counts of a known one. Counts never go down.
    pub fn upsert(&mut self, sighting: &ComplexSighting) -> Upsert {
        if let Some(existing) = self.by_id.get_mut(&sighting.id) {
            let mut changed = false;
            if existing.name.is_empty() && !sighting.name.is_empty() {
                existing.name = sighting.name.clone();
                changed = true;
            }
            if sighting.listing_count > existing.listing_count {
                existing.listing_count = sighting.listing_count;
                changed = true;
            }
            if sighting.listing_count > existing.priority_score {
                existing.priority_score = sighting.listing_count;
                changed = true;
            }
            return if changed { Upsert::Updated } else { Upsert::Unchanged };
        }

        if self.is_full() {
            return Upsert::Rejected;
        }
        self.order.push(sighting.id.clone());
        self.by_id.insert(
            sighting.id.clone(),
            ComplexRecord {
                id: sighting.id.clone(),
                name: sighting.name.clone(),
                asset_type: sighting.asset_type,
                listing_count: sighting.listing_count,
                priority_score: sighting.listing_count,
                discovered: true,
                visited_for_detail: false,
            },
        );
        Upsert::Inserted
    }

    /// Raise a known complex's counts from an article list total
    pub fn raise_count(&mut self, id: &str, total: u32) -> bool {
        match self.by_id.get_mut(id) {
            Some(record) => {
                record.listing_count = record.listing_count.max(total);
                record.priority_score = record.priority_score.max(total);
                true
            }
            None => false,
        }
    }

    pub fn mark_visited(&mut self, id: &str) {
        if let Some(record) = self.by_id.get_mut(id) {
            record.visited_for_detail = true;
        }
    }

    pub fn get(&self, id: &str) -> Option<&ComplexRecord> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.order.len() >= self.limit
    }

    /// Complexes in discovery order
    pub fn iter(&self) -> impl Iterator<Item = &ComplexRecord> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    /// Detail-visit order, truncated to `cap`.
    ///
    /// Complexes meeting `min_listing_count` come first. Within each group the
    /// order is by priority score when `prioritize_by_count` is set, else discovery order.
    pub fn ranked(
        &self,
        min_listing_count: u32,
        prioritize_by_count: bool,
        cap: usize,
    ) -> Vec<ComplexRecord> {
        let mut ranked: Vec<&ComplexRecord> = self.iter().collect();
        ranked.sort_by_key(|c| {
            let below_threshold = c.listing_count < min_listing_count;
            let score = if prioritize_by_count { c.priority_score } else { 0 };
            (below_threshold, Reverse(score))
        });
        ranked.into_iter().take(cap).cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Added,
    Duplicate,
    /// Complex not in the registry
    Orphan,
    NotForSale,
}

/// Deduplicated article stubs waiting for their detail fetch
#[derive(Debug, Clone, Default)]
pub struct StubBook {
    seen: HashSet<String>,
    stubs: Vec<ArticleStub>,
}

impl StubBook {
    pub fn admit(&mut self, stub: ArticleStub, registry: &ComplexRegistry) -> Admission {
        if stub.deal_type != DealType::Sale {
            return Admission::NotForSale;
        }
        if !registry.contains(&stub.complex_ref) {
            return Admission::Orphan;
        }
        if !self.seen.insert(stub.id.clone()) {
            return Admission::Duplicate;
        }
        self.stubs.push(stub);
        Admission::Added
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    /// Work items, cheapest first; stubs without a price go last
    pub fn into_work_items(self) -> Vec<ArticleStub> {
        let mut stubs = self.stubs;
        stubs.sort_by_key(|s| (s.price.is_none(), s.price));
        stubs
    }
}

/// Counters for the navigation phase
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SweepStats {
    pub points_planned: usize,
    pub points_visited: usize,
    pub points_skipped: usize,
    pub navigation_failures: usize,
    pub complex_cap_reached: bool,
    pub complexes_discovered: usize,
    pub complexes_rejected: usize,
    pub complexes_visited: usize,
    pub complex_visits_failed: usize,
    pub stubs_collected: usize,
    pub duplicate_stubs: usize,
    pub orphan_stubs: usize,
    pub non_sale_stubs: usize,
}

/// Runs the sequential navigation phase against one map surface
pub struct ComplexCollector<'c> {
    config: &'c CrawlConfig,
    planner: GridSweepPlanner,
    stats: SweepStats,
}

impl<'c> ComplexCollector<'c> {
    pub fn new(config: &'c CrawlConfig) -> Self {
        Self {
            config,
            planner: GridSweepPlanner::new(config.grid_rings, config.grid_step_px),
            stats: SweepStats::default(),
        }
    }

    pub fn stats(&self) -> &SweepStats {
        &self.stats
    }

    pub fn into_stats(self) -> SweepStats {
        self.stats
    }

    /// Visit every sweep point around `center`, registering complexes seen at each.
    ///
    /// Stops as soon as the registry is full, without issuing further navigation.
    pub async fn sweep<S, R>(
        &mut self,
        surface: &mut S,
        navigator: &mut NavigationSimulator<R>,
        registry: &mut ComplexRegistry,
        stubs: &mut StubBook,
        center: GeoPoint,
        zoom: u8,
    ) -> CrawlResult<()>
    where
        S: MapSurface + ?Sized,
        R: Rng + Send,
    {
        let targets = self
            .planner
            .targets(center, f64::from(zoom), &self.config.region)
            .map_err(|e| CrawlError::from(NavigationFailure::Unreachable(e.to_string())))?;
        let total = targets.len();
        self.stats.points_planned += total;

        for (i, target) in targets.into_iter().enumerate() {
            if registry.is_full() {
                info!("🛑 Complex cap {} reached, ending sweep early", self.config.max_complexes);
                self.stats.complex_cap_reached = true;
                break;
            }
            info!("   ↪ Sweep point {}/{}", i + 1, total);

            match navigator
                .move_with_retry(surface, target, zoom, self.config.navigation_attempts)
                .await
            {
                Ok(attempts) => {
                    self.stats.navigation_failures += (attempts - 1) as usize;
                    self.stats.points_visited += 1;
                }
                Err(e) => {
                    self.stats.navigation_failures += self.config.navigation_attempts as usize;
                    self.stats.points_skipped += 1;
                    warn!("Skipping sweep point {}/{} at {:?}: {}", i + 1, total, target, e);
                    continue;
                }
            }

            let payloads = surface.await_network_payloads(self.config.sweep_dwell()).await;
            self.absorb(payloads, registry, stubs);
        }
        Ok(())
    }

    /// Open ranked complexes one by one until enough article stubs are collected
    pub async fn visit_ranked<S>(
        &mut self,
        surface: &mut S,
        registry: &mut ComplexRegistry,
        stubs: &mut StubBook,
        ranked: &[ComplexRecord],
    ) where
        S: MapSurface + ?Sized,
    {
        let total = ranked.len();
        for (i, complex) in ranked.iter().enumerate() {
            if stubs.len() >= self.config.max_articles {
                info!("🛑 Article cap {} covered, skipping remaining complexes", self.config.max_articles);
                break;
            }
            info!(
                "[{}/{}] {} ({:?}, listings: {})",
                i + 1,
                total,
                complex.name,
                complex.asset_type,
                complex.listing_count
            );

            if let Err(e) = self.visit_with_retry(surface, complex).await {
                self.stats.complex_visits_failed += 1;
                warn!("Could not open complex {}: {}", complex.id, e);
                continue;
            }
            registry.mark_visited(&complex.id);
            self.stats.complexes_visited += 1;

            let payloads = surface.await_network_payloads(self.config.complex_dwell()).await;
            self.absorb(payloads, registry, stubs);
        }
    }

    async fn visit_with_retry<S>(
        &mut self,
        surface: &mut S,
        complex: &ComplexRecord,
    ) -> Result<(), NavigationFailure>
    where
        S: MapSurface + ?Sized,
    {
        let mut last = None;
        for _ in 0..self.config.navigation_attempts.max(1) {
            match surface.visit_complex(complex).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.stats.navigation_failures += 1;
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| NavigationFailure::Unreachable(complex.id.clone())))
    }

    /// Fold captured payloads into the registry and the stub book
    pub fn absorb(
        &mut self,
        payloads: Vec<NetworkPayload>,
        registry: &mut ComplexRegistry,
        stubs: &mut StubBook,
    ) {
        for payload in payloads {
            match payload {
                NetworkPayload::Complexes(sightings) => {
                    for sighting in &sightings {
                        match registry.upsert(sighting) {
                            Upsert::Inserted => self.stats.complexes_discovered += 1,
                            Upsert::Rejected => self.stats.complexes_rejected += 1,
                            Upsert::Updated | Upsert::Unchanged => {}
                        }
                    }
                }
                NetworkPayload::Articles {
                    complex_id,
                    total,
                    articles,
                } => {
                    if let (Some(id), Some(total)) = (complex_id.as_deref(), total) {
                        registry.raise_count(id, total);
                    }
                    let before = stubs.len();
                    for stub in articles {
                        match stubs.admit(stub, registry) {
                            Admission::Added => self.stats.stubs_collected += 1,
                            Admission::Duplicate => self.stats.duplicate_stubs += 1,
                            Admission::Orphan => self.stats.orphan_stubs += 1,
                            Admission::NotForSale => self.stats.non_sale_stubs += 1,
                        }
                    }
                    if stubs.len() > before {
                        info!("✅ Listings found: +{} / total {}", stubs.len() - before, stubs.len());
                    }
                }
            }
        }
        debug!(complexes = registry.len(), stubs = stubs.len(), "payloads absorbed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssetType;

    fn sighting(id: &str, count: u32) -> ComplexSighting {
        ComplexSighting {
            id: id.to_string(),
            name: format!("complex {id}"),
            asset_type: AssetType::Apartment,
            listing_count: count,
        }
    }

    fn stub(id: &str, complex: &str, price: Option<i64>) -> ArticleStub {
        ArticleStub {
            id: id.to_string(),
            complex_ref: complex.to_string(),
            name: String::new(),
            asset_type: AssetType::Apartment,
            deal_type: DealType::Sale,
            price,
            floor: String::new(),
            area: String::new(),
            exclusive_area: String::new(),
            direction: String::new(),
            features: String::new(),
            registered_at: None,
        }
    }

    #[test]
    fn upsert_is_idempotent_and_keeps_max() {
        let mut registry = ComplexRegistry::new(10);
        assert_eq!(registry.upsert(&sighting("1", 5)), Upsert::Inserted);
        assert_eq!(registry.upsert(&sighting("1", 3)), Upsert::Unchanged);
        assert_eq!(registry.upsert(&sighting("1", 9)), Upsert::Updated);
        assert_eq!(registry.upsert(&sighting("1", 9)), Upsert::Unchanged);

        assert_eq!(registry.len(), 1);
        let record = registry.get("1").unwrap();
        assert_eq!(record.listing_count, 9);
        assert_eq!(record.priority_score, 9);
        assert!(record.discovered);
        assert!(!record.visited_for_detail);
    }

    #[test]
    fn article_totals_raise_counts() {
        let mut registry = ComplexRegistry::new(10);
        registry.upsert(&sighting("1", 2));
        assert!(registry.raise_count("1", 14));
        assert!(registry.raise_count("1", 4));
        assert!(!registry.raise_count("2", 4));
        assert_eq!(registry.get("1").unwrap().listing_count, 14);
    }

    #[test]
    fn full_registry_rejects_new_ids_but_updates_known_ones() {
        let mut registry = ComplexRegistry::new(2);
        registry.upsert(&sighting("1", 1));
        registry.upsert(&sighting("2", 1));
        assert!(registry.is_full());
        assert_eq!(registry.upsert(&sighting("3", 50)), Upsert::Rejected);
        assert_eq!(registry.upsert(&sighting("2", 7)), Upsert::Updated);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn ranking_keeps_discovery_order_without_prioritization() {
        let mut registry = ComplexRegistry::new(10);
        for (id, count) in [("a", 1), ("b", 8), ("c", 3), ("d", 0), ("e", 12)] {
            registry.upsert(&sighting(id, count));
        }
        let ids = |v: Vec<ComplexRecord>| v.into_iter().map(|c| c.id).collect::<Vec<_>>();

        assert_eq!(ids(registry.ranked(2, false, 10)), vec!["b", "c", "e", "a", "d"]);
        assert_eq!(ids(registry.ranked(2, true, 10)), vec!["e", "b", "c", "a", "d"]);
        assert_eq!(ids(registry.ranked(2, true, 2)), vec!["e", "b"]);
    }

    #[test]
    fn stub_book_dedupes_and_drops_orphans() {
        let mut registry = ComplexRegistry::new(10);
        registry.upsert(&sighting("c1", 2));
        let mut book = StubBook::default();

        assert_eq!(book.admit(stub("a1", "c1", Some(5)), &registry), Admission::Added);
        assert_eq!(book.admit(stub("a1", "c1", Some(5)), &registry), Admission::Duplicate);
        assert_eq!(book.admit(stub("a2", "zz", Some(5)), &registry), Admission::Orphan);
        let mut rent = stub("a3", "c1", Some(5));
        rent.deal_type = DealType::Jeonse;
        assert_eq!(book.admit(rent, &registry), Admission::NotForSale);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn work_items_are_cheapest_first() {
        let mut registry = ComplexRegistry::new(10);
        registry.upsert(&sighting("c1", 2));
        let mut book = StubBook::default();
        book.admit(stub("x", "c1", None), &registry);
        book.admit(stub("y", "c1", Some(300)), &registry);
        book.admit(stub("z", "c1", Some(100)), &registry);

        let order: Vec<String> = book.into_work_items().into_iter().map(|s| s.id).collect();
        assert_eq!(order, vec!["z", "y", "x"]);
    }

    #[test]
    fn absorb_counts_everything() {
        let config = CrawlConfig::default();
        let mut collector = ComplexCollector::new(&config);
        let mut registry = ComplexRegistry::new(10);
        let mut book = StubBook::default();

        collector.absorb(
            vec![
                NetworkPayload::Complexes(vec![sighting("c1", 1), sighting("c2", 4)]),
                NetworkPayload::Articles {
                    complex_id: Some("c1".into()),
                    total: Some(6),
                    articles: vec![stub("a1", "c1", Some(1)), stub("a2", "nope", None)],
                },
            ],
            &mut registry,
            &mut book,
        );

        let stats = collector.stats();
        assert_eq!(stats.complexes_discovered, 2);
        assert_eq!(stats.stubs_collected, 1);
        assert_eq!(stats.orphan_stubs, 1);
        assert_eq!(registry.get("c1").unwrap().listing_count, 6);
    }
}
