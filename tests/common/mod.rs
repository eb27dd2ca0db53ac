#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use gap_scout::crawl::gap::GapRow;
use gap_scout::error::{FetchFailure, NavigationFailure};
use gap_scout::geo::projection;
use gap_scout::models::{
    ArticleStub, AssetType, ComplexRecord, DealType, GeoPoint, MapView, PixelDelta, PixelPoint,
};
use gap_scout::scrapers::types::{ComplexSighting, NetworkPayload, RawDetail};
use gap_scout::scrapers::{DetailSource, MapSurface, ResultSink};
use gap_scout::RunSummary;

pub fn sale(id: &str, complex: &str, price: Option<i64>) -> ArticleStub {
    ArticleStub {
        id: id.to_string(),
        complex_ref: complex.to_string(),
        name: format!("listing {id}"),
        asset_type: AssetType::Apartment,
        deal_type: DealType::Sale,
        price,
        floor: "3/10".into(),
        area: "84".into(),
        exclusive_area: "59".into(),
        direction: "남향".into(),
        features: String::new(),
        registered_at: None,
    }
}

pub fn markers(complexes: &[(&str, u32)]) -> NetworkPayload {
    NetworkPayload::Complexes(
        complexes
            .iter()
            .map(|(id, count)| ComplexSighting {
                id: id.to_string(),
                name: format!("complex {id}"),
                asset_type: AssetType::Apartment,
                listing_count: *count,
            })
            .collect(),
    )
}

fn near(a: GeoPoint, b: GeoPoint) -> bool {
    (a.lat - b.lat).abs() < 1e-6 && (a.lon - b.lon).abs() < 1e-6
}

/// In-memory map. Drags land exactly; sweep dwells replay a script.
#[derive(Default)]
pub struct FakeMapSurface {
    view: Option<MapView>,
    sweep_script: VecDeque<Vec<NetworkPayload>>,
    listings: HashMap<String, Vec<ArticleStub>>,
    blocked: Vec<GeoPoint>,
    fail_open: bool,
    pending_visit: Option<String>,
    pub opened: Vec<AssetType>,
    pub nav_calls: usize,
    pub nav_calls_since_sweep_dwell: usize,
    pub sweep_dwells: usize,
    pub visited: Vec<String>,
}

impl FakeMapSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads for each sweep dwell in order; later dwells see nothing
    pub fn with_sweep(mut self, script: Vec<Vec<NetworkPayload>>) -> Self {
        self.sweep_script = script.into();
        self
    }

    pub fn with_listings(mut self, complex: &str, stubs: Vec<ArticleStub>) -> Self {
        self.listings.insert(complex.to_string(), stubs);
        self
    }

    /// Navigation to this point always fails
    pub fn block(mut self, point: GeoPoint) -> Self {
        self.blocked.push(point);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    fn nav(&mut self) {
        self.nav_calls += 1;
        self.nav_calls_since_sweep_dwell += 1;
    }

    fn check(&self, point: GeoPoint) -> Result<(), NavigationFailure> {
        if self.blocked.iter().any(|b| near(*b, point)) {
            return Err(NavigationFailure::Unreachable(format!("{:?}", point)));
        }
        Ok(())
    }
}

#[async_trait]
impl MapSurface for FakeMapSurface {
    async fn open_map(
        &mut self,
        asset: AssetType,
        center: GeoPoint,
        zoom: u8,
    ) -> Result<(), NavigationFailure> {
        if self.fail_open {
            return Err(NavigationFailure::Detached("browser closed".into()));
        }
        self.opened.push(asset);
        self.view = Some(MapView {
            center,
            zoom: f64::from(zoom),
        });
        Ok(())
    }

    async fn navigate_view(&mut self, point: GeoPoint, zoom: u8) -> Result<(), NavigationFailure> {
        self.nav();
        self.check(point)?;
        self.view = Some(MapView {
            center: point,
            zoom: f64::from(zoom),
        });
        Ok(())
    }

    async fn current_view(&mut self) -> Option<MapView> {
        self.view
    }

    async fn zoom_to(&mut self, level: u8) -> Result<(), NavigationFailure> {
        self.nav();
        if let Some(view) = self.view.as_mut() {
            view.zoom = f64::from(level);
        }
        Ok(())
    }

    async fn pan_by(&mut self, delta: PixelDelta, _steps: u32) -> Result<(), NavigationFailure> {
        self.nav();
        let Some(view) = self.view else {
            return Err(NavigationFailure::Detached("no view".into()));
        };
        let px = projection::to_pixel(view.center, view.zoom)
            .map_err(|e| NavigationFailure::Unreachable(e.to_string()))?;
        let landed = projection::to_lat_lon(
            PixelPoint {
                x: px.x + delta.dx,
                y: px.y + delta.dy,
            },
            view.zoom,
        );
        self.check(landed)?;
        self.view = Some(MapView {
            center: landed,
            zoom: view.zoom,
        });
        Ok(())
    }

    async fn visit_complex(&mut self, complex: &ComplexRecord) -> Result<(), NavigationFailure> {
        self.visited.push(complex.id.clone());
        self.pending_visit = Some(complex.id.clone());
        Ok(())
    }

    async fn await_network_payloads(&mut self, _window: Duration) -> Vec<NetworkPayload> {
        if let Some(id) = self.pending_visit.take() {
            let articles = self.listings.get(&id).cloned().unwrap_or_default();
            return vec![NetworkPayload::Articles {
                complex_id: Some(id),
                total: Some(articles.len() as u32),
                articles,
            }];
        }
        self.sweep_dwells += 1;
        self.nav_calls_since_sweep_dwell = 0;
        self.sweep_script.pop_front().unwrap_or_default()
    }
}

/// Detail source that records how its handles are used
#[derive(Default)]
pub struct FakeDetailSource {
    next_handle: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub fetches: AtomicUsize,
    pub completed: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub shared_handle_uses: AtomicUsize,
    busy: Mutex<HashSet<usize>>,
    delay: Duration,
    jeonse: HashMap<String, i64>,
    default_jeonse: Option<i64>,
    failing: HashSet<String>,
    refuse_handles: bool,
}

impl FakeDetailSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_jeonse(mut self, article: &str, amount: i64) -> Self {
        self.jeonse.insert(article.to_string(), amount);
        self
    }

    pub fn with_default_jeonse(mut self, amount: i64) -> Self {
        self.default_jeonse = Some(amount);
        self
    }

    pub fn failing(mut self, article: &str) -> Self {
        self.failing.insert(article.to_string());
        self
    }

    pub fn refusing_handles(mut self) -> Self {
        self.refuse_handles = true;
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DetailSource for FakeDetailSource {
    type Handle = usize;

    async fn open_handle(&self) -> Result<usize, FetchFailure> {
        if self.refuse_handles {
            return Err(FetchFailure::HandleUnavailable("chrome is gone".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }

    async fn close_handle(&self, _handle: usize) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    async fn fetch_detail(
        &self,
        handle: &mut usize,
        article_id: &str,
        _timeout: Duration,
    ) -> Result<RawDetail, FetchFailure> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.busy.lock().unwrap().insert(*handle) {
            self.shared_handle_uses.fetch_add(1, Ordering::SeqCst);
        }

        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }

        self.busy.lock().unwrap().remove(handle);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        if self.failing.contains(article_id) {
            return Err(FetchFailure::NotFound(article_id.to_string()));
        }
        Ok(RawDetail {
            article_id: Some(article_id.to_string()),
            broker_office: "행복공인중개사".into(),
            broker_name: "김철수".into(),
            phones: vec!["02-123-4567".into()],
            latest_jeonse: self.jeonse.get(article_id).copied().or(self.default_jeonse),
            jeonse_window: None,
        })
    }
}

/// Keeps what it was given
#[derive(Default)]
pub struct MemorySink {
    pub ids: Mutex<Vec<String>>,
    pub summary: Mutex<Option<RunSummary>>,
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn emit(&self, rows: &[GapRow<'_>], summary: &RunSummary) -> anyhow::Result<()> {
        *self.ids.lock().unwrap() = rows.iter().map(|r| r.record.id.clone()).collect();
        *self.summary.lock().unwrap() = Some(summary.clone());
        Ok(())
    }

    fn sink_name(&self) -> &'static str {
        "memory"
    }
}
