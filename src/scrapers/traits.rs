use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::crawl::gap::GapRow;
use crate::crawl::RunSummary;
use crate::error::{FetchFailure, NavigationFailure};
use crate::models::{AssetType, ComplexRecord, GeoPoint, MapView, PixelDelta};
use crate::scrapers::types::{NetworkPayload, RawDetail};

/// The interactive map the sweep drives.
///
/// There is exactly one view, so every operation takes `&mut self`.
#[async_trait]
pub trait MapSurface: Send {
    /// Load the map for an asset category centered on `center`
    async fn open_map(
        &mut self,
        asset: AssetType,
        center: GeoPoint,
        zoom: u8,
    ) -> Result<(), NavigationFailure>;

    /// Jump the view to a point. Only used when the current view is unknown.
    async fn navigate_view(&mut self, point: GeoPoint, zoom: u8) -> Result<(), NavigationFailure>;

    /// View state as reported by the surface, if it can tell
    async fn current_view(&mut self) -> Option<MapView>;

    async fn zoom_to(&mut self, level: u8) -> Result<(), NavigationFailure>;

    /// Drag the map so the view center moves by `delta`, through `steps` pointer positions
    async fn pan_by(&mut self, delta: PixelDelta, steps: u32) -> Result<(), NavigationFailure>;

    /// Open a complex so its article list is requested
    async fn visit_complex(&mut self, complex: &ComplexRecord) -> Result<(), NavigationFailure>;

    /// Payloads emitted during `window`, possibly none
    async fn await_network_payloads(&mut self, window: Duration) -> Vec<NetworkPayload>;
}

/// Source of article detail pages, fetched through exclusive handles (e.g. browser tabs)
#[async_trait]
pub trait DetailSource: Send + Sync + 'static {
    type Handle: Send + 'static;

    async fn open_handle(&self) -> Result<Self::Handle, FetchFailure>;

    async fn close_handle(&self, handle: Self::Handle);

    async fn fetch_detail(
        &self,
        handle: &mut Self::Handle,
        article_id: &str,
        timeout: Duration,
    ) -> Result<RawDetail, FetchFailure>;
}

/// Destination for the filtered results
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn emit(&self, rows: &[GapRow<'_>], summary: &RunSummary) -> Result<()>;

    /// Get the name of the sink for logging
    fn sink_name(&self) -> &'static str;
}
