use crate::error::{FetchFailure, NavigationFailure};
use crate::models::{AssetType, ComplexRecord, GeoPoint, MapView, PixelDelta};
use crate::crawl::navigation::eased_path;
use crate::scrapers::naver::{self, DetailPatterns};
use crate::scrapers::traits::{DetailSource, MapSurface};
use crate::scrapers::types::{NetworkPayload, RawDetail};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use headless_chrome::browser::tab::RequestPausedDecision;
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{FailRequest, RequestPattern, RequestStage};
use headless_chrome::protocol::cdp::Input;
use headless_chrome::protocol::cdp::Network::events::ResponseReceivedEventParams;
use headless_chrome::protocol::cdp::Network::{ErrorReason, GetResponseBodyReturnObject, ResourceType};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const VIEWPORT: (u32, u32) = (1920, 1080);
const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
    AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
const ACCEPT_LANGUAGE: &str = "ko-KR,ko;q=0.9";

/// Wheel clicks tried before giving up on a zoom level
const MAX_ZOOM_STEPS: u32 = 12;

/// Click the listing toggle so markers carry article counts
const SHOW_LISTINGS_JS: &str = r#"
    const toggle = [...document.querySelectorAll('button, a')].find(el => el.textContent.trim() === '매물');
    if (toggle && toggle.getAttribute('aria-pressed') !== 'true') toggle.click();
"#;

/// Select the sale tab on a complex page
const SALE_TAB_JS: &str = r#"
    const tab = [...document.querySelectorAll('button, a, label')].find(el => el.textContent.trim() === '매매');
    if (tab) tab.click();
"#;

/// Keep links from spawning windows the crawl does not track
const NO_POPUPS_JS: &str = "window.open = () => null;";

/// Open the jeonse price history on a detail page
const JEONSE_HISTORY_JS: &str = r#"
    const find = text => [...document.querySelectorAll('button, a, li, span')].find(el => el.textContent.trim() === text);
    const prices = find('실거래가');
    if (prices) prices.click();
    const jeonse = find('전세');
    if (jeonse) jeonse.click();
"#;

/// One Chrome process shared by the map tab and every detail tab
#[derive(Clone)]
pub struct ChromeSession {
    browser: Arc<Browser>,
    block_heavy_resources: bool,
}

impl ChromeSession {
    /// Launch Chrome
    pub fn launch(headless: bool, block_heavy_resources: bool) -> Result<Self> {
        info!("Launching {} Chrome...", if headless { "headless" } else { "visible" });

        let mut args: Vec<&OsStr> = vec![OsStr::new("--lang=ko-KR")];
        if block_heavy_resources {
            args.push(OsStr::new("--blink-settings=imagesEnabled=false"));
        }

        let options = LaunchOptions::default_builder()
            .headless(headless)
            .window_size(Some(VIEWPORT))
            .idle_browser_timeout(Duration::from_secs(600))
            .args(args)
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;

        Ok(Self {
            browser: Arc::new(browser),
            block_heavy_resources,
        })
    }

    /// New tab with `navigator.webdriver` hidden and heavy resources aborted
    fn new_tab(&self) -> Result<Arc<Tab>> {
        let tab = self.browser.new_tab().context("Failed to open tab")?;
        tab.enable_stealth_mode().context("Failed to enable stealth mode")?;
        if self.block_heavy_resources {
            block_heavy_resources(&tab)?;
        }
        Ok(tab)
    }
}

/// Resource types aborted before they reach the network
fn is_heavy(resource: &ResourceType) -> bool {
    matches!(resource, ResourceType::Image | ResourceType::Media | ResourceType::Font)
}

fn heavy_resource_patterns() -> Vec<RequestPattern> {
    [ResourceType::Image, ResourceType::Media, ResourceType::Font]
        .into_iter()
        .map(|resource| RequestPattern {
            url_pattern: None,
            resource_Type: Some(resource),
            request_stage: Some(RequestStage::Request),
        })
        .collect()
}

fn block_heavy_resources(tab: &Arc<Tab>) -> Result<()> {
    let patterns = heavy_resource_patterns();
    tab.enable_fetch(Some(patterns.as_slice()), None)
        .context("Failed to enable request interception")?;
    tab.enable_request_interception(Arc::new(
        |_transport: Arc<Transport>, _session: SessionId, paused: RequestPausedEvent| {
            if is_heavy(&paused.params.resource_Type) {
                RequestPausedDecision::Fail(FailRequest {
                    request_id: paused.params.request_id,
                    error_reason: ErrorReason::BlockedByClient,
                })
            } else {
                RequestPausedDecision::Continue(None)
            }
        },
    ))
    .context("Failed to install request interceptor")?;
    Ok(())
}

/// Run a blocking tab operation off the async runtime
async fn on_tab<T, F>(tab: &Arc<Tab>, op: F) -> Result<T>
where
    F: FnOnce(&Tab) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let tab = Arc::clone(tab);
    tokio::task::spawn_blocking(move || op(&tab))
        .await
        .context("Browser task panicked")?
}

fn detached(e: anyhow::Error) -> NavigationFailure {
    NavigationFailure::Detached(format!("{:#}", e))
}

fn mouse(kind: Input::DispatchMouseEventTypeOption, x: f64, y: f64, pressed: bool) -> Input::DispatchMouseEvent {
    Input::DispatchMouseEvent {
        Type: kind,
        x,
        y,
        modifiers: None,
        timestamp: None,
        button: Some(if pressed {
            Input::MouseButton::Left
        } else {
            Input::MouseButton::None
        }),
        buttons: Some(if pressed { 1 } else { 0 }),
        click_count: pressed.then_some(1),
        force: None,
        tangential_pressure: None,
        tilt_x: None,
        tilt_y: None,
        twist: None,
        delta_x: None,
        delta_y: None,
        pointer_Type: None,
    }
}

/// What the response listener should currently collect
struct Capture {
    asset: AssetType,
    payloads: Vec<NetworkPayload>,
}

/// The new.land.naver.com map, driven through one Chrome tab
pub struct NaverMapSurface {
    tab: Arc<Tab>,
    capture: Arc<Mutex<Capture>>,
    asset: AssetType,
    settle: Duration,
}

impl NaverMapSurface {
    /// Open the map tab and start listening to its API traffic
    pub fn open(session: &ChromeSession) -> Result<Self> {
        let tab = session.new_tab()?;
        let capture = Arc::new(Mutex::new(Capture {
            asset: AssetType::Apartment,
            payloads: Vec::new(),
        }));

        let sink = Arc::clone(&capture);
        tab.register_response_handling(
            "gap-scout-capture",
            Box::new(
                move |params: ResponseReceivedEventParams,
                      fetch_body: &dyn Fn() -> Result<GetResponseBodyReturnObject>| {
                    let url = params.response.url;
                    if !url.contains("/api/") {
                        return;
                    }
                    let body = match fetch_body() {
                        Ok(body) if !body.base_64_encoded => body.body,
                        Ok(_) => return,
                        Err(e) => {
                            debug!("No body for {}: {}", url, e);
                            return;
                        }
                    };
                    let mut capture = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(payload) = naver::classify_response(&url, &body, capture.asset) {
                        capture.payloads.push(payload);
                    }
                },
            ),
        )
        .context("Failed to register response listener")?;

        Ok(Self {
            tab,
            capture,
            asset: AssetType::Apartment,
            settle: Duration::from_millis(1500),
        })
    }

    async fn load(&self, url: String) -> Result<(), NavigationFailure> {
        debug!("Loading {}", url);
        on_tab(&self.tab, move |tab| {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            tab.evaluate(NO_POPUPS_JS, false)?;
            Ok(())
        })
        .await
        .map_err(detached)?;
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn run_js(&self, script: &'static str) {
        if let Err(e) = on_tab(&self.tab, move |tab| tab.evaluate(script, false).map(|_| ())).await {
            debug!("Script failed: {:#}", e);
        }
    }

    async fn wheel(&self, zoom_in: bool) -> Result<(), NavigationFailure> {
        let (x, y) = center_of_viewport();
        on_tab(&self.tab, move |tab| {
            let mut event = mouse(Input::DispatchMouseEventTypeOption::MouseWheel, x, y, false);
            event.button = None;
            event.buttons = None;
            event.delta_x = Some(0.0);
            event.delta_y = Some(if zoom_in { -120.0 } else { 120.0 });
            tab.call_method(event)?;
            Ok(())
        })
        .await
        .map_err(detached)
    }
}

fn center_of_viewport() -> (f64, f64) {
    (f64::from(VIEWPORT.0) / 2.0, f64::from(VIEWPORT.1) / 2.0)
}

#[async_trait]
impl MapSurface for NaverMapSurface {
    async fn open_map(
        &mut self,
        asset: AssetType,
        center: GeoPoint,
        zoom: u8,
    ) -> Result<(), NavigationFailure> {
        self.asset = asset;
        {
            let mut capture = self.capture.lock().unwrap_or_else(PoisonError::into_inner);
            capture.asset = asset;
            capture.payloads.clear();
        }
        info!("Opening {} map...", asset.endpoint());
        self.load(naver::map_url(asset, center.lat, center.lon, zoom)).await?;
        self.run_js(SHOW_LISTINGS_JS).await;
        Ok(())
    }

    async fn navigate_view(&mut self, point: GeoPoint, zoom: u8) -> Result<(), NavigationFailure> {
        self.load(naver::map_url(self.asset, point.lat, point.lon, zoom)).await
    }

    async fn current_view(&mut self) -> Option<MapView> {
        let url = on_tab(&self.tab, |tab| Ok(tab.get_url())).await.ok()?;
        naver::view_from_url(&url)
    }

    async fn zoom_to(&mut self, level: u8) -> Result<(), NavigationFailure> {
        let target = f64::from(level);
        let mut last_seen = None;
        for _ in 0..MAX_ZOOM_STEPS {
            let current = self.current_view().await.map(|v| v.zoom);
            last_seen = current.or(last_seen);
            let Some(current) = current else {
                break;
            };
            if (current - target).abs() < 0.5 {
                return Ok(());
            }
            self.wheel(current < target).await?;
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        Err(NavigationFailure::ZoomNotReached { target: level, last_seen })
    }

    async fn pan_by(&mut self, delta: PixelDelta, steps: u32) -> Result<(), NavigationFailure> {
        // The content follows the pointer, so the pointer moves against the view
        let (cx, cy) = center_of_viewport();
        let (sx, sy) = (cx + delta.dx / 2.0, cy + delta.dy / 2.0);
        let path = eased_path(delta, steps);

        on_tab(&self.tab, move |tab| {
            use Input::DispatchMouseEventTypeOption::{MouseMoved, MousePressed, MouseReleased};
            tab.call_method(mouse(MouseMoved, sx, sy, false))?;
            tab.call_method(mouse(MousePressed, sx, sy, true))?;
            let (mut x, mut y) = (sx, sy);
            for offset in &path {
                x = sx - offset.dx;
                y = sy - offset.dy;
                let mut moved = mouse(MouseMoved, x, y, true);
                moved.click_count = None;
                tab.call_method(moved)?;
                thread::sleep(Duration::from_millis(12));
            }
            tab.call_method(mouse(MouseReleased, x, y, true))?;
            Ok(())
        })
        .await
        .map_err(detached)?;

        tokio::time::sleep(Duration::from_millis(250)).await;
        Ok(())
    }

    async fn visit_complex(&mut self, complex: &ComplexRecord) -> Result<(), NavigationFailure> {
        self.load(naver::complex_url(complex.asset_type, &complex.id)).await?;
        self.run_js(SALE_TAB_JS).await;
        Ok(())
    }

    async fn await_network_payloads(&mut self, window: Duration) -> Vec<NetworkPayload> {
        tokio::time::sleep(window).await;
        let mut capture = self.capture.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut capture.payloads)
    }
}

/// Article detail pages on m.land.naver.com, one tab per handle
pub struct NaverDetailSource {
    session: ChromeSession,
    patterns: Arc<DetailPatterns>,
}

impl NaverDetailSource {
    pub fn new(session: &ChromeSession) -> Result<Self> {
        Ok(Self {
            session: session.clone(),
            patterns: Arc::new(DetailPatterns::new().context("Failed to compile detail patterns")?),
        })
    }
}

/// A detail tab and the lock held while blocking work drives it.
///
/// The lock outlives an abandoned fetch, so closing the tab waits for it.
pub struct DetailTab {
    tab: Arc<Tab>,
    busy: Arc<Mutex<()>>,
}

impl DetailTab {
    async fn exclusive<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        let busy = Arc::clone(&self.busy);
        tokio::task::spawn_blocking(move || {
            let _held = busy.lock().unwrap_or_else(PoisonError::into_inner);
            op(&tab)
        })
        .await
        .context("Browser task panicked")?
    }
}

/// Bound the tab's next wait by what is left of `deadline`
fn arm(tab: &Tab, deadline: Instant) -> Result<()> {
    let left = deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
        .ok_or_else(|| anyhow!("detail deadline passed"))?;
    tab.set_default_timeout(left);
    Ok(())
}

/// Load a detail page and return its visible text
fn read_page(tab: &Tab, url: &str, deadline: Instant) -> Result<String> {
    arm(tab, deadline)?;
    tab.navigate_to(url)?;
    tab.wait_until_navigated()?;
    tab.evaluate(NO_POPUPS_JS, false)?;
    let html = tab.get_content()?;
    Ok(naver::page_text(&html))
}

fn fetch_blocking(
    tab: &Tab,
    article_id: &str,
    patterns: &DetailPatterns,
    deadline: Instant,
) -> Result<Option<RawDetail>> {
    let mut text = read_page(tab, &naver::detail_url(article_id), deadline)?;
    if naver::needs_alternate(&text) {
        debug!("Retrying article {} on the alternate page", article_id);
        text = read_page(tab, &naver::alternate_detail_url(article_id), deadline)?;
        if naver::needs_alternate(&text) {
            return Ok(None);
        }
    }

    arm(tab, deadline)?;
    if tab.evaluate(JEONSE_HISTORY_JS, false).is_ok() {
        thread::sleep(Duration::from_millis(250));
        arm(tab, deadline)?;
        if let Ok(html) = tab.get_content() {
            text = naver::page_text(&html);
        }
    }

    let mut raw = patterns.parse_detail(article_id, &text);
    if !tab.get_url().contains(article_id) {
        raw.article_id = None;
    }
    Ok(Some(raw))
}

#[async_trait]
impl DetailSource for NaverDetailSource {
    type Handle = DetailTab;

    async fn open_handle(&self) -> Result<DetailTab, FetchFailure> {
        let session = self.session.clone();
        let opened = tokio::task::spawn_blocking(move || {
            let tab = session.new_tab()?;
            tab.set_user_agent(MOBILE_USER_AGENT, Some(ACCEPT_LANGUAGE), None)?;
            Ok::<_, anyhow::Error>(tab)
        })
        .await
        .map_err(|e| anyhow!(e))
        .and_then(|opened| opened);

        match opened {
            Ok(tab) => Ok(DetailTab {
                tab,
                busy: Arc::new(Mutex::new(())),
            }),
            Err(e) => Err(FetchFailure::HandleUnavailable(format!("{:#}", e))),
        }
    }

    async fn close_handle(&self, handle: DetailTab) {
        if let Err(e) = handle.exclusive(|tab| tab.close(true).map(|_| ())).await {
            warn!("Failed to close detail tab: {:#}", e);
        }
    }

    async fn fetch_detail(
        &self,
        handle: &mut DetailTab,
        article_id: &str,
        timeout: Duration,
    ) -> Result<RawDetail, FetchFailure> {
        let id = article_id.to_string();
        let patterns = Arc::clone(&self.patterns);
        let deadline = Instant::now() + timeout;
        let fetched = handle
            .exclusive(move |tab| fetch_blocking(tab, &id, &patterns, deadline))
            .await;

        match fetched {
            Ok(Some(raw)) => Ok(raw),
            Ok(None) => Err(FetchFailure::NotFound(article_id.to_string())),
            Err(e) => Err(FetchFailure::Surface {
                article_id: article_id.to_string(),
                message: format!("{:#}", e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heavy_resources_are_media_fonts_and_images() {
        assert!(is_heavy(&ResourceType::Media));
        assert!(is_heavy(&ResourceType::Font));
        assert!(is_heavy(&ResourceType::Image));
        assert!(!is_heavy(&ResourceType::Document));
        assert!(!is_heavy(&ResourceType::Script));
        assert!(!is_heavy(&ResourceType::Stylesheet));
    }

    #[test]
    fn interception_only_pauses_heavy_requests() {
        let patterns = heavy_resource_patterns();
        assert_eq!(patterns.len(), 3);
        for pattern in &patterns {
            assert!(pattern.url_pattern.is_none());
            assert!(pattern.resource_Type.as_ref().is_some_and(is_heavy));
            assert!(matches!(pattern.request_stage, Some(RequestStage::Request)));
        }
    }
}
