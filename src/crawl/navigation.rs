//! Human-like movement of the map view.
//!
//! Every move zooms out to a random level, drags toward the target, zooms
//! back in and drags again for the fine correction. The random choices are
//! made up front in a [`NavigationPlan`]; [`NavigationSimulator`] only
//! carries them out against a [`MapSurface`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::CrawlConfig;
use crate::error::NavigationFailure;
use crate::geo::projection;
use crate::models::{GeoPoint, MapView, PixelDelta};
use crate::scrapers::MapSurface;

/// Drags shorter than this are skipped
pub const ARRIVAL_TOLERANCE_PX: f64 = 3.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavigationSettings {
    pub zoom_out_drop_min: u8,
    pub zoom_out_drop_max: u8,
    pub pointer_steps: u32,
    pub max_drag_px: f64,
}

impl NavigationSettings {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            zoom_out_drop_min: config.zoom_out_drop_min,
            zoom_out_drop_max: config.zoom_out_drop_max,
            pointer_steps: config.pointer_steps,
            max_drag_px: config.max_drag_px,
        }
    }
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self::from_config(&CrawlConfig::default())
    }
}

/// Random decisions for a single move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationPlan {
    pub zoom_out: u8,
    pub target_zoom: u8,
    pub pointer_steps: u32,
}

impl NavigationPlan {
    pub fn choose<R: Rng + ?Sized>(
        rng: &mut R,
        target_zoom: u8,
        settings: &NavigationSettings,
    ) -> Self {
        let drop = rng.random_range(settings.zoom_out_drop_min..=settings.zoom_out_drop_max);
        let base = settings.pointer_steps.max(10);
        Self {
            zoom_out: target_zoom.saturating_sub(drop),
            target_zoom,
            pointer_steps: rng.random_range(base..=base + base / 2),
        }
    }
}

/// Split a drag into gestures no longer than `max_len`, all pointing the same way
pub fn drag_segments(delta: PixelDelta, max_len: f64) -> Vec<PixelDelta> {
    let length = delta.length();
    if length <= ARRIVAL_TOLERANCE_PX {
        return Vec::new();
    }
    let count = (length / max_len).ceil().max(1.0) as usize;
    let segment = delta.scaled(1.0 / count as f64);
    vec![segment; count]
}

/// Cumulative pointer offsets for one gesture.
///
/// Smoothstep easing: slow start, fast middle, slow arrival. The last
/// position is exactly `delta` and every position is closer to it than the one before.
pub fn eased_path(delta: PixelDelta, steps: u32) -> Vec<PixelDelta> {
    let steps = steps.max(1);
    (1..=steps)
        .map(|i| {
            let t = f64::from(i) / f64::from(steps);
            delta.scaled(t * t * (3.0 - 2.0 * t))
        })
        .collect()
}

/// Drives the single map view. Remembers only where the view was left.
pub struct NavigationSimulator<R = StdRng> {
    settings: NavigationSettings,
    rng: R,
    view: Option<MapView>,
}

impl NavigationSimulator<StdRng> {
    pub fn new(settings: NavigationSettings) -> Self {
        Self::with_rng(settings, StdRng::from_os_rng())
    }
}

impl<R: Rng + Send> NavigationSimulator<R> {
    pub fn with_rng(settings: NavigationSettings, rng: R) -> Self {
        Self {
            settings,
            rng,
            view: None,
        }
    }

    pub fn view(&self) -> Option<MapView> {
        self.view
    }

    /// The surface was repositioned outside the simulator (e.g. a fresh page load)
    pub fn reset_view(&mut self, view: Option<MapView>) {
        self.view = view;
    }

    /// Move to `target` at `zoom`, retrying up to `attempts` times in total
    pub async fn move_with_retry<S: MapSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        target: GeoPoint,
        zoom: u8,
        attempts: u32,
    ) -> Result<u32, NavigationFailure> {
        let mut last = None;
        for attempt in 1..=attempts.max(1) {
            match self.move_to(surface, target, zoom).await {
                Ok(()) => return Ok(attempt),
                Err(e) => {
                    warn!(attempt, "navigation to {:?} failed: {}", target, e);
                    self.view = None;
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| NavigationFailure::Unreachable(format!("{:?}", target))))
    }

    pub async fn move_to<S: MapSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        target: GeoPoint,
        zoom: u8,
    ) -> Result<(), NavigationFailure> {
        let start = match surface.current_view().await.or(self.view) {
            Some(view) => view,
            None => {
                debug!("view unknown, jumping to {:?}", target);
                surface.navigate_view(target, zoom).await?;
                self.view = Some(MapView {
                    center: target,
                    zoom: f64::from(zoom),
                });
                return Ok(());
            }
        };

        let plan = NavigationPlan::choose(&mut self.rng, zoom, &self.settings);
        debug!(?plan, "moving to {:?}", target);

        surface.zoom_to(plan.zoom_out).await?;
        self.drag(surface, start.center, target, plan.zoom_out, plan.pointer_steps)
            .await?;

        surface.zoom_to(plan.target_zoom).await?;
        let settled = surface
            .current_view()
            .await
            .map(|v| v.center)
            .unwrap_or(target);
        self.drag(surface, settled, target, plan.target_zoom, plan.pointer_steps)
            .await?;

        self.view = Some(MapView {
            center: target,
            zoom: f64::from(plan.target_zoom),
        });
        Ok(())
    }

    async fn drag<S: MapSurface + ?Sized>(
        &self,
        surface: &mut S,
        from: GeoPoint,
        to: GeoPoint,
        zoom: u8,
        steps: u32,
    ) -> Result<(), NavigationFailure> {
        let zoom = f64::from(zoom);
        let unreachable = |e: projection::ProjectionError| NavigationFailure::Unreachable(e.to_string());
        let from_px = projection::to_pixel(from, zoom).map_err(unreachable)?;
        let to_px = projection::to_pixel(to, zoom).map_err(unreachable)?;

        for segment in drag_segments(from_px.delta_to(to_px), self.settings.max_drag_px) {
            surface.pan_by(segment, steps).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetType, ComplexRecord};
    use crate::scrapers::types::NetworkPayload;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Navigate(u8),
        Zoom(u8),
        Pan(PixelDelta, u32),
    }

    /// Tracks its own view; every drag lands 3% short of where it was aimed
    #[derive(Default)]
    struct RecordingSurface {
        calls: Vec<Call>,
        view: Option<MapView>,
        fail_pans: usize,
    }

    #[async_trait]
    impl MapSurface for RecordingSurface {
        async fn open_map(
            &mut self,
            _asset: AssetType,
            _center: GeoPoint,
            _zoom: u8,
        ) -> Result<(), NavigationFailure> {
            Ok(())
        }

        async fn navigate_view(&mut self, point: GeoPoint, zoom: u8) -> Result<(), NavigationFailure> {
            self.calls.push(Call::Navigate(zoom));
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
            self.calls.push(Call::Zoom(level));
            if let Some(view) = self.view.as_mut() {
                view.zoom = f64::from(level);
            }
            Ok(())
        }

        async fn pan_by(&mut self, delta: PixelDelta, steps: u32) -> Result<(), NavigationFailure> {
            if self.fail_pans > 0 {
                self.fail_pans -= 1;
                return Err(NavigationFailure::Detached("tab crashed".into()));
            }
            self.calls.push(Call::Pan(delta, steps));
            if let Some(view) = self.view.as_mut() {
                let short = delta.scaled(0.97);
                let px = projection::to_pixel(view.center, view.zoom).unwrap();
                view.center = projection::to_lat_lon(
                    crate::models::PixelPoint {
                        x: px.x + short.dx,
                        y: px.y + short.dy,
                    },
                    view.zoom,
                );
            }
            Ok(())
        }

        async fn visit_complex(&mut self, _complex: &ComplexRecord) -> Result<(), NavigationFailure> {
            Ok(())
        }

        async fn await_network_payloads(&mut self, _window: Duration) -> Vec<NetworkPayload> {
            Vec::new()
        }
    }

    fn start_view() -> Option<MapView> {
        Some(MapView {
            center: GeoPoint::new(37.56, 126.98),
            zoom: 16.0,
        })
    }

    fn simulator(seed: u64) -> NavigationSimulator<StdRng> {
        NavigationSimulator::with_rng(NavigationSettings::default(), StdRng::seed_from_u64(seed))
    }

    #[test]
    fn plan_zooms_out_within_range() {
        let settings = NavigationSettings::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let plan = NavigationPlan::choose(&mut rng, 16, &settings);
            assert!((10..=13).contains(&plan.zoom_out), "{plan:?}");
            assert!(plan.pointer_steps >= 20 && plan.pointer_steps <= 30);
        }
    }

    #[test]
    fn eased_path_approaches_target_monotonically() {
        let delta = PixelDelta { dx: 300.0, dy: -120.0 };
        let path = eased_path(delta, 12);
        assert_eq!(path.len(), 12);
        assert_eq!(*path.last().unwrap(), delta);

        let remaining: Vec<f64> = path
            .iter()
            .map(|p| PixelDelta { dx: delta.dx - p.dx, dy: delta.dy - p.dy }.length())
            .collect();
        assert!(remaining.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn long_drags_are_split() {
        let segments = drag_segments(PixelDelta { dx: 2000.0, dy: 0.0 }, 800.0);
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.length() <= 800.0));
        let total: f64 = segments.iter().map(|s| s.dx).sum();
        assert!((total - 2000.0).abs() < 1e-9);

        assert!(drag_segments(PixelDelta { dx: 1.0, dy: 2.0 }, 800.0).is_empty());
    }

    #[tokio::test]
    async fn unknown_view_jumps_directly() {
        let mut surface = RecordingSurface::default();
        let mut sim = simulator(1);
        sim.move_to(&mut surface, GeoPoint::new(37.56, 126.98), 16)
            .await
            .unwrap();
        assert_eq!(surface.calls, vec![Call::Navigate(16)]);
        assert_eq!(sim.view().unwrap().zoom, 16.0);
    }

    #[tokio::test]
    async fn move_follows_settle_sequence() {
        let mut surface = RecordingSurface {
            view: start_view(),
            ..Default::default()
        };
        let mut sim = simulator(2);

        sim.move_to(&mut surface, GeoPoint::new(37.57, 126.99), 16)
            .await
            .unwrap();

        let zooms: Vec<u8> = surface
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Zoom(z) => Some(*z),
                _ => None,
            })
            .collect();
        assert_eq!(zooms.len(), 2);
        assert!(zooms[0] < 16);
        assert_eq!(zooms[1], 16);

        // zoom out, coarse drag, zoom in, fine drag
        assert!(matches!(surface.calls[0], Call::Zoom(_)));
        assert!(matches!(surface.calls[1], Call::Pan(_, steps) if steps >= 10));
        let zoom_in = surface.calls.iter().rposition(|c| matches!(c, Call::Zoom(_))).unwrap();
        assert!(surface.calls[zoom_in + 1..]
            .iter()
            .all(|c| matches!(c, Call::Pan(_, _))));
        assert!(zoom_in + 1 < surface.calls.len());
        assert_eq!(sim.view().unwrap().center, GeoPoint::new(37.57, 126.99));
    }

    #[tokio::test]
    async fn retries_then_gives_up() {
        let mut surface = RecordingSurface {
            view: start_view(),
            fail_pans: 10,
            ..Default::default()
        };
        let mut sim = simulator(3);

        let err = sim
            .move_with_retry(&mut surface, GeoPoint::new(37.57, 126.99), 16, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, NavigationFailure::Detached(_)));
        assert!(sim.view().is_none());
    }

    #[tokio::test]
    async fn retry_recovers_after_transient_failure() {
        let mut surface = RecordingSurface {
            view: start_view(),
            fail_pans: 1,
            ..Default::default()
        };
        let mut sim = simulator(4);

        let attempts = sim
            .move_with_retry(&mut surface, GeoPoint::new(37.57, 126.99), 16, 2)
            .await
            .unwrap();
        assert_eq!(attempts, 2);
        assert!(!surface.calls.contains(&Call::Navigate(16)));
        let landed = surface.view.unwrap().center;
        assert!((landed.lat - 37.57).abs() < 1e-4 && (landed.lon - 126.99).abs() < 1e-4);
    }
}
