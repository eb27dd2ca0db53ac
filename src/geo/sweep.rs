//! Ring-based sweep around a center point.
//!
//! Only the top and bottom row of every ring is visited; the side columns
//! are skipped so the visit order never forms a continuous scan line.

use crate::geo::{projection, RegionBounds};
use crate::models::{GeoPoint, GridOffset};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSweepPlanner {
    rings: u32,
    step_px: f64,
}

impl GridSweepPlanner {
    pub fn new(rings: u32, step_px: f64) -> Self {
        debug_assert!(step_px > 0.0);
        Self { rings, step_px }
    }

    /// Number of points a full sweep yields, center included
    pub fn point_count(&self) -> usize {
        1 + (1..=self.rings as usize).map(|r| 2 * (2 * r + 1)).sum::<usize>()
    }

    /// Fresh pass over the sweep offsets. Each call starts from the center again.
    pub fn offsets(&self) -> SweepOffsets {
        SweepOffsets {
            rings: self.rings,
            step_px: self.step_px,
            ring: 0,
            dx: 0,
            bottom_row: false,
            remaining: self.point_count(),
        }
    }

    /// Geographic targets for a sweep around `center`, clamped to `bounds`
    pub fn targets(
        &self,
        center: GeoPoint,
        zoom: f64,
        bounds: &RegionBounds,
    ) -> Result<Vec<GeoPoint>, projection::ProjectionError> {
        let origin = projection::to_pixel(center, zoom)?;
        Ok(self
            .offsets()
            .map(|offset| bounds.clamp(projection::to_lat_lon(origin.offset(offset), zoom)))
            .collect())
    }
}

/// Iterator over the offsets of one sweep
#[derive(Debug, Clone)]
pub struct SweepOffsets {
    rings: u32,
    step_px: f64,
    ring: u32,
    dx: i64,
    bottom_row: bool,
    remaining: usize,
}

impl Iterator for SweepOffsets {
    type Item = GridOffset;

    fn next(&mut self) -> Option<GridOffset> {
        if self.ring == 0 {
            if self.remaining == 0 {
                return None;
            }
            self.ring = 1;
            self.dx = -1;
            self.remaining -= 1;
            return Some(GridOffset { dx: 0.0, dy: 0.0 });
        }
        if self.ring > self.rings {
            return None;
        }

        let r = i64::from(self.ring);
        let dy = if self.bottom_row { r } else { -r };
        let offset = GridOffset {
            dx: self.dx as f64 * self.step_px,
            dy: dy as f64 * self.step_px,
        };

        self.dx += 1;
        if self.dx > r {
            if self.bottom_row {
                self.ring += 1;
                self.dx = -(r + 1);
                self.bottom_row = false;
            } else {
                self.dx = -r;
                self.bottom_row = true;
            }
        }
        self.remaining -= 1;
        Some(offset)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for SweepOffsets {}
