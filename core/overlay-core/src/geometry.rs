//! Overlay geometry: the restorable size/position and the minimized flag.
//!
//! Pure state, no I/O. While minimized, `width`/`height` hold the expanded
//! dimensions to restore; the collapsed height actually displayed is never
//! stored here.

use crate::error::{OverlayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayGeometry {
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
    pub minimized: bool,
}

impl Default for OverlayGeometry {
    fn default() -> Self {
        Self {
            width: 400,
            height: 600,
            x: 0,
            y: 0,
            minimized: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfacePosition {
    pub x: i32,
    pub y: i32,
}

/// Usable area of the primary display (excludes menu bar, dock, taskbar).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkArea {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl WorkArea {
    /// Position that centers `size` horizontally, `top_offset` below the top edge.
    pub fn top_center(&self, size: SurfaceSize, top_offset: i32) -> SurfacePosition {
        let free = i64::from(self.width) - i64::from(size.width);
        SurfacePosition {
            x: saturate(i64::from(self.x) + free.max(0) / 2),
            y: saturate(i64::from(self.y) + i64::from(top_offset)),
        }
    }

    /// Moves `position` by the delta, keeping a surface of `size` fully inside.
    ///
    /// A surface larger than the work area is pinned to its left/top edge.
    pub fn clamp_move(
        &self,
        position: SurfacePosition,
        size: SurfaceSize,
        dx: i32,
        dy: i32,
    ) -> SurfacePosition {
        SurfacePosition {
            x: clamp_axis(position.x, dx, self.x, self.width, size.width),
            y: clamp_axis(position.y, dy, self.y, self.height, size.height),
        }
    }
}

fn clamp_axis(current: i32, delta: i32, origin: i32, span: u32, extent: u32) -> i32 {
    let min = i64::from(origin);
    let max = (min + i64::from(span) - i64::from(extent)).max(min);
    saturate((i64::from(current) + i64::from(delta)).clamp(min, max))
}

fn saturate(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Process-wide holder of the last known overlay geometry.
///
/// Only the overlay controller writes to it; it is reset on process restart.
#[derive(Debug, Default)]
pub struct GeometryStore {
    current: OverlayGeometry,
}

impl GeometryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self, geometry: OverlayGeometry) -> Result<()> {
        if geometry.width == 0 || geometry.height == 0 {
            return Err(OverlayError::InvalidGeometry(format!(
                "width and height must be positive, got {}x{}",
                geometry.width, geometry.height
            )));
        }
        self.current = geometry;
        Ok(())
    }

    pub fn load(&self) -> OverlayGeometry {
        self.current
    }
}
