use crate::types::{OlciError, OlciResult, RasterGrid, Rectangle};
use std::sync::Arc;

/// Coarse-resolution auxiliary grid (solar/viewing angles) interpolated to
/// full scene resolution on read.
///
/// Tie points are stored every `subsampling` pixels starting at `offset`;
/// reads bilinearly interpolate between the four surrounding tie points,
/// clamping at the scene borders.
#[derive(Debug, Clone)]
pub struct TiePointGrid {
    name: String,
    offset_x: f64,
    offset_y: f64,
    subsampling_x: f64,
    subsampling_y: f64,
    data: Arc<RasterGrid>,
}

impl TiePointGrid {
    pub fn new(
        name: &str,
        offset_x: f64,
        offset_y: f64,
        subsampling_x: f64,
        subsampling_y: f64,
        data: RasterGrid,
    ) -> OlciResult<Self> {
        if subsampling_x <= 0.0 || subsampling_y <= 0.0 {
            return Err(OlciError::Processing(format!(
                "Tie point grid '{}' has non-positive subsampling",
                name
            )));
        }
        if data.is_empty() {
            return Err(OlciError::Processing(format!(
                "Tie point grid '{}' has no tie points",
                name
            )));
        }
        Ok(Self {
            name: name.to_string(),
            offset_x,
            offset_y,
            subsampling_x,
            subsampling_y,
            data: Arc::new(data),
        })
    }

    /// Grid covering the full scene at native resolution (subsampling 1)
    pub fn full_resolution(name: &str, data: RasterGrid) -> OlciResult<Self> {
        Self::new(name, 0.0, 0.0, 1.0, 1.0, data)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interpolated sample at a full-resolution pixel position
    pub fn sample_at(&self, x: usize, y: usize) -> f64 {
        let (rows, cols) = self.data.dim();

        // Map to tie-point coordinates
        let gx = ((x as f64 - self.offset_x) / self.subsampling_x).max(0.0);
        let gy = ((y as f64 - self.offset_y) / self.subsampling_y).max(0.0);

        let j0 = (gx.floor() as usize).min(cols - 1);
        let j1 = (j0 + 1).min(cols - 1);
        let i0 = (gy.floor() as usize).min(rows - 1);
        let i1 = (i0 + 1).min(rows - 1);

        let fx = (gx - j0 as f64).clamp(0.0, 1.0);
        let fy = (gy - i0 as f64).clamp(0.0, 1.0);

        // Bilinear interpolation
        self.data[[i0, j0]] * (1.0 - fx) * (1.0 - fy)
            + self.data[[i0, j1]] * fx * (1.0 - fy)
            + self.data[[i1, j0]] * (1.0 - fx) * fy
            + self.data[[i1, j1]] * fx * fy
    }

    /// Interpolated samples for a full-resolution rectangle
    pub fn tile(&self, rect: &Rectangle) -> RasterGrid {
        let mut out = RasterGrid::zeros((rect.height, rect.width));
        for row in 0..rect.height {
            for col in 0..rect.width {
                out[[row, col]] = self.sample_at(rect.x + col, rect.y + row);
            }
        }
        out
    }
}
