//! Frame assembly and orientation transforms.
//!
//! The assembler turns raw acquisition output into a square intensity image:
//! hardware mode delivers cumulative counter samples that become per-pixel
//! count deltas with the settling prefix stripped, process mode delivers the
//! stream decoder's row grid directly. A [`Frame`] keeps the as-acquired
//! grid immutable and records orientation operations as a replayable
//! sequence, so reset is exact and the transform history stays inspectable.

use crate::error::{ScanError, ScanResult};
use crate::plan::{RasterPlan, ScanSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row-major `rows x cols` grid of non-negative intensities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Grid {
    /// Build a grid from row vectors; all rows must have equal length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> ScanResult<Self> {
        let row_count = rows.len();
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if row_count == 0 || cols == 0 {
            return Err(ScanError::Decode("empty grid".to_string()));
        }
        let mut data = Vec::with_capacity(row_count * cols);
        for row in &rows {
            if row.len() != cols {
                return Err(ScanError::Decode(format!(
                    "ragged grid: row of {} values in a {}-column grid",
                    row.len(),
                    cols
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: row_count,
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Value at `(row, col)`.
    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    /// One row as a slice.
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Minimum and maximum intensity.
    pub fn intensity_range(&self) -> (f64, f64) {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &v in &self.data {
            min = min.min(v);
            max = max.max(v);
        }
        (min, max)
    }

    /// Mirror each row (left-right flip).
    pub fn flip_horizontal(&self) -> Grid {
        let mut data = Vec::with_capacity(self.data.len());
        for r in 0..self.rows {
            data.extend(self.row(r).iter().rev());
        }
        Grid {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }

    /// Reverse the row order (top-bottom flip).
    pub fn flip_vertical(&self) -> Grid {
        let mut data = Vec::with_capacity(self.data.len());
        for r in (0..self.rows).rev() {
            data.extend_from_slice(self.row(r));
        }
        Grid {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }

    /// Quarter turn clockwise. Exact, no interpolation.
    pub fn rotate_clockwise(&self) -> Grid {
        let mut data = Vec::with_capacity(self.data.len());
        for r in 0..self.cols {
            for c in 0..self.rows {
                data.push(self.value(self.rows - 1 - c, r));
            }
        }
        Grid {
            rows: self.cols,
            cols: self.rows,
            data,
        }
    }

    /// Quarter turn counter-clockwise. Exact, no interpolation.
    pub fn rotate_counter_clockwise(&self) -> Grid {
        let mut data = Vec::with_capacity(self.data.len());
        for r in 0..self.cols {
            for c in 0..self.rows {
                data.push(self.value(c, self.cols - 1 - r));
            }
        }
        Grid {
            rows: self.cols,
            cols: self.rows,
            data,
        }
    }
}

/// Reversible orientation operation on a frame's grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    FlipHorizontal,
    FlipVertical,
    RotateClockwise,
    RotateCounterClockwise,
}

impl Orientation {
    /// Apply this operation to a grid, producing a new grid.
    pub fn apply(&self, grid: &Grid) -> Grid {
        match self {
            Orientation::FlipHorizontal => grid.flip_horizontal(),
            Orientation::FlipVertical => grid.flip_vertical(),
            Orientation::RotateClockwise => grid.rotate_clockwise(),
            Orientation::RotateCounterClockwise => grid.rotate_counter_clockwise(),
        }
    }
}

/// Assemble a hardware-mode image from cumulative counter samples.
///
/// Each sample is the counter's running edge total at that clock tick; the
/// per-tick intensity is the increase since the previous tick. Counters are
/// monotonic, so a negative delta only indicates a read race and is clamped
/// to zero. The settling prefix of every line is discarded.
pub fn assemble_counts(plan: &RasterPlan, samples: &[u32]) -> ScanResult<Grid> {
    if samples.len() != plan.total_samples {
        return Err(ScanError::Decode(format!(
            "expected {} counter samples, got {}",
            plan.total_samples,
            samples.len()
        )));
    }

    let mut prev = 0u32;
    let deltas: Vec<f64> = samples
        .iter()
        .map(|&s| {
            let d = s.checked_sub(prev).unwrap_or(0);
            prev = s;
            d as f64
        })
        .collect();

    let mut rows = Vec::with_capacity(plan.pixels);
    for line in 0..plan.pixels {
        let start = line * plan.samples_per_line + plan.settling_samples;
        rows.push(deltas[start..start + plan.pixels].to_vec());
    }
    Grid::from_rows(rows)
}

/// A completed scan image with provenance.
///
/// The as-acquired grid never changes after construction; orientation
/// operations are appended to `transforms` and replayed by [`Frame::current`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    /// Scan request this frame was acquired under
    pub spec: ScanSpec,
    /// Acquisition completion time
    pub acquired_at: DateTime<Utc>,
    /// Z-plane position for volumetric scans
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    original: Grid,
    transforms: Vec<Orientation>,
}

impl Frame {
    pub fn new(spec: ScanSpec, z: Option<f64>, grid: Grid) -> Self {
        Self {
            spec,
            acquired_at: Utc::now(),
            z,
            original: grid,
            transforms: Vec::new(),
        }
    }

    /// The grid exactly as acquired.
    pub fn original(&self) -> &Grid {
        &self.original
    }

    /// The grid with the recorded transform sequence applied.
    pub fn current(&self) -> Grid {
        self.transforms
            .iter()
            .fold(self.original.clone(), |grid, op| op.apply(&grid))
    }

    /// Append an orientation operation.
    pub fn apply(&mut self, op: Orientation) {
        self.transforms.push(op);
    }

    /// Discard all transforms, restoring the as-acquired orientation.
    pub fn reset(&mut self) {
        self.transforms.clear();
    }

    /// Transform operations applied since acquisition, in order.
    pub fn history(&self) -> &[Orientation] {
        &self.transforms
    }
}
