use crate::error::{KMeansError, Result};
use ndarray::Array2;
use wide::f64x4;

/// A dense input vector. Input vectors carry no identity of their own; their
/// position in the worker's cache is the only ordering they have.
pub type InputVector = Vec<f64>;

/// Ordered set of `k` centers of dimension `d`, one replica per worker.
///
/// Rows are centers. The backing array is always in standard (row-major)
/// layout, so every row is a contiguous slice.
#[derive(Clone, Debug, PartialEq)]
pub struct CenterSet {
    coords: Array2<f64>,
}

impl CenterSet {
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        if rows.is_empty() {
            return Err(KMeansError::config("center set must not be empty"));
        }
        let dim = rows[0].len();
        if dim == 0 {
            return Err(KMeansError::config("centers must have at least one dimension"));
        }
        let k = rows.len();
        let mut flat = Vec::with_capacity(k * dim);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != dim {
                return Err(KMeansError::config(format!(
                    "center {} has dimension {}, expected {}",
                    i,
                    row.len(),
                    dim
                )));
            }
            flat.extend(row);
        }
        let coords = Array2::from_shape_vec((k, dim), flat)
            .map_err(|e| KMeansError::config(format!("center shape: {}", e)))?;
        Ok(CenterSet { coords })
    }

    pub fn k(&self) -> usize {
        self.coords.nrows()
    }

    pub fn dimension(&self) -> usize {
        self.coords.ncols()
    }

    fn flat(&self) -> &[f64] {
        self.coords.as_slice().unwrap_or(&[])
    }

    /// Coordinates of center `c`.
    pub fn row(&self, c: usize) -> &[f64] {
        let d = self.dimension();
        &self.flat()[c * d..(c + 1) * d]
    }

    pub fn set_row(&mut self, c: usize, values: &[f64]) {
        self.coords.row_mut(c).assign(&ndarray::ArrayView1::from(values));
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.flat().chunks_exact(self.dimension().max(1))
    }

    /// Index of the nearest center to `v`; ties go to the lowest index.
    pub fn nearest(&self, v: &[f64]) -> usize {
        nearest_center(self.flat(), self.dimension(), v)
    }
}

/// Squared Euclidean distance. Callers compare squared distances only, so the
/// square root is never taken anywhere in the crate.
pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    let dim = a.len().min(b.len());
    let mut acc = f64x4::splat(0.0);
    let mut j = 0;

    // SIMD 4-element chunks
    while j + 4 <= dim {
        let x = f64x4::new([a[j], a[j + 1], a[j + 2], a[j + 3]]);
        let y = f64x4::new([b[j], b[j + 1], b[j + 2], b[j + 3]]);
        let diff = x - y;
        acc += diff * diff;
        j += 4;
    }

    let mut tail = 0.0;
    while j < dim {
        let diff = a[j] - b[j];
        tail += diff * diff;
        j += 1;
    }

    acc.reduce_add() + tail
}

/// Nearest center over a flat `[k][dim]` buffer. Scans ascending and only
/// replaces the best on a strictly smaller distance, so the first index
/// reaching the minimum wins.
pub fn nearest_center(centers: &[f64], dim: usize, v: &[f64]) -> usize {
    let mut best_c = 0usize;
    let mut best_dist = f64::INFINITY;
    for (c, cent) in centers.chunks_exact(dim.max(1)).enumerate() {
        let dist = squared_distance(v, cent);
        if dist < best_dist {
            best_dist = dist;
            best_c = c;
        }
    }
    best_c
}

/// Sum of absolute coordinate differences.
pub fn l1_difference(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}
