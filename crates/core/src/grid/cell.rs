//! Cell shape functions
//!
//! A `GenericCell` is a reusable scratch object: datasets load a cell's
//! vertex ids and coordinates into it, and the evaluator then asks it for
//! parametric coordinates, interpolation weights and derivatives. Loading a
//! cell reuses the existing buffers, so steady-state queries do not allocate.
//!
//! Two cell kinds are supported:
//! - **Voxel**: axis-aligned hexahedron with trilinear shape functions.
//!   Vertex order is x-fastest: `(0,0,0) (1,0,0) (0,1,0) (1,1,0) (0,0,1) ...`
//! - **Tetra**: linear tetrahedron with barycentric shape functions.

use crate::core_types::{Bounds, Vec3};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Largest number of vertices any supported cell has
pub const MAX_CELL_SIZE: usize = 8;

/// Supported cell types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CellKind {
    #[default]
    Voxel,
    Tetra,
}

impl CellKind {
    /// Number of vertices of this cell type
    pub fn point_count(self) -> usize {
        match self {
            CellKind::Voxel => 8,
            CellKind::Tetra => 4,
        }
    }
}

/// Scratch cell: kind, vertex ids and vertex coordinates
#[derive(Debug, Clone, Default)]
pub struct GenericCell {
    kind: CellKind,
    point_ids: Vec<usize>,
    points: Vec<Vec3>,
}

impl GenericCell {
    pub fn new() -> Self {
        GenericCell {
            kind: CellKind::Voxel,
            point_ids: Vec::with_capacity(MAX_CELL_SIZE),
            points: Vec::with_capacity(MAX_CELL_SIZE),
        }
    }

    /// Replace the cell contents, reusing the internal buffers
    pub fn load<F>(&mut self, kind: CellKind, point_ids: &[usize], point: F)
    where
        F: Fn(usize) -> Vec3,
    {
        self.kind = kind;
        self.point_ids.clear();
        self.points.clear();
        for &id in point_ids {
            self.point_ids.push(id);
            self.points.push(point(id));
        }
    }

    /// Copy another cell's contents, reusing the internal buffers
    pub fn copy_from(&mut self, other: &GenericCell) {
        self.kind = other.kind;
        self.point_ids.clone_from(&other.point_ids);
        self.points.clone_from(&other.points);
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn point_ids(&self) -> &[usize] {
        &self.point_ids
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn number_of_points(&self) -> usize {
        self.point_ids.len()
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from_points(self.points.iter())
    }

    /// Parametric coordinates and interpolation weights of `x`
    ///
    /// Returns the squared distance from `x` to the cell (0 when inside), or
    /// `None` for a degenerate cell. Weights are those of the closest point of
    /// the cell, so they are always a convex combination.
    pub fn evaluate_position(&self, x: &Vec3, pcoords: &mut Vec3, weights: &mut [f64]) -> Option<f64> {
        if self.points.len() != self.kind.point_count() {
            return None;
        }
        match self.kind {
            CellKind::Voxel => self.evaluate_voxel(x, pcoords, weights),
            CellKind::Tetra => self.evaluate_tetra(x, pcoords, weights),
        }
    }

    /// True if `x` lies within `tol2` (squared distance) of the cell
    pub fn contains(&self, x: &Vec3, tol2: f64, pcoords: &mut Vec3, weights: &mut [f64]) -> bool {
        self.evaluate_position(x, pcoords, weights)
            .is_some_and(|dist2| dist2 <= tol2)
    }

    fn evaluate_voxel(&self, x: &Vec3, pcoords: &mut Vec3, weights: &mut [f64]) -> Option<f64> {
        let origin = self.points[0];
        let extent = self.points[7] - origin;
        if extent.iter().any(|e| e.abs() <= f64::MIN_POSITIVE) {
            return None;
        }
        let mut dist2 = 0.0;
        for axis in 0..3 {
            let pc = (x[axis] - origin[axis]) / extent[axis];
            let clamped = pc.clamp(0.0, 1.0);
            let delta = (pc - clamped) * extent[axis];
            dist2 += delta * delta;
            pcoords[axis] = clamped;
        }
        voxel_weights(pcoords, weights);
        Some(dist2)
    }

    fn evaluate_tetra(&self, x: &Vec3, pcoords: &mut Vec3, weights: &mut [f64]) -> Option<f64> {
        let inverse = self.tetra_inverse_jacobian()?;
        let rst = inverse * (x - self.points[0]);
        let mut w = [1.0 - rst.x - rst.y - rst.z, rst.x, rst.y, rst.z];

        if w.iter().all(|&wi| wi >= 0.0) {
            weights[..4].copy_from_slice(&w);
            *pcoords = rst;
            return Some(0.0);
        }

        // Project onto the cell by dropping negative weights
        for wi in &mut w {
            *wi = wi.max(0.0);
        }
        let sum: f64 = w.iter().sum();
        if sum <= 0.0 {
            return None;
        }
        for wi in &mut w {
            *wi /= sum;
        }
        let closest: Vec3 = self
            .points
            .iter()
            .zip(&w)
            .map(|(p, &wi)| p * wi)
            .sum();
        weights[..4].copy_from_slice(&w);
        *pcoords = Vec3::new(w[1], w[2], w[3]);
        Some((x - closest).norm_squared())
    }

    /// Inverse of the tetra's edge matrix, `None` if the tetra is flat
    fn tetra_inverse_jacobian(&self) -> Option<Matrix3<f64>> {
        let p0 = self.points[0];
        let m = Matrix3::from_columns(&[
            self.points[1] - p0,
            self.points[2] - p0,
            self.points[3] - p0,
        ]);
        let scale = m.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if m.determinant().abs() <= f64::EPSILON * scale.powi(3) {
            return None;
        }
        m.try_inverse()
    }

    /// Spatial derivatives of a per-vertex vector field at `pcoords`
    ///
    /// Entry `(i, j)` is the derivative of component `i` with respect to
    /// coordinate `j`. A degenerate cell yields all zeros.
    pub fn derivatives(&self, pcoords: &Vec3, values: &[Vec3]) -> Matrix3<f64> {
        let mut derivs = Matrix3::zeros();
        let n = self.points.len().min(values.len());
        let mut gradients = [Vec3::zeros(); MAX_CELL_SIZE];

        match self.kind {
            CellKind::Voxel => {
                if n < 8 {
                    return derivs;
                }
                let extent = self.points[7] - self.points[0];
                if extent.iter().any(|e| e.abs() <= f64::MIN_POSITIVE) {
                    return derivs;
                }
                let mut dr = [0.0; 8];
                let mut ds = [0.0; 8];
                let mut dt = [0.0; 8];
                voxel_derivatives(pcoords, &mut dr, &mut ds, &mut dt);
                for k in 0..8 {
                    gradients[k] = Vec3::new(dr[k] / extent.x, ds[k] / extent.y, dt[k] / extent.z);
                }
            }
            CellKind::Tetra => {
                if n < 4 {
                    return derivs;
                }
                let Some(inverse) = self.tetra_inverse_jacobian() else {
                    return derivs;
                };
                for k in 1..4 {
                    gradients[k] = inverse.row(k - 1).transpose();
                }
                gradients[0] = -(gradients[1] + gradients[2] + gradients[3]);
            }
        }

        for k in 0..self.kind.point_count() {
            derivs += values[k] * gradients[k].transpose();
        }
        derivs
    }
}

/// Trilinear weights for a voxel
fn voxel_weights(pc: &Vec3, weights: &mut [f64]) {
    let (r, s, t) = (pc.x, pc.y, pc.z);
    let (rm, sm, tm) = (1.0 - r, 1.0 - s, 1.0 - t);
    weights[0] = rm * sm * tm;
    weights[1] = r * sm * tm;
    weights[2] = rm * s * tm;
    weights[3] = r * s * tm;
    weights[4] = rm * sm * t;
    weights[5] = r * sm * t;
    weights[6] = rm * s * t;
    weights[7] = r * s * t;
}

/// Parametric derivatives of the trilinear weights
fn voxel_derivatives(pc: &Vec3, dr: &mut [f64; 8], ds: &mut [f64; 8], dt: &mut [f64; 8]) {
    let (r, s, t) = (pc.x, pc.y, pc.z);
    let (rm, sm, tm) = (1.0 - r, 1.0 - s, 1.0 - t);

    *dr = [-sm * tm, sm * tm, -s * tm, s * tm, -sm * t, sm * t, -s * t, s * t];
    *ds = [-rm * tm, -r * tm, rm * tm, r * tm, -rm * t, -r * t, rm * t, r * t];
    *dt = [-rm * sm, -r * sm, -rm * s, -r * s, rm * sm, r * sm, rm * s, r * s];
}

/// Curl of a vector field from its derivative matrix
pub fn curl(derivs: &Matrix3<f64>) -> Vec3 {
    Vec3::new(
        derivs[(2, 1)] - derivs[(1, 2)],
        derivs[(0, 2)] - derivs[(2, 0)],
        derivs[(1, 0)] - derivs[(0, 1)],
    )
}
