//! Typed read access to a dataset's 3-component vector array

use crate::core_types::{TraceError, Vec3};
use crate::grid::{ArrayValues, DataArray};
use std::sync::Arc;

/// A vector array known to hold 3-component float or double tuples
///
/// Obtained once when a dataset is registered. Holding the `Arc` keeps the
/// buffer alive and immutable for as long as the view exists.
#[derive(Debug, Clone)]
pub enum VectorView {
    Float(Arc<DataArray>),
    Double(Arc<DataArray>),
}

impl VectorView {
    /// Wrap an array, rejecting anything but 3-component float/double storage
    ///
    /// # Errors
    /// Returns `UnsupportedVectorType` describing the array that was found.
    pub fn new(array: &Arc<DataArray>) -> Result<Self, TraceError> {
        if array.components() != 3 {
            return Err(TraceError::UnsupportedVectorType {
                name: array.name().to_string(),
                found: format!("{} with {} components", array.values().type_name(), array.components()),
            });
        }
        match array.values() {
            ArrayValues::Float(_) => Ok(VectorView::Float(Arc::clone(array))),
            ArrayValues::Double(_) => Ok(VectorView::Double(Arc::clone(array))),
            ArrayValues::Int(_) => Err(TraceError::UnsupportedVectorType {
                name: array.name().to_string(),
                found: "int with 3 components".to_string(),
            }),
        }
    }

    pub fn array(&self) -> &Arc<DataArray> {
        match self {
            VectorView::Float(a) | VectorView::Double(a) => a,
        }
    }

    pub fn name(&self) -> &str {
        self.array().name()
    }

    /// Number of vectors
    pub fn len(&self) -> usize {
        self.array().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The vector stored at a point
    #[inline]
    pub fn vector(&self, point_id: usize) -> Vec3 {
        let base = 3 * point_id;
        match self.array().values() {
            ArrayValues::Float(v) => Vec3::new(f64::from(v[base]), f64::from(v[base + 1]), f64::from(v[base + 2])),
            ArrayValues::Double(v) => Vec3::new(v[base], v[base + 1], v[base + 2]),
            ArrayValues::Int(_) => Vec3::zeros(),
        }
    }

    /// Weighted sum of the vectors at `point_ids`
    #[inline]
    pub fn weighted_sum(&self, point_ids: &[usize], weights: &[f64]) -> Vec3 {
        let mut sum = Vec3::zeros();
        match self.array().values() {
            ArrayValues::Float(v) => {
                for (&id, &w) in point_ids.iter().zip(weights) {
                    let base = 3 * id;
                    sum.x += f64::from(v[base]) * w;
                    sum.y += f64::from(v[base + 1]) * w;
                    sum.z += f64::from(v[base + 2]) * w;
                }
            }
            ArrayValues::Double(v) => {
                for (&id, &w) in point_ids.iter().zip(weights) {
                    let base = 3 * id;
                    sum.x += v[base] * w;
                    sum.y += v[base + 1] * w;
                    sum.z += v[base + 2] * w;
                }
            }
            ArrayValues::Int(_) => {}
        }
        sum
    }
}
