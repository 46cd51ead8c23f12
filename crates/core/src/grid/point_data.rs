//! Named per-point attribute arrays
//!
//! Arrays are stored flat (`tuple * components + component`) in one of three
//! element types. Datasets hold them behind `Arc` so every evaluator and both
//! time endpoints can read the same buffer without copying.

use crate::core_types::Vec3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Backing storage of a data array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayValues {
    Float(Vec<f32>),
    Double(Vec<f64>),
    Int(Vec<i32>),
}

impl ArrayValues {
    /// Number of scalar values
    pub fn len(&self) -> usize {
        match self {
            ArrayValues::Float(v) => v.len(),
            ArrayValues::Double(v) => v.len(),
            ArrayValues::Int(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at a flat index, widened to `f64`
    #[inline]
    pub fn value(&self, index: usize) -> f64 {
        match self {
            ArrayValues::Float(v) => f64::from(v[index]),
            ArrayValues::Double(v) => v[index],
            ArrayValues::Int(v) => f64::from(v[index]),
        }
    }

    /// Element type name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            ArrayValues::Float(_) => "float",
            ArrayValues::Double(_) => "double",
            ArrayValues::Int(_) => "int",
        }
    }

    /// Empty storage of the same element type
    fn empty_like(&self) -> ArrayValues {
        match self {
            ArrayValues::Float(_) => ArrayValues::Float(Vec::new()),
            ArrayValues::Double(_) => ArrayValues::Double(Vec::new()),
            ArrayValues::Int(_) => ArrayValues::Int(Vec::new()),
        }
    }

    /// Append a value, narrowing to the element type
    fn push(&mut self, value: f64) {
        match self {
            ArrayValues::Float(v) => v.push(value as f32),
            ArrayValues::Double(v) => v.push(value),
            ArrayValues::Int(v) => v.push(value.round() as i32),
        }
    }
}

/// A named array of fixed-width tuples, one tuple per mesh point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataArray {
    name: String,
    components: usize,
    values: ArrayValues,
}

impl DataArray {
    /// Create an array; `values.len()` must be a multiple of `components`
    pub fn new(name: impl Into<String>, components: usize, values: ArrayValues) -> Self {
        let components = components.max(1);
        debug_assert_eq!(values.len() % components, 0);
        DataArray {
            name: name.into(),
            components,
            values,
        }
    }

    /// A 3-component double array built from vectors
    pub fn from_vectors(name: impl Into<String>, vectors: &[Vec3]) -> Self {
        let values = vectors.iter().flat_map(|v| [v.x, v.y, v.z]).collect();
        DataArray::new(name, 3, ArrayValues::Double(values))
    }

    /// A 3-component float array built from vectors
    pub fn from_vectors_f32(name: impl Into<String>, vectors: &[Vec3]) -> Self {
        let values = vectors
            .iter()
            .flat_map(|v| [v.x as f32, v.y as f32, v.z as f32])
            .collect();
        DataArray::new(name, 3, ArrayValues::Float(values))
    }

    /// A single-component double array
    pub fn from_scalars(name: impl Into<String>, scalars: Vec<f64>) -> Self {
        DataArray::new(name, 1, ArrayValues::Double(scalars))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn values(&self) -> &ArrayValues {
        &self.values
    }

    /// Number of tuples
    pub fn len(&self) -> usize {
        self.values.len() / self.components
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// One component of one tuple; `None` when either index is out of range
    pub fn get(&self, tuple: usize, component: usize) -> Option<f64> {
        if component >= self.components || tuple >= self.len() {
            return None;
        }
        Some(self.values.value(tuple * self.components + component))
    }

    /// One component of one tuple
    ///
    /// Panics if `tuple` is out of range.
    #[inline]
    pub fn component(&self, tuple: usize, component: usize) -> f64 {
        self.values.value(tuple * self.components + component)
    }

    /// An empty array with the same name, width and element type
    pub fn empty_like(&self) -> DataArray {
        DataArray {
            name: self.name.clone(),
            components: self.components,
            values: self.values.empty_like(),
        }
    }

    /// Append one tuple interpolated from `source` at the given points and weights
    pub fn push_interpolated(&mut self, source: &DataArray, point_ids: &[usize], weights: &[f64]) {
        for c in 0..self.components {
            let value = if c < source.components {
                point_ids
                    .iter()
                    .zip(weights)
                    .map(|(&id, &w)| source.component(id, c) * w)
                    .sum()
            } else {
                0.0
            };
            self.values.push(value);
        }
    }

    /// Append one tuple of zeros
    pub fn push_null(&mut self) {
        for _ in 0..self.components {
            self.values.push(0.0);
        }
    }
}

/// The collection of point arrays attached to a dataset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointData {
    arrays: Vec<Arc<DataArray>>,
    active_vectors: Option<String>,
}

impl PointData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an array, replacing any array with the same name
    pub fn add_array(&mut self, array: DataArray) {
        let array = Arc::new(array);
        if let Some(slot) = self.arrays.iter_mut().find(|a| a.name() == array.name()) {
            *slot = array;
        } else {
            self.arrays.push(array);
        }
    }

    /// Mark a named array as the active vectors
    pub fn set_active_vectors(&mut self, name: impl Into<String>) {
        self.active_vectors = Some(name.into());
    }

    pub fn active_vectors_name(&self) -> Option<&str> {
        self.active_vectors.as_deref()
    }

    pub fn array(&self, name: &str) -> Option<&Arc<DataArray>> {
        self.arrays.iter().find(|a| a.name() == name)
    }

    /// The named array, or the active vectors when `name` is `None`
    pub fn vectors(&self, name: Option<&str>) -> Option<&Arc<DataArray>> {
        match name {
            Some(name) => self.array(name),
            None => self.active_vectors.as_deref().and_then(|n| self.array(n)),
        }
    }

    pub fn arrays(&self) -> &[Arc<DataArray>] {
        &self.arrays
    }

    /// Array names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.arrays.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }
}
