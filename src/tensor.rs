//! Named tensor payloads exchanged with a graph session.
//!
//! [`TensorData`] is the wire type of [`crate::session::ModelSession::run`]:
//! a flat buffer plus shape dimensions. Token ids and attention masks travel
//! as I64, logits come back as F32.

/// Element type of a tensor payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    I64,
    F32,
}

/// Flat storage for tensor data, varying by element type.
#[derive(Debug, Clone)]
enum TensorValues {
    I64(Vec<i64>),
    F32(Vec<f32>),
}

/// A dense tensor: element type, flat data, and shape dimensions.
#[derive(Debug, Clone)]
pub struct TensorData {
    shape: Vec<usize>,
    values: TensorValues,
}

impl TensorData {
    /// Create an I64 tensor from shape and data.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the product of `shape`.
    pub fn from_i64(shape: Vec<usize>, data: Vec<i64>) -> Self {
        assert_shape(&shape, data.len());
        Self {
            shape,
            values: TensorValues::I64(data),
        }
    }

    /// Create an F32 tensor from shape and data.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the product of `shape`.
    pub fn from_f32(shape: Vec<usize>, data: Vec<f32>) -> Self {
        assert_shape(&shape, data.len());
        Self {
            shape,
            values: TensorValues::F32(data),
        }
    }

    /// The shape of this tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The element type of this tensor.
    pub fn element_type(&self) -> ElementType {
        match self.values {
            TensorValues::I64(_) => ElementType::I64,
            TensorValues::F32(_) => ElementType::F32,
        }
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        match &self.values {
            TensorValues::I64(v) => v.len(),
            TensorValues::F32(v) => v.len(),
        }
    }

    /// True if the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The flat I64 data, or `None` for F32 tensors.
    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.values {
            TensorValues::I64(v) => Some(v),
            TensorValues::F32(_) => None,
        }
    }

    /// The flat F32 data, or `None` for I64 tensors.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.values {
            TensorValues::F32(v) => Some(v),
            TensorValues::I64(_) => None,
        }
    }
}

fn assert_shape(shape: &[usize], len: usize) {
    let n_elements: usize = shape.iter().product();
    assert_eq!(
        len, n_elements,
        "Data length {} does not match shape {:?} (expected {})",
        len, shape, n_elements
    );
}
