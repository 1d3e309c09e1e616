use crate::error::{CommsErr, Result};

/// A flattened numeric buffer together with its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a new `Tensor`.
    ///
    /// # Arguments
    /// * `shape` - The dimensions of the tensor.
    /// * `data` - The flattened elements.
    ///
    /// # Returns
    /// The tensor or `InvalidShape` if `shape` doesn't describe `data.len()` elements.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        if shape.iter().product::<usize>() != data.len() {
            let elements = data.len();
            return Err(CommsErr::InvalidShape { shape, elements });
        }

        Ok(Self { shape, data })
    }

    /// Creates a tensor of the given shape with every element set to `value`.
    pub fn filled(shape: Vec<usize>, value: f32) -> Self {
        let numel = shape.iter().product();
        Self {
            shape,
            data: vec![value; numel],
        }
    }

    /// Creates a one dimensional tensor.
    pub fn flat(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Creates a tensor holding a single value with shape `[1]`.
    pub fn scalar(value: f32) -> Self {
        Self::flat(vec![value])
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// The amount of elements in this tensor.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns the single element of a one element tensor.
    pub fn as_scalar(&self) -> Option<f32> {
        match self.data.as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}
