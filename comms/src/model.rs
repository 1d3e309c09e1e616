use crate::tensor::Tensor;

/// Anything holding trainable parameters in a fixed, stable order.
///
/// The order of the returned slices is the order in which they're laid out
/// on the wire, it must not change between calls.
pub trait Model {
    /// The trainable parameters, one slice per tensor.
    fn parameters(&self) -> Vec<&[f32]>;

    /// Mutable access to the trainable parameters, in the same order as `parameters`.
    fn parameters_mut(&mut self) -> Vec<&mut [f32]>;

    /// The total amount of trainable parameters.
    fn num_params(&self) -> usize {
        self.parameters().iter().map(|p| p.len()).sum()
    }
}

/// An ordered set of parameter tensors.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSet {
    tensors: Vec<Tensor>,
}

impl ParamSet {
    /// Creates a new `ParamSet`.
    ///
    /// # Arguments
    /// * `tensors` - The parameter tensors in their wire order.
    pub fn new(tensors: Vec<Tensor>) -> Self {
        Self { tensors }
    }

    /// Creates a `ParamSet` where every element of every shape is `value`.
    pub fn filled(shapes: &[Vec<usize>], value: f32) -> Self {
        let tensors = shapes
            .iter()
            .map(|shape| Tensor::filled(shape.clone(), value))
            .collect();

        Self { tensors }
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }
}

impl Model for ParamSet {
    fn parameters(&self) -> Vec<&[f32]> {
        self.tensors.iter().map(Tensor::data).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut [f32]> {
        self.tensors.iter_mut().map(Tensor::data_mut).collect()
    }
}

impl Model for Vec<f32> {
    fn parameters(&self) -> Vec<&[f32]> {
        vec![self.as_slice()]
    }

    fn parameters_mut(&mut self) -> Vec<&mut [f32]> {
        vec![self.as_mut_slice()]
    }
}
