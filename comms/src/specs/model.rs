use serde::{Deserialize, Serialize};

/// The shapes of the parameter tensors of a model, in wire order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub shapes: Vec<Vec<usize>>,
    /// The value every parameter starts at.
    #[serde(default)]
    pub init: f32,
}
