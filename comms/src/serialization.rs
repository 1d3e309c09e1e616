use crate::{
    error::{CommsErr, Result},
    model::Model,
};

/// Flattens the trainable parameters of `model` into one contiguous buffer.
///
/// # Arguments
/// * `model` - The model to read from.
///
/// # Returns
/// The parameters laid out in the model's fixed order.
pub fn serialize<M: Model + ?Sized>(model: &M) -> Vec<f32> {
    let params = model.parameters();
    let mut buf = Vec::with_capacity(params.iter().map(|p| p.len()).sum());

    for slice in params {
        buf.extend_from_slice(slice);
    }

    buf
}

/// Writes `buf` back into `model`, in the same order `serialize` reads it.
///
/// # Arguments
/// * `buf` - A flat parameter buffer.
/// * `model` - The model to overwrite.
///
/// # Returns
/// A `ShapeMismatch` error if `buf` doesn't hold exactly as many parameters as
/// the model, in which case the model is left untouched.
pub fn deserialize<M: Model + ?Sized>(buf: &[f32], model: &mut M) -> Result<()> {
    let expected = model.num_params();

    if buf.len() != expected {
        return Err(CommsErr::ShapeMismatch {
            got: buf.len(),
            expected,
        });
    }

    let mut rest = buf;
    for slice in model.parameters_mut() {
        let (head, tail) = rest.split_at(slice.len());
        slice.copy_from_slice(head);
        rest = tail;
    }

    Ok(())
}
