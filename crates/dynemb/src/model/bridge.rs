//! Tensor bridge: converts batch column buffers (`Vec<usize>`, `Vec<f32>`)
//! into burn tensors, and tensors back into plain rows for persistence.

use burn::prelude::*;
use burn::tensor::TensorData;

/// Entity ids as an index tensor of shape `(n,)`.
pub fn ids_to_tensor<B: Backend>(ids: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let ids: Vec<i64> = ids.iter().map(|&id| id as i64).collect();
    let n = ids.len();
    Tensor::from_data(TensorData::new(ids, [n]), device)
}

/// A column of scalars as a `(n, 1)` tensor.
pub fn column_to_tensor<B: Backend>(values: &[f32], device: &B::Device) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(values.to_vec(), [values.len(), 1]), device)
}

/// A row-major `(rows, cols)` buffer as a 2D tensor.
///
/// # Panics
/// Panics if `values.len() != rows * cols`.
pub fn matrix_to_tensor<B: Backend>(
    values: &[f32],
    rows: usize,
    cols: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    assert_eq!(
        values.len(),
        rows * cols,
        "buffer has {} values, expected {rows}x{cols}",
        values.len()
    );
    Tensor::from_data(TensorData::new(values.to_vec(), [rows, cols]), device)
}

/// Static identity rows: one-hot vectors of width `width` for each id.
pub fn one_hot_rows<B: Backend>(ids: &[usize], width: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut flat = vec![0.0f32; ids.len() * width];
    for (row, &id) in ids.iter().enumerate() {
        debug_assert!(id < width, "id {id} out of range for width {width}");
        flat[row * width + id] = 1.0;
    }
    Tensor::from_data(TensorData::new(flat, [ids.len(), width]), device)
}

/// Normalize each row to unit L2 norm.
pub fn l2_normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(1e-12);
    x / norm
}

/// Copy a 2D tensor into one `Vec<f32>` per row.
pub fn tensor_to_rows<B: Backend>(tensor: Tensor<B, 2>) -> anyhow::Result<Vec<Vec<f32>>> {
    let [_, cols] = tensor.dims();
    let flat = tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to read tensor data: {e:?}"))?;
    if cols == 0 {
        return Ok(Vec::new());
    }
    Ok(flat.chunks(cols).map(|row| row.to_vec()).collect())
}

/// Extract a single f64 scalar from a one-element tensor.
pub fn tensor_to_f64<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    let val: f32 = tensor.into_scalar().elem();
    val as f64
}
