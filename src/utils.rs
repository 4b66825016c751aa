/// Mask construction and masked normalization helpers
use candle_core::{DType, Device, Result, Tensor, D};

/// Energy assigned to masked positions before normalization
///
/// Lowest finite f32: below any valid energy, and a fully masked row
/// normalizes without producing NaN.
const MASKED_ENERGY: f32 = f32::MIN;

/// Create a padding mask from sequence lengths
///
/// Returns a `u8` tensor [batch, max_len] with 1 at valid positions
/// (`t < lens[b]`) and 0 at padding.
pub fn make_pad_mask(lens: &[usize], max_len: usize, device: &Device) -> Result<Tensor> {
    let mut mask_data = vec![0u8; lens.len() * max_len];

    for (b, &len) in lens.iter().enumerate() {
        for t in 0..len.min(max_len) {
            mask_data[b * max_len + t] = 1;
        }
    }

    Tensor::from_vec(mask_data, (lens.len(), max_len), device)
}

/// Create a causal (subsequent) mask
///
/// Returns a `u8` tensor [len, len] with 1 on/below the diagonal and 0 above,
/// so position `i` only sees positions `j <= i`.
pub fn subsequent_mask(len: usize, device: &Device) -> Result<Tensor> {
    let mut mask_data = vec![0u8; len * len];

    for i in 0..len {
        for j in 0..=i {
            mask_data[i * len + j] = 1;
        }
    }

    Tensor::from_vec(mask_data, (len, len), device)
}

/// Replace masked energies with [`MASKED_ENERGY`], computing in f32
fn fill_masked(scores: &Tensor, mask: &Tensor) -> Result<(Tensor, Tensor)> {
    let scores = if scores.dtype() != DType::F32 {
        scores.to_dtype(DType::F32)?
    } else {
        scores.clone()
    };

    let mask = mask.broadcast_as(scores.dims())?.contiguous()?;
    let fill = Tensor::full(MASKED_ENERGY, scores.dims(), scores.device())?;
    let filled = mask.where_cond(&scores, &fill)?;

    Ok((filled, mask.to_dtype(DType::F32)?))
}

/// Softmax over the last dimension restricted to unmasked positions
///
/// # Arguments
/// * `scores` - Attention energies [..., keys]
/// * `mask` - `u8` mask broadcastable to `scores`, 1 = attend
///
/// # Returns
/// Weights with the dtype of `scores`. Masked positions are exactly zero and
/// rows with no unmasked position are all zero.
pub fn masked_softmax(scores: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let input_dtype = scores.dtype();
    let (filled, mask) = fill_masked(scores, mask)?;

    // Shift by the row maximum over attended positions only, so valid
    // energies of any magnitude keep their relative weights
    let max = filled.max_keepdim(D::Minus1)?;
    let exp = filled.broadcast_sub(&max)?.exp()?.mul(&mask)?;

    // Rows without any attended position divide 0 by 1
    let empty = mask.max_keepdim(D::Minus1)?.affine(-1.0, 1.0)?;
    let denom = exp.sum_keepdim(D::Minus1)?.add(&empty)?;
    let weights = exp.broadcast_div(&denom)?;

    if input_dtype != DType::F32 {
        weights.to_dtype(input_dtype)
    } else {
        Ok(weights)
    }
}

/// Elementwise sigmoid restricted to unmasked positions
///
/// Same contract as [`masked_softmax`] but each weight is normalized
/// independently, so rows do not sum to one.
pub fn masked_sigmoid(scores: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let input_dtype = scores.dtype();
    let (filled, mask) = fill_masked(scores, mask)?;

    let weights = candle_nn::ops::sigmoid(&filled)?.mul(&mask)?;

    if input_dtype != DType::F32 {
        weights.to_dtype(input_dtype)
    } else {
        Ok(weights)
    }
}
