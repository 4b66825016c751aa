/// Layer normalization
use candle_core::{DType, Result, Tensor, D};
use candle_nn::{Init, VarBuilder};

/// Layer normalization function without affine parameters
///
/// Normalizes the last dimension to zero mean and unit (biased) variance.
/// The computation is done in f32 for precision, then cast back to the
/// original dtype.
pub fn layer_norm(hidden_states: &Tensor, eps: f64) -> Result<Tensor> {
    let input_dtype = hidden_states.dtype();

    let hidden_states = if input_dtype != DType::F32 {
        hidden_states.to_dtype(DType::F32)?
    } else {
        hidden_states.clone()
    };

    let mean = hidden_states.mean_keepdim(D::Minus1)?;
    let centered = hidden_states.broadcast_sub(&mean)?;
    let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;

    let normalized = centered.broadcast_div(&(variance + eps)?.sqrt()?)?;

    if input_dtype != DType::F32 {
        normalized.to_dtype(input_dtype)
    } else {
        Ok(normalized)
    }
}

/// Layer normalization with learnable scale and shift
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub fn new(hidden_size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(hidden_size, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(hidden_size, "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias, eps })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let normalized = layer_norm(x, self.eps)?;
        let dtype = normalized.dtype();
        normalized
            .broadcast_mul(&self.weight.to_dtype(dtype)?)?
            .broadcast_add(&self.bias.to_dtype(dtype)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_layer_norm_statistics() -> Result<()> {
        let device = Device::Cpu;

        let x = Tensor::new(&[[1.0f32, 2.0, 3.0, 4.0], [10.0, 10.0, 10.0, 14.0]], &device)?;
        let normalized = layer_norm(&x, 1e-12)?;

        let mean = normalized.mean_keepdim(D::Minus1)?.flatten_all()?.to_vec1::<f32>()?;
        let var = normalized.sqr()?.mean_keepdim(D::Minus1)?.flatten_all()?.to_vec1::<f32>()?;

        for (m, v) in mean.iter().zip(var.iter()) {
            assert!(m.abs() < 1e-5, "mean should be 0, got {}", m);
            assert!((v - 1.0).abs() < 1e-4, "variance should be 1, got {}", v);
        }

        Ok(())
    }

    #[test]
    fn test_layer_norm_known_values() -> Result<()> {
        let device = Device::Cpu;

        // mean 2.5, biased variance 1.25
        let x = Tensor::new(&[1.0f32, 2.0, 3.0, 4.0], &device)?;
        let normalized = layer_norm(&x, 0.0)?.to_vec1::<f32>()?;

        let std = 1.25f32.sqrt();
        let expected = [-1.5 / std, -0.5 / std, 0.5 / std, 1.5 / std];
        for (n, e) in normalized.iter().zip(expected.iter()) {
            assert!((n - e).abs() < 1e-5);
        }

        Ok(())
    }

    #[test]
    fn test_layer_norm_module_initial_affine_is_identity() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let norm = LayerNorm::new(64, 1e-12, vb)?;

        let x = Tensor::randn(0f32, 1.0, (2, 8, 64), &device)?;
        let out = norm.forward(&x)?;
        let reference = layer_norm(&x, 1e-12)?;

        assert_eq!(out.dims(), x.dims());
        let diff = out.sub(&reference)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-6);

        Ok(())
    }
}
