/// Linear layer over the last dimension of N-D inputs
use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Linear layer applied to the last axis of an input of any rank
///
/// `[..., in_features] -> [..., out_features]`. Weights and bias are cast to
/// the input dtype before computation.
#[derive(Debug, Clone)]
pub struct LinearND {
    weight: Tensor,
    bias: Option<Tensor>,
}

impl LinearND {
    /// Create new LinearND layer
    ///
    /// # Arguments
    /// * `in_features` - Input dimension
    /// * `out_features` - Output dimension
    /// * `bias` - Whether to include bias
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(in_features: usize, out_features: usize, bias: bool, vb: VarBuilder) -> Result<Self> {
        let init_ws = candle_nn::init::DEFAULT_KAIMING_NORMAL;
        let weight = vb.get_with_hints((out_features, in_features), "weight", init_ws)?;

        let bias = if bias {
            let bound = 1. / (in_features as f64).sqrt();
            let init_bs = Init::Uniform { lo: -bound, up: bound };
            Some(vb.get_with_hints(out_features, "bias", init_bs)?)
        } else {
            None
        };

        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.dims()[0]
    }

    /// Weight matrix [out_features, in_features]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Forward pass
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let input_dtype = input.dtype();

        let weight = if self.weight.dtype() != input_dtype {
            self.weight.to_dtype(input_dtype)?
        } else {
            self.weight.clone()
        };

        // weight is [out, in]: rows(input) @ weight^T over a 2-D view
        let dims = input.dims();
        if dims.is_empty() {
            candle_core::bail!("LinearND expects at least one dimension");
        }
        let in_features = dims[dims.len() - 1];
        let rows = input.elem_count() / in_features.max(1);
        let mut out_dims = dims.to_vec();
        out_dims[dims.len() - 1] = self.out_features();

        let output = input
            .reshape((rows, in_features))?
            .matmul(&weight.t()?)?
            .reshape(out_dims)?;

        if let Some(ref b) = self.bias {
            let bias = if b.dtype() != input_dtype {
                b.to_dtype(input_dtype)?
            } else {
                b.clone()
            };
            output.broadcast_add(&bias)
        } else {
            Ok(output)
        }
    }
}
