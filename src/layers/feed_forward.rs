/// Position-wise feed-forward network
use candle_core::{Result, Tensor};
use candle_nn::{Dropout, VarBuilder};

use super::linear::LinearND;

/// Two-layer MLP applied independently at every position
///
/// Formula: w_2(dropout(relu(w_1(x))))
#[derive(Debug, Clone)]
pub struct PositionwiseFeedForward {
    w_1: LinearND,
    w_2: LinearND,
    dropout: Dropout,
}

impl PositionwiseFeedForward {
    /// Create new feed-forward layer
    ///
    /// # Arguments
    /// * `d_model` - Input/output dimension
    /// * `d_ff` - Inner dimension
    /// * `dropout` - Dropout on the inner activations
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(d_model: usize, d_ff: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        let w_1 = LinearND::new(d_model, d_ff, true, vb.pp("w_1"))?;
        let w_2 = LinearND::new(d_ff, d_model, true, vb.pp("w_2"))?;

        Ok(Self {
            w_1,
            w_2,
            dropout: Dropout::new(dropout),
        })
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let hidden = self.w_1.forward(xs)?.relu()?;
        let hidden = self.dropout.forward(&hidden, train)?;
        self.w_2.forward(&hidden)
    }
}
