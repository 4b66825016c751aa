/// Multi-head attention used by transformer blocks
use candle_core::{bail, Result, Tensor};
use candle_nn::{Dropout, VarBuilder};

use super::linear::LinearND;
use crate::config::MultiheadAttnType;
use crate::utils::masked_softmax;

/// Projected keys and values kept between calls
///
/// While populated, [`MultiheadAttention::forward`] ignores its `key` and
/// `value` arguments and reuses the cached projections. Call [`reset`] when
/// the memory being attended to changes.
///
/// [`reset`]: MultiheadCache::reset
#[derive(Debug, Clone, Default)]
pub struct MultiheadCache {
    key: Option<Tensor>,
    value: Option<Tensor>,
}

impl MultiheadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop cached projections
    pub fn reset(&mut self) {
        self.key = None;
        self.value = None;
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none()
    }
}

/// Multi-head attention
///
/// Supports:
/// - Scaled dot-product scoring: Q K^T / sqrt(d_k)
/// - Additive scoring per head: v(tanh(K + Q))
/// - Arbitrary key/query masks (padding, causal)
#[derive(Debug, Clone)]
pub struct MultiheadAttention {
    n_heads: usize,
    d_k: usize,
    attn_type: MultiheadAttnType,

    w_key: LinearND,
    w_value: LinearND,
    w_query: LinearND,
    w_out: LinearND,
    v: Option<LinearND>,

    dropout: Dropout,
}

impl MultiheadAttention {
    /// Create new MultiheadAttention layer
    ///
    /// # Arguments
    /// * `key_dim` - Dimension of keys/values, also the output dimension
    /// * `query_dim` - Dimension of queries
    /// * `attn_type` - Scoring function
    /// * `attn_dim` - Total dimension of the attention space (split across heads)
    /// * `n_heads` - Number of heads
    /// * `dropout` - Dropout on attention weights
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(
        key_dim: usize,
        query_dim: usize,
        attn_type: MultiheadAttnType,
        attn_dim: usize,
        n_heads: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        if n_heads == 0 || attn_dim % n_heads != 0 {
            bail!("attn_dim ({attn_dim}) must be divisible by n_heads ({n_heads})");
        }
        let d_k = attn_dim / n_heads;

        let w_key = LinearND::new(key_dim, attn_dim, true, vb.pp("w_key"))?;
        let w_value = LinearND::new(key_dim, attn_dim, true, vb.pp("w_value"))?;
        let w_query = LinearND::new(query_dim, attn_dim, true, vb.pp("w_query"))?;
        let w_out = LinearND::new(attn_dim, key_dim, true, vb.pp("w_out"))?;

        let v = match attn_type {
            MultiheadAttnType::Add => Some(LinearND::new(d_k, 1, false, vb.pp("v"))?),
            MultiheadAttnType::ScaledDot => None,
        };

        Ok(Self {
            n_heads,
            d_k,
            attn_type,
            w_key,
            w_value,
            w_query,
            w_out,
            v,
            dropout: Dropout::new(dropout),
        })
    }

    pub fn n_heads(&self) -> usize {
        self.n_heads
    }

    /// [batch, len, n_heads * d_k] -> [batch, n_heads, len, d_k]
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (batch_size, len, _) = x.dims3()?;
        x.reshape((batch_size, len, self.n_heads, self.d_k))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn scores(&self, query: &Tensor, key: &Tensor) -> Result<Tensor> {
        match (self.attn_type, &self.v) {
            (MultiheadAttnType::ScaledDot, _) => {
                let scale = 1.0 / (self.d_k as f64).sqrt();
                let scores = query.matmul(&key.transpose(2, 3)?.contiguous()?)?;
                scores * scale
            }
            (MultiheadAttnType::Add, Some(v)) => {
                let (batch_size, n_heads, query_len, _) = query.dims4()?;
                let key_len = key.dim(2)?;
                // [B, H, 1, T, d_k] + [B, H, L, 1, d_k] -> [B * H * L * T, d_k]
                let energy = key
                    .unsqueeze(2)?
                    .broadcast_add(&query.unsqueeze(3)?)?
                    .tanh()?
                    .reshape((batch_size * n_heads * query_len * key_len, self.d_k))?;
                v.forward(&energy)?
                    .reshape((batch_size, n_heads, query_len, key_len))
            }
            (MultiheadAttnType::Add, None) => bail!("additive attention is missing its v projection"),
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `cache` - Key/value projection cache, filled on first use
    /// * `key` - Keys [batch, key_len, key_dim]
    /// * `value` - Values [batch, key_len, key_dim]
    /// * `query` - Queries [batch, query_len, query_dim]
    /// * `mask` - `u8` mask broadcastable to [batch, n_heads, query_len, key_len], 1 = attend
    /// * `train` - Whether dropout is active
    ///
    /// # Returns
    /// Tuple of (context [batch, query_len, key_dim], weights [batch, n_heads, query_len, key_len])
    pub fn forward(
        &self,
        cache: &mut MultiheadCache,
        key: &Tensor,
        value: &Tensor,
        query: &Tensor,
        mask: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (batch_size, query_len, _) = query.dims3()?;

        let key = match cache.key {
            Some(ref k) => k.clone(),
            None => {
                let k = self.split_heads(&self.w_key.forward(key)?)?;
                cache.key = Some(k.clone());
                k
            }
        };
        let value = match cache.value {
            Some(ref v) => v.clone(),
            None => {
                let v = self.split_heads(&self.w_value.forward(value)?)?;
                cache.value = Some(v.clone());
                v
            }
        };

        let query = self.split_heads(&self.w_query.forward(query)?)?;

        let scores = self.scores(&query, &key)?;
        let aw = masked_softmax(&scores, mask)?;
        let aw = self.dropout.forward(&aw, train)?;

        // [B, H, L, d_k] -> [B, L, H * d_k]
        let context = aw.matmul(&value)?.transpose(1, 2)?.reshape((
            batch_size,
            query_len,
            self.n_heads * self.d_k,
        ))?;

        Ok((self.w_out.forward(&context)?, aw))
    }
}
