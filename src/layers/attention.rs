/// Single-head attention for RNN-style decoders
///
/// Scores every encoder frame against the current decoder state and returns
/// the weighted sum of encoder outputs.
use candle_core::{bail, Module, Result, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Dropout, VarBuilder};

use super::linear::LinearND;
use crate::config::{AttentionConfig, AttnType};
use crate::utils::{make_pad_mask, masked_sigmoid, masked_softmax};

/// Per-utterance values reused across decoding steps
///
/// Holds the encoder-side projection and the padding mask. Both are filled by
/// the first [`AttentionMechanism::forward`] call after a [`reset`].
///
/// [`reset`]: AttentionState::reset
#[derive(Debug, Clone, Default)]
pub struct AttentionState {
    enc_out_a: Option<Tensor>,
    mask: Option<Tensor>,
}

impl AttentionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the cached projection and mask
    pub fn reset(&mut self) {
        self.enc_out_a = None;
        self.mask = None;
    }

    pub fn is_empty(&self) -> bool {
        self.enc_out_a.is_none() && self.mask.is_none()
    }
}

/// Single-head attention mechanism
///
/// Supports:
/// - Additive attention: v(tanh(W_enc h + W_dec s))
/// - Location-aware attention: additive plus convolved previous weights
/// - Dot-product attention: (W_enc h) . (W_dec s)
/// - Sharpening of energies and sigmoid smoothing instead of softmax
#[derive(Debug, Clone)]
pub struct AttentionMechanism {
    attn_type: AttnType,
    sharpening_factor: f64,
    sigmoid_smoothing: bool,

    w_enc: LinearND,
    w_dec: LinearND,
    w_conv: Option<LinearND>,
    conv: Option<Conv1d>,
    v: Option<LinearND>,

    dropout: Option<Dropout>,
}

impl AttentionMechanism {
    /// Create new AttentionMechanism
    ///
    /// # Arguments
    /// * `config` - Dimensions and scoring options
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(config: &AttentionConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;

        let enc_bias = config.attn_type != AttnType::Dot;
        let w_enc = LinearND::new(config.enc_units, config.attn_dim, enc_bias, vb.pp("w_enc"))?;
        let w_dec = LinearND::new(config.dec_units, config.attn_dim, false, vb.pp("w_dec"))?;

        let (w_conv, conv) = if config.attn_type == AttnType::Location {
            let w_conv = LinearND::new(
                config.conv_out_channels,
                config.attn_dim,
                false,
                vb.pp("w_conv"),
            )?;
            let conv_cfg = Conv1dConfig {
                padding: config.conv_kernel_size,
                ..Default::default()
            };
            let conv = candle_nn::conv1d_no_bias(
                1,
                config.conv_out_channels,
                config.conv_kernel_size * 2 + 1,
                conv_cfg,
                vb.pp("conv"),
            )?;
            (Some(w_conv), Some(conv))
        } else {
            (None, None)
        };

        let v = match config.attn_type {
            AttnType::Add | AttnType::Location => {
                Some(LinearND::new(config.attn_dim, 1, false, vb.pp("v"))?)
            }
            AttnType::Dot => None,
        };

        let dropout = (config.dropout > 0.0).then(|| Dropout::new(config.dropout));

        log::debug!(
            "Built {} attention: enc_units={}, dec_units={}, attn_dim={}",
            config.attn_type,
            config.enc_units,
            config.dec_units,
            config.attn_dim
        );

        Ok(Self {
            attn_type: config.attn_type,
            sharpening_factor: config.sharpening_factor,
            sigmoid_smoothing: config.sigmoid_smoothing,
            w_enc,
            w_dec,
            w_conv,
            conv,
            v,
            dropout,
        })
    }

    pub fn attn_type(&self) -> AttnType {
        self.attn_type
    }

    /// Unnormalized scores [batch, enc_time]
    fn energy(&self, enc_out_a: &Tensor, dec_out: &Tensor, aw_step: &Tensor) -> Result<Tensor> {
        // [batch, 1, attn_dim], broadcast over encoder frames
        let dec_out_a = self.w_dec.forward(dec_out)?;

        match (self.attn_type, &self.v) {
            (AttnType::Add, Some(v)) => {
                let hidden = enc_out_a.broadcast_add(&dec_out_a)?.tanh()?;
                v.forward(&hidden)?.squeeze(2)
            }
            (AttnType::Location, Some(v)) => {
                let (Some(conv), Some(w_conv)) = (&self.conv, &self.w_conv) else {
                    bail!("location attention is missing its convolution");
                };
                // [batch, enc_time] -> [batch, 1, enc_time] -> [batch, channels, enc_time]
                let conv_feat = conv.forward(&aw_step.unsqueeze(1)?)?;
                let conv_feat = conv_feat.transpose(1, 2)?.contiguous()?;

                let hidden = enc_out_a
                    .broadcast_add(&dec_out_a)?
                    .add(&w_conv.forward(&conv_feat)?)?
                    .tanh()?;
                v.forward(&hidden)?.squeeze(2)
            }
            (AttnType::Dot, _) => {
                // [batch, enc_time, attn_dim] @ [batch, attn_dim, 1]
                let dec_t = dec_out_a.transpose(1, 2)?.contiguous()?;
                enc_out_a.matmul(&dec_t)?.squeeze(2)
            }
            (_, None) => bail!("{} attention is missing its v projection", self.attn_type),
        }
    }

    /// Forward pass for one decoding step
    ///
    /// # Arguments
    /// * `state` - Encoder-side cache, reset between utterances
    /// * `enc_out` - Encoder outputs [batch, enc_time, enc_units]
    /// * `x_lens` - Valid length of every sequence in the batch
    /// * `dec_out` - Decoder state [batch, 1, dec_units]
    /// * `aw_step` - Previous attention weights [batch, enc_time], zeros if `None`
    /// * `train` - Whether dropout is active
    ///
    /// # Returns
    /// Tuple of (context [batch, 1, enc_units], attention weights [batch, enc_time])
    pub fn forward(
        &self,
        state: &mut AttentionState,
        enc_out: &Tensor,
        x_lens: &[usize],
        dec_out: &Tensor,
        aw_step: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (batch_size, enc_time, _) = enc_out.dims3()?;
        if x_lens.len() != batch_size {
            bail!("got {} lengths for a batch of {}", x_lens.len(), batch_size);
        }

        let aw_step = match aw_step {
            Some(aw) => aw.clone(),
            None => Tensor::zeros((batch_size, enc_time), enc_out.dtype(), enc_out.device())?,
        };

        let enc_out_a = match state.enc_out_a {
            Some(ref a) => a.clone(),
            None => {
                let a = self.w_enc.forward(enc_out)?;
                state.enc_out_a = Some(a.clone());
                a
            }
        };

        let mask = match state.mask {
            Some(ref m) => m.clone(),
            None => {
                let m = make_pad_mask(x_lens, enc_time, enc_out.device())?;
                state.mask = Some(m.clone());
                m
            }
        };

        let energy = self
            .energy(&enc_out_a, dec_out, &aw_step)?
            .affine(self.sharpening_factor, 0.0)?;

        let aw_step = if self.sigmoid_smoothing {
            masked_sigmoid(&energy, &mask)?
        } else {
            masked_softmax(&energy, &mask)?
        };

        let aw_step = match self.dropout {
            Some(ref dropout) => dropout.forward(&aw_step, train)?,
            None => aw_step,
        };

        // [batch, 1, enc_time] @ [batch, enc_time, enc_units]
        let context = aw_step.unsqueeze(1)?.matmul(&enc_out.contiguous()?)?;

        Ok((context, aw_step))
    }
}
