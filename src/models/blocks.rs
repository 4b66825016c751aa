/// Transformer encoder and decoder blocks
use candle_core::{bail, Result, Tensor};
use candle_nn::{Dropout, VarBuilder};

use crate::config::TransformerConfig;
use crate::layers::{LayerNorm, MultiheadAttention, MultiheadCache, PositionwiseFeedForward};
use crate::utils::{make_pad_mask, subsequent_mask};

fn check_lens(lens: &[usize], batch_size: usize, what: &str) -> Result<()> {
    if lens.len() != batch_size {
        bail!("got {} {what} for a batch of {batch_size}", lens.len());
    }
    Ok(())
}

/// Self-attention over d_model with the configured heads and scoring
fn self_attention(config: &TransformerConfig, vb: VarBuilder) -> Result<MultiheadAttention> {
    MultiheadAttention::new(
        config.d_model,
        config.d_model,
        config.attn_type,
        config.d_model,
        config.n_heads,
        config.dropout_att,
        vb,
    )
}

/// A single layer of the transformer encoder
///
/// Pre-norm residual sublayers:
/// - xs = xs + dropout(self_attn(norm1(xs)))
/// - xs = xs + dropout(feed_forward(norm2(xs)))
#[derive(Debug, Clone)]
pub struct TransformerEncoderBlock {
    self_attn: MultiheadAttention,
    norm1: LayerNorm,
    dropout1: Dropout,

    feed_forward: PositionwiseFeedForward,
    norm2: LayerNorm,
    dropout2: Dropout,
}

impl TransformerEncoderBlock {
    /// Create new encoder block
    pub fn new(config: &TransformerConfig, vb: VarBuilder) -> Result<Self> {
        let self_attn = self_attention(config, vb.pp("self_attn"))?;
        let norm1 = LayerNorm::new(config.d_model, config.layer_norm_eps, vb.pp("norm1"))?;

        let feed_forward = PositionwiseFeedForward::new(
            config.d_model,
            config.d_ff,
            config.dropout,
            vb.pp("feed_forward"),
        )?;
        let norm2 = LayerNorm::new(config.d_model, config.layer_norm_eps, vb.pp("norm2"))?;

        Ok(Self {
            self_attn,
            norm1,
            dropout1: Dropout::new(config.dropout),
            feed_forward,
            norm2,
            dropout2: Dropout::new(config.dropout),
        })
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `xs` - Input tensor [batch, time, d_model]
    /// * `xlens` - Valid length of every sequence
    /// * `train` - Whether dropout is active
    ///
    /// # Returns
    /// Tuple of (output [batch, time, d_model], self-attention weights [batch, n_heads, time, time])
    pub fn forward(&self, xs: &Tensor, xlens: &[usize], train: bool) -> Result<(Tensor, Tensor)> {
        let mut cache = MultiheadCache::new();
        self.forward_cached(&mut cache, xs, xlens, train)
    }

    /// Forward pass reusing self-attention key/value projections held in `cache`
    ///
    /// An empty cache behaves exactly like [`forward`](Self::forward).
    pub fn forward_cached(
        &self,
        cache: &mut MultiheadCache,
        xs: &Tensor,
        xlens: &[usize],
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (batch_size, xmax, _) = xs.dims3()?;
        check_lens(xlens, batch_size, "xlens")?;

        // Keys beyond xlens are hidden from every query: [batch, 1, 1, time]
        let xx_mask = make_pad_mask(xlens, xmax, xs.device())?.unsqueeze(1)?.unsqueeze(1)?;

        // self-attention
        let normed = self.norm1.forward(xs)?;
        let (attn_out, xx_aws) =
            self.self_attn.forward(cache, &normed, &normed, &normed, &xx_mask, train)?;
        let xs = (self.dropout1.forward(&attn_out, train)? + xs)?;

        // position-wise feed-forward
        let normed = self.norm2.forward(&xs)?;
        let ff_out = self.feed_forward.forward(&normed, train)?;
        let xs = (self.dropout2.forward(&ff_out, train)? + xs)?;

        Ok((xs, xx_aws))
    }
}

/// A single layer of the transformer decoder
///
/// Pre-norm residual sublayers:
/// - ys = ys + dropout(self_attn(norm1(ys))) with padding and causal masks
/// - ys = ys + dropout(src_attn(query=norm2(ys), key=value=xs)) if enabled
/// - ys = ys + dropout(feed_forward(norm3(ys)))
#[derive(Debug, Clone)]
pub struct TransformerDecoderBlock {
    self_attn: MultiheadAttention,
    norm1: LayerNorm,
    dropout1: Dropout,

    src_attn: Option<(MultiheadAttention, LayerNorm, Dropout)>,

    feed_forward: PositionwiseFeedForward,
    norm3: LayerNorm,
    dropout3: Dropout,
}

impl TransformerDecoderBlock {
    /// Create new decoder block
    ///
    /// Source-target attention is built only when `config.src_attention` is set.
    pub fn new(config: &TransformerConfig, vb: VarBuilder) -> Result<Self> {
        let self_attn = self_attention(config, vb.pp("self_attn"))?;
        let norm1 = LayerNorm::new(config.d_model, config.layer_norm_eps, vb.pp("norm1"))?;

        let src_attn = if config.src_attention {
            Some((
                self_attention(config, vb.pp("src_attn"))?,
                LayerNorm::new(config.d_model, config.layer_norm_eps, vb.pp("norm2"))?,
                Dropout::new(config.dropout),
            ))
        } else {
            None
        };

        let feed_forward = PositionwiseFeedForward::new(
            config.d_model,
            config.d_ff,
            config.dropout,
            vb.pp("feed_forward"),
        )?;
        let norm3 = LayerNorm::new(config.d_model, config.layer_norm_eps, vb.pp("norm3"))?;

        Ok(Self {
            self_attn,
            norm1,
            dropout1: Dropout::new(config.dropout),
            src_attn,
            feed_forward,
            norm3,
            dropout3: Dropout::new(config.dropout),
        })
    }

    pub fn has_src_attention(&self) -> bool {
        self.src_attn.is_some()
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `ys` - Decoder input [batch, ymax, d_model]
    /// * `ylens` - Valid length of every target sequence
    /// * `xs` - Encoder outputs [batch, xmax, d_model], required with source attention
    /// * `xlens` - Valid length of every encoder sequence, required with source attention
    /// * `train` - Whether dropout is active
    ///
    /// # Returns
    /// Tuple of (output [batch, ymax, d_model],
    /// self-attention weights [batch, n_heads, ymax, ymax],
    /// source attention weights [batch, n_heads, ymax, xmax] if enabled)
    pub fn forward(
        &self,
        ys: &Tensor,
        ylens: &[usize],
        xs: Option<&Tensor>,
        xlens: Option<&[usize]>,
        train: bool,
    ) -> Result<(Tensor, Tensor, Option<Tensor>)> {
        let (batch_size, ymax, _) = ys.dims3()?;
        check_lens(ylens, batch_size, "ylens")?;
        let device = ys.device();

        // Padding over keys combined with the causal mask: [batch, 1, ymax, ymax]
        let y_pad = make_pad_mask(ylens, ymax, device)?;
        let yy_mask = y_pad
            .unsqueeze(1)?
            .broadcast_mul(&subsequent_mask(ymax, device)?)?
            .unsqueeze(1)?;

        // self-attention
        let normed = self.norm1.forward(ys)?;
        let (attn_out, yy_aws) = self.self_attn.forward(
            &mut MultiheadCache::new(),
            &normed,
            &normed,
            &normed,
            &yy_mask,
            train,
        )?;
        let mut ys = (self.dropout1.forward(&attn_out, train)? + ys)?;

        // attention over encoder outputs
        let mut xy_aws = None;
        if let Some((ref src_attn, ref norm2, ref dropout2)) = self.src_attn {
            let (Some(xs), Some(xlens)) = (xs, xlens) else {
                bail!("source attention requires encoder outputs and their lengths");
            };
            let xmax = xs.dim(1)?;
            check_lens(xlens, batch_size, "xlens")?;

            // Valid only where both the key frame and the query token are real: [batch, 1, ymax, xmax]
            let x_mask = make_pad_mask(xlens, xmax, device)?.unsqueeze(1)?;
            let y_mask = y_pad.unsqueeze(2)?;
            let xy_mask = x_mask.broadcast_mul(&y_mask)?.unsqueeze(1)?;

            let normed = norm2.forward(&ys)?;
            let (attn_out, aws) =
                src_attn.forward(&mut MultiheadCache::new(), xs, xs, &normed, &xy_mask, train)?;
            ys = (dropout2.forward(&attn_out, train)? + ys)?;
            xy_aws = Some(aws);
        }

        // position-wise feed-forward
        let normed = self.norm3.forward(&ys)?;
        let ff_out = self.feed_forward.forward(&normed, train)?;
        let ys = (self.dropout3.forward(&ff_out, train)? + ys)?;

        Ok((ys, yy_aws, xy_aws))
    }
}
