/// Transformer encoder and decoder stacks
use candle_core::{bail, Result, Tensor};
use candle_nn::VarBuilder;

use crate::config::TransformerConfig;
use crate::layers::{CastedEmbedding, LayerNorm, LinearND, PositionalEncoding};

pub mod blocks;
pub mod loader;

pub use blocks::{TransformerDecoderBlock, TransformerEncoderBlock};

/// Result of running the encoder stack
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// Encoded frames [batch, time, d_model]
    pub xs: Tensor,
    /// Self-attention weights per block, each [batch, n_heads, time, time]
    pub xx_aws: Vec<Tensor>,
}

/// Result of running the decoder stack
#[derive(Debug, Clone)]
pub struct DecoderOutput {
    /// Output logits [batch, ymax, vocab_size]
    pub logits: Tensor,
    /// Self-attention weights per block, each [batch, n_heads, ymax, ymax]
    pub yy_aws: Vec<Tensor>,
    /// Source attention weights per block, each [batch, n_heads, ymax, xmax]
    pub xy_aws: Vec<Option<Tensor>>,
}

/// Transformer encoder for acoustic features
///
/// input projection -> positional encoding -> N encoder blocks -> final LayerNorm
#[derive(Debug, Clone)]
pub struct TransformerEncoder {
    embed: LinearND,
    pos_enc: PositionalEncoding,
    layers: Vec<TransformerEncoderBlock>,
    norm_out: LayerNorm,
}

impl TransformerEncoder {
    /// Create new encoder from a validated configuration
    pub fn new(config: &TransformerConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;

        let embed = LinearND::new(config.input_dim, config.d_model, true, vb.pp("embed"))?;
        let pos_enc = PositionalEncoding::new(
            config.d_model,
            config.dropout,
            config.pe_type,
            config.max_len,
            vb.device(),
        )?;

        let mut layers = Vec::with_capacity(config.enc_n_layers);
        for i in 0..config.enc_n_layers {
            layers.push(TransformerEncoderBlock::new(config, vb.pp(format!("layers.{i}")))?);
        }

        let norm_out = LayerNorm::new(config.d_model, config.layer_norm_eps, vb.pp("norm_out"))?;

        log::debug!(
            "Built transformer encoder: input_dim={}, d_model={}, n_heads={}, layers={}",
            config.input_dim,
            config.d_model,
            config.n_heads,
            config.enc_n_layers
        );

        Ok(Self {
            embed,
            pos_enc,
            layers,
            norm_out,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `xs` - Acoustic features [batch, time, input_dim]
    /// * `xlens` - Valid number of frames per sequence
    /// * `train` - Whether dropout is active
    pub fn forward(&self, xs: &Tensor, xlens: &[usize], train: bool) -> Result<EncoderOutput> {
        let xs = self.embed.forward(xs)?;
        let mut xs = self.pos_enc.forward(&xs, train)?;

        let mut xx_aws = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (out, aws) = layer.forward(&xs, xlens, train)?;
            xs = out;
            xx_aws.push(aws);
        }

        Ok(EncoderOutput {
            xs: self.norm_out.forward(&xs)?,
            xx_aws,
        })
    }
}

/// Transformer decoder over output tokens
///
/// token embedding -> positional encoding -> N decoder blocks -> final LayerNorm -> output projection
#[derive(Debug, Clone)]
pub struct TransformerDecoder {
    embed: CastedEmbedding,
    pos_enc: PositionalEncoding,
    layers: Vec<TransformerDecoderBlock>,
    norm_out: LayerNorm,
    output: LinearND,
}

impl TransformerDecoder {
    /// Create new decoder from a validated configuration
    pub fn new(config: &TransformerConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;

        let embed = CastedEmbedding::new(config.vocab_size, config.d_model, vb.pp("embed"), vb.dtype())?;
        let pos_enc = PositionalEncoding::new(
            config.d_model,
            config.dropout,
            config.pe_type,
            config.max_len,
            vb.device(),
        )?;

        let mut layers = Vec::with_capacity(config.dec_n_layers);
        for i in 0..config.dec_n_layers {
            layers.push(TransformerDecoderBlock::new(config, vb.pp(format!("layers.{i}")))?);
        }

        let norm_out = LayerNorm::new(config.d_model, config.layer_norm_eps, vb.pp("norm_out"))?;
        let output = LinearND::new(config.d_model, config.vocab_size, true, vb.pp("output"))?;

        log::debug!(
            "Built transformer decoder: vocab_size={}, d_model={}, n_heads={}, layers={}, src_attention={}",
            config.vocab_size,
            config.d_model,
            config.n_heads,
            config.dec_n_layers,
            config.src_attention
        );

        Ok(Self {
            embed,
            pos_enc,
            layers,
            norm_out,
            output,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Forward pass (teacher forcing)
    ///
    /// # Arguments
    /// * `ys` - Token ids [batch, ymax] (u32)
    /// * `ylens` - Valid number of tokens per sequence
    /// * `enc` - Encoder outputs and lengths, required when blocks use source attention
    /// * `train` - Whether dropout is active
    pub fn forward(
        &self,
        ys: &Tensor,
        ylens: &[usize],
        enc: Option<(&Tensor, &[usize])>,
        train: bool,
    ) -> Result<DecoderOutput> {
        let needs_source = self.layers.iter().any(|l| l.has_src_attention());
        if needs_source && enc.is_none() {
            bail!("decoder uses source attention but no encoder outputs were given");
        }
        let (xs, xlens) = match enc {
            Some((xs, xlens)) => (Some(xs), Some(xlens)),
            None => (None, None),
        };

        let ys = self.embed.forward(ys)?;
        let mut ys = self.pos_enc.forward(&ys, train)?;

        let mut yy_aws = Vec::with_capacity(self.layers.len());
        let mut xy_aws = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (out, yy, xy) = layer.forward(&ys, ylens, xs, xlens, train)?;
            ys = out;
            yy_aws.push(yy);
            xy_aws.push(xy);
        }

        let ys = self.norm_out.forward(&ys)?;

        Ok(DecoderOutput {
            logits: self.output.forward(&ys)?,
            yy_aws,
            xy_aws,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn small_config() -> TransformerConfig {
        TransformerConfig {
            d_model: 32,
            d_ff: 64,
            n_heads: 4,
            enc_n_layers: 2,
            dec_n_layers: 2,
            input_dim: 20,
            vocab_size: 50,
            max_len: 200,
            ..Default::default()
        }
    }

    #[test]
    fn test_encoder_stack() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let encoder = TransformerEncoder::new(&small_config(), vb)?;
        assert_eq!(encoder.num_layers(), 2);

        let feats = Tensor::randn(0f32, 1.0, (3, 40, 20), &device)?;
        let out = encoder.forward(&feats, &[40, 31, 12], true)?;

        assert_eq!(out.xs.dims(), &[3, 40, 32]);
        assert_eq!(out.xx_aws.len(), 2);
        for aws in &out.xx_aws {
            assert_eq!(aws.dims(), &[3, 4, 40, 40]);
        }

        Ok(())
    }

    #[test]
    fn test_additive_encoder_decoder() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let config = TransformerConfig {
            attn_type: crate::config::MultiheadAttnType::Add,
            dropout: 0.0,
            ..small_config()
        };
        let encoder = TransformerEncoder::new(&config, vb.pp("encoder"))?;
        let decoder = TransformerDecoder::new(&config, vb.pp("decoder"))?;

        let feats = Tensor::randn(0f32, 1.0, (2, 5, 20), &device)?;
        let xlens = [5, 3];
        let enc = encoder.forward(&feats, &xlens, false)?;
        assert_eq!(enc.xs.dims(), &[2, 5, 32]);

        // Padded frames of the second sequence get no weight
        for aws in &enc.xx_aws {
            let padded = aws.get(1)?.narrow(2, 3, 2)?;
            assert_eq!(padded.abs()?.sum_all()?.to_scalar::<f32>()?, 0.0);
        }

        let ys = Tensor::new(&[[1u32, 4, 9], [2, 3, 0]], &device)?;
        let out = decoder.forward(&ys, &[3, 2], Some((&enc.xs, &xlens[..])), false)?;
        assert_eq!(out.logits.dims(), &[2, 3, 50]);

        Ok(())
    }

    #[test]
    fn test_encoder_decoder() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let config = small_config();

        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = TransformerEncoder::new(&config, vb.pp("encoder"))?;
        let decoder = TransformerDecoder::new(&config, vb.pp("decoder"))?;
        assert_eq!(decoder.num_layers(), 2);

        let feats = Tensor::randn(0f32, 1.0, (2, 30, 20), &device)?;
        let xlens = [30, 22];
        let enc = encoder.forward(&feats, &xlens, false)?;

        let ys = Tensor::new(&[[1u32, 4, 9, 16, 25], [2, 3, 5, 0, 0]], &device)?;
        let out = decoder.forward(&ys, &[5, 3], Some((&enc.xs, &xlens[..])), false)?;

        assert_eq!(out.logits.dims(), &[2, 5, 50]);
        assert_eq!(out.yy_aws.len(), 2);
        assert_eq!(out.xy_aws.len(), 2);
        for xy in &out.xy_aws {
            let Some(xy) = xy else {
                panic!("source attention weights missing");
            };
            assert_eq!(xy.dims(), &[2, 4, 5, 30]);
        }

        Ok(())
    }

    #[test]
    fn test_decoder_without_encoder_outputs_fails() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let decoder = TransformerDecoder::new(&small_config(), vb)?;
        let ys = Tensor::new(&[[1u32, 2, 3]], &device)?;

        assert!(decoder.forward(&ys, &[3], None, false).is_err());

        Ok(())
    }

    #[test]
    fn test_language_model_decoder() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let config = TransformerConfig {
            src_attention: false,
            ..small_config()
        };
        let decoder = TransformerDecoder::new(&config, vb)?;

        let ys = Tensor::new(&[[1u32, 2, 3, 4]], &device)?;
        let out = decoder.forward(&ys, &[4], None, false)?;

        assert_eq!(out.logits.dims(), &[1, 4, 50]);
        assert!(out.xy_aws.iter().all(Option::is_none));

        Ok(())
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let config = TransformerConfig {
            n_heads: 3,
            ..small_config()
        };
        assert!(matches!(
            TransformerEncoder::new(&config, vb),
            Err(crate::Error::Config(_))
        ));
    }
}
