/// Configuration for transformer stacks and single-head attention
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::layers::positional::DEFAULT_MAX_LEN;
use crate::{Error, Result};

/// How the sinusoidal table is combined with the (scaled) input
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeType {
    /// Scale only, no positional information
    None,
    /// `xs + pe`
    Add,
    /// `[xs; pe]` along the feature axis, doubling the width
    Concat,
}

impl FromStr for PeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "add" => Ok(Self::Add),
            "concat" => Ok(Self::Concat),
            other => Err(Error::Config(format!(
                "Invalid pe_type: {other}. Must be 'none', 'add', or 'concat'"
            ))),
        }
    }
}

impl fmt::Display for PeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Add => "add",
            Self::Concat => "concat",
        })
    }
}

/// Scoring function of the multi-head attention in transformer blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiheadAttnType {
    ScaledDot,
    Add,
}

impl FromStr for MultiheadAttnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scaled_dot" => Ok(Self::ScaledDot),
            "add" => Ok(Self::Add),
            "average" => Err(Error::Config(
                "average attention is not supported".to_string(),
            )),
            other => Err(Error::Config(format!(
                "Invalid attn_type: {other}. Must be 'scaled_dot' or 'add'"
            ))),
        }
    }
}

impl fmt::Display for MultiheadAttnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ScaledDot => "scaled_dot",
            Self::Add => "add",
        })
    }
}

/// Scoring function of the single-head attention mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttnType {
    /// Additive (Bahdanau) attention
    Add,
    /// Additive attention with convolutional features of the previous weights
    Location,
    /// Dot product of projected encoder and decoder states
    Dot,
}

impl FromStr for AttnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(Self::Add),
            "location" => Ok(Self::Location),
            "dot" => Ok(Self::Dot),
            "luong_dot" | "luong_general" | "luong_concat" => Err(Error::Config(format!(
                "{s} attention is not supported"
            ))),
            other => Err(Error::Config(format!(
                "Invalid attn_type: {other}. Must be 'add', 'location', or 'dot'"
            ))),
        }
    }
}

impl fmt::Display for AttnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Location => "location",
            Self::Dot => "dot",
        })
    }
}

/// Configuration for transformer encoder/decoder stacks
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    /// Model (residual stream) dimension
    pub d_model: usize,

    /// Inner dimension of the position-wise feed-forward network
    pub d_ff: usize,

    /// Number of attention heads
    pub n_heads: usize,

    /// Scoring function of multi-head attention
    pub attn_type: MultiheadAttnType,

    /// Number of encoder blocks
    pub enc_n_layers: usize,

    /// Number of decoder blocks
    pub dec_n_layers: usize,

    /// Positional encoding combination
    pub pe_type: PeType,

    /// Maximum sequence length covered by the positional table
    pub max_len: usize,

    /// Dropout on sublayer outputs and positional encoding
    pub dropout: f32,

    /// Dropout on attention weights
    pub dropout_att: f32,

    /// Epsilon of layer normalization
    pub layer_norm_eps: f64,

    /// Acoustic feature dimension fed to the encoder
    pub input_dim: usize,

    /// Output vocabulary size of the decoder
    pub vocab_size: usize,

    /// Whether decoder blocks attend to encoder outputs
    pub src_attention: bool,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            d_model: 256,
            d_ff: 2048,
            n_heads: 4,
            attn_type: MultiheadAttnType::ScaledDot,
            enc_n_layers: 12,
            dec_n_layers: 6,
            pe_type: PeType::Add,
            max_len: DEFAULT_MAX_LEN,
            dropout: 0.1,
            dropout_att: 0.0,
            layer_norm_eps: 1e-12,
            input_dim: 80,
            vocab_size: 10000,
            src_attention: true,
        }
    }
}

impl TransformerConfig {
    /// Load configuration from a JSON file and validate it
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded transformer config from {}", path.as_ref().display());
        Self::from_json_str(&text)
    }

    /// Parse configuration from a JSON string and validate it
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.d_model == 0 || self.d_ff == 0 {
            return Err(Error::Config("d_model and d_ff must be > 0".to_string()));
        }

        if self.n_heads == 0 || self.d_model % self.n_heads != 0 {
            return Err(Error::Config(
                "d_model must be divisible by n_heads".to_string(),
            ));
        }

        if self.pe_type == PeType::Concat {
            return Err(Error::Config(
                "pe_type 'concat' changes the model width and cannot feed transformer blocks"
                    .to_string(),
            ));
        }

        if self.max_len == 0 {
            return Err(Error::Config("max_len must be > 0".to_string()));
        }

        for (name, p) in [("dropout", self.dropout), ("dropout_att", self.dropout_att)] {
            if !(0.0..1.0).contains(&p) {
                return Err(Error::Config(format!("{name} must be in [0, 1), got {p}")));
            }
        }

        if self.input_dim == 0 || self.vocab_size == 0 {
            return Err(Error::Config(
                "input_dim and vocab_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get per-head dimension
    pub fn head_dim(&self) -> usize {
        self.d_model / self.n_heads
    }
}

/// Configuration for the single-head attention mechanism
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    /// Encoder output dimension
    pub enc_units: usize,

    /// Decoder state dimension
    pub dec_units: usize,

    pub attn_type: AttnType,

    /// Dimension of the attention space
    pub attn_dim: usize,

    /// Multiplier applied to energies before normalization
    pub sharpening_factor: f64,

    /// Use a sigmoid instead of softmax to normalize energies
    pub sigmoid_smoothing: bool,

    /// Channels of the location convolution
    pub conv_out_channels: usize,

    /// Half-width of the location convolution kernel
    pub conv_kernel_size: usize,

    /// Dropout on attention weights, 0 disables it
    pub dropout: f32,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            enc_units: 512,
            dec_units: 512,
            attn_type: AttnType::Location,
            attn_dim: 128,
            sharpening_factor: 1.0,
            sigmoid_smoothing: false,
            conv_out_channels: 10,
            conv_kernel_size: 100,
            dropout: 0.0,
        }
    }
}

impl AttentionConfig {
    /// Load configuration from a JSON file and validate it
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded attention config from {}", path.as_ref().display());
        Self::from_json_str(&text)
    }

    /// Parse configuration from a JSON string and validate it
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.enc_units == 0 || self.dec_units == 0 || self.attn_dim == 0 {
            return Err(Error::Config(
                "enc_units, dec_units and attn_dim must be > 0".to_string(),
            ));
        }

        if self.attn_type == AttnType::Location && self.conv_out_channels == 0 {
            return Err(Error::Config(
                "conv_out_channels must be > 0 for location attention".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }

        if !self.sharpening_factor.is_finite() || self.sharpening_factor <= 0.0 {
            return Err(Error::Config(format!(
                "sharpening_factor must be finite and > 0, got {}",
                self.sharpening_factor
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs_are_valid() -> Result<()> {
        TransformerConfig::default().validate()?;
        AttentionConfig::default().validate()?;
        Ok(())
    }

    #[test]
    fn test_head_dim() {
        let config = TransformerConfig::default();
        assert_eq!(config.head_dim(), 64);
        assert_eq!(config.max_len, DEFAULT_MAX_LEN);
    }

    #[test]
    fn test_rejects_indivisible_heads() {
        let config = TransformerConfig {
            d_model: 250,
            n_heads: 4,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_concat_for_stacks() {
        let config = TransformerConfig {
            pe_type: PeType::Concat,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_enums() -> Result<()> {
        assert_eq!("add".parse::<PeType>()?, PeType::Add);
        assert_eq!("none".parse::<PeType>()?, PeType::None);
        assert_eq!("scaled_dot".parse::<MultiheadAttnType>()?, MultiheadAttnType::ScaledDot);
        assert_eq!("location".parse::<AttnType>()?, AttnType::Location);

        assert!("average".parse::<MultiheadAttnType>().is_err());
        assert!("luong_general".parse::<AttnType>().is_err());
        assert!("sinusoid".parse::<PeType>().is_err());
        // Same spellings as the serde representation
        assert!("".parse::<PeType>().is_err());
        assert!(serde_json::from_str::<PeType>(r#""""#).is_err());
        Ok(())
    }

    #[test]
    fn test_from_json_str() -> Result<()> {
        let config = TransformerConfig::from_json_str(
            r#"{"d_model": 128, "n_heads": 8, "pe_type": "none", "attn_type": "add"}"#,
        )?;
        assert_eq!(config.d_model, 128);
        assert_eq!(config.pe_type, PeType::None);
        assert_eq!(config.attn_type, MultiheadAttnType::Add);
        // Unspecified fields fall back to defaults
        assert_eq!(config.d_ff, 2048);

        let attn = AttentionConfig::from_json_str(r#"{"attn_type": "dot", "attn_dim": 64}"#)?;
        assert_eq!(attn.attn_type, AttnType::Dot);
        assert_eq!(attn.conv_kernel_size, 100);
        Ok(())
    }

    #[test]
    fn test_attention_config_from_json_file() -> Result<()> {
        let path = std::env::temp_dir().join(format!(
            "seq2seq_layers_attention_{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"{"attn_type": "add", "enc_units": 320, "sharpening_factor": 2.0}"#,
        )?;

        let loaded = AttentionConfig::from_json_file(&path);
        std::fs::remove_file(&path)?;

        let config = loaded?;
        assert_eq!(config.attn_type, AttnType::Add);
        assert_eq!(config.enc_units, 320);
        assert_eq!(config.sharpening_factor, 2.0);
        assert_eq!(config.dec_units, 512);

        assert!(matches!(
            AttentionConfig::from_json_file("/nonexistent/attention.json"),
            Err(Error::Io(_))
        ));
        Ok(())
    }

    #[test]
    fn test_rejects_invalid_sharpening() {
        for sharpening_factor in [0.0, -1.0, f64::INFINITY, f64::NAN] {
            let config = AttentionConfig {
                sharpening_factor,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn test_from_json_str_rejects_unknown_variant() {
        let result = TransformerConfig::from_json_str(r#"{"attn_type": "average"}"#);
        assert!(matches!(result, Err(Error::Json(_))));
    }
}
