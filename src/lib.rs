//! Transformer building blocks for sequence-to-sequence speech models
//!
//! Layers for attention-based encoder-decoder models (speech recognition,
//! speech translation), built on candle.
//!
//! # Components
//!
//! - **Positional encoding**: sinusoidal table, added or concatenated
//! - **Feed-forward**: position-wise two-layer MLP
//! - **Multi-head attention**: scaled dot-product or additive scoring
//! - **Transformer blocks**: pre-norm encoder/decoder layers with padding
//!   and causal masks
//! - **Single-head attention**: additive, location-aware or dot-product
//!   attention for RNN decoders
//!
//! # Example
//!
//! ```ignore
//! use seq2seq_layers::{TransformerConfig, TransformerEncoder};
//!
//! let config = TransformerConfig::default();
//! let encoder = TransformerEncoder::new(&config, vb)?;
//! let out = encoder.forward(&feats, &[120, 97], false)?;
//! ```

pub mod config;
pub mod layers;
pub mod models;
pub mod utils;

// Re-export commonly used items
pub use config::{AttentionConfig, AttnType, MultiheadAttnType, PeType, TransformerConfig};
pub use layers::{AttentionMechanism, AttentionState, MultiheadAttention, MultiheadCache};
pub use models::{
    DecoderOutput, EncoderOutput, TransformerDecoder, TransformerDecoderBlock, TransformerEncoder,
    TransformerEncoderBlock,
};

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
