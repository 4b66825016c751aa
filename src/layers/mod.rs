/// Neural network layer primitives
///
/// Building blocks for transformer and attention-based seq2seq models:
/// - Attention mechanisms (single-head for RNN decoders, multi-head for transformers)
/// - Positional encoding (sinusoidal)
/// - Position-wise feed-forward network
/// - Layer normalization
/// - Linear layers over N-D inputs and token embeddings

pub mod attention;
pub mod embeddings;
pub mod feed_forward;
pub mod linear;
pub mod multihead_attention;
pub mod normalization;
pub mod positional;

pub use attention::{AttentionMechanism, AttentionState};
pub use embeddings::CastedEmbedding;
pub use feed_forward::PositionwiseFeedForward;
pub use linear::LinearND;
pub use multihead_attention::{MultiheadAttention, MultiheadCache};
pub use normalization::LayerNorm;
pub use positional::PositionalEncoding;
