/// Sinusoidal positional encoding
use candle_core::{bail, Device, Result, Tensor};
use candle_nn::Dropout;

use crate::config::PeType;

/// Default number of positions covered by the table
pub const DEFAULT_MAX_LEN: usize = 5000;

/// Build the sinusoidal table [max_len, d_model]
///
/// `pe[pos, 2i] = sin(pos * w_i)` and `pe[pos, 2i + 1] = cos(pos * w_i)` with
/// `w_i = exp(-2i * ln(10000) / d_model)`.
fn sinusoid_table(max_len: usize, d_model: usize, device: &Device) -> Result<Tensor> {
    let log_timescale = 10000f32.ln() / d_model as f32;
    let inv_freq: Vec<f32> = (0..d_model)
        .step_by(2)
        .map(|i| (-(i as f32) * log_timescale).exp())
        .collect();

    let mut table = vec![0f32; max_len * d_model];
    for pos in 0..max_len {
        let row = &mut table[pos * d_model..(pos + 1) * d_model];
        for (k, freq) in inv_freq.iter().enumerate() {
            let angle = pos as f32 * freq;
            row[2 * k] = angle.sin();
            if 2 * k + 1 < d_model {
                row[2 * k + 1] = angle.cos();
            }
        }
    }

    Tensor::from_vec(table, (max_len, d_model), device)
}

/// Positional encoding layer
///
/// Scales the input by `sqrt(d_model)` and then, depending on `pe_type`,
/// adds or concatenates the precomputed sinusoidal table.
#[derive(Debug, Clone)]
pub struct PositionalEncoding {
    d_model: usize,
    pe_type: PeType,
    pe: Option<Tensor>,
    dropout: Dropout,
}

impl PositionalEncoding {
    /// Create new positional encoding
    ///
    /// # Arguments
    /// * `d_model` - Feature dimension of the input
    /// * `dropout` - Dropout applied after the encoding is combined
    /// * `pe_type` - How the table is combined with the input
    /// * `max_len` - Maximum sequence length
    /// * `device` - Device to create the table on
    pub fn new(
        d_model: usize,
        dropout: f32,
        pe_type: PeType,
        max_len: usize,
        device: &Device,
    ) -> Result<Self> {
        let pe = match pe_type {
            PeType::None => None,
            PeType::Add | PeType::Concat => Some(sinusoid_table(max_len, d_model, device)?),
        };

        Ok(Self {
            d_model,
            pe_type,
            pe,
            dropout: Dropout::new(dropout),
        })
    }

    /// Output feature dimension
    pub fn output_dim(&self) -> usize {
        match self.pe_type {
            PeType::Concat => 2 * self.d_model,
            PeType::None | PeType::Add => self.d_model,
        }
    }

    /// Cached table [max_len, d_model], if any
    pub fn table(&self) -> Option<&Tensor> {
        self.pe.as_ref()
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `xs` - Input tensor [batch, seq_len, d_model]
    /// * `train` - Whether dropout is active
    ///
    /// # Returns
    /// [batch, seq_len, d_model], or [batch, seq_len, 2 * d_model] for concat
    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let (batch_size, seq_len, _) = xs.dims3()?;
        let xs = xs.affine((self.d_model as f64).sqrt(), 0.0)?;

        let Some(ref table) = self.pe else {
            return Ok(xs);
        };

        let max_len = table.dim(0)?;
        if seq_len > max_len {
            bail!("sequence length {seq_len} exceeds positional table length {max_len}");
        }

        let pe = table.narrow(0, 0, seq_len)?.unsqueeze(0)?.to_dtype(xs.dtype())?;

        let xs = match self.pe_type {
            PeType::Add => xs.broadcast_add(&pe)?,
            PeType::Concat => {
                let pe = pe.broadcast_as((batch_size, seq_len, self.d_model))?;
                Tensor::cat(&[&xs, &pe], 2)?
            }
            PeType::None => xs,
        };

        self.dropout.forward(&xs, train)
    }
}
