/// Weight loading from safetensors files
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;

use super::{TransformerDecoder, TransformerEncoder};
use crate::config::TransformerConfig;

fn var_builder<P: AsRef<Path>>(weights_path: P, device: &Device) -> crate::Result<VarBuilder<'static>> {
    let path = weights_path.as_ref();
    if !path.exists() {
        return Err(crate::Error::Model(format!(
            "weights file not found: {}",
            path.display()
        )));
    }

    log::info!("Loading weights from {}", path.display());

    // Uses Candle's built-in safetensors support
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
    Ok(vb)
}

/// Load an encoder stack from a safetensors file
///
/// # Arguments
/// * `config` - Model configuration
/// * `weights_path` - Path to safetensors file
/// * `device` - Device to load the model on
pub fn load_encoder<P: AsRef<Path>>(
    config: &TransformerConfig,
    weights_path: P,
    device: &Device,
) -> crate::Result<TransformerEncoder> {
    TransformerEncoder::new(config, var_builder(weights_path, device)?)
}

/// Load a decoder stack from a safetensors file
pub fn load_decoder<P: AsRef<Path>>(
    config: &TransformerConfig,
    weights_path: P,
    device: &Device,
) -> crate::Result<TransformerDecoder> {
    TransformerDecoder::new(config, var_builder(weights_path, device)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Tensor;
    use candle_nn::VarMap;

    fn small_config() -> TransformerConfig {
        TransformerConfig {
            d_model: 16,
            d_ff: 32,
            n_heads: 2,
            enc_n_layers: 1,
            dec_n_layers: 1,
            input_dim: 8,
            vocab_size: 12,
            max_len: 64,
            ..Default::default()
        }
    }

    #[test]
    fn test_load_encoder_round_trips_weights() -> crate::Result<()> {
        let device = Device::Cpu;
        let config = small_config();

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = TransformerEncoder::new(&config, vb)?;

        let path = std::env::temp_dir().join(format!(
            "seq2seq_layers_encoder_{}.safetensors",
            std::process::id()
        ));
        varmap.save(&path)?;

        let loaded = load_encoder(&config, &path, &device)?;
        std::fs::remove_file(&path)?;

        let feats = Tensor::randn(0f32, 1.0, (2, 10, 8), &device)?;
        let expected = encoder.forward(&feats, &[10, 6], false)?;
        let actual = loaded.forward(&feats, &[10, 6], false)?;

        let diff = expected
            .xs
            .sub(&actual.xs)?
            .abs()?
            .max_all()?
            .to_scalar::<f32>()?;
        assert!(diff < 1e-6);

        Ok(())
    }

    #[test]
    fn test_load_decoder_missing_file() {
        let device = Device::Cpu;
        let result = load_decoder(&small_config(), "/nonexistent/decoder.safetensors", &device);
        assert!(matches!(result, Err(crate::Error::Model(_))));
    }
}
