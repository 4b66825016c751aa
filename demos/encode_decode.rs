/// Encoder-decoder forward pass with random weights
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use seq2seq_layers::{
    AttentionConfig, AttentionMechanism, AttentionState, AttnType, TransformerConfig,
    TransformerDecoder, TransformerEncoder,
};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let device = if candle_core::utils::cuda_is_available() {
        Device::new_cuda(0)?
    } else {
        Device::Cpu
    };
    log::info!("Using device: {:?}", device);

    // Small model so the demo runs quickly on CPU
    let config = TransformerConfig {
        d_model: 64,
        d_ff: 256,
        n_heads: 4,
        enc_n_layers: 2,
        dec_n_layers: 2,
        input_dim: 40,
        vocab_size: 100,
        ..Default::default()
    };
    config.validate()?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let encoder = TransformerEncoder::new(&config, vb.pp("encoder"))?;
    let decoder = TransformerDecoder::new(&config, vb.pp("decoder"))?;

    // Two utterances of different length, padded to 50 frames
    let xlens = [50usize, 37];
    let feats = Tensor::randn(0f32, 1.0, (2, 50, config.input_dim), &device)?;
    let enc = encoder.forward(&feats, &xlens, false)?;
    log::info!("Encoder output: {:?}", enc.xs.dims());

    let ylens = [6usize, 4];
    let ys = Tensor::new(&[[1u32, 5, 7, 9, 11, 2], [1, 8, 3, 2, 0, 0]], &device)?;
    let dec = decoder.forward(&ys, &ylens, Some((&enc.xs, &xlens[..])), false)?;
    log::info!("Decoder logits: {:?}", dec.logits.dims());
    for (i, xy) in dec.xy_aws.iter().enumerate() {
        if let Some(xy) = xy {
            log::info!("  layer {} source attention: {:?}", i, xy.dims());
        }
    }

    // Location-aware single-head attention over the encoder output, step by step
    let attn_config = AttentionConfig {
        enc_units: config.d_model,
        dec_units: 32,
        attn_type: AttnType::Location,
        attn_dim: 32,
        conv_kernel_size: 5,
        ..Default::default()
    };
    let attn = AttentionMechanism::new(&attn_config, vb.pp("attention"))?;

    let mut state = AttentionState::new();
    let mut aw: Option<Tensor> = None;
    for step in 0..3 {
        let dec_state = Tensor::randn(0f32, 1.0, (2, 1, attn_config.dec_units), &device)?;
        let (context, aw_step) =
            attn.forward(&mut state, &enc.xs, &xlens, &dec_state, aw.as_ref(), false)?;
        let peak = aw_step.argmax(1)?.to_vec1::<u32>()?;
        log::info!("Step {}: context {:?}, peak frames {:?}", step, context.dims(), peak);
        aw = Some(aw_step);
    }

    Ok(())
}
