use anyhow::Result;
use std::path::Path;
use tch::Device;

use caption_core::CaptionModel;
use coco_data::SampleEncoder;
use vocab::Vocab;

use crate::generator::autoregressive_decode;

/// Caption a single image with free-running decoding.
pub fn predict_single_image(
    model: &mut dyn CaptionModel,
    vocab: &Vocab,
    image_path: &Path,
    img_width: i64,
    img_height: i64,
    seq_len: usize,
    device: Device,
) -> Result<String> {
    let encoder = SampleEncoder::new(img_width, img_height, seq_len, vocab.end_id() as i64);
    let image = encoder.load_image(image_path)?.unsqueeze(0).to(device);

    model.reset_states();
    let ids = autoregressive_decode(model, &image, seq_len, vocab.start_id() as i64)?;

    let row = Vec::<i64>::try_from(&ids.get(0))?;
    let end = vocab.end_id() as i64;
    let words: Vec<u32> = row
        .iter()
        .take_while(|&&id| id != end)
        .map(|&id| id as u32)
        .collect();
    Ok(vocab.decode(&words))
}
