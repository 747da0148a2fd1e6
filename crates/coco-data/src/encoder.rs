use std::path::Path;
use tch::{vision, Kind, Tensor};

use crate::error::Result;

const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Turns one raw (image, caption) record into fixed-shape batch rows.
#[derive(Debug, Clone)]
pub struct SampleEncoder {
    pub img_width: i64,
    pub img_height: i64,
    pub seq_len: usize,
    pub eos_id: i64,
    /// Images on disk are already at target size and channel format.
    pub preprocessed: bool,
}

impl SampleEncoder {
    pub fn new(img_width: i64, img_height: i64, seq_len: usize, eos_id: i64) -> Self {
        Self {
            img_width,
            img_height,
            seq_len,
            eos_id,
            preprocessed: false,
        }
    }

    pub fn preprocessed(mut self, preprocessed: bool) -> Self {
        self.preprocessed = preprocessed;
        self
    }

    /// Load and normalize one image to [3, img_height, img_width] float.
    ///
    /// Missing or corrupt files surface as errors; the caller aborts the
    /// batch rather than papering over a broken dataset.
    pub fn load_image(&self, path: &Path) -> Result<Tensor> {
        let raw = if self.preprocessed {
            vision::image::load(path)?
        } else {
            vision::image::load_and_resize(path, self.img_width, self.img_height)?
        };

        let channels = raw.size()[0];
        let rgb = match channels {
            3 => raw,
            1 => raw.repeat(&[3, 1, 1]),
            _ => raw.narrow(0, 0, 3),
        };

        let scaled = rgb.to_kind(Kind::Float) / 255.0;
        let mean = Tensor::from_slice(&CHANNEL_MEAN).view([3, 1, 1]);
        let std = Tensor::from_slice(&CHANNEL_STD).view([3, 1, 1]);
        Ok((scaled - mean) / std)
    }

    /// Encode one caption into (input_tokens, expected_tokens, sample_mask).
    ///
    /// input: caption truncated/padded to seq_len with the EOS id.
    /// expected: input shifted left by one, EOS appended — next-token targets
    /// for teacher forcing.
    /// mask: 1.0 for the first min(len, seq_len) - 1 positions; the final real
    /// token has no next-token target inside the window and stays unweighted.
    pub fn encode_tokens(&self, caption: &[i64]) -> (Vec<i64>, Vec<i64>, Vec<f32>) {
        let len = caption.len().min(self.seq_len);

        let mut input = vec![self.eos_id; self.seq_len];
        input[..len].copy_from_slice(&caption[..len]);

        let mut expected = vec![self.eos_id; self.seq_len];
        expected[..self.seq_len - 1].copy_from_slice(&input[1..]);

        let mut mask = vec![0f32; self.seq_len];
        for slot in mask.iter_mut().take(len.saturating_sub(1)) {
            *slot = 1.0;
        }

        (input, expected, mask)
    }
}
