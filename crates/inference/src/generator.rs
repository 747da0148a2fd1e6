use anyhow::Result;
use std::collections::HashSet;
use tch::{Kind, Tensor};

use caption_core::{BatchInputs, CaptionModel};
use coco_data::{CocoSequence, EncodedBatch};
use vocab::Vocab;

use crate::results::CaptionResult;

/// How predicted token ids are produced from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePolicy {
    /// Single forward pass over the dataset's true input tokens.
    GroundTruth,
    /// Free-running: each step feeds back the previous argmax token.
    Autoregressive,
}

/// Greedy argmax decoding, one token column per step, starting from the
/// start token. The model's recurrent state carries across steps; the
/// caller resets it between batches.
pub fn autoregressive_decode(
    model: &mut dyn CaptionModel,
    images: &Tensor,
    seq_len: usize,
    start_id: i64,
) -> Result<Tensor> {
    let batch = images.size()[0];
    let device = images.device();

    let mut prev = Tensor::full(&[batch, 1], start_id, (Kind::Int64, device));
    let mut steps: Vec<Tensor> = Vec::with_capacity(seq_len);

    for _ in 0..seq_len {
        let logits = model.predict_on_batch(&BatchInputs {
            images: images.shallow_clone(),
            tokens: prev.shallow_clone(),
        })?;
        let next = logits.argmax(-1, false);
        steps.push(next.shallow_clone());
        prev = next;
    }

    Ok(Tensor::cat(&steps, 1))
}

/// Drives a model over a streaming pass and collects one caption per
/// unique image id (first occurrence wins).
pub struct CaptionGenerator<'a> {
    model: &'a mut dyn CaptionModel,
    vocab: &'a Vocab,
    policy: DecodePolicy,
}

impl<'a> CaptionGenerator<'a> {
    pub fn new(model: &'a mut dyn CaptionModel, vocab: &'a Vocab, policy: DecodePolicy) -> Self {
        Self {
            model,
            vocab,
            policy,
        }
    }

    pub fn generate(
        &mut self,
        dataset: &CocoSequence,
        sample_budget: i64,
    ) -> Result<Vec<CaptionResult>> {
        let mut seen: HashSet<i64> = HashSet::new();
        let mut results = Vec::new();
        let mut num_batches = 0usize;

        for batch in dataset.streaming_pass(true, sample_budget) {
            let batch = batch?;
            let token_rows = self.decode_batch(&batch)?;
            let image_ids = batch
                .image_ids
                .as_ref()
                .expect("streaming pass was asked to emit image ids");

            for (row, &image_id) in image_ids.iter().enumerate() {
                if !seen.insert(image_id) {
                    continue;
                }
                results.push(CaptionResult {
                    image_id,
                    caption: self.caption_text(&token_rows[row]),
                });
            }
            num_batches += 1;
        }

        tracing::info!(
            captions = results.len(),
            batches = num_batches,
            "caption generation pass complete"
        );
        Ok(results)
    }

    fn decode_batch(&mut self, batch: &EncodedBatch) -> Result<Vec<Vec<i64>>> {
        // State must not leak across batches.
        self.model.reset_states();

        let ids = match self.policy {
            DecodePolicy::GroundTruth => {
                let logits = self.model.predict_on_batch(&BatchInputs {
                    images: batch.images.shallow_clone(),
                    tokens: batch.input_tokens.shallow_clone(),
                })?;
                logits.argmax(-1, false)
            }
            DecodePolicy::Autoregressive => autoregressive_decode(
                self.model,
                &batch.images,
                batch.input_tokens.size()[1] as usize,
                self.vocab.start_id() as i64,
            )?,
        };

        let rows = ids.size()[0];
        let mut out = Vec::with_capacity(rows as usize);
        for row in 0..rows {
            out.push(Vec::<i64>::try_from(&ids.get(row))?);
        }
        Ok(out)
    }

    /// Everything from the first end-of-sequence marker onward is dropped.
    fn caption_text(&self, ids: &[i64]) -> String {
        let end = self.vocab.end_id() as i64;
        let words: Vec<u32> = ids
            .iter()
            .take_while(|&&id| id != end)
            .map(|&id| id as u32)
            .collect();
        self.vocab.decode(&words)
    }
}
