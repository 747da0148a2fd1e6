use anyhow::Result;
use std::path::Path;
use tch::Tensor;

/// One model call's worth of batch data.
///
/// `images`: [batch, 3, height, width] float. `tokens`: [batch, steps] int64 —
/// the full input window during training, a single column during
/// autoregressive decoding.
pub struct BatchInputs {
    pub images: Tensor,
    pub tokens: Tensor,
}

/// The capability set the pipeline requires from a captioning model.
///
/// Training-mode and inference-mode implementations share this interface;
/// the training loop and the caption generator only ever talk to it.
/// Recurrent state is owned by the model and carries across calls until
/// `reset_states` — callers reset between batches, never between steps.
pub trait CaptionModel {
    /// Logits over the vocabulary, [batch, steps, vocab].
    fn predict_on_batch(&mut self, inputs: &BatchInputs) -> Result<Tensor>;

    /// One optimization step on weighted loss inputs; returns the scalar loss.
    fn train_on_batch(
        &mut self,
        inputs: &BatchInputs,
        targets: &Tensor,
        weights: &Tensor,
    ) -> Result<f64>;

    /// Loss only, no weight update.
    fn test_on_batch(
        &mut self,
        inputs: &BatchInputs,
        targets: &Tensor,
        weights: &Tensor,
    ) -> Result<f64>;

    fn reset_states(&mut self);

    fn save_weights(&self, path: &Path) -> Result<()>;

    fn load_weights(&mut self, path: &Path) -> Result<()>;
}
