use anyhow::{bail, Result};
use std::path::Path;
use tch::{nn, Device, Tensor};

use crate::config::ModelConfig;
use crate::model::{BatchInputs, CaptionModel};
use crate::net::{weighted_cross_entropy, CaptionNet};
use crate::safetensors_util;

/// Inference-mode captioner: prediction only, no optimizer.
///
/// Instantiated fresh from a weights snapshot whenever the training loop
/// needs generation, so the training-mode instance never changes mode.
pub struct InferenceModel {
    vs: nn::VarStore,
    net: CaptionNet,
}

impl InferenceModel {
    pub fn new(config: &ModelConfig, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let net = CaptionNet::new(&vs.root(), config);
        Self { vs, net }
    }

    /// Build from a weights snapshot on disk.
    pub fn from_weights(config: &ModelConfig, path: &Path, device: Device) -> Result<Self> {
        let mut model = Self::new(config, device);
        model.load_weights(path)?;
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.net.config
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }
}

impl CaptionModel for InferenceModel {
    fn predict_on_batch(&mut self, inputs: &BatchInputs) -> Result<Tensor> {
        let net = &mut self.net;
        Ok(tch::no_grad(|| {
            net.forward(&inputs.images, &inputs.tokens, false)
        }))
    }

    fn train_on_batch(
        &mut self,
        _inputs: &BatchInputs,
        _targets: &Tensor,
        _weights: &Tensor,
    ) -> Result<f64> {
        bail!("inference-mode model cannot train")
    }

    fn test_on_batch(
        &mut self,
        inputs: &BatchInputs,
        targets: &Tensor,
        weights: &Tensor,
    ) -> Result<f64> {
        let net = &mut self.net;
        let loss = tch::no_grad(|| {
            let logits = net.forward(&inputs.images, &inputs.tokens, false);
            weighted_cross_entropy(&logits, targets, weights)
        });
        Ok(loss.double_value(&[]))
    }

    fn reset_states(&mut self) {
        self.net.reset_states();
    }

    fn save_weights(&self, path: &Path) -> Result<()> {
        safetensors_util::save_safetensors(&self.vs, path)
    }

    fn load_weights(&mut self, path: &Path) -> Result<()> {
        safetensors_util::load_safetensors(&mut self.vs, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Kind;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            embed_dim: 8,
            hidden_dim: 12,
            vocab_size: 10,
            seq_len: 4,
            img_width: 16,
            img_height: 16,
            dropout: 0.0,
        }
    }

    #[test]
    fn weights_round_trip_through_snapshot() {
        let config = tiny_config();
        let device = Device::Cpu;
        let path = std::env::temp_dir().join(format!("captioner_snapshot_{}.safetensors", std::process::id()));

        let source = InferenceModel::new(&config, device);
        source.save_weights(&path).unwrap();

        let mut restored = InferenceModel::from_weights(&config, &path, device).unwrap();
        std::fs::remove_file(&path).ok();

        let inputs = BatchInputs {
            images: Tensor::zeros(&[1, 3, 16, 16], (Kind::Float, device)),
            tokens: Tensor::zeros(&[1, 4], (Kind::Int64, device)),
        };
        let logits = restored.predict_on_batch(&inputs).unwrap();
        assert_eq!(logits.size(), vec![1, 4, config.vocab_size]);
    }

    #[test]
    fn inference_model_refuses_training() {
        let config = tiny_config();
        let mut model = InferenceModel::new(&config, Device::Cpu);
        let inputs = BatchInputs {
            images: Tensor::zeros(&[1, 3, 16, 16], (Kind::Float, Device::Cpu)),
            tokens: Tensor::zeros(&[1, 4], (Kind::Int64, Device::Cpu)),
        };
        let targets = Tensor::zeros(&[1, 4, 10], (Kind::Float, Device::Cpu));
        let weights = Tensor::zeros(&[1, 4], (Kind::Float, Device::Cpu));

        assert!(model.train_on_batch(&inputs, &targets, &weights).is_err());
    }
}
