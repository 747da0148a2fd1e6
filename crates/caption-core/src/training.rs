use anyhow::Result;
use std::path::Path;
use tch::nn::OptimizerConfig;
use tch::{nn, Device, Tensor};

use crate::config::ModelConfig;
use crate::model::{BatchInputs, CaptionModel};
use crate::net::{weighted_cross_entropy, CaptionNet};
use crate::safetensors_util;

/// Training-mode captioner: owns the variable store and the optimizer.
pub struct TrainingModel {
    vs: nn::VarStore,
    net: CaptionNet,
    opt: nn::Optimizer,
    clip: Option<f64>,
}

impl TrainingModel {
    pub fn new(
        config: &ModelConfig,
        learning_rate: f64,
        clip: Option<f64>,
        device: Device,
    ) -> Result<Self> {
        let vs = nn::VarStore::new(device);
        let net = CaptionNet::new(&vs.root(), config);
        let opt = nn::Adam::default().build(&vs, learning_rate)?;

        Ok(Self { vs, net, opt, clip })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.net.config
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    pub fn set_lr(&mut self, learning_rate: f64) {
        self.opt.set_lr(learning_rate);
    }
}

impl CaptionModel for TrainingModel {
    fn predict_on_batch(&mut self, inputs: &BatchInputs) -> Result<Tensor> {
        let net = &mut self.net;
        Ok(tch::no_grad(|| {
            net.forward(&inputs.images, &inputs.tokens, false)
        }))
    }

    fn train_on_batch(
        &mut self,
        inputs: &BatchInputs,
        targets: &Tensor,
        weights: &Tensor,
    ) -> Result<f64> {
        let logits = self.net.forward(&inputs.images, &inputs.tokens, true);
        let loss = weighted_cross_entropy(&logits, targets, weights);

        match self.clip {
            Some(clip) => self.opt.backward_step_clip(&loss, clip),
            None => self.opt.backward_step(&loss),
        }

        Ok(loss.double_value(&[]))
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
