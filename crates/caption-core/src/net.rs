use tch::nn::RNN;
use tch::{nn, Kind, Tensor};

use crate::config::ModelConfig;

/// Convolutional image encoder.
///
/// Produces a `hidden_dim` feature vector used to seed the decoder state.
pub struct ConvEncoder {
    conv1: nn::Conv2D,
    conv2: nn::Conv2D,
    conv3: nn::Conv2D,
    conv4: nn::Conv2D,
    proj: nn::Linear,
    dropout: f64,
}

impl ConvEncoder {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let conv_cfg = nn::ConvConfig {
            stride: 2,
            padding: 1,
            ..Default::default()
        };
        let conv1 = nn::conv2d(vs / "conv1", 3, 32, 3, conv_cfg);
        let conv2 = nn::conv2d(vs / "conv2", 32, 64, 3, conv_cfg);
        let conv3 = nn::conv2d(vs / "conv3", 64, 128, 3, conv_cfg);
        let conv4 = nn::conv2d(vs / "conv4", 128, 256, 3, conv_cfg);
        let proj = nn::linear(vs / "proj", 256, config.hidden_dim, Default::default());

        Self {
            conv1,
            conv2,
            conv3,
            conv4,
            proj,
            dropout: config.dropout,
        }
    }

    /// images: [batch, 3, height, width] -> [batch, hidden_dim]
    pub fn forward(&self, images: &Tensor, train: bool) -> Tensor {
        let x = images.apply(&self.conv1).relu();
        let x = x.apply(&self.conv2).relu();
        let x = x.apply(&self.conv3).relu();
        let x = x.apply(&self.conv4).relu();
        let x = x.adaptive_avg_pool2d(&[1, 1]).flatten(1, -1);
        x.apply(&self.proj).relu().dropout(self.dropout, train)
    }
}

unsafe impl Send for ConvEncoder {}

/// CNN + LSTM captioning network.
///
/// The recurrent state is an explicit owned resource: the first forward after
/// a reset seeds it from the image feature, later forwards continue from the
/// stored state. Callers reset between batches, never between decode steps.
pub struct CaptionNet {
    encoder: ConvEncoder,
    embed: nn::Embedding,
    lstm: nn::LSTM,
    head: nn::Linear,
    state: Option<nn::LSTMState>,
    dropout: f64,
    pub config: ModelConfig,
}

impl CaptionNet {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let encoder = ConvEncoder::new(&(vs / "encoder"), config);
        let embed = nn::embedding(
            vs / "embed",
            config.vocab_size,
            config.embed_dim,
            Default::default(),
        );
        let lstm = nn::lstm(
            vs / "lstm",
            config.embed_dim,
            config.hidden_dim,
            Default::default(),
        );
        let head = nn::linear(
            vs / "head",
            config.hidden_dim,
            config.vocab_size,
            Default::default(),
        );

        Self {
            encoder,
            embed,
            lstm,
            head,
            state: None,
            dropout: config.dropout,
            config: config.clone(),
        }
    }

    /// images: [batch, 3, H, W], tokens: [batch, steps] -> [batch, steps, vocab]
    pub fn forward(&mut self, images: &Tensor, tokens: &Tensor, train: bool) -> Tensor {
        let state = match self.state.take() {
            Some(state) => state,
            None => {
                let feat = self.encoder.forward(images, train);
                let h0 = feat.unsqueeze(0);
                let c0 = Tensor::zeros_like(&h0);
                nn::LSTMState((h0, c0))
            }
        };

        let emb = tokens.apply(&self.embed).dropout(self.dropout, train);
        let (out, next_state) = self.lstm.seq_init(&emb, &state);
        self.state = Some(next_state);

        out.apply(&self.head)
    }

    pub fn reset_states(&mut self) {
        self.state = None;
    }
}

unsafe impl Send for CaptionNet {}

/// Categorical cross-entropy against one-hot targets, weighted per position.
///
/// logits/targets: [batch, steps, vocab], weights: [batch, steps].
/// Positions with zero weight contribute nothing; the loss is normalized by
/// the total weight so padded rows in short batches leave the value unbiased.
pub fn weighted_cross_entropy(logits: &Tensor, targets: &Tensor, weights: &Tensor) -> Tensor {
    let log_probs = logits.log_softmax(-1, Kind::Float);
    let per_pos = -(targets * log_probs).sum_dim_intlist(&[-1i64][..], false, Kind::Float);
    let weighted = per_pos * weights;
    let denom = weights.sum(Kind::Float).clamp_min(1.0);
    weighted.sum(Kind::Float) / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind, Tensor};

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
    fn uniform_logits_loss_is_log_vocab() {
        let vocab = 10i64;
        let logits = Tensor::zeros(&[2, 3, vocab], (Kind::Float, Device::Cpu));
        let ids = Tensor::zeros(&[2, 3], (Kind::Int64, Device::Cpu));
        let targets = ids.one_hot(vocab).to_kind(Kind::Float);
        let weights = Tensor::ones(&[2, 3], (Kind::Float, Device::Cpu));

        let loss = weighted_cross_entropy(&logits, &targets, &weights);
        let expected = (vocab as f64).ln();
        assert!((loss.double_value(&[]) - expected).abs() < 1e-5);
    }

    #[test]
    fn zero_weight_positions_do_not_contribute() {
        let vocab = 10i64;
        // Confident wrong predictions on masked positions only.
        let logits = Tensor::zeros(&[1, 2, vocab], (Kind::Float, Device::Cpu));
        let _ = logits.narrow(1, 1, 1).narrow(2, 5, 1).fill_(100.0);
        let ids = Tensor::zeros(&[1, 2], (Kind::Int64, Device::Cpu));
        let targets = ids.one_hot(vocab).to_kind(Kind::Float);
        let weights = Tensor::from_slice(&[1.0f32, 0.0]).view([1, 2]);

        let loss = weighted_cross_entropy(&logits, &targets, &weights);
        let expected = (vocab as f64).ln();
        assert!((loss.double_value(&[]) - expected).abs() < 1e-5);
    }

    #[test]
    fn forward_is_stateful_until_reset() {
        let config = tiny_config();
        let vs = tch::nn::VarStore::new(Device::Cpu);
        let mut net = CaptionNet::new(&vs.root(), &config);

        let images = Tensor::zeros(&[2, 3, 16, 16], (Kind::Float, Device::Cpu));
        let step = Tensor::zeros(&[2, 1], (Kind::Int64, Device::Cpu));

        let first = net.forward(&images, &step, false);
        assert_eq!(first.size(), vec![2, 1, config.vocab_size]);
        assert!(net.state.is_some());

        // Continuing from stored state keeps shapes stable.
        let second = net.forward(&images, &step, false);
        assert_eq!(second.size(), vec![2, 1, config.vocab_size]);

        net.reset_states();
        assert!(net.state.is_none());
    }
}
