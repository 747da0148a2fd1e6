pub mod train;

pub use train::{EarlyStopping, TrainReport, Trainer};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub eval_batch_size: usize,
    pub num_epochs: usize,
    /// Consecutive non-improving epochs tolerated before stopping.
    pub patience: usize,
    /// Metric gating checkpoints: an evaluator key, or "loss" for the
    /// (negated) validation loss.
    pub metric: String,
    pub logger_step: usize,
    /// Learning rate is divided by this factor every `lr_decay_every` epochs.
    pub lr_decay: f64,
    pub lr_decay_every: usize,
    pub clip: Option<f64>,
    pub shuffle: bool,
    /// Per-epoch training sample budget, whole-batch granularity. 0 = full pass.
    pub max_train_samples: i64,
    /// Caption-generation sample budget per evaluation. 0 = full pass.
    pub max_eval_samples: i64,
    pub checkpoint_dir: String,
    pub results_dir: String,
    pub model_name: String,
    pub suffix: String,
    pub pretrained: Option<String>,
    pub finetune_cnn: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 5e-4,
            batch_size: 80,
            eval_batch_size: 28,
            num_epochs: 100,
            patience: 5,
            metric: "Bleu_4".to_string(),
            logger_step: 10,
            lr_decay: 20.0,
            lr_decay_every: 50,
            clip: Some(0.1),
            shuffle: true,
            max_train_samples: 0,
            max_eval_samples: 0,
            checkpoint_dir: "./checkpoints".to_string(),
            results_dir: "./results".to_string(),
            model_name: "captioner".to_string(),
            suffix: String::new(),
            pretrained: None,
            finetune_cnn: false,
        }
    }
}

/// Where the annotation files, images and vocabulary live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub train_captions: String,
    pub train_image_dir: String,
    pub val_captions: String,
    pub val_image_dir: String,
    pub vocab_path: String,
    /// Images on disk are already resized to the model's input size.
    pub preprocessed: bool,
    /// Threshold used when the vocabulary has to be built from scratch.
    pub min_word_count: u32,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_captions: "data/annotations/captions_train2014.json".to_string(),
            train_image_dir: "data/images/train2014".to_string(),
            val_captions: "data/annotations/captions_val2014.json".to_string(),
            val_image_dir: "data/images/val2014".to_string(),
            vocab_path: "data/annotations/vocab.json".to_string(),
            preprocessed: true,
            min_word_count: 4,
        }
    }
}
