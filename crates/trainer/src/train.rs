use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use tch::Device;

use caption_core::{BatchInputs, CaptionModel, InferenceModel, ModelConfig, TrainingModel};
use coco_data::CocoSequence;
use inference::{write_results, CaptionGenerator, DecodePolicy, MetricEvaluator};
use vocab::Vocab;

use crate::TrainerConfig;

/// Best-metric tracking with a patience counter.
///
/// The best value starts at negative infinity so the first epoch always
/// counts as an improvement; the wait counter resets exactly when the
/// monitored metric strictly improves.
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::NEG_INFINITY,
            wait: 0,
        }
    }

    /// Feed one epoch's metric; returns true on strict improvement.
    pub fn update(&mut self, metric: f64) -> bool {
        if metric > self.best {
            self.best = metric;
            self.wait = 0;
            true
        } else {
            self.wait += 1;
            false
        }
    }

    pub fn should_stop(&self) -> bool {
        self.wait > self.patience
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn wait(&self) -> usize {
        self.wait
    }
}

#[derive(Debug)]
pub struct TrainReport {
    pub epochs_run: usize,
    pub best_metric: f64,
    pub finished_checkpoint: PathBuf,
}

pub struct Trainer {
    config: TrainerConfig,
    model_config: ModelConfig,
    model: TrainingModel,
    device: Device,
}

impl Trainer {
    pub fn new(
        model_config: ModelConfig,
        trainer_config: TrainerConfig,
        device: Device,
    ) -> Result<Self> {
        // Configuration faults surface here, before any data is touched.
        if trainer_config.finetune_cnn && trainer_config.pretrained.is_none() {
            bail!("CNN fine-tuning requires pretrained language-model weights (set `pretrained`)");
        }

        let mut model = TrainingModel::new(
            &model_config,
            trainer_config.learning_rate,
            trainer_config.clip,
            device,
        )?;

        if let Some(path) = &trainer_config.pretrained {
            model
                .load_weights(Path::new(path))
                .with_context(|| format!("Failed to load pretrained weights from {}", path))?;
        }

        Ok(Self {
            config: trainer_config,
            model_config,
            model,
            device,
        })
    }

    /// Run the epoch loop until the epoch budget or early stopping ends it.
    ///
    /// Per epoch: shuffle the training order (validation order stays fixed
    /// for reproducible scoring), one training pass, one validation-loss
    /// pass, snapshot the weights, regenerate validation captions with an
    /// inference-mode copy, score them, and checkpoint on strict metric
    /// improvement. A final "finished" checkpoint is written regardless of
    /// whether the last epoch was the best.
    pub fn train(
        &mut self,
        train_data: &mut CocoSequence,
        val_data: &CocoSequence,
        evaluator: &dyn MetricEvaluator,
        vocab: &Vocab,
    ) -> Result<TrainReport> {
        let checkpoint_dir = PathBuf::from(&self.config.checkpoint_dir);
        if !checkpoint_dir.exists() {
            std::fs::create_dir_all(&checkpoint_dir)?;
        }

        let config_json = serde_json::to_string_pretty(&self.model_config)?;
        std::fs::write(checkpoint_dir.join("config.json"), config_json)?;

        let prefix = format!("{}{}", self.config.model_name, self.config.suffix);
        let snapshot_path = checkpoint_dir.join(format!("{}_snapshot.safetensors", prefix));
        let results_path =
            PathBuf::from(&self.config.results_dir).join("val_predictions.json");

        println!("Starting training with configuration: {:?}", self.config);

        let mut stopping = EarlyStopping::new(self.config.patience);
        let mut learning_rate = self.config.learning_rate;
        let mut last_epoch = 0;

        for epoch in 0..self.config.num_epochs {
            last_epoch = epoch;

            if self.config.shuffle {
                train_data.shuffle();
            }

            let train_loss = self.train_pass(train_data, epoch)?;
            let val_loss = self.validation_pass(val_data)?;

            // Generation wants its own batch/statefulness setup, so the
            // snapshot is reloaded into a separate inference-mode instance.
            self.model.save_weights(&snapshot_path)?;
            let mut infer_model =
                InferenceModel::from_weights(&self.model_config, &snapshot_path, self.device)?;

            let results =
                CaptionGenerator::new(&mut infer_model, vocab, DecodePolicy::Autoregressive)
                    .generate(val_data, self.config.max_eval_samples)?;
            write_results(&results_path, &results)?;

            let metric_value = if self.config.metric == "loss" {
                -val_loss
            } else {
                let metrics = evaluator.evaluate(&results_path)?;
                *metrics.get(&self.config.metric).ok_or_else(|| {
                    anyhow!("evaluator did not produce metric {:?}", self.config.metric)
                })?
            };

            println!(
                "Epoch {} | Train Loss: {:.4} | Val Loss: {:.4} | {}: {:.4}",
                epoch, train_loss, val_loss, self.config.metric, metric_value
            );

            if stopping.update(metric_value) {
                let name = format!(
                    "{}_weights_e{}_{}{:.2}.safetensors",
                    prefix, epoch, self.config.metric, metric_value
                );
                self.model.save_weights(&checkpoint_dir.join(&name))?;
                println!("Saved checkpoint {}", name);
            } else {
                println!(
                    "No improvement for {} epoch(s) (best {:.4})",
                    stopping.wait(),
                    stopping.best()
                );
            }

            if self.config.lr_decay_every > 0
                && self.config.lr_decay > 0.0
                && (epoch + 1) % self.config.lr_decay_every == 0
            {
                learning_rate /= self.config.lr_decay;
                self.model.set_lr(learning_rate);
                println!("Decayed learning rate to {:.6}", learning_rate);
            }

            if stopping.should_stop() {
                println!("Early stopping after epoch {}", epoch);
                break;
            }
        }

        let finished_checkpoint =
            checkpoint_dir.join(format!("{}_weights_e{}_lang_finished.safetensors", prefix, last_epoch));
        self.model.save_weights(&finished_checkpoint)?;

        Ok(TrainReport {
            epochs_run: last_epoch + 1,
            best_metric: stopping.best(),
            finished_checkpoint,
        })
    }

    fn train_pass(&mut self, train_data: &CocoSequence, epoch: usize) -> Result<f64> {
        let mut epoch_loss = 0.0;
        let mut batches = 0usize;

        for batch in train_data.streaming_pass(false, self.config.max_train_samples) {
            let batch = batch?;
            let inputs = BatchInputs {
                images: batch.images,
                tokens: batch.input_tokens,
            };
            let loss = self
                .model
                .train_on_batch(&inputs, &batch.targets, &batch.mask)?;
            // State carries only within a batch's forward pass.
            self.model.reset_states();

            epoch_loss += loss;
            batches += 1;
            if self.config.logger_step > 0 && batches % self.config.logger_step == 0 {
                println!("Epoch {} | Batch {} | Loss: {:.4}", epoch, batches, loss);
            }
        }

        Ok(epoch_loss / batches.max(1) as f64)
    }

    fn validation_pass(&mut self, val_data: &CocoSequence) -> Result<f64> {
        let mut total_loss = 0.0;
        let mut batches = 0usize;

        for batch in val_data.streaming_pass(false, 0) {
            let batch = batch?;
            let inputs = BatchInputs {
                images: batch.images,
                tokens: batch.input_tokens,
            };
            let loss = self
                .model
                .test_on_batch(&inputs, &batch.targets, &batch.mask)?;
            self.model.reset_states();

            total_loss += loss;
            batches += 1;
        }

        log::debug!("validation pass covered {} batches", batches);
        Ok(total_loss / batches.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coco_data::{AnnotationRecord, SampleEncoder};
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use tch::{Kind, Tensor};

    #[test]
    fn early_stopping_matches_the_reference_trace() {
        // Metric trace [0.1, 0.3, 0.2, 0.2, 0.2] with patience 2 stops
        // after the fifth epoch with the best at 0.3.
        let mut stopping = EarlyStopping::new(2);
        let trace = [0.1, 0.3, 0.2, 0.2, 0.2];
        let mut stopped_after = None;

        for (epoch, &value) in trace.iter().enumerate() {
            stopping.update(value);
            if stopping.should_stop() {
                stopped_after = Some(epoch + 1);
                break;
            }
        }

        assert_eq!(stopped_after, Some(5));
        assert_eq!(stopping.best(), 0.3);
        assert_eq!(stopping.wait(), 3);
    }

    #[test]
    fn improvement_resets_the_wait_counter() {
        let mut stopping = EarlyStopping::new(3);
        assert!(stopping.update(1.0));
        assert!(!stopping.update(0.5));
        assert!(!stopping.update(1.0)); // ties are not improvements
        assert_eq!(stopping.wait(), 2);
        assert!(stopping.update(1.5));
        assert_eq!(stopping.wait(), 0);
    }

    #[test]
    fn finetune_without_pretrained_weights_is_rejected_eagerly() {
        let trainer_config = TrainerConfig {
            finetune_cnn: true,
            pretrained: None,
            ..Default::default()
        };
        let err = Trainer::new(ModelConfig::default(), trainer_config, Device::Cpu)
            .err()
            .expect("config fault must be fatal");
        assert!(err.to_string().contains("fine-tuning"));
    }

    /// Evaluator stub replaying a scripted metric sequence.
    struct ScriptedEvaluator {
        values: RefCell<VecDeque<f64>>,
    }

    impl MetricEvaluator for ScriptedEvaluator {
        fn evaluate(&self, _results_path: &Path) -> Result<HashMap<String, f64>> {
            let value = self
                .values
                .borrow_mut()
                .pop_front()
                .expect("scripted evaluator ran dry");
            Ok(HashMap::from([("Bleu_4".to_string(), value)]))
        }
    }

    fn tiny_model_config() -> ModelConfig {
        ModelConfig {
            embed_dim: 8,
            hidden_dim: 12,
            vocab_size: 8,
            seq_len: 4,
            img_width: 16,
            img_height: 16,
            dropout: 0.0,
        }
    }

    fn tiny_dataset(dir: &Path, num_records: usize, batch_size: usize) -> CocoSequence {
        std::fs::create_dir_all(dir).unwrap();
        let file_name = "img.png".to_string();
        let zeros = Tensor::zeros(&[3, 16, 16], (Kind::Uint8, Device::Cpu));
        tch::vision::image::save(&zeros, dir.join(&file_name)).unwrap();

        let mut records = Vec::new();
        let mut image_files = HashMap::new();
        for i in 0..num_records {
            let image_id = i as i64;
            records.push(AnnotationRecord {
                id: i as i64,
                image_id,
                caption: vec![0, 3, 4, 1],
            });
            image_files.insert(image_id, file_name.clone());
        }
        let encoder = SampleEncoder::new(16, 16, 4, 1).preprocessed(true);
        CocoSequence::new(
            records,
            image_files,
            dir.to_path_buf(),
            encoder,
            batch_size,
            8,
            Device::Cpu,
        )
    }

    #[test]
    fn scripted_run_stops_early_and_keeps_the_best_checkpoint() {
        let root = std::env::temp_dir().join(format!("trainer_run_{}", std::process::id()));
        std::fs::remove_dir_all(&root).ok();
        let data_dir = root.join("images");
        let checkpoint_dir = root.join("checkpoints");

        let mut train_data = tiny_dataset(&data_dir, 3, 2);
        let val_data = tiny_dataset(&data_dir, 2, 2);

        let mut vocab = Vocab::new();
        for word in ["a", "dog", "runs", "fast", "slow"] {
            let id = vocab.len() as u32;
            vocab.insert(word.to_string(), id);
        }

        let trainer_config = TrainerConfig {
            num_epochs: 10,
            patience: 2,
            batch_size: 2,
            eval_batch_size: 2,
            logger_step: 0,
            lr_decay_every: 0,
            checkpoint_dir: checkpoint_dir.to_string_lossy().into_owned(),
            results_dir: root.join("results").to_string_lossy().into_owned(),
            model_name: "tiny".to_string(),
            ..Default::default()
        };

        let evaluator = ScriptedEvaluator {
            values: RefCell::new(VecDeque::from([0.1, 0.3, 0.2, 0.2, 0.2])),
        };

        let mut trainer =
            Trainer::new(tiny_model_config(), trainer_config, Device::Cpu).unwrap();
        let report = trainer
            .train(&mut train_data, &val_data, &evaluator, &vocab)
            .unwrap();

        assert_eq!(report.epochs_run, 5);
        assert!((report.best_metric - 0.3).abs() < 1e-9);

        let names: Vec<String> = std::fs::read_dir(&checkpoint_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();

        // Best checkpoint from epoch 1, plus the unconditional final one.
        assert!(names.iter().any(|n| n == "tiny_weights_e1_Bleu_40.30.safetensors"));
        assert!(names.iter().any(|n| n == "tiny_weights_e4_lang_finished.safetensors"));
        // The epoch-0 improvement checkpoint is never garbage-collected.
        assert!(names.iter().any(|n| n == "tiny_weights_e0_Bleu_40.10.safetensors"));

        std::fs::remove_dir_all(&root).ok();
    }
}
