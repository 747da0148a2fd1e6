use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tch::Device;

use caption_core::ModelConfig;
use coco_data::{load_annotations, CocoSequence, SampleEncoder};
use inference::CocoMetricEvaluator;
use trainer::{DataConfig, Trainer, TrainerConfig};
use vocab::{Vocab, VocabBuilder};

fn main() -> Result<()> {
    env_logger::init();

    // Configs live next to the binary; missing files fall back to defaults.
    let data_config_path = "configs/data_config.yaml";
    let model_config_path = "configs/model_config.yaml";
    let training_config_path = "configs/training_config.yaml";

    let data_config: DataConfig = if Path::new(data_config_path).exists() {
        let content = fs::read_to_string(data_config_path)?;
        serde_yaml::from_str(&content)?
    } else {
        DataConfig::default()
    };

    let mut model_config: ModelConfig = if Path::new(model_config_path).exists() {
        let content = fs::read_to_string(model_config_path)?;
        serde_yaml::from_str(&content)?
    } else {
        ModelConfig::default()
    };

    let trainer_config: TrainerConfig = if Path::new(training_config_path).exists() {
        let content = fs::read_to_string(training_config_path)?;
        serde_yaml::from_str(&content)?
    } else {
        TrainerConfig::default()
    };

    // 1. Load or build the vocabulary
    let vocab = if Path::new(&data_config.vocab_path).exists() {
        println!("Loading existing vocabulary from {}", data_config.vocab_path);
        Vocab::load(&data_config.vocab_path)?
    } else {
        println!(
            "Building vocabulary from {} (min count {})",
            data_config.train_captions, data_config.min_word_count
        );
        let vocab = VocabBuilder::new(data_config.min_word_count)
            .build(&data_config.train_captions)
            .context("Failed to build vocabulary")?;
        vocab.save(&data_config.vocab_path)?;
        vocab
    };
    // Ensure vocab size matches the recently built/loaded vocabulary
    model_config.vocab_size = vocab.len() as i64;

    let device = Device::cuda_if_available();
    println!("Using device: {:?}", device);

    // 2. Build the train and validation datasets
    let encoder = SampleEncoder::new(
        model_config.img_width,
        model_config.img_height,
        model_config.seq_len as usize,
        vocab.end_id() as i64,
    )
    .preprocessed(data_config.preprocessed);

    let (train_records, train_files) = load_annotations(&data_config.train_captions, &vocab)
        .context("Failed to load training annotations")?;
    let mut train_data = CocoSequence::new(
        train_records,
        train_files,
        PathBuf::from(&data_config.train_image_dir),
        encoder.clone(),
        trainer_config.batch_size,
        vocab.len() as i64,
        device,
    );

    let (val_records, val_files) = load_annotations(&data_config.val_captions, &vocab)
        .context("Failed to load validation annotations")?;
    let val_data = CocoSequence::new(
        val_records,
        val_files,
        PathBuf::from(&data_config.val_image_dir),
        encoder,
        trainer_config.eval_batch_size,
        vocab.len() as i64,
        device,
    );

    // 3. Metric evaluator over the validation ground truth
    let evaluator = CocoMetricEvaluator::from_captions_file(Path::new(&data_config.val_captions))?;

    // 4. Train
    let metric = trainer_config.metric.clone();
    let mut trainer = Trainer::new(model_config, trainer_config, device)?;
    let report = trainer.train(&mut train_data, &val_data, &evaluator, &vocab)?;

    println!(
        "Training complete! Best {} = {:.4} after {} epoch(s)",
        metric, report.best_metric, report.epochs_run
    );
    println!("Final checkpoint: {:?}", report.finished_checkpoint);

    Ok(())
}
