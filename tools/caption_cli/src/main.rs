use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tch::vision::image;
use tch::Device;

use coco_data::{load_annotations, CocoSequence, SampleEncoder};
use inference::{
    load_model, write_results, CaptionGenerator, CocoMetricEvaluator, DecodePolicy,
    MetricEvaluator,
};
use vocab::{Vocab, VocabBuilder};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the vocabulary and resize train/val images into a data root
    Preprocess {
        /// COCO captions file for the training split
        #[arg(long)]
        train_captions: PathBuf,

        /// Directory of raw training images
        #[arg(long)]
        train_image_dir: PathBuf,

        /// Directory of raw validation images
        #[arg(long)]
        val_image_dir: PathBuf,

        /// Output data root (annotations/ and images/ land here)
        #[arg(long)]
        output_root: PathBuf,

        /// Square size images are resized to
        #[arg(long, default_value_t = 256)]
        image_size: i64,

        /// Words rarer than this map to <unk>
        #[arg(long, default_value_t = 4)]
        min_word_count: u32,
    },
    /// Caption a single image
    Predict {
        /// Path to the image
        #[arg(short, long)]
        image: PathBuf,

        /// Checkpoint directory (config.json + .safetensors)
        #[arg(short, long)]
        model_dir: PathBuf,

        /// Path to vocab.json
        #[arg(short, long)]
        vocab: PathBuf,
    },
    /// Generate a predictions file over a captioned image set
    GenerateResults {
        /// Checkpoint directory (config.json + .safetensors)
        #[arg(short, long)]
        model_dir: PathBuf,

        /// Path to vocab.json
        #[arg(short, long)]
        vocab: PathBuf,

        /// COCO captions file naming the images to caption
        #[arg(short, long)]
        captions: PathBuf,

        /// Directory of (preprocessed) images
        #[arg(short, long)]
        image_dir: PathBuf,

        /// Output results JSON path
        #[arg(short, long)]
        output: PathBuf,

        /// Batch size for generation
        #[arg(long, default_value_t = 28)]
        eval_size: usize,

        /// Sample budget in whole batches; 0 consumes the full pass
        #[arg(long, default_value_t = 0)]
        max_samples: i64,

        /// Condition on ground-truth tokens instead of free-running decode
        #[arg(long)]
        ground_truth: bool,
    },
    /// Score a predictions file against ground-truth captions
    Evaluate {
        /// COCO captions file with the reference captions
        #[arg(short, long)]
        ground_truth: PathBuf,

        /// Predictions file produced by generate-results
        #[arg(short, long)]
        results: PathBuf,

        /// Print a single metric instead of the whole table
        #[arg(short, long)]
        metric: Option<String>,
    },
}

fn resize_dir(input: &Path, output: &Path, size: i64) -> Result<usize> {
    std::fs::create_dir_all(output)?;

    let mut count = 0;
    for entry in std::fs::read_dir(input)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| {
                matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png")
            });
        if !is_image {
            continue;
        }

        let resized = image::load_and_resize(&path, size, size)?;
        let file_name = path.file_name().expect("read_dir entries have file names");
        image::save(&resized, output.join(file_name))?;
        count += 1;
    }
    Ok(count)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let device = Device::cuda_if_available();

    match cli.command {
        Commands::Preprocess {
            train_captions,
            train_image_dir,
            val_image_dir,
            output_root,
            image_size,
            min_word_count,
        } => {
            let annotations_dir = output_root.join("annotations");
            std::fs::create_dir_all(&annotations_dir)?;

            println!("Building vocabulary from {:?}...", train_captions);
            let vocab = VocabBuilder::new(min_word_count)
                .build(&train_captions)
                .context("Failed to build vocabulary")?;
            let vocab_path = annotations_dir.join("vocab.json");
            vocab.save(&vocab_path).context("Failed to save vocab")?;
            println!("Saved {} words to {:?}", vocab.len(), vocab_path);

            let train_out = output_root.join("images").join("train2014");
            let count = resize_dir(&train_image_dir, &train_out, image_size)?;
            println!("Resized {} training images into {:?}", count, train_out);

            let val_out = output_root.join("images").join("val2014");
            let count = resize_dir(&val_image_dir, &val_out, image_size)?;
            println!("Resized {} validation images into {:?}", count, val_out);
        }
        Commands::Predict {
            image,
            model_dir,
            vocab,
        } => {
            let vocab = Vocab::load(&vocab).context("Failed to load vocab")?;
            let mut model = load_model(&model_dir, device)?;
            let config = model.config().clone();

            let caption = inference::predict::predict_single_image(
                &mut model,
                &vocab,
                &image,
                config.img_width,
                config.img_height,
                config.seq_len as usize,
                device,
            )?;
            println!("{}", caption);
        }
        Commands::GenerateResults {
            model_dir,
            vocab,
            captions,
            image_dir,
            output,
            eval_size,
            max_samples,
            ground_truth,
        } => {
            let vocab = Vocab::load(&vocab).context("Failed to load vocab")?;
            let mut model = load_model(&model_dir, device)?;
            let config = model.config().clone();

            let (records, image_files) =
                load_annotations(&captions, &vocab).context("Failed to load annotations")?;
            let encoder = SampleEncoder::new(
                config.img_width,
                config.img_height,
                config.seq_len as usize,
                vocab.end_id() as i64,
            )
            .preprocessed(true);
            let dataset = CocoSequence::new(
                records,
                image_files,
                image_dir,
                encoder,
                eval_size,
                vocab.len() as i64,
                device,
            );

            let policy = if ground_truth {
                DecodePolicy::GroundTruth
            } else {
                DecodePolicy::Autoregressive
            };
            let results =
                CaptionGenerator::new(&mut model, &vocab, policy).generate(&dataset, max_samples)?;
            write_results(&output, &results)?;
            println!("Wrote {} captions to {:?}", results.len(), output);
        }
        Commands::Evaluate {
            ground_truth,
            results,
            metric,
        } => {
            let evaluator = CocoMetricEvaluator::from_captions_file(&ground_truth)?;
            let metrics = evaluator.evaluate(&results)?;

            match metric {
                Some(name) => {
                    let value = metrics
                        .get(&name)
                        .with_context(|| format!("Unknown metric {:?}", name))?;
                    println!("{}: {:.4}", name, value);
                }
                None => {
                    let mut names: Vec<&String> = metrics.keys().collect();
                    names.sort();
                    for name in names {
                        println!("{}: {:.4}", name, metrics[name]);
                    }
                }
            }
        }
    }

    Ok(())
}
