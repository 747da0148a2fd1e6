use anyhow::{Context, Result};
use std::path::Path;
use tch::Device;

pub mod generator;
pub mod metrics;
pub mod predict;
pub mod results;

// Re-export common types
pub use generator::{CaptionGenerator, DecodePolicy};
pub use metrics::{CocoMetricEvaluator, MetricEvaluator};
pub use results::{read_results, write_results, CaptionResult};

/// Load an inference-mode model from a checkpoint directory.
///
/// Expects a `config.json` beside the weight files; picks the
/// lexicographically last `.safetensors` checkpoint (the training loop's
/// names sort by epoch).
pub fn load_model(dir: &Path, device: Device) -> Result<caption_core::InferenceModel> {
    let config_path = dir.join("config.json");

    let config_str = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read model config.json at {:?}", config_path))?;
    let config: caption_core::ModelConfig =
        serde_json::from_str(&config_str).context("Failed to parse model config.json")?;

    let mut checkpoints: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read checkpoint dir {:?}", dir))?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map_or(false, |ext| ext == "safetensors")
        })
        .collect();
    checkpoints.sort_by_key(|e| e.path());

    let checkpoint = checkpoints
        .last()
        .map(|e| e.path())
        .with_context(|| format!("No .safetensors checkpoint found in {:?}", dir))?;

    tracing::info!(checkpoint = %checkpoint.display(), "loading weights");
    caption_core::InferenceModel::from_weights(&config, &checkpoint, device)
        .context("Failed to load checkpoint weights")
}
