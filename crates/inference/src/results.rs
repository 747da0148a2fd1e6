use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// One predicted caption, keyed by COCO image id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionResult {
    pub image_id: i64,
    pub caption: String,
}

/// Write a predictions file: a JSON array of {image_id, caption} records.
/// Parent directories are created; an existing file is overwritten.
pub fn write_results(path: &Path, results: &[CaptionResult]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create results dir {:?}", parent))?;
        }
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create results file {:?}", path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), results)?;
    Ok(())
}

pub fn read_results(path: &Path) -> Result<Vec<CaptionResult>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open results file {:?}", path))?;
    let results = serde_json::from_reader(BufReader::new(file))?;
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_creates_missing_directories() {
        let dir = std::env::temp_dir().join(format!("caption_results_{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        let path = dir.join("nested").join("results.json");

        let results = vec![
            CaptionResult {
                image_id: 42,
                caption: "a dog runs".to_string(),
            },
            CaptionResult {
                image_id: 7,
                caption: String::new(),
            },
        ];
        write_results(&path, &results).unwrap();

        let restored = read_results(&path).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].image_id, 42);
        assert_eq!(restored[0].caption, "a dog runs");
    }

    #[test]
    fn existing_file_is_overwritten() {
        let dir = std::env::temp_dir().join(format!("caption_results_ow_{}", std::process::id()));
        let path = dir.join("results.json");

        let first = vec![CaptionResult {
            image_id: 1,
            caption: "one".to_string(),
        }];
        let second = vec![CaptionResult {
            image_id: 2,
            caption: "two".to_string(),
        }];
        write_results(&path, &first).unwrap();
        write_results(&path, &second).unwrap();

        let restored = read_results(&path).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].image_id, 2);
    }
}
