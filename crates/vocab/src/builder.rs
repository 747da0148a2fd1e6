use rayon::prelude::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::Result;
use crate::vocab::Vocab;

#[derive(Deserialize)]
struct CaptionFile {
    annotations: Vec<CaptionEntry>,
}

#[derive(Deserialize)]
struct CaptionEntry {
    caption: String,
}

/// Builds a word vocabulary from a COCO captions file.
///
/// Words occurring fewer than `min_count` times map to `<unk>` at encode
/// time rather than receiving their own id.
pub struct VocabBuilder {
    min_count: u32,
}

impl VocabBuilder {
    pub fn new(min_count: u32) -> Self {
        Self { min_count }
    }

    pub fn build<P: AsRef<Path>>(&self, captions_path: P) -> Result<Vocab> {
        let file = File::open(captions_path)?;
        let reader = BufReader::new(file);
        let captions: CaptionFile = serde_json::from_reader(reader)?;

        let mut vocab = Vocab::new();

        let counts: HashMap<String, u32> = captions
            .annotations
            .par_iter()
            .fold(HashMap::new, |mut acc, entry| {
                for word in vocab.tokenize(&entry.caption) {
                    *acc.entry(word).or_insert(0) += 1;
                }
                acc
            })
            .reduce(HashMap::new, |mut left, right| {
                for (word, count) in right {
                    *left.entry(word).or_insert(0) += count;
                }
                left
            });

        // Frequency order, ties alphabetical, so rebuilt vocabularies match.
        let mut words: Vec<(String, u32)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= self.min_count)
            .collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        for (word, _) in words {
            let id = vocab.len() as u32;
            vocab.insert(word, id);
        }

        Ok(vocab)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_captions(captions: &[&str]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "vocab_builder_{}_{}.json",
            std::process::id(),
            captions.len()
        ));
        let annotations: Vec<String> = captions
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    r#"{{"id": {}, "image_id": {}, "caption": "{}"}}"#,
                    i, i, c
                )
            })
            .collect();
        let json = format!(r#"{{"annotations": [{}]}}"#, annotations.join(","));
        let mut file = File::create(&path).unwrap();
        file.write_all(json.as_bytes()).unwrap();
        path
    }

    #[test]
    fn threshold_filters_rare_words() {
        let path = write_captions(&["a dog runs", "a dog sleeps", "a cat"]);
        let vocab = VocabBuilder::new(2).build(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(vocab.get_id("a").is_some());
        assert!(vocab.get_id("dog").is_some());
        assert!(vocab.get_id("cat").is_none());
        assert!(vocab.get_id("runs").is_none());
    }

    #[test]
    fn specials_survive_building() {
        let path = write_captions(&["a dog"]);
        let vocab = VocabBuilder::new(1).build(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(vocab.start_id(), 0);
        assert_eq!(vocab.end_id(), 1);
        assert!(vocab.len() >= 5);
    }
}
