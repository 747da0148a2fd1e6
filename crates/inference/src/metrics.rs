use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use vocab::Vocab;

use crate::results::read_results;

/// Scores a predictions file, returning a metric-name → value map.
/// The training loop picks one named metric out of the map.
pub trait MetricEvaluator {
    fn evaluate(&self, results_path: &Path) -> Result<HashMap<String, f64>>;
}

#[derive(Deserialize)]
struct GroundTruthFile {
    annotations: Vec<GroundTruthEntry>,
}

#[derive(Deserialize)]
struct GroundTruthEntry {
    image_id: i64,
    caption: String,
}

/// COCO caption scorer: corpus-level BLEU-1..4 plus ROUGE-L, computed
/// against all reference captions per image id.
pub struct CocoMetricEvaluator {
    references: HashMap<i64, Vec<Vec<String>>>,
}

impl CocoMetricEvaluator {
    /// Parse a COCO captions file into per-image reference sets. Captions
    /// are normalized with the same word split the vocabulary uses.
    pub fn from_captions_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open ground truth captions {:?}", path))?;
        let parsed: GroundTruthFile = serde_json::from_reader(BufReader::new(file))?;

        let splitter = Vocab::new();
        let mut references: HashMap<i64, Vec<Vec<String>>> = HashMap::new();
        for entry in parsed.annotations {
            references
                .entry(entry.image_id)
                .or_default()
                .push(splitter.tokenize(&entry.caption));
        }

        Ok(Self { references })
    }
}

impl MetricEvaluator for CocoMetricEvaluator {
    fn evaluate(&self, results_path: &Path) -> Result<HashMap<String, f64>> {
        let results = read_results(results_path)?;
        let splitter = Vocab::new();

        let mut pairs: Vec<(Vec<String>, &Vec<Vec<String>>)> = Vec::new();
        for result in &results {
            match self.references.get(&result.image_id) {
                Some(refs) => pairs.push((splitter.tokenize(&result.caption), refs)),
                None => {
                    tracing::warn!(image_id = result.image_id, "no references for image, skipping");
                }
            }
        }

        let mut metrics = HashMap::new();
        let bleu = corpus_bleu(&pairs, 4);
        for (i, score) in bleu.iter().enumerate() {
            metrics.insert(format!("Bleu_{}", i + 1), *score);
        }

        let rouge = if pairs.is_empty() {
            0.0
        } else {
            pairs
                .iter()
                .map(|(hyp, refs)| {
                    refs.iter()
                        .map(|r| rouge_l(r, hyp))
                        .fold(0.0f64, f64::max)
                })
                .sum::<f64>()
                / pairs.len() as f64
        };
        metrics.insert("ROUGE_L".to_string(), rouge);

        Ok(metrics)
    }
}

/// Corpus-level BLEU-1..max_n (Papineni et al., 2002): clipped n-gram
/// counts are accumulated over the whole corpus before the geometric mean
/// and brevity penalty are applied.
fn corpus_bleu(pairs: &[(Vec<String>, &Vec<Vec<String>>)], max_n: usize) -> Vec<f64> {
    let mut clipped = vec![0usize; max_n];
    let mut totals = vec![0usize; max_n];
    let mut hyp_len = 0usize;
    let mut ref_len = 0usize;

    for (hyp, refs) in pairs {
        hyp_len += hyp.len();
        ref_len += closest_reference_length(refs, hyp.len());
        for n in 1..=max_n {
            let (c, t) = modified_precision(refs, hyp, n);
            clipped[n - 1] += c;
            totals[n - 1] += t;
        }
    }

    let brevity_penalty = if hyp_len == 0 || ref_len == 0 {
        0.0
    } else if hyp_len >= ref_len {
        1.0
    } else {
        (1.0 - ref_len as f64 / hyp_len as f64).exp()
    };

    let precisions: Vec<f64> = (0..max_n)
        .map(|n| {
            if totals[n] == 0 {
                0.0
            } else {
                clipped[n] as f64 / totals[n] as f64
            }
        })
        .collect();

    (1..=max_n)
        .map(|k| {
            if precisions[..k].iter().any(|&p| p == 0.0) {
                return 0.0;
            }
            let avg_log: f64 = precisions[..k].iter().map(|p| p.ln()).sum::<f64>() / k as f64;
            brevity_penalty * avg_log.exp()
        })
        .collect()
}

fn closest_reference_length(references: &[Vec<String>], hyp_len: usize) -> usize {
    references
        .iter()
        .map(Vec::len)
        .min_by_key(|&len| (len as isize - hyp_len as isize).unsigned_abs())
        .unwrap_or(0)
}

/// Modified n-gram precision: count clipped matches against all references.
fn modified_precision(
    references: &[Vec<String>],
    hypothesis: &[String],
    n: usize,
) -> (usize, usize) {
    let hyp_ngrams = extract_ngrams(hypothesis, n);
    let total: usize = hyp_ngrams.values().sum();

    let mut clipped = 0usize;
    for (ngram, &hyp_count) in &hyp_ngrams {
        let max_ref_count = references
            .iter()
            .map(|r| extract_ngrams(r, n).get(ngram).copied().unwrap_or(0))
            .max()
            .unwrap_or(0);
        clipped += hyp_count.min(max_ref_count);
    }

    (clipped, total)
}

fn extract_ngrams(tokens: &[String], n: usize) -> HashMap<Vec<&str>, usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for window in tokens.windows(n) {
            let key: Vec<&str> = window.iter().map(String::as_str).collect();
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    counts
}

/// ROUGE-L F1 via longest common subsequence.
fn rouge_l(reference: &[String], hypothesis: &[String]) -> f64 {
    if reference.is_empty() || hypothesis.is_empty() {
        return 0.0;
    }

    let lcs = lcs_length(reference, hypothesis);
    let precision = lcs as f64 / hypothesis.len() as f64;
    let recall = lcs as f64 / reference.len() as f64;

    if precision + recall == 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / (precision + recall)
}

fn lcs_length(a: &[String], b: &[String]) -> usize {
    let (n, m) = (a.len(), b.len());
    let mut dp = vec![vec![0usize; m + 1]; n + 1];

    for i in 1..=n {
        for j in 1..=m {
            if a[i - 1] == b[j - 1] {
                dp[i][j] = dp[i - 1][j - 1] + 1;
            } else {
                dp[i][j] = dp[i - 1][j].max(dp[i][j - 1]);
            }
        }
    }

    dp[n][m]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{write_results, CaptionResult};
    use std::io::Write;

    fn words(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    fn evaluator_for(gt: &[(i64, &str)]) -> CocoMetricEvaluator {
        let mut references: HashMap<i64, Vec<Vec<String>>> = HashMap::new();
        for (image_id, caption) in gt {
            references.entry(*image_id).or_default().push(words(caption));
        }
        CocoMetricEvaluator { references }
    }

    #[test]
    fn perfect_predictions_score_one() {
        let refs = vec![words("a dog runs in the park")];
        let pairs = vec![(words("a dog runs in the park"), &refs)];
        let bleu = corpus_bleu(&pairs, 4);
        for score in bleu {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn disjoint_predictions_score_zero() {
        let refs = vec![words("a dog runs")];
        let pairs = vec![(words("purple elephants fly"), &refs)];
        let bleu = corpus_bleu(&pairs, 4);
        assert_eq!(bleu, vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn brevity_penalty_punishes_short_hypotheses() {
        let refs = vec![words("a dog runs in the park")];
        let pairs = vec![(words("a dog"), &refs)];
        let bleu = corpus_bleu(&pairs, 1);
        assert!(bleu[0] < 1.0);
        assert!(bleu[0] > 0.0);
    }

    #[test]
    fn rouge_l_known_value() {
        let reference = words("a b c d");
        let hypothesis = words("a b d");
        // LCS = 3, precision 1.0, recall 0.75 -> F1 = 6/7.
        let score = rouge_l(&reference, &hypothesis);
        assert!((score - 6.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn evaluate_scores_a_results_file_end_to_end() {
        let dir = std::env::temp_dir().join(format!("caption_metrics_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let results_path = dir.join("results.json");

        write_results(
            &results_path,
            &[CaptionResult {
                image_id: 1,
                caption: "a dog runs".to_string(),
            }],
        )
        .unwrap();

        let evaluator = evaluator_for(&[(1, "a dog runs"), (1, "a hound sprints")]);
        let metrics = evaluator.evaluate(&results_path).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert!((metrics["Bleu_1"] - 1.0).abs() < 1e-9);
        assert!((metrics["ROUGE_L"] - 1.0).abs() < 1e-9);
        assert!(metrics.contains_key("Bleu_4"));
    }

    #[test]
    fn ground_truth_file_parses_coco_layout() {
        let dir = std::env::temp_dir().join(format!("caption_gt_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let gt_path = dir.join("captions.json");
        let json = r#"{
            "annotations": [
                {"id": 10, "image_id": 1, "caption": "A dog runs."},
                {"id": 11, "image_id": 1, "caption": "A hound, sprinting!"}
            ]
        }"#;
        let mut file = File::create(&gt_path).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let evaluator = CocoMetricEvaluator::from_captions_file(&gt_path).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(evaluator.references[&1].len(), 2);
        assert_eq!(evaluator.references[&1][0], words("a dog runs"));
    }
}
