use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::Result;

/// Token that seeds autoregressive decoding. Always id 0.
pub const START: &str = "<start>";
/// End-of-sequence token, doubling as the padding value. Always id 1.
pub const END: &str = "<end>";
/// Fallback for words below the count threshold. Always id 2.
pub const UNK: &str = "<unk>";

fn word_regex() -> Regex {
    Regex::new(r"[a-z0-9']+").unwrap()
}

/// Word-level caption vocabulary.
#[derive(Clone, Serialize, Deserialize)]
pub struct Vocab {
    pub word_to_id: HashMap<String, u32>,
    pub id_to_word: HashMap<u32, String>,
    #[serde(skip)]
    #[serde(default = "word_regex")]
    regex: Regex,
}

// Custom Debug impl to skip regex
impl std::fmt::Debug for Vocab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vocab")
            .field("size", &self.word_to_id.len())
            .finish()
    }
}

impl Vocab {
    /// An empty vocabulary holding only the special tokens.
    pub fn new() -> Self {
        let mut vocab = Self {
            word_to_id: HashMap::new(),
            id_to_word: HashMap::new(),
            regex: word_regex(),
        };
        for token in [START, END, UNK] {
            let id = vocab.len() as u32;
            vocab.insert(token.to_string(), id);
        }
        vocab
    }

    pub fn insert(&mut self, word: String, id: u32) {
        self.word_to_id.insert(word.clone(), id);
        self.id_to_word.insert(id, word);
    }

    pub fn get_id(&self, word: &str) -> Option<u32> {
        self.word_to_id.get(word).copied()
    }

    pub fn get_word(&self, id: u32) -> Option<&String> {
        self.id_to_word.get(&id)
    }

    pub fn len(&self) -> usize {
        self.word_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word_to_id.is_empty()
    }

    pub fn start_id(&self) -> u32 {
        0
    }

    /// Also the padding id for fixed-length token buffers.
    pub fn end_id(&self) -> u32 {
        1
    }

    pub fn unk_id(&self) -> u32 {
        2
    }

    /// Lowercased alphanumeric word split shared by building and encoding.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        self.regex
            .find_iter(&lower)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Encode a raw caption as word ids, falling back to `<unk>`.
    pub fn encode(&self, caption: &str) -> Vec<u32> {
        self.tokenize(caption)
            .into_iter()
            .map(|w| self.get_id(&w).unwrap_or_else(|| self.unk_id()))
            .collect()
    }

    /// Decode ids back to a space-joined caption, skipping unknown ids.
    pub fn decode(&self, ids: &[u32]) -> String {
        let words: Vec<&str> = ids
            .iter()
            .filter_map(|id| self.get_word(*id).map(|w| w.as_str()))
            .collect();
        words.join(" ")
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &self.word_to_id)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let word_to_id: HashMap<String, u32> = serde_json::from_reader(reader)?;

        let mut id_to_word = HashMap::new();
        for (word, id) in &word_to_id {
            id_to_word.insert(*id, word.clone());
        }

        Ok(Self {
            word_to_id,
            id_to_word,
            regex: word_regex(),
        })
    }
}

impl Default for Vocab {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specials_have_fixed_ids() {
        let vocab = Vocab::new();
        assert_eq!(vocab.get_id(START), Some(0));
        assert_eq!(vocab.get_id(END), Some(1));
        assert_eq!(vocab.get_id(UNK), Some(2));
        assert_eq!(vocab.start_id(), 0);
        assert_eq!(vocab.end_id(), 1);
    }

    #[test]
    fn encode_falls_back_to_unk() {
        let mut vocab = Vocab::new();
        let id = vocab.len() as u32;
        vocab.insert("dog".to_string(), id);

        let ids = vocab.encode("A dog barks");
        assert_eq!(ids[1], id);
        assert_eq!(ids[0], vocab.unk_id());
        assert_eq!(ids[2], vocab.unk_id());
    }

    #[test]
    fn tokenize_lowercases_and_strips_punctuation() {
        let vocab = Vocab::new();
        let words = vocab.tokenize("A man, riding; a Horse!");
        assert_eq!(words, vec!["a", "man", "riding", "a", "horse"]);
    }

    #[test]
    fn decode_round_trip() {
        let mut vocab = Vocab::new();
        for word in ["a", "dog", "runs"] {
            let id = vocab.len() as u32;
            vocab.insert(word.to_string(), id);
        }
        let ids = vocab.encode("a dog runs");
        assert_eq!(vocab.decode(&ids), "a dog runs");
    }
}
