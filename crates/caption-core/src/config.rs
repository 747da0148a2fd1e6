use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Dimension of the word embeddings fed to the decoder.
    pub embed_dim: i64,
    /// Hidden size of the recurrent decoder (and of the image feature).
    pub hidden_dim: i64,
    /// Size of the caption vocabulary.
    pub vocab_size: i64,
    /// Fixed caption window length (tokens per sample).
    pub seq_len: i64,
    /// Width the encoder expects input images at.
    pub img_width: i64,
    /// Height the encoder expects input images at.
    pub img_height: i64,
    /// Dropout probability (embeddings and image feature).
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embed_dim: 256,
            hidden_dim: 512,
            vocab_size: 10000,
            seq_len: 20,
            img_width: 224,
            img_height: 224,
            dropout: 0.3,
        }
    }
}
