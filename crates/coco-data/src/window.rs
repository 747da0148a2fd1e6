use std::ops::Range;

use crate::error::{DatasetError, Result};

/// Computes batch boundaries over an ordered record collection.
///
/// N records at batch size B make ceil(N/B) windows; window i covers
/// [i*B, min((i+1)*B, N)). A full pass visits every record exactly once.
#[derive(Debug, Clone, Copy)]
pub struct BatchWindower {
    total: usize,
    batch_size: usize,
}

impl BatchWindower {
    pub fn new(total: usize, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        Self { total, batch_size }
    }

    pub fn num_batches(&self) -> usize {
        (self.total + self.batch_size - 1) / self.batch_size
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Record-index range of window `index`; the last window may be short.
    pub fn window(&self, index: usize) -> Result<Range<usize>> {
        let count = self.num_batches();
        if index >= count {
            return Err(DatasetError::BatchIndexOutOfRange { index, count });
        }
        let start = index * self.batch_size;
        let end = ((index + 1) * self.batch_size).min(self.total);
        Ok(start..end)
    }
}
