use rand::seq::SliceRandom;
use rand::thread_rng;
use std::collections::HashMap;
use std::path::PathBuf;
use tch::{Device, Kind, Tensor};

use crate::annotations::AnnotationRecord;
use crate::encoder::SampleEncoder;
use crate::error::{DatasetError, Result};
use crate::window::BatchWindower;

/// One encoded batch, always at full batch-size shape.
///
/// `targets` is the one-hot expansion of the expected tokens. `image_ids`
/// lists only the real records in the window (shorter than batch_size on a
/// final short batch) and is present only when a streaming pass asked for it.
pub struct EncodedBatch {
    pub images: Tensor,
    pub input_tokens: Tensor,
    pub targets: Tensor,
    pub mask: Tensor,
    pub image_ids: Option<Vec<i64>>,
}

/// Shuffle-able, epoch-iterable view over COCO annotation records.
///
/// Batch buffers are allocated at full batch size every time: token buffers
/// start out EOS-filled, masks zero, images zero, and only the window's real
/// records overwrite their rows. The final short batch therefore feeds the
/// model synthetic all-pad rows that carry no loss weight — constant batch
/// shape is part of the model contract, so the rows are padded, not dropped.
pub struct CocoSequence {
    records: Vec<AnnotationRecord>,
    order: Vec<usize>,
    image_files: HashMap<i64, String>,
    image_dir: PathBuf,
    encoder: SampleEncoder,
    windower: BatchWindower,
    vocab_size: i64,
    device: Device,
}

impl CocoSequence {
    pub fn new(
        records: Vec<AnnotationRecord>,
        image_files: HashMap<i64, String>,
        image_dir: PathBuf,
        encoder: SampleEncoder,
        batch_size: usize,
        vocab_size: i64,
        device: Device,
    ) -> Self {
        let order: Vec<usize> = (0..records.len()).collect();
        let windower = BatchWindower::new(records.len(), batch_size);
        Self {
            records,
            order,
            image_files,
            image_dir,
            encoder,
            windower,
            vocab_size,
            device,
        }
    }

    /// Number of batches in one full pass.
    pub fn len(&self) -> usize {
        self.windower.num_batches()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn num_records(&self) -> usize {
        self.records.len()
    }

    pub fn batch_size(&self) -> usize {
        self.windower.batch_size()
    }

    pub fn seq_len(&self) -> usize {
        self.encoder.seq_len
    }

    /// Re-permute the record ordering. Called explicitly at epoch
    /// boundaries; never while a streaming pass is in flight.
    pub fn shuffle(&mut self) {
        self.order.shuffle(&mut thread_rng());
    }

    pub fn batch(&self, index: usize) -> Result<EncodedBatch> {
        self.encode_window(index, false)
    }

    /// Fresh lazy cursor over the current ordering.
    pub fn streaming_pass(&self, emit_image_ids: bool, sample_budget: i64) -> StreamingPass<'_> {
        StreamingPass {
            dataset: self,
            next_index: 0,
            emitted: 0,
            emit_image_ids,
            sample_budget,
        }
    }

    fn encode_window(&self, index: usize, emit_image_ids: bool) -> Result<EncodedBatch> {
        let window = self.windower.window(index)?;
        let batch_size = self.windower.batch_size() as i64;
        let seq_len = self.encoder.seq_len;
        let (height, width) = (self.encoder.img_height, self.encoder.img_width);

        let images = Tensor::zeros(
            &[batch_size, 3, height, width],
            (Kind::Float, self.device),
        );
        let mut inputs = vec![self.encoder.eos_id; batch_size as usize * seq_len];
        let mut expected = vec![self.encoder.eos_id; batch_size as usize * seq_len];
        let mut mask = vec![0f32; batch_size as usize * seq_len];
        let mut image_ids = Vec::with_capacity(window.len());

        for (row, position) in window.enumerate() {
            let record = &self.records[self.order[position]];
            let file_name = self
                .image_files
                .get(&record.image_id)
                .ok_or(DatasetError::MissingImage(record.image_id))?;
            let image = self.encoder.load_image(&self.image_dir.join(file_name))?;
            images.narrow(0, row as i64, 1).copy_(&image.unsqueeze(0));

            let (row_input, row_expected, row_mask) = self.encoder.encode_tokens(&record.caption);
            let span = row * seq_len..(row + 1) * seq_len;
            inputs[span.clone()].copy_from_slice(&row_input);
            expected[span.clone()].copy_from_slice(&row_expected);
            mask[span].copy_from_slice(&row_mask);

            image_ids.push(record.image_id);
        }

        let input_tokens = Tensor::from_slice(&inputs)
            .view([batch_size, seq_len as i64])
            .to(self.device);
        let targets = Tensor::from_slice(&expected)
            .view([batch_size, seq_len as i64])
            .to(self.device)
            .one_hot(self.vocab_size)
            .to_kind(Kind::Float);
        let mask = Tensor::from_slice(&mask)
            .view([batch_size, seq_len as i64])
            .to(self.device);

        Ok(EncodedBatch {
            images,
            input_tokens,
            targets,
            mask,
            image_ids: emit_image_ids.then_some(image_ids),
        })
    }
}

/// Lazy, finite, restartable batch cursor (one per `streaming_pass` call).
///
/// The sample budget is measured in whole emitted batches times batch size,
/// checked before each yield, so the cutoff overshoots by at most one batch.
/// A non-positive budget means the full pass.
pub struct StreamingPass<'a> {
    dataset: &'a CocoSequence,
    next_index: usize,
    emitted: i64,
    emit_image_ids: bool,
    sample_budget: i64,
}

impl<'a> Iterator for StreamingPass<'a> {
    type Item = Result<EncodedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.dataset.len() {
            return None;
        }
        if self.sample_budget > 0 && self.emitted >= self.sample_budget {
            return None;
        }

        let item = self
            .dataset
            .encode_window(self.next_index, self.emit_image_ids);
        self.next_index += 1;
        self.emitted += self.dataset.batch_size() as i64;
        Some(item)
    }
}
