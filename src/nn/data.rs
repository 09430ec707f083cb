use crate::utils::Array4F;

/// One nonzero feature of a sparse instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SparseEntry {
    pub findex: u32,
    pub fvalue: f32,
}

/// One mini-batch as produced by a data iterator. Dense input lives in
/// `data`; a sparse batch carries one (index, value) row per instance
/// instead. `inst_index` identifies instances across epochs for trainers
/// that track per-instance state; `num_batch_padd` counts trailing filler
/// instances in the last batch of an epoch, which must not be scored.
#[derive(Clone, Debug)]
pub struct DataBatch {
    pub data: Array4F,
    pub labels: Vec<f32>,
    pub inst_index: Option<Vec<u32>>,
    pub num_batch_padd: usize,
    pub sparse_rows: Option<Vec<Vec<SparseEntry>>>,
}

impl DataBatch {
    pub fn dense(data: Array4F, labels: Vec<f32>) -> Self {
        Self {
            data,
            labels,
            inst_index: None,
            num_batch_padd: 0,
            sparse_rows: None,
        }
    }

    pub fn sparse(rows: Vec<Vec<SparseEntry>>, labels: Vec<f32>) -> Self {
        Self {
            data: Array4F::zeros((0, 0, 0, 0)),
            labels,
            inst_index: None,
            num_batch_padd: 0,
            sparse_rows: Some(rows),
        }
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse_rows.is_some()
    }

    pub fn batch_size(&self) -> usize {
        match &self.sparse_rows {
            Some(rows) => rows.len(),
            None => self.data.shape()[0],
        }
    }
}

/// Pull iterator over batches. `before_first` rewinds; a full pass is
/// `before_first` followed by draining `next_batch`.
pub trait DataIter {
    fn before_first(&mut self);
    fn next_batch(&mut self) -> Option<&DataBatch>;
}

/// In-memory iterator over a fixed list of batches.
pub struct MemIter {
    batches: Vec<DataBatch>,
    cursor: usize,
}

impl MemIter {
    pub fn new(batches: Vec<DataBatch>) -> Self {
        Self { batches, cursor: 0 }
    }
}

impl DataIter for MemIter {
    fn before_first(&mut self) {
        self.cursor = 0;
    }

    fn next_batch(&mut self) -> Option<&DataBatch> {
        let batch = self.batches.get(self.cursor)?;
        self.cursor += 1;
        Some(batch)
    }
}
