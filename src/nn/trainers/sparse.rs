use std::marker::PhantomData;

use anyhow::anyhow;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rayon::prelude::*;

use crate::integration::byte_utils::{read_f32, read_u32, write_f32, write_u32};
use crate::integration::serialization::{read_array, write_array};
use crate::nn::data::{DataBatch, SparseEntry};
use crate::nn::meta::parse_shape3;
use crate::nn::trainers::{BasicTrainer, TrainerOps};
use crate::utils::{Array2F, GenericResult};

/// Sparse-side parameters, persisted with the model.
struct SparseNetParam {
    init_sigma: f32,
    num_hidden: usize,
    /// Raw sparse input shape (z, y, x); must be a pure vector, x being the
    /// feature cardinality.
    shape_in: [usize; 3],
    nthread: usize,
}

impl Default for SparseNetParam {
    fn default() -> Self {
        Self {
            init_sigma: 0.005,
            num_hidden: 100,
            shape_in: [1, 1, 0],
            nthread: 0,
        }
    }
}

impl SparseNetParam {
    fn save(&self, out: &mut Vec<u8>) {
        write_f32(out, self.init_sigma);
        write_u32(out, self.num_hidden as u32);
        for dim in self.shape_in {
            write_u32(out, dim as u32);
        }
        write_u32(out, self.nthread as u32);
    }

    fn load(src: &mut &[u8]) -> GenericResult<Self> {
        let init_sigma = read_f32(src)?;
        let num_hidden = read_u32(src)? as usize;
        let mut shape_in = [0usize; 3];
        for dim in shape_in.iter_mut() {
            *dim = read_u32(src)? as usize;
        }
        Ok(Self {
            init_sigma,
            num_hidden,
            shape_in,
            nthread: read_u32(src)? as usize,
        })
    }
}

/// Plain SGD schedule for the embedding table, advanced once per batch.
struct SparseSgdParam {
    base_lr: f32,
    wd: f32,
    lr_decay: f32,
    learning_rate: f32,
}

impl Default for SparseSgdParam {
    fn default() -> Self {
        Self {
            base_lr: 0.01,
            wd: 0.0,
            lr_decay: 0.0,
            learning_rate: 0.01,
        }
    }
}

impl SparseSgdParam {
    fn set_param(&mut self, name: &str, val: &str) -> GenericResult<()> {
        match name {
            "eta" | "base_lr" => {
                self.base_lr = val
                    .parse()
                    .map_err(|_| anyhow!("{} expects a number, got: {}", name, val))?;
                self.learning_rate = self.base_lr;
            }
            "wd" => {
                self.wd = val
                    .parse()
                    .map_err(|_| anyhow!("wd expects a number, got: {}", val))?;
            }
            "lr:decay" => {
                self.lr_decay = val
                    .parse()
                    .map_err(|_| anyhow!("lr:decay expects a number, got: {}", val))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn schedule_epoch(&mut self, epoch: i64) {
        self.learning_rate = self.base_lr / (1.0 + self.lr_decay * epoch as f32);
    }
}

/// Unsynchronized row access to the embedding table for the parallel update.
/// Workers own disjoint chunks of batch instances, not of rows: two
/// instances sharing a feature index touch the same row concurrently and the
/// last writer wins. That lost-update behavior is part of the update's
/// contract (see DESIGN.md); callers wanting exact results keep feature
/// indices disjoint across instances.
struct SharedRows<'a> {
    ptr: *mut f32,
    rows: usize,
    cols: usize,
    _marker: PhantomData<&'a mut f32>,
}

unsafe impl Sync for SharedRows<'_> {}

impl<'a> SharedRows<'a> {
    fn new(table: &'a mut Array2F) -> Self {
        debug_assert!(table.is_standard_layout());
        Self {
            rows: table.nrows(),
            cols: table.ncols(),
            ptr: table.as_mut_ptr(),
            _marker: PhantomData,
        }
    }

    /// Safety: `row` must be in range; concurrent calls may alias.
    #[allow(clippy::mut_from_ref)]
    unsafe fn row_mut(&self, row: usize) -> &mut [f32] {
        debug_assert!(row < self.rows);
        std::slice::from_raw_parts_mut(self.ptr.add(row * self.cols), self.cols)
    }
}

/// Trains a linear embedding over high-cardinality sparse input without ever
/// materializing a dense input vector. The embedding table bypasses the
/// layer/updater machinery: lookups and updates are data-parallel over batch
/// instances on a trainer-owned thread pool.
pub struct SparseTrainer {
    base: BasicTrainer,
    sparam: SparseNetParam,
    tparam: SparseSgdParam,
    /// Per-batch staging of the summed embeddings / input-node gradient.
    node_hidden: Array2F,
    /// Embedding table, feature-index → hidden vector.
    wsp: Array2F,
    pool: Option<rayon::ThreadPool>,
}

impl SparseTrainer {
    pub fn new() -> Self {
        Self {
            base: BasicTrainer::new(),
            sparam: SparseNetParam::default(),
            tparam: SparseSgdParam::default(),
            node_hidden: Array2F::zeros((0, 0)),
            wsp: Array2F::zeros((0, 0)),
            pool: None,
        }
    }

    fn check_feature_range(&self, rows: &[Vec<SparseEntry>]) -> GenericResult<()> {
        let limit = self.wsp.nrows() as u32;
        for row in rows {
            for entry in row {
                if entry.findex >= limit {
                    return Err(anyhow!(
                        "sparse feature index {} exceeds table size {}",
                        entry.findex,
                        limit
                    ));
                }
            }
        }
        Ok(())
    }

    /// Sums each instance's selected embedding rows into its hidden vector
    /// and stages the result as the dense network's input.
    fn sparse_forward(&mut self, batch: &DataBatch) -> GenericResult<()> {
        let rows = batch
            .sparse_rows
            .as_ref()
            .ok_or_else(|| anyhow!("sparse trainer only accepts sparse input"))?;
        self.check_feature_range(rows)?;

        let input = self.base.net.input();
        if !input.is_mat() {
            return Err(anyhow!("sparse input node must be a matrix"));
        }
        let (nbatch, nhidden) = (input.batch_size(), input.features());
        if rows.len() != nbatch {
            return Err(anyhow!(
                "sparse batch has {} instances, network expects {}",
                rows.len(),
                nbatch
            ));
        }

        let mut node_hidden = Array2F::zeros((nbatch, nhidden));
        let wsp = &self.wsp;
        {
            let hidden = node_hidden.as_slice_mut().unwrap();
            let pool = &self.pool;
            let mut work = || {
                hidden
                    .par_chunks_mut(nhidden)
                    .zip(rows.par_iter())
                    .for_each(|(node, line)| {
                        for entry in line {
                            let weights = wsp.row(entry.findex as usize);
                            for (acc, w) in node.iter_mut().zip(weights) {
                                *acc += entry.fvalue * w;
                            }
                        }
                    });
            };
            match pool {
                Some(pool) => pool.install(work),
                None => work(),
            }
        }

        self.base.net.input().pin().mat_mut().assign(&node_hidden);
        self.node_hidden = node_hidden;
        Ok(())
    }

    /// Applies the embedding-table SGD step from the input node's gradient,
    /// data-parallel over instances.
    fn sparse_update(&mut self, batch: &DataBatch) -> GenericResult<()> {
        let rows = batch
            .sparse_rows
            .as_ref()
            .ok_or_else(|| anyhow!("sparse trainer only accepts sparse input"))?;
        self.check_feature_range(rows)?;

        let grad = self.base.net.input().pin().mat().to_owned();
        if grad.nrows() != rows.len() {
            return Err(anyhow!(
                "sparse batch has {} instances, gradient has {}",
                rows.len(),
                grad.nrows()
            ));
        }
        self.node_hidden = grad;

        self.tparam
            .schedule_epoch(self.base.net.meta.param.num_epoch_passed);
        let lr = self.tparam.learning_rate;
        let wd = self.tparam.wd;
        let nhidden = self.node_hidden.ncols();

        let shared = SharedRows::new(&mut self.wsp);
        let shared = &shared;
        let hidden = self.node_hidden.as_slice().unwrap();
        let work = || {
            hidden
                .par_chunks(nhidden)
                .zip(rows.par_iter())
                .for_each(|(grad_row, line)| {
                    for entry in line {
                        let weights = unsafe { shared.row_mut(entry.findex as usize) };
                        for (w, g) in weights.iter_mut().zip(grad_row) {
                            *w += entry.fvalue * (-lr) * g;
                        }
                        for w in weights.iter_mut() {
                            *w *= 1.0 - lr * wd;
                        }
                    }
                });
        };
        match &self.pool {
            Some(pool) => pool.install(work),
            None => work(),
        }
        Ok(())
    }
}

impl Default for SparseTrainer {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainerOps for SparseTrainer {
    fn base(&self) -> &BasicTrainer {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BasicTrainer {
        &mut self.base
    }

    fn set_param(&mut self, name: &str, val: &str) -> GenericResult<()> {
        if name == "sparse:nhidden" {
            self.sparam.num_hidden = val
                .parse()
                .map_err(|_| anyhow!("sparse:nhidden expects an integer, got: {}", val))?;
            // the dense net's input is the hidden layer, not the raw vector
            let shape = format!("1,1,{}", self.sparam.num_hidden);
            return self.base.set_param("input_shape", &shape);
        }
        if name == "input_shape" {
            let shape = parse_shape3(val)?;
            if shape[0] != 1 || shape[1] != 1 {
                return Err(anyhow!("sparse net only accepts a vector input, got: {}", val));
            }
            self.sparam.shape_in = shape;
            // captured by the sparse side only; the dense net keeps the
            // hidden-layer shape derived from sparse:nhidden
            return Ok(());
        }
        if name == "sparse:init_sigma" {
            self.sparam.init_sigma = val
                .parse()
                .map_err(|_| anyhow!("sparse:init_sigma expects a number, got: {}", val))?;
        }
        if name == "nthread" {
            self.sparam.nthread = val
                .parse()
                .map_err(|_| anyhow!("nthread expects an integer, got: {}", val))?;
            self.pool = Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(self.sparam.nthread)
                    .build()?,
            );
        }
        self.tparam.set_param(name, val)?;
        self.base.set_param(name, val)
    }

    fn init_model(&mut self) -> GenericResult<()> {
        self.base.init_model()?;
        let num_features = self.sparam.shape_in[2];
        if num_features == 0 {
            return Err(anyhow!("sparse net requires input_shape before init"));
        }
        let dist = Normal::new(0.0, self.sparam.init_sigma)?;
        self.wsp = Array2F::random_using(
            (num_features, self.sparam.num_hidden),
            dist,
            self.base.net.rng_mut(),
        );

        if !self.base.net.silent {
            println!(
                "sparse trainer: init with {}x{} connections",
                self.wsp.nrows(),
                self.wsp.ncols()
            );
            println!(
                "sparse sgd: eta={}, init_sigma={}",
                self.tparam.base_lr, self.sparam.init_sigma
            );
        }
        Ok(())
    }

    fn save_model(&self, out: &mut Vec<u8>) {
        self.base.save_model(out);
        self.sparam.save(out);
        write_array(out, &self.wsp.clone().into_dyn());
    }

    fn load_model(&mut self, src: &mut &[u8]) -> GenericResult<()> {
        self.base.load_model(src)?;
        self.sparam = SparseNetParam::load(src)?;
        self.wsp = read_array(src)?.into_dimensionality()?;
        Ok(())
    }

    fn make_input(&mut self, batch: &DataBatch) -> GenericResult<()> {
        if !batch.is_sparse() {
            return Err(anyhow!("sparse trainer only accepts sparse input"));
        }
        self.sparse_forward(batch)
    }

    /// One sparse training step: dense forward/backward with the input
    /// gradient propagated all the way down, then the embedding-table update.
    fn update(&mut self, batch: &DataBatch) -> GenericResult<()> {
        self.forward_backprop(batch, true)?;
        self.sparse_update(batch)
    }
}
