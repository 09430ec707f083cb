pub mod averaging;
pub mod basic;
pub mod sparse;

pub use averaging::AvgTrainer;
pub use basic::BasicTrainer;
pub use sparse::SparseTrainer;

use anyhow::anyhow;
use ndarray::s;

use crate::nn::data::{DataBatch, DataIter};
use crate::utils::GenericResult;

/// Shared trainer behavior. `make_input` and `prepare_pred_temp` are the
/// override points the variants hook into; everything else is driven through
/// them, so a variant changes input staging or prediction post-processing
/// without touching the step logic.
pub trait TrainerOps {
    fn base(&self) -> &BasicTrainer;
    fn base_mut(&mut self) -> &mut BasicTrainer;

    fn set_param(&mut self, name: &str, val: &str) -> GenericResult<()>;
    fn init_model(&mut self) -> GenericResult<()>;
    fn save_model(&self, out: &mut Vec<u8>);
    fn load_model(&mut self, src: &mut &[u8]) -> GenericResult<()>;

    /// Stages one batch into the network's input node.
    fn make_input(&mut self, batch: &DataBatch) -> GenericResult<()> {
        self.base_mut().stage_input(batch)
    }

    /// Forward-only pass leaving per-instance predictions in the staging
    /// buffer.
    fn prepare_pred_temp(&mut self, batch: &DataBatch) -> GenericResult<()> {
        default_prepare_pred_temp(self, batch)
    }

    /// One training step over a batch.
    fn update(&mut self, batch: &DataBatch) -> GenericResult<()> {
        self.forward_backprop(batch, false)
    }

    fn forward_backprop(
        &mut self,
        batch: &DataBatch,
        prop_to_firstlayer: bool,
    ) -> GenericResult<()> {
        self.make_input(batch)?;
        let base = self.base_mut();
        base.net.forward(true)?;
        base.sync_output()?;
        base.set_loss(batch)?;
        base.net.backprop(prop_to_firstlayer)?;
        base.sample_counter += 1;
        if base.sample_counter >= base.update_period {
            base.net.update()?;
            base.sample_counter = 0;
        }
        Ok(())
    }

    fn start_round(&mut self, round: i32) {
        let base = self.base_mut();
        base.net.start_round(round);
        base.round = round;
    }

    /// Prints and clears the running training metric, then drives the
    /// evaluation iterator to completion when one is supplied. Padded
    /// instances of each batch are excluded from scoring.
    fn evaluate(
        &mut self,
        iter: Option<&mut dyn DataIter>,
        evname: &str,
    ) -> GenericResult<String> {
        let mut res = String::new();
        {
            let base = self.base_mut();
            if base.eval_train {
                res += &base.train_metric.print("train");
                base.train_metric.clear();
            }
        }

        let iter = match iter {
            Some(iter) => iter,
            None => return Ok(res),
        };
        self.base_mut().metric.clear();
        iter.before_first();
        while let Some(batch) = iter.next_batch() {
            self.prepare_pred_temp(batch)?;
            let base = self.base_mut();
            let total = base.temp.nrows();
            if batch.num_batch_padd > total {
                return Err(anyhow!("batch padding exceeds batch size"));
            }
            let rows = total - batch.num_batch_padd;
            if batch.labels.len() < rows {
                return Err(anyhow!(
                    "batch carries {} labels for {} instances",
                    batch.labels.len(),
                    rows
                ));
            }
            base.metric
                .add_eval(base.temp.slice(s![..rows, ..]), &batch.labels[..rows]);
        }
        res += &self.base().metric.print(evname);
        Ok(res)
    }

    /// Forward-only: one transformed scalar prediction per instance.
    fn predict(&mut self, batch: &DataBatch) -> GenericResult<Vec<f32>> {
        self.prepare_pred_temp(batch)?;
        let base = self.base();
        Ok(base
            .temp
            .outer_iter()
            .map(|row| base.transform_pred(row))
            .collect())
    }

    /// Stages the batch and streams the stop layer's activations.
    fn inference(
        &mut self,
        stop_layer: usize,
        batch: &DataBatch,
        total_length: i64,
        header_flag: &mut bool,
        out: &mut Vec<u8>,
    ) -> GenericResult<()> {
        self.make_input(batch)?;
        self.base_mut()
            .net
            .inference(stop_layer, total_length, header_flag, out)
    }
}

/// Body of the default `prepare_pred_temp`, callable by variants that wrap it.
pub(crate) fn default_prepare_pred_temp<T: TrainerOps + ?Sized>(
    trainer: &mut T,
    batch: &DataBatch,
) -> GenericResult<()> {
    trainer.make_input(batch)?;
    let base = trainer.base_mut();
    base.net.forward(false)?;
    base.sync_output()
}

/// Closed set of trainer variants.
pub enum NetTrainer {
    Basic(BasicTrainer),
    Averaging(AvgTrainer),
    Sparse(SparseTrainer),
}

/// Net types: 0 plain, 1 prediction-averaging, 2 sparse-embedding.
pub fn create_net_trainer(net_type: i32) -> GenericResult<NetTrainer> {
    match net_type {
        0 => Ok(NetTrainer::Basic(BasicTrainer::new())),
        1 => Ok(NetTrainer::Averaging(AvgTrainer::new())),
        2 => Ok(NetTrainer::Sparse(SparseTrainer::new())),
        _ => Err(anyhow!("unknown net type: {}", net_type)),
    }
}

macro_rules! dispatch {
    ($self:expr, $t:ident => $call:expr) => {
        match $self {
            NetTrainer::Basic($t) => $call,
            NetTrainer::Averaging($t) => $call,
            NetTrainer::Sparse($t) => $call,
        }
    };
}

impl NetTrainer {
    pub fn set_param(&mut self, name: &str, val: &str) -> GenericResult<()> {
        dispatch!(self, t => t.set_param(name, val))
    }

    pub fn init_model(&mut self) -> GenericResult<()> {
        dispatch!(self, t => t.init_model())
    }

    pub fn save_model(&self, out: &mut Vec<u8>) {
        dispatch!(self, t => t.save_model(out))
    }

    pub fn load_model(&mut self, src: &mut &[u8]) -> GenericResult<()> {
        dispatch!(self, t => t.load_model(src))
    }

    pub fn start_round(&mut self, round: i32) {
        dispatch!(self, t => t.start_round(round))
    }

    pub fn update(&mut self, batch: &DataBatch) -> GenericResult<()> {
        dispatch!(self, t => t.update(batch))
    }

    pub fn forward_backprop(
        &mut self,
        batch: &DataBatch,
        prop_to_firstlayer: bool,
    ) -> GenericResult<()> {
        dispatch!(self, t => t.forward_backprop(batch, prop_to_firstlayer))
    }

    pub fn evaluate(
        &mut self,
        iter: Option<&mut dyn DataIter>,
        evname: &str,
    ) -> GenericResult<String> {
        dispatch!(self, t => t.evaluate(iter, evname))
    }

    pub fn predict(&mut self, batch: &DataBatch) -> GenericResult<Vec<f32>> {
        dispatch!(self, t => t.predict(batch))
    }

    pub fn inference(
        &mut self,
        stop_layer: usize,
        batch: &DataBatch,
        total_length: i64,
        header_flag: &mut bool,
        out: &mut Vec<u8>,
    ) -> GenericResult<()> {
        dispatch!(self, t => t.inference(stop_layer, batch, total_length, header_flag, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_net_type_rejected() {
        assert!(create_net_trainer(3).is_err());
        assert!(create_net_trainer(-1).is_err());
    }

    #[test]
    fn test_known_net_types() {
        assert!(matches!(create_net_trainer(0), Ok(NetTrainer::Basic(_))));
        assert!(matches!(create_net_trainer(1), Ok(NetTrainer::Averaging(_))));
        assert!(matches!(create_net_trainer(2), Ok(NetTrainer::Sparse(_))));
    }
}
