use anyhow::anyhow;

use crate::integration::byte_utils::{read_i32, read_u32, write_i32, write_u32};
use crate::integration::serialization::{read_array, write_array};
use crate::nn::data::DataBatch;
use crate::nn::trainers::{default_prepare_pred_temp, BasicTrainer, TrainerOps};
use crate::utils::{Array2F, GenericResult};

/// Smooths predictions across rounds: every externally-identified instance
/// keeps an exponentially-blended prediction that is persisted with the
/// model and substituted for the raw prediction on every pass.
pub struct AvgTrainer {
    base: BasicTrainer,
    /// Rounds before the exponential average takes effect; while
    /// `round <= num_burn + 1` the blend weight stays at 1 (plain overwrite).
    num_burn: i32,
    num_avg_record: usize,
    /// Per-instance round of the last blend, so one round touches each
    /// instance at most once.
    ref_counter: Vec<i32>,
    avg_pred: Array2F,
}

impl AvgTrainer {
    pub fn new() -> Self {
        Self {
            base: BasicTrainer::new(),
            num_burn: i32::MAX,
            num_avg_record: 0,
            ref_counter: Vec::new(),
            avg_pred: Array2F::zeros((0, 0)),
        }
    }

    fn init_avg_record(&mut self) {
        self.ref_counter = vec![0; self.num_avg_record];
        self.avg_pred = Array2F::zeros((self.num_avg_record, self.base.net.output_features()));
        // mark the averaging state as present for future loads
        self.base.net.meta.param.reserved_flag = 1;
    }

    fn blend_predictions(&mut self, batch: &DataBatch) -> GenericResult<()> {
        let inst_index = batch
            .inst_index
            .as_ref()
            .ok_or_else(|| anyhow!("averaging trainer requires instance ids on the batch"))?;
        let rows = self.base.temp.nrows();
        if inst_index.len() < rows {
            return Err(anyhow!(
                "batch carries {} instance ids for {} instances",
                inst_index.len(),
                rows
            ));
        }
        let round = self.base.round;
        for i in 0..rows {
            let ridx = inst_index[i] as usize;
            if ridx >= self.num_avg_record {
                return Err(anyhow!("inst_index exceed num_avg_record: {}", ridx));
            }
            if self.ref_counter[ridx] > round {
                continue;
            }
            self.ref_counter[ridx] = round + 1;
            let diff = (round as i64 - self.num_burn as i64).max(1);
            let alpha = 1.0 / diff as f32;

            let mut avg_row = self.avg_pred.row_mut(ridx);
            let mut temp_row = self.base.temp.row_mut(i);
            for (avg, pred) in avg_row.iter_mut().zip(temp_row.iter_mut()) {
                *avg = (1.0 - alpha) * *avg + alpha * *pred;
                *pred = *avg;
            }
        }
        Ok(())
    }
}

impl Default for AvgTrainer {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainerOps for AvgTrainer {
    fn base(&self) -> &BasicTrainer {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BasicTrainer {
        &mut self.base
    }

    fn set_param(&mut self, name: &str, val: &str) -> GenericResult<()> {
        match name {
            "num_inst" => {
                self.num_avg_record = val
                    .parse()
                    .map_err(|_| anyhow!("num_inst expects an integer, got: {}", val))?;
            }
            "num_burn" => {
                self.num_burn = val
                    .parse()
                    .map_err(|_| anyhow!("num_burn expects an integer, got: {}", val))?;
            }
            _ => {}
        }
        self.base.set_param(name, val)
    }

    fn init_model(&mut self) -> GenericResult<()> {
        self.base.init_model()?;
        self.init_avg_record();
        Ok(())
    }

    fn save_model(&self, out: &mut Vec<u8>) {
        self.base.save_model(out);
        write_u32(out, self.num_avg_record as u32);
        for counter in &self.ref_counter {
            write_i32(out, *counter);
        }
        write_array(out, &self.avg_pred.clone().into_dyn());
    }

    fn load_model(&mut self, src: &mut &[u8]) -> GenericResult<()> {
        self.base.load_model(src)?;
        if self.base.net.meta.param.reserved_flag != 0 {
            self.num_avg_record = read_u32(src)? as usize;
            self.ref_counter = Vec::with_capacity(self.num_avg_record);
            for _ in 0..self.num_avg_record {
                self.ref_counter.push(read_i32(src)?);
            }
            self.avg_pred = read_array(src)?.into_dimensionality()?;
        } else {
            // model saved without averaging state: start the tables fresh
            self.init_avg_record();
            if !self.base.net.silent {
                println!("averaging trainer: init load from a plain trainer model");
            }
        }
        Ok(())
    }

    fn prepare_pred_temp(&mut self, batch: &DataBatch) -> GenericResult<()> {
        default_prepare_pred_temp(self, batch)?;
        self.blend_predictions(batch)
    }
}
