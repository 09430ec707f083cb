use anyhow::anyhow;
use ndarray::ArrayView1;

use crate::nn::data::DataBatch;
use crate::nn::metric::MetricSet;
use crate::nn::net::NeuralNet;
use crate::nn::trainers::TrainerOps;
use crate::utils::{sigmoid, Array2F, GenericResult};

/// Loss kinds, by wire id: 0 multiclass, 1 regression, 2 binary logistic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossKind {
    MultiClass,
    Regression,
    Logistic,
}

impl LossKind {
    pub fn from_id(id: i32) -> GenericResult<Self> {
        match id {
            0 => Ok(LossKind::MultiClass),
            1 => Ok(LossKind::Regression),
            2 => Ok(LossKind::Logistic),
            _ => Err(anyhow!("unknown loss type: {}", id)),
        }
    }
}

/// Drives one network through per-batch training steps: input staging,
/// forward, loss-gradient injection, backward, periodic parameter update.
pub struct BasicTrainer {
    pub(crate) net: NeuralNet,
    pub(crate) loss_kind: LossKind,
    pub(crate) round: i32,
    pub(crate) update_period: usize,
    pub(crate) sample_counter: usize,
    pub(crate) eval_train: bool,
    pub(crate) metric: MetricSet,
    pub(crate) train_metric: MetricSet,
    /// Host staging buffer for the output node, feature-dim × batch;
    /// holds predictions after a forward sync and the raw loss gradient
    /// after injection.
    pub(crate) temp: Array2F,
}

impl BasicTrainer {
    pub fn new() -> Self {
        Self {
            net: NeuralNet::new(),
            loss_kind: LossKind::MultiClass,
            round: 0,
            update_period: 1,
            sample_counter: 0,
            eval_train: true,
            metric: MetricSet::new(),
            train_metric: MetricSet::new(),
            temp: Array2F::zeros((0, 0)),
        }
    }

    pub fn net(&self) -> &NeuralNet {
        &self.net
    }

    pub fn net_mut(&mut self) -> &mut NeuralNet {
        &mut self.net
    }

    /// Copies the batch's dense input into the network's input node.
    pub(crate) fn stage_input(&mut self, batch: &DataBatch) -> GenericResult<()> {
        let input = self.net.input();
        if batch.data.shape() != input.shape() {
            return Err(anyhow!(
                "input batch shape {:?} does not match network input {:?}",
                batch.data.shape(),
                input.shape()
            ));
        }
        input.pin().assign(&batch.data);
        Ok(())
    }

    /// Copies the output node into the staging buffer, resizing on demand.
    pub(crate) fn sync_output(&mut self) -> GenericResult<()> {
        let output = self.net.output();
        if !output.is_mat() {
            return Err(anyhow!("network output must be a matrix"));
        }
        let synced = output.pin().mat().to_owned();
        self.temp = synced;
        Ok(())
    }

    /// Turns the staged predictions into the loss gradient, writes it back
    /// into the output node and scales by `1/(batch_size · update_period)` so
    /// accumulated gradients average over the whole effective mini-batch.
    pub(crate) fn set_loss(&mut self, batch: &DataBatch) -> GenericResult<()> {
        let labels = &batch.labels;
        let (rows, cols) = self.temp.dim();
        if labels.len() < rows {
            return Err(anyhow!(
                "batch carries {} labels for {} instances",
                labels.len(),
                rows
            ));
        }
        let loss_kind = self.loss_kind;
        if matches!(loss_kind, LossKind::Regression | LossKind::Logistic) && cols != 1 {
            return Err(anyhow!("regression can only have 1 output size"));
        }
        if self.eval_train {
            self.train_metric.add_eval(self.temp.view(), &labels[..rows]);
        }

        for (i, mut row) in self.temp.outer_iter_mut().enumerate() {
            match loss_kind {
                LossKind::MultiClass => {
                    let k = labels[i] as usize;
                    if k >= cols {
                        return Err(anyhow!("label exceed output bound: {}", labels[i]));
                    }
                    row[k] -= 1.0;
                }
                LossKind::Regression => row[0] -= labels[i],
                LossKind::Logistic => row[0] = sigmoid(row[0]) - labels[i],
            }
        }

        let scale = 1.0 / (rows * self.update_period) as f32;
        let mut pin = self.net.output().pin();
        pin.mat_mut().assign(&self.temp);
        *pin *= scale;
        Ok(())
    }

    /// One scalar prediction per instance, by loss kind: arg-max index,
    /// raw regression output, or sigmoid probability.
    pub(crate) fn transform_pred(&self, pred: ArrayView1<f32>) -> f32 {
        match self.loss_kind {
            LossKind::MultiClass => {
                let mut maxidx = 0;
                for i in 1..pred.len() {
                    if pred[i] > pred[maxidx] {
                        maxidx = i;
                    }
                }
                maxidx as f32
            }
            LossKind::Regression => pred[0],
            LossKind::Logistic => sigmoid(pred[0]),
        }
    }
}

impl Default for BasicTrainer {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainerOps for BasicTrainer {
    fn base(&self) -> &BasicTrainer {
        self
    }

    fn base_mut(&mut self) -> &mut BasicTrainer {
        self
    }

    fn set_param(&mut self, name: &str, val: &str) -> GenericResult<()> {
        match name {
            "loss" => {
                let id = val
                    .parse()
                    .map_err(|_| anyhow!("loss expects an integer, got: {}", val))?;
                self.loss_kind = LossKind::from_id(id)?;
            }
            "update_period" => {
                self.update_period = val
                    .parse()
                    .map_err(|_| anyhow!("update_period expects an integer, got: {}", val))?;
            }
            "metric" => {
                self.metric.add_metric(val)?;
                self.train_metric.add_metric(val)?;
            }
            "eval_train" => {
                self.eval_train = val
                    .parse::<i32>()
                    .map_err(|_| anyhow!("eval_train expects an integer, got: {}", val))?
                    != 0;
            }
            _ => {}
        }
        self.net.set_param(name, val)
    }

    fn init_model(&mut self) -> GenericResult<()> {
        self.net.init_model()
    }

    fn save_model(&self, out: &mut Vec<u8>) {
        self.net.save_model(out)
    }

    fn load_model(&mut self, src: &mut &[u8]) -> GenericResult<()> {
        self.net.load_model(src)
    }
}
