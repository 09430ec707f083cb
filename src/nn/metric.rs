use anyhow::anyhow;
use ndarray::ArrayView2;

use crate::utils::GenericResult;

#[derive(Clone, Copy, Debug)]
enum MetricKind {
    Error,
    Rmse,
}

struct SingleMetric {
    kind: MetricKind,
    sum: f64,
    count: usize,
}

impl SingleMetric {
    fn name(&self) -> &'static str {
        match self.kind {
            MetricKind::Error => "error",
            MetricKind::Rmse => "rmse",
        }
    }

    fn add_eval(&mut self, preds: ArrayView2<f32>, labels: &[f32]) {
        for (row, &label) in preds.outer_iter().zip(labels) {
            let value = match self.kind {
                MetricKind::Error => {
                    let predicted = if row.len() == 1 {
                        (row[0] > 0.5) as usize
                    } else {
                        row.iter()
                            .enumerate()
                            .fold((0, f32::MIN), |acc, (i, &v)| {
                                if v > acc.1 {
                                    (i, v)
                                } else {
                                    acc
                                }
                            })
                            .0
                    };
                    (predicted != label as usize) as u8 as f64
                }
                MetricKind::Rmse => {
                    let diff = (row[0] - label) as f64;
                    diff * diff
                }
            };
            self.sum += value;
            self.count += 1;
        }
    }

    fn value(&self) -> f64 {
        let mean = self.sum / self.count.max(1) as f64;
        match self.kind {
            MetricKind::Error => mean,
            MetricKind::Rmse => mean.sqrt(),
        }
    }
}

/// Ordered set of evaluation metrics, fed per-batch predictions and printed
/// as `\t<name>-<metric>:<value>` segments.
#[derive(Default)]
pub struct MetricSet {
    metrics: Vec<SingleMetric>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_metric(&mut self, name: &str) -> GenericResult<()> {
        let kind = match name {
            "error" => MetricKind::Error,
            "rmse" => MetricKind::Rmse,
            _ => return Err(anyhow!("unknown metric: {}", name)),
        };
        self.metrics.push(SingleMetric {
            kind,
            sum: 0.0,
            count: 0,
        });
        Ok(())
    }

    pub fn add_eval(&mut self, preds: ArrayView2<f32>, labels: &[f32]) {
        for metric in self.metrics.iter_mut() {
            metric.add_eval(preds, labels);
        }
    }

    pub fn print(&self, evname: &str) -> String {
        let mut result = String::new();
        for metric in &self.metrics {
            result += &format!("\t{}-{}:{:.6}", evname, metric.name(), metric.value());
        }
        result
    }

    pub fn clear(&mut self) {
        for metric in self.metrics.iter_mut() {
            metric.sum = 0.0;
            metric.count = 0;
        }
    }
}
