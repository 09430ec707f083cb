use anyhow::anyhow;

use crate::nn::storage::{get_mut_from_storage, GenericStorage};
use crate::utils::{ArrayDynF, GenericResult};

/// Momentum SGD with weight decay and a per-epoch learning-rate decay:
/// `m = momentum·m − lr·(g + wd·w); w += m; g = 0` with
/// `lr = base_lr / (1 + lr_decay · epoch)`.
/// The momentum buffer lives only in memory; the persisted model stream
/// carries no updater state.
pub struct SgdUpdater {
    key: String,
    slot: usize,
    base_lr: f32,
    wd: f32,
    momentum: f32,
    lr_decay: f32,
    mom_buf: Option<ArrayDynF>,
}

impl SgdUpdater {
    pub fn new(key: String, slot: usize) -> Self {
        Self {
            key,
            slot,
            base_lr: 0.01,
            wd: 0.0,
            momentum: 0.0,
            lr_decay: 0.0,
            mom_buf: None,
        }
    }

    pub fn set_param(&mut self, name: &str, val: &str) -> GenericResult<()> {
        match name {
            "eta" | "base_lr" => {
                self.base_lr = val
                    .parse()
                    .map_err(|_| anyhow!("{} expects a number, got: {}", name, val))?
            }
            "wd" => {
                self.wd = val
                    .parse()
                    .map_err(|_| anyhow!("wd expects a number, got: {}", val))?
            }
            "momentum" => {
                self.momentum = val
                    .parse()
                    .map_err(|_| anyhow!("momentum expects a number, got: {}", val))?
            }
            "lr:decay" => {
                self.lr_decay = val
                    .parse()
                    .map_err(|_| anyhow!("lr:decay expects a number, got: {}", val))?
            }
            _ => {}
        }
        Ok(())
    }

    pub fn init(&mut self, params: &GenericStorage) -> GenericResult<()> {
        let stored = params
            .get(&self.key)
            .and_then(|slots| slots.get(self.slot))
            .ok_or_else(|| anyhow!("updater bound to missing parameter {}[{}]", self.key, self.slot))?;
        self.mom_buf = Some(ArrayDynF::zeros(stored.shape()));
        Ok(())
    }

    pub fn update(
        &mut self,
        params: &mut GenericStorage,
        grads: &mut GenericStorage,
        epoch: i64,
    ) -> GenericResult<()> {
        let mom_buf = self
            .mom_buf
            .as_mut()
            .ok_or_else(|| anyhow!("updater {}[{}] used before init", self.key, self.slot))?;
        let lr = self.base_lr / (1.0 + self.lr_decay * epoch as f32);

        let grad = get_mut_from_storage(grads, &self.key, self.slot);
        let weight = get_mut_from_storage(params, &self.key, self.slot);

        let step = (&*grad + &(&*weight * self.wd)) * lr;
        *mom_buf *= self.momentum;
        *mom_buf -= &step;
        *weight += &*mom_buf;
        grad.fill(0.0);
        Ok(())
    }

    pub fn start_round(&mut self, _round: i32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::arrays_almost_equal;
    use ndarray::array;

    fn setup() -> (SgdUpdater, GenericStorage, GenericStorage) {
        let mut params = GenericStorage::new();
        params.insert("w_0".to_owned(), vec![array![1.0, -1.0].into_dyn()]);
        let mut grads = GenericStorage::new();
        grads.insert("w_0".to_owned(), vec![array![0.5, 0.5].into_dyn()]);

        let mut updater = SgdUpdater::new("w_0".to_owned(), 0);
        updater.set_param("eta", "0.1").unwrap();
        updater.init(&params).unwrap();
        (updater, params, grads)
    }

    #[test]
    fn test_plain_step_and_grad_reset() {
        let (mut updater, mut params, mut grads) = setup();
        updater.update(&mut params, &mut grads, 0).unwrap();

        let w = params["w_0"][0].clone().into_dimensionality().unwrap();
        assert!(arrays_almost_equal(&w, &array![0.95, -1.05]));
        assert_eq!(grads["w_0"][0].sum(), 0.0);
    }

    #[test]
    fn test_momentum_carries_over() {
        let (mut updater, mut params, mut grads) = setup();
        updater.set_param("momentum", "0.5").unwrap();
        updater.update(&mut params, &mut grads, 0).unwrap();

        // second step with zero gradient still moves by the decayed momentum
        updater.update(&mut params, &mut grads, 0).unwrap();
        let w = params["w_0"][0].clone().into_dimensionality().unwrap();
        assert!(arrays_almost_equal(&w, &array![0.925, -1.075]));
    }

    #[test]
    fn test_lr_decay_uses_epoch() {
        let (mut updater, mut params, mut grads) = setup();
        updater.set_param("lr:decay", "1.0").unwrap();
        updater.update(&mut params, &mut grads, 1).unwrap();

        // lr halves at epoch 1
        let w = params["w_0"][0].clone().into_dimensionality().unwrap();
        assert!(arrays_almost_equal(&w, &array![0.975, -1.025]));
    }

    #[test]
    fn test_init_missing_param_rejected() {
        let params = GenericStorage::new();
        let mut updater = SgdUpdater::new("absent_0".to_owned(), 0);
        assert!(updater.init(&params).is_err());
    }
}
