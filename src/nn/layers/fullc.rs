use anyhow::anyhow;
use ndarray::Axis;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;

use crate::integration::serialization::{read_array, write_array};
use crate::nn::node::{pair_mut, Node};
use crate::nn::storage::{clone_from_storage2, get_mut_from_storage, GenericStorage};
use crate::nn::updaters::{SgdUpdater, Updater};
use crate::utils::{Array1F, Array2F, GenericResult};

/// Fully-connected layer: `out = in · Wᵀ + b` over matrix nodes.
/// Storage slots: 0 = weights (nhidden × in_features), 1 = bias (nhidden).
pub struct FullConnectLayer {
    key: String,
    nindex_in: usize,
    nindex_out: usize,
    nhidden: usize,
    init_sigma: f32,
    in_features: usize,
}

impl FullConnectLayer {
    pub fn new(nindex_in: usize, nindex_out: usize, key: String) -> Self {
        Self {
            key,
            nindex_in,
            nindex_out,
            nhidden: 0,
            init_sigma: 0.01,
            in_features: 0,
        }
    }

    pub fn set_param(&mut self, name: &str, val: &str) -> GenericResult<()> {
        match name {
            "nhidden" => {
                self.nhidden = val
                    .parse()
                    .map_err(|_| anyhow!("nhidden expects an integer, got: {}", val))?
            }
            "init_sigma" => {
                self.init_sigma = val
                    .parse()
                    .map_err(|_| anyhow!("init_sigma expects a number, got: {}", val))?
            }
            _ => {}
        }
        Ok(())
    }

    pub fn init_layer(
        &mut self,
        nodes: &mut [Node],
        params: &GenericStorage,
        grads: &mut GenericStorage,
    ) -> GenericResult<()> {
        if self.nhidden == 0 {
            return Err(anyhow!("fullc layer requires nhidden to be configured"));
        }
        let (input, output) = pair_mut(nodes, self.nindex_in, self.nindex_out);
        if !input.is_mat() || input.features() == 0 {
            return Err(anyhow!(
                "fullc layer requires a flat input, got shape {:?}",
                input.shape()
            ));
        }
        self.in_features = input.features();
        output.reshape([input.batch_size(), 1, 1, self.nhidden]);

        // On the load path the parameters are already in storage; make sure
        // they agree with the negotiated shape before anything touches them.
        if let Some(loaded) = params.get(&self.key) {
            if loaded.len() != 2
                || loaded[0].shape() != [self.nhidden, self.in_features]
                || loaded[1].shape() != [self.nhidden]
            {
                return Err(anyhow!(
                    "fullc layer {}: loaded parameters do not match the configured shape",
                    self.key
                ));
            }
        }

        grads.insert(
            self.key.clone(),
            vec![
                Array2F::zeros((self.nhidden, self.in_features)).into_dyn(),
                Array1F::zeros(self.nhidden).into_dyn(),
            ],
        );
        Ok(())
    }

    pub fn init_params(&self, params: &mut GenericStorage, rng: &mut StdRng) -> GenericResult<()> {
        let dist = Normal::new(0.0, self.init_sigma)?;
        let weights = Array2F::random_using((self.nhidden, self.in_features), dist, rng);
        let biases = Array1F::zeros(self.nhidden);
        params.insert(self.key.clone(), vec![weights.into_dyn(), biases.into_dyn()]);
        Ok(())
    }

    pub fn save(&self, params: &GenericStorage, out: &mut Vec<u8>) {
        let stored = params.get(&self.key).unwrap();
        write_array(out, &stored[0]);
        write_array(out, &stored[1]);
    }

    pub fn load(&self, params: &mut GenericStorage, src: &mut &[u8]) -> GenericResult<()> {
        let weights = read_array(src)?;
        let biases = read_array(src)?;
        params.insert(self.key.clone(), vec![weights, biases]);
        Ok(())
    }

    pub fn forward(
        &mut self,
        nodes: &mut [Node],
        params: &GenericStorage,
        _is_train: bool,
    ) -> GenericResult<()> {
        let [weights, biases] = clone_from_storage2(params, &self.key);
        let weights: Array2F = weights.into_dimensionality()?;
        let biases: Array1F = biases.into_dimensionality()?;

        let (input, output) = pair_mut(nodes, self.nindex_in, self.nindex_out);
        let in_pin = input.pin();
        let result = in_pin.mat().dot(&weights.t()) + &biases;
        drop(in_pin);

        output.pin().mat_mut().assign(&result);
        Ok(())
    }

    pub fn backprop(
        &mut self,
        nodes: &mut [Node],
        params: &GenericStorage,
        grads: &mut GenericStorage,
        prop_grad: bool,
    ) -> GenericResult<()> {
        let [weights, _] = clone_from_storage2(params, &self.key);
        let weights: Array2F = weights.into_dimensionality()?;

        let (input, output) = pair_mut(nodes, self.nindex_in, self.nindex_out);
        let out_pin = output.pin();
        let grad = out_pin.mat();

        let mut in_pin = input.pin();
        // The input node still holds the forward activation; read it before
        // the propagated gradient overwrites it.
        let wgrad = grad.t().dot(&in_pin.mat());
        let bgrad = grad.sum_axis(Axis(0));

        // Raw sums: normalization happened once at loss injection.
        *get_mut_from_storage(grads, &self.key, 0) += &wgrad.into_dyn();
        *get_mut_from_storage(grads, &self.key, 1) += &bgrad.into_dyn();

        if prop_grad {
            let in_grad = grad.dot(&weights);
            in_pin.mat_mut().assign(&in_grad);
        }
        Ok(())
    }

    pub fn get_updaters(&self, updater_kind: &str, updaters: &mut Vec<Updater>) -> GenericResult<()> {
        match updater_kind {
            "sgd" => {
                updaters.push(Updater::Sgd(SgdUpdater::new(self.key.clone(), 0)));
                updaters.push(Updater::Sgd(SgdUpdater::new(self.key.clone(), 1)));
                Ok(())
            }
            _ => Err(anyhow!("unknown updater type: {}", updater_kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::arrays_almost_equal;
    use ndarray::array;

    fn make_layer() -> (FullConnectLayer, Vec<Node>, GenericStorage, GenericStorage) {
        let mut layer = FullConnectLayer::new(0, 1, "fullc_0".to_owned());
        layer.set_param("nhidden", "3").unwrap();

        let mut nodes = vec![Node::new(), Node::new()];
        nodes[0].reshape([2, 1, 1, 2]);

        let params = GenericStorage::new();
        let mut grads = GenericStorage::new();
        layer.init_layer(&mut nodes, &params, &mut grads).unwrap();
        (layer, nodes, params, grads)
    }

    fn fixed_params(storage: &mut GenericStorage) {
        let weights = array![[0.7, 0.0], [0.1, 0.4], [0.8, 0.6]];
        let biases = array![0.0, 0.0, 0.0];
        storage.insert(
            "fullc_0".to_owned(),
            vec![weights.into_dyn(), biases.into_dyn()],
        );
    }

    #[test]
    fn test_shape_negotiation() {
        let (_, nodes, _, grads) = make_layer();
        assert_eq!(nodes[1].shape(), [2, 1, 1, 3]);
        assert_eq!(grads["fullc_0"][0].shape(), [3, 2]);
        assert_eq!(grads["fullc_0"][1].shape(), [3]);
    }

    #[test]
    fn test_missing_nhidden_rejected() {
        let mut layer = FullConnectLayer::new(0, 1, "fullc_0".to_owned());
        let mut nodes = vec![Node::new(), Node::new()];
        nodes[0].reshape([2, 1, 1, 2]);
        let params = GenericStorage::new();
        let mut grads = GenericStorage::new();
        assert!(layer.init_layer(&mut nodes, &params, &mut grads).is_err());
    }

    #[test]
    fn test_forward() {
        let (mut layer, mut nodes, mut params, _) = make_layer();
        fixed_params(&mut params);

        nodes[0]
            .pin()
            .mat_mut()
            .assign(&array![[1.0, 2.0], [2.0, 3.0]]);
        layer.forward(&mut nodes, &params, true).unwrap();

        let expected = array![[0.7, 0.9, 2.0], [1.4, 1.4, 3.4]];
        assert!(arrays_almost_equal(
            &nodes[1].pin().mat().to_owned(),
            &expected
        ));
    }

    #[test]
    fn test_backprop_accumulates_and_propagates() {
        let (mut layer, mut nodes, mut params, mut grads) = make_layer();
        fixed_params(&mut params);

        nodes[0]
            .pin()
            .mat_mut()
            .assign(&array![[0.8, 0.7], [0.0, 0.0]]);
        nodes[1]
            .pin()
            .mat_mut()
            .assign(&array![[0.1, 0.2, 0.3], [0.0, 0.0, 0.0]]);

        layer.backprop(&mut nodes, &params, &mut grads, true).unwrap();

        let wgrad = grads["fullc_0"][0].clone().into_dimensionality().unwrap();
        let expected_wgrad = array![[0.08, 0.07], [0.16, 0.14], [0.24, 0.21]];
        assert!(arrays_almost_equal(&wgrad, &expected_wgrad));

        let bgrad = grads["fullc_0"][1].clone().into_dimensionality().unwrap();
        assert!(arrays_almost_equal(&bgrad, &array![0.1, 0.2, 0.3]));

        // input gradient: grad · W
        let in_grad = nodes[0].pin().mat().to_owned();
        let expected_in = array![[0.33, 0.26], [0.0, 0.0]];
        assert!(arrays_almost_equal(&in_grad, &expected_in));

        // a second pass accumulates on top instead of overwriting
        nodes[0]
            .pin()
            .mat_mut()
            .assign(&array![[0.8, 0.7], [0.0, 0.0]]);
        layer.backprop(&mut nodes, &params, &mut grads, false).unwrap();
        let bgrad2 = grads["fullc_0"][1].clone().into_dimensionality().unwrap();
        assert!(arrays_almost_equal(&bgrad2, &array![0.2, 0.4, 0.6]));
    }
}
