use anyhow::anyhow;

use crate::nn::node::{pair_mut, Node};
use crate::utils::{Array4F, GenericResult};

#[derive(Clone, Copy, Debug)]
enum ActivationKind {
    Sigmoid,
    Tanh,
    Relu,
}

/// Elementwise activation layer. The forward output is cached so backward can
/// form the pointwise derivative after the output node has been overwritten
/// with the incoming gradient.
pub struct ActivationLayer {
    kind: ActivationKind,
    nindex_in: usize,
    nindex_out: usize,
    out_cache: Array4F,
}

impl ActivationLayer {
    pub fn sigmoid(nindex_in: usize, nindex_out: usize) -> Self {
        Self::new(ActivationKind::Sigmoid, nindex_in, nindex_out)
    }

    pub fn tanh(nindex_in: usize, nindex_out: usize) -> Self {
        Self::new(ActivationKind::Tanh, nindex_in, nindex_out)
    }

    pub fn relu(nindex_in: usize, nindex_out: usize) -> Self {
        Self::new(ActivationKind::Relu, nindex_in, nindex_out)
    }

    fn new(kind: ActivationKind, nindex_in: usize, nindex_out: usize) -> Self {
        Self {
            kind,
            nindex_in,
            nindex_out,
            out_cache: Array4F::zeros((0, 0, 0, 0)),
        }
    }

    pub fn init_layer(&mut self, nodes: &mut [Node]) -> GenericResult<()> {
        let (input, output) = pair_mut(nodes, self.nindex_in, self.nindex_out);
        let shape = input.shape();
        if shape.iter().product::<usize>() == 0 {
            return Err(anyhow!(
                "activation layer input shape not negotiated: {:?}",
                shape
            ));
        }
        output.reshape(shape);
        Ok(())
    }

    pub fn forward(&mut self, nodes: &mut [Node], _is_train: bool) -> GenericResult<()> {
        let (input, output) = pair_mut(nodes, self.nindex_in, self.nindex_out);
        let in_pin = input.pin();
        let activated = match self.kind {
            ActivationKind::Sigmoid => in_pin.mapv(crate::utils::sigmoid),
            ActivationKind::Tanh => in_pin.mapv(f32::tanh),
            ActivationKind::Relu => in_pin.mapv(|o| if o > 0.0 { o } else { 0.0 }),
        };
        drop(in_pin);

        output.pin().assign(&activated);
        self.out_cache = activated;
        Ok(())
    }

    pub fn backprop(&mut self, nodes: &mut [Node], prop_grad: bool) -> GenericResult<()> {
        if !prop_grad {
            return Ok(());
        }
        let (input, output) = pair_mut(nodes, self.nindex_in, self.nindex_out);
        let out_pin = output.pin();
        let deriv = match self.kind {
            ActivationKind::Sigmoid => self.out_cache.mapv(|a| a * (1.0 - a)),
            ActivationKind::Tanh => self.out_cache.mapv(|a| 1.0 - a * a),
            ActivationKind::Relu => self.out_cache.mapv(|a| if a > 0.0 { 1.0 } else { 0.0 }),
        };
        let in_grad = &*out_pin * &deriv;
        drop(out_pin);

        input.pin().assign(&in_grad);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::arrays_almost_equal;
    use ndarray::array;

    fn run_forward(mut layer: ActivationLayer, input: [f32; 3]) -> (ActivationLayer, Vec<Node>) {
        let mut nodes = vec![Node::new(), Node::new()];
        nodes[0].reshape([1, 1, 1, 3]);
        layer.init_layer(&mut nodes).unwrap();

        nodes[0].pin().mat_mut().assign(&array![input]);
        layer.forward(&mut nodes, true).unwrap();
        (layer, nodes)
    }

    #[test]
    fn test_relu_forward_backward() {
        let (mut layer, mut nodes) = run_forward(ActivationLayer::relu(0, 1), [-1.0, 0.0, 2.0]);
        let out = nodes[1].pin().mat().to_owned();
        assert!(arrays_almost_equal(&out, &array![[0.0, 0.0, 2.0]]));

        nodes[1].pin().mat_mut().assign(&array![[0.5, 0.5, 0.5]]);
        layer.backprop(&mut nodes, true).unwrap();
        let in_grad = nodes[0].pin().mat().to_owned();
        assert!(arrays_almost_equal(&in_grad, &array![[0.0, 0.0, 0.5]]));
    }

    #[test]
    fn test_sigmoid_forward_backward() {
        let (mut layer, mut nodes) = run_forward(ActivationLayer::sigmoid(0, 1), [0.0, 2.0, -2.0]);
        let out = nodes[1].pin().mat().to_owned();
        assert!(arrays_almost_equal(
            &out,
            &array![[0.5, 0.880_797, 0.119_203]]
        ));

        nodes[1].pin().mat_mut().assign(&array![[1.0, 1.0, 1.0]]);
        layer.backprop(&mut nodes, true).unwrap();
        let in_grad = nodes[0].pin().mat().to_owned();
        // a * (1 - a) at the cached outputs
        assert!(arrays_almost_equal(
            &in_grad,
            &array![[0.25, 0.104_994, 0.104_994]]
        ));
    }

    #[test]
    fn test_backprop_skipped_without_prop() {
        let (mut layer, mut nodes) = run_forward(ActivationLayer::tanh(0, 1), [1.0, -1.0, 0.5]);
        nodes[0].pin().mat_mut().assign(&array![[9.0, 9.0, 9.0]]);
        nodes[1].pin().mat_mut().assign(&array![[1.0, 1.0, 1.0]]);
        layer.backprop(&mut nodes, false).unwrap();

        // the input node is left untouched when no gradient is requested
        let input = nodes[0].pin().mat().to_owned();
        assert!(arrays_almost_equal(&input, &array![[9.0, 9.0, 9.0]]));
    }
}
