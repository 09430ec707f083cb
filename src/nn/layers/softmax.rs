use anyhow::anyhow;

use crate::nn::node::{pair_mut, Node};
use crate::utils::{Array2F, GenericResult};

/// Row softmax over a matrix node. Backward passes the gradient through
/// unchanged: the trainer injects the fused softmax-loss gradient directly
/// into the output node, so this layer has no derivative of its own to apply.
pub struct SoftmaxLayer {
    nindex_in: usize,
    nindex_out: usize,
}

pub fn softmax(array: Array2F) -> Array2F {
    let max = array
        .iter()
        .copied()
        .max_by(|a, b| a.partial_cmp(b).expect("Tried to compare NaN values"))
        .unwrap_or(0.0);
    let mut e = (array - max).mapv_into(f32::exp);

    e.outer_iter_mut().for_each(|mut row| {
        let sum: f32 = row.iter().sum();
        row.iter_mut().for_each(|o| *o /= sum);
    });
    e
}

impl SoftmaxLayer {
    pub fn new(nindex_in: usize, nindex_out: usize) -> Self {
        Self {
            nindex_in,
            nindex_out,
        }
    }

    pub fn init_layer(&mut self, nodes: &mut [Node]) -> GenericResult<()> {
        let (input, output) = pair_mut(nodes, self.nindex_in, self.nindex_out);
        if !input.is_mat() || input.features() == 0 {
            return Err(anyhow!(
                "softmax layer requires a flat input, got shape {:?}",
                input.shape()
            ));
        }
        output.reshape(input.shape());
        Ok(())
    }

    pub fn forward(&mut self, nodes: &mut [Node], _is_train: bool) -> GenericResult<()> {
        let (input, output) = pair_mut(nodes, self.nindex_in, self.nindex_out);
        let in_pin = input.pin();
        let result = softmax(in_pin.mat().to_owned());
        drop(in_pin);

        output.pin().mat_mut().assign(&result);
        Ok(())
    }

    pub fn backprop(&mut self, nodes: &mut [Node], prop_grad: bool) -> GenericResult<()> {
        if !prop_grad {
            return Ok(());
        }
        let (input, output) = pair_mut(nodes, self.nindex_in, self.nindex_out);
        let out_pin = output.pin();
        let grad = out_pin.mat().to_owned();
        drop(out_pin);

        input.pin().mat_mut().assign(&grad);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::arrays_almost_equal;
    use ndarray::array;

    #[test]
    fn test_softmax_rows() {
        let inputs = array![
            [0.6, 0.7, 0.4],
            [0.1, 0.5, 0.3],
            [0.2, 0.5, 0.6],
            [0.7, 0.6, 0.4]
        ];
        let expected: Array2F = array![
            [0.34200877, 0.37797814, 0.28001309],
            [0.2693075, 0.401_759_6, 0.328_932_9],
            [0.26030255, 0.35137169, 0.38832577],
            [0.37797814, 0.34200877, 0.28001309]
        ];
        let result = softmax(inputs);
        assert!(arrays_almost_equal(&result, &expected));
    }

    #[test]
    fn test_forward_and_pass_through_backward() {
        let mut layer = SoftmaxLayer::new(0, 1);
        let mut nodes = vec![Node::new(), Node::new()];
        nodes[0].reshape([2, 1, 1, 2]);
        layer.init_layer(&mut nodes).unwrap();

        nodes[0]
            .pin()
            .mat_mut()
            .assign(&array![[0.0, 0.0], [1.0, 1.0]]);
        layer.forward(&mut nodes, false).unwrap();
        let out = nodes[1].pin().mat().to_owned();
        assert!(arrays_almost_equal(&out, &array![[0.5, 0.5], [0.5, 0.5]]));

        nodes[1]
            .pin()
            .mat_mut()
            .assign(&array![[0.1, -0.1], [0.2, -0.2]]);
        layer.backprop(&mut nodes, true).unwrap();
        let in_grad = nodes[0].pin().mat().to_owned();
        assert!(arrays_almost_equal(
            &in_grad,
            &array![[0.1, -0.1], [0.2, -0.2]]
        ));
    }
}
