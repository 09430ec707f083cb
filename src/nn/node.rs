use ndarray::{s, ArrayView2, ArrayViewMut2};
use std::ops::{Deref, DerefMut};

use crate::utils::Array4F;

/// Activation buffer at one position of the network graph, shaped
/// (batch, z, y, x). Owned exclusively by the network; during backward the
/// same buffer carries the gradient (every node has a single writer).
///
/// Host code must access the storage through a [`Node::pin`] bracket. The
/// bracket is the transfer barrier between device kernels and host reads or
/// writes; releasing it (guard drop) hands the buffer back on every exit
/// path, early returns included.
pub struct Node {
    data: Array4F,
}

impl Node {
    pub fn new() -> Self {
        Self {
            data: Array4F::zeros((0, 0, 0, 0)),
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        let s = self.data.shape();
        [s[0], s[1], s[2], s[3]]
    }

    /// Reallocates the buffer for a new shape, zero-filled.
    pub fn reshape(&mut self, shape: [usize; 4]) {
        self.data = Array4F::zeros((shape[0], shape[1], shape[2], shape[3]));
    }

    /// A node is a matrix when the two middle dimensions collapse, i.e. it
    /// holds one feature vector per batch instance.
    pub fn is_mat(&self) -> bool {
        let s = self.data.shape();
        s[1] == 1 && s[2] == 1
    }

    pub fn batch_size(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn features(&self) -> usize {
        self.data.shape()[3]
    }

    /// Acquires scoped host visibility of the buffer.
    pub fn pin(&mut self) -> PinnedNode<'_> {
        PinnedNode { node: self }
    }

    pub fn free_space(&mut self) {
        self.data = Array4F::zeros((0, 0, 0, 0));
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-visible view of a pinned node. Dereferences to the raw 4-D buffer;
/// `mat`/`mat_mut` give the (batch, x) view of matrix nodes.
pub struct PinnedNode<'a> {
    node: &'a mut Node,
}

impl PinnedNode<'_> {
    pub fn mat(&self) -> ArrayView2<'_, f32> {
        self.node.data.slice(s![.., 0, 0, ..])
    }

    pub fn mat_mut(&mut self) -> ArrayViewMut2<'_, f32> {
        self.node.data.slice_mut(s![.., 0, 0, ..])
    }
}

impl Deref for PinnedNode<'_> {
    type Target = Array4F;

    fn deref(&self) -> &Array4F {
        &self.node.data
    }
}

impl DerefMut for PinnedNode<'_> {
    fn deref_mut(&mut self) -> &mut Array4F {
        &mut self.node.data
    }
}

impl Drop for PinnedNode<'_> {
    fn drop(&mut self) {
        // Transfer barrier release point. The CPU backend has nothing to
        // flush; the bracket still delimits every host access.
    }
}

/// Splits two distinct nodes out of the graph for a layer step. The borrow
/// checker cannot see that `input != output`, so the split is done by index.
pub fn pair_mut(nodes: &mut [Node], input: usize, output: usize) -> (&mut Node, &mut Node) {
    assert!(input != output, "layer input and output must be distinct nodes");
    if input < output {
        let (lo, hi) = nodes.split_at_mut(output);
        (&mut lo[input], &mut hi[0])
    } else {
        let (lo, hi) = nodes.split_at_mut(input);
        (&mut hi[0], &mut lo[output])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mat_view() {
        let mut node = Node::new();
        node.reshape([2, 1, 1, 3]);
        assert!(node.is_mat());

        {
            let mut pinned = node.pin();
            pinned.mat_mut()[[1, 2]] = 5.0;
        }
        let pinned = node.pin();
        assert_eq!(pinned.mat()[[1, 2]], 5.0);
        assert_eq!(pinned.mat().dim(), (2, 3));
    }

    #[test]
    fn test_non_mat_shape() {
        let mut node = Node::new();
        node.reshape([2, 3, 4, 5]);
        assert!(!node.is_mat());
        assert_eq!(node.shape(), [2, 3, 4, 5]);
    }

    #[test]
    fn test_pair_mut() {
        let mut nodes = vec![Node::new(), Node::new(), Node::new()];
        nodes[0].reshape([1, 1, 1, 2]);
        nodes[2].reshape([1, 1, 1, 4]);

        let (input, output) = pair_mut(&mut nodes, 0, 2);
        assert_eq!(input.features(), 2);
        assert_eq!(output.features(), 4);

        let (input, output) = pair_mut(&mut nodes, 2, 0);
        assert_eq!(input.features(), 4);
        assert_eq!(output.features(), 2);
    }
}
