pub mod activation;
pub mod fullc;
pub mod softmax;

use rand::rngs::StdRng;

use crate::nn::meta::{LayerInfo, LayerKind};
use crate::nn::node::Node;
use crate::nn::storage::{GenericStorage, KeyAssigner};
use crate::nn::updaters::Updater;
use crate::utils::GenericResult;

use activation::ActivationLayer;
use fullc::FullConnectLayer;
use softmax::SoftmaxLayer;

/// Closed set of layer implementations. Each variant owns its node wiring and
/// whatever configuration it binds; trainable parameters live in the central
/// storage under the layer's key.
pub enum Layer {
    FullConnect(FullConnectLayer),
    Activation(ActivationLayer),
    Softmax(SoftmaxLayer),
}

impl Layer {
    /// Instantiates the layer object for one declared edge of the graph.
    /// Keys are assigned here, so declaration order fully determines them.
    pub fn from_info(info: &LayerInfo, assigner: &mut KeyAssigner) -> Self {
        match info.kind {
            LayerKind::FullConnect => Layer::FullConnect(FullConnectLayer::new(
                info.nindex_in,
                info.nindex_out,
                assigner.get_key("fullc".to_owned()),
            )),
            LayerKind::Sigmoid => {
                Layer::Activation(ActivationLayer::sigmoid(info.nindex_in, info.nindex_out))
            }
            LayerKind::Tanh => {
                Layer::Activation(ActivationLayer::tanh(info.nindex_in, info.nindex_out))
            }
            LayerKind::Relu => {
                Layer::Activation(ActivationLayer::relu(info.nindex_in, info.nindex_out))
            }
            LayerKind::Softmax => Layer::Softmax(SoftmaxLayer::new(info.nindex_in, info.nindex_out)),
        }
    }
}

/// Forward one configuration directive to the appropriate layer. Layers
/// ignore names they do not understand; the directive stream is shared.
pub fn set_layer_param(layer: &mut Layer, name: &str, val: &str) -> GenericResult<()> {
    use Layer::*;
    match layer {
        FullConnect(l) => l.set_param(name, val),
        Activation(_) => Ok(()),
        Softmax(_) => Ok(()),
    }
}

/// Shape negotiation: reads the input node's shape, sets the output node's,
/// and allocates gradient slots. Runs on both the fresh-init and load paths.
pub fn init_layer(
    layer: &mut Layer,
    nodes: &mut [Node],
    params: &GenericStorage,
    grads: &mut GenericStorage,
) -> GenericResult<()> {
    use Layer::*;
    match layer {
        FullConnect(l) => l.init_layer(nodes, params, grads),
        Activation(l) => l.init_layer(nodes),
        Softmax(l) => l.init_layer(nodes),
    }
}

/// Fresh parameter initialization; only called when building a new model.
pub fn init_layer_params(
    layer: &Layer,
    params: &mut GenericStorage,
    rng: &mut StdRng,
) -> GenericResult<()> {
    use Layer::*;
    match layer {
        FullConnect(l) => l.init_params(params, rng),
        Activation(_) => Ok(()),
        Softmax(_) => Ok(()),
    }
}

pub fn save_layer(layer: &Layer, params: &GenericStorage, out: &mut Vec<u8>) {
    use Layer::*;
    match layer {
        FullConnect(l) => l.save(params, out),
        Activation(_) => {}
        Softmax(_) => {}
    }
}

pub fn load_layer(
    layer: &Layer,
    params: &mut GenericStorage,
    src: &mut &[u8],
) -> GenericResult<()> {
    use Layer::*;
    match layer {
        FullConnect(l) => l.load(params, src),
        Activation(_) => Ok(()),
        Softmax(_) => Ok(()),
    }
}

pub fn forward_layer(
    layer: &mut Layer,
    nodes: &mut [Node],
    params: &GenericStorage,
    is_train: bool,
) -> GenericResult<()> {
    use Layer::*;
    match layer {
        FullConnect(l) => l.forward(nodes, params, is_train),
        Activation(l) => l.forward(nodes, is_train),
        Softmax(l) => l.forward(nodes, is_train),
    }
}

/// Backward one layer: the output node holds the incoming gradient; the input
/// node receives the propagated gradient when `prop_grad` is set.
pub fn backprop_layer(
    layer: &mut Layer,
    nodes: &mut [Node],
    params: &GenericStorage,
    grads: &mut GenericStorage,
    prop_grad: bool,
) -> GenericResult<()> {
    use Layer::*;
    match layer {
        FullConnect(l) => l.backprop(nodes, params, grads, prop_grad),
        Activation(l) => l.backprop(nodes, prop_grad),
        Softmax(l) => l.backprop(nodes, prop_grad),
    }
}

/// Appends the updaters this layer contributes, one per trainable slot.
pub fn layer_updaters(
    layer: &Layer,
    updater_kind: &str,
    updaters: &mut Vec<Updater>,
) -> GenericResult<()> {
    use Layer::*;
    match layer {
        FullConnect(l) => l.get_updaters(updater_kind, updaters),
        Activation(_) => Ok(()),
        Softmax(_) => Ok(()),
    }
}
