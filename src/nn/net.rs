use anyhow::anyhow;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::integration::byte_utils::{write_i64, write_u32};
use crate::integration::serialization::write_num_vec;
use crate::nn::config::{BindData, NetConfigHelper};
use crate::nn::layers::{
    backprop_layer, forward_layer, load_layer, save_layer, Layer,
};
use crate::nn::meta::NetMetaModel;
use crate::nn::node::Node;
use crate::nn::storage::{GenericStorage, KeyAssigner};
use crate::nn::updaters::{start_round_updater, update_params, Updater};
use crate::utils::GenericResult;

/// The training graph: nodes, layers and updaters, owned together.
///
/// Lifecycle: unbuilt → `init_model` or `load_model` → ready → any number of
/// `forward`/`backprop`/`update` steps → freed on rebuild or drop.
pub struct NeuralNet {
    pub silent: bool,
    pub meta: NetMetaModel,
    cfg: NetConfigHelper,
    nodes: Vec<Node>,
    layers: Vec<Layer>,
    updaters: Vec<Updater>,
    params: GenericStorage,
    grads: GenericStorage,
    rng: StdRng,
}

impl NeuralNet {
    pub fn new() -> Self {
        Self {
            silent: false,
            meta: NetMetaModel::default(),
            cfg: NetConfigHelper::default(),
            nodes: Vec::new(),
            layers: Vec::new(),
            updaters: Vec::new(),
            params: GenericStorage::new(),
            grads: GenericStorage::new(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn set_param(&mut self, name: &str, val: &str) -> GenericResult<()> {
        if name == "seed" {
            let seed: u64 = val
                .parse()
                .map_err(|_| anyhow!("seed expects an integer, got: {}", val))?;
            self.rng = StdRng::seed_from_u64(seed);
        }
        if name == "silent" {
            self.silent = val
                .parse::<i32>()
                .map_err(|_| anyhow!("silent expects an integer, got: {}", val))?
                != 0;
        }
        self.cfg.set_param(&mut self.meta, name, val)
    }

    pub fn batch_size(&self) -> usize {
        self.cfg.batch_size
    }

    pub fn input(&mut self) -> &mut Node {
        &mut self.nodes[0]
    }

    pub fn output(&mut self) -> &mut Node {
        self.nodes.last_mut().expect("network not initialized")
    }

    pub fn output_features(&self) -> usize {
        self.nodes.last().map(|node| node.features()).unwrap_or(0)
    }

    /// Builds a fresh graph from the accumulated configuration: freezes the
    /// topology, allocates nodes, instantiates layers, binds parameters with
    /// fresh initialization and validates every node shape.
    pub fn init_model(&mut self) -> GenericResult<()> {
        self.free_space();
        self.meta.init_model();
        self.build_graph()?;
        self.cfg.config_layers(
            &self.meta,
            &mut self.layers,
            &mut self.updaters,
            BindData {
                nodes: &mut self.nodes,
                params: &mut self.params,
                grads: &mut self.grads,
                rng: &mut self.rng,
            },
            true,
        )?;
        self.init_nodes()
    }

    /// Rebuilds the graph from a persisted stream: meta block first, then one
    /// parameter block per layer in declaration order, then binding without
    /// fresh initialization.
    pub fn load_model(&mut self, src: &mut &[u8]) -> GenericResult<()> {
        self.free_space();
        self.meta.load(src)?;
        self.build_graph()?;
        for layer in &self.layers {
            load_layer(layer, &mut self.params, src)?;
        }
        self.cfg.config_layers(
            &self.meta,
            &mut self.layers,
            &mut self.updaters,
            BindData {
                nodes: &mut self.nodes,
                params: &mut self.params,
                grads: &mut self.grads,
                rng: &mut self.rng,
            },
            false,
        )?;
        self.init_nodes()
    }

    /// Sequential stream: meta block then per-layer blocks, no length
    /// prefixes. Reader and writer agree on record sizes through the layer
    /// kinds recorded in the meta block.
    pub fn save_model(&self, out: &mut Vec<u8>) {
        self.meta.save(out);
        for layer in &self.layers {
            save_layer(layer, &self.params, out);
        }
    }

    pub fn forward(&mut self, is_train: bool) -> GenericResult<()> {
        for layer in self.layers.iter_mut() {
            forward_layer(layer, &mut self.nodes, &self.params, is_train)?;
        }
        Ok(())
    }

    /// Reverse declaration order. The first layer only computes an input
    /// gradient when `prop_to_firstlayer` is set; normally nothing upstream
    /// consumes it.
    pub fn backprop(&mut self, prop_to_firstlayer: bool) -> GenericResult<()> {
        for i in (0..self.layers.len()).rev() {
            let prop = i != 0 || prop_to_firstlayer;
            backprop_layer(
                &mut self.layers[i],
                &mut self.nodes,
                &self.params,
                &mut self.grads,
                prop,
            )?;
        }
        Ok(())
    }

    /// Applies every updater once with the current epoch counter, then bumps
    /// the counter. Driven by the trainer, never by the layers.
    pub fn update(&mut self) -> GenericResult<()> {
        for updater in self.updaters.iter_mut() {
            update_params(
                updater,
                &mut self.params,
                &mut self.grads,
                self.meta.param.num_epoch_passed,
            )?;
        }
        self.meta.param.num_epoch_passed += 1;
        Ok(())
    }

    pub fn start_round(&mut self, round: i32) {
        for updater in self.updaters.iter_mut() {
            start_round_updater(updater, round);
        }
    }

    /// Feature-extraction side channel: forward through `stop_layer` only and
    /// append that node's activations to `out`, one row per batch instance.
    /// The `{total rows, feature width}` header is written on the first call.
    pub fn inference(
        &mut self,
        stop_layer: usize,
        total_length: i64,
        header_flag: &mut bool,
        out: &mut Vec<u8>,
    ) -> GenericResult<()> {
        if stop_layer == 0 || stop_layer >= self.layers.len() {
            return Err(anyhow!("incorrect stop layer: {}", stop_layer));
        }
        for layer in self.layers[..=stop_layer].iter_mut() {
            forward_layer(layer, &mut self.nodes, &self.params, false)?;
        }
        let node = &mut self.nodes[stop_layer];
        if !node.is_mat() {
            return Err(anyhow!("inference output node must be a matrix"));
        }
        if !*header_flag {
            *header_flag = true;
            write_i64(out, total_length);
            write_u32(out, node.features() as u32);
        }
        let pin = node.pin();
        write_num_vec(out, &pin.mat().to_owned().into_dyn());
        Ok(())
    }

    pub(crate) fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    fn build_graph(&mut self) -> GenericResult<()> {
        let mut assigner = KeyAssigner::new();
        for _ in 0..self.meta.param.num_nodes {
            self.nodes.push(Node::new());
        }
        for info in &self.meta.layers {
            if info.nindex_in == info.nindex_out {
                return Err(anyhow!(
                    "layer input and output must be distinct nodes, got {}",
                    info.nindex_in
                ));
            }
            if info.nindex_in >= self.meta.param.num_nodes
                || info.nindex_out >= self.meta.param.num_nodes
            {
                return Err(anyhow!("layer node index out of range"));
            }
            self.layers.push(Layer::from_info(info, &mut assigner));
        }
        Ok(())
    }

    /// Brackets every node in a pin scope once, surfacing shape-negotiation
    /// gaps before any data flows.
    fn init_nodes(&mut self) -> GenericResult<()> {
        for (i, node) in self.nodes.iter_mut().enumerate() {
            let shape = node.shape();
            if shape.iter().product::<usize>() == 0 {
                return Err(anyhow!("node[{}] has no negotiated shape", i));
            }
            let _pin = node.pin();
            if !self.silent {
                println!(
                    "node[{}].shape: {},{},{},{}",
                    i, shape[0], shape[1], shape[2], shape[3]
                );
            }
        }
        Ok(())
    }

    fn free_space(&mut self) {
        for node in self.nodes.iter_mut() {
            node.free_space();
        }
        self.nodes.clear();
        self.layers.clear();
        self.updaters.clear();
        self.params.clear();
        self.grads.clear();
    }
}

impl Default for NeuralNet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured_net(batch_size: usize) -> NeuralNet {
        let mut net = NeuralNet::new();
        net.set_param("silent", "1").unwrap();
        net.set_param("seed", "7").unwrap();
        net.set_param("input_shape", "1,1,4").unwrap();
        net.set_param("batch_size", &batch_size.to_string()).unwrap();
        net.set_param("eta", "0.1").unwrap();
        net.set_param("layer[+1]", "fullc").unwrap();
        net.set_param("nhidden", "3").unwrap();
        net.set_param("layer[+1]", "softmax").unwrap();
        net
    }

    #[test]
    fn test_init_model_builds_graph() {
        let mut net = configured_net(2);
        net.init_model().unwrap();
        assert_eq!(net.meta.param.num_nodes, 3);
        assert_eq!(net.input().shape(), [2, 1, 1, 4]);
        assert_eq!(net.output().shape(), [2, 1, 1, 3]);
        // one updater per fullc parameter slot
        assert_eq!(net.updaters.len(), 2);
    }

    #[test]
    fn test_reinit_is_safe() {
        let mut net = configured_net(2);
        net.init_model().unwrap();
        net.init_model().unwrap();
        assert_eq!(net.meta.param.num_nodes, 3);
        assert_eq!(net.layers.len(), 2);
    }

    #[test]
    fn test_update_bumps_epoch() {
        let mut net = configured_net(2);
        net.init_model().unwrap();
        assert_eq!(net.meta.param.num_epoch_passed, 0);
        net.update().unwrap();
        net.update().unwrap();
        assert_eq!(net.meta.param.num_epoch_passed, 2);
    }

    #[test]
    fn test_save_load_round_trip_bytes() {
        let mut net = configured_net(2);
        net.init_model().unwrap();
        net.meta.param.num_epoch_passed = 5;

        let mut bytes = Vec::new();
        net.save_model(&mut bytes);

        let mut other = configured_net(2);
        other.load_model(&mut bytes.as_slice()).unwrap();
        assert_eq!(other.meta.param.num_epoch_passed, 5);

        let mut again = Vec::new();
        other.save_model(&mut again);
        assert_eq!(bytes, again);
    }

    #[test]
    fn test_load_detects_config_drift() {
        let mut net = configured_net(2);
        net.init_model().unwrap();
        let mut bytes = Vec::new();
        net.save_model(&mut bytes);

        // a replayed configuration that disagrees with the frozen topology
        let mut other = NeuralNet::new();
        other.set_param("silent", "1").unwrap();
        other.set_param("input_shape", "1,1,4").unwrap();
        other.set_param("batch_size", "2").unwrap();
        other.set_param("layer[+1]", "fullc").unwrap();
        other.set_param("nhidden", "3").unwrap();
        other.set_param("layer[+2]", "softmax").unwrap();
        assert!(other.load_model(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_inference_header_and_rows() {
        let mut net = configured_net(2);
        net.init_model().unwrap();
        net.input().pin().mat_mut().fill(0.5);

        let mut out = Vec::new();
        let mut header_flag = false;
        net.inference(1, 4, &mut header_flag, &mut out).unwrap();
        assert!(header_flag);
        // header: i64 rows + u32 width, then 2 instances × 3 features
        assert_eq!(out.len(), 8 + 4 + 2 * 3 * 4);

        net.inference(1, 4, &mut header_flag, &mut out).unwrap();
        assert_eq!(out.len(), 8 + 4 + 2 * 2 * 3 * 4);

        assert!(net.inference(0, 4, &mut header_flag, &mut out).is_err());
        assert!(net.inference(2, 4, &mut header_flag, &mut out).is_err());
    }
}
