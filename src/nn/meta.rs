use anyhow::anyhow;

use crate::integration::byte_utils::*;
use crate::utils::GenericResult;

/// Closed set of layer kinds, with stable wire ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    FullConnect,
    Sigmoid,
    Tanh,
    Relu,
    Softmax,
}

impl LayerKind {
    pub fn from_type_name(name: &str) -> GenericResult<Self> {
        match name {
            "fullc" => Ok(LayerKind::FullConnect),
            "sigmoid" => Ok(LayerKind::Sigmoid),
            "tanh" => Ok(LayerKind::Tanh),
            "relu" => Ok(LayerKind::Relu),
            "softmax" => Ok(LayerKind::Softmax),
            _ => Err(anyhow!("unknown layer type: {}", name)),
        }
    }

    pub fn wire_id(self) -> u32 {
        match self {
            LayerKind::FullConnect => 0,
            LayerKind::Sigmoid => 1,
            LayerKind::Tanh => 2,
            LayerKind::Relu => 3,
            LayerKind::Softmax => 4,
        }
    }

    pub fn from_wire_id(id: u32) -> DeserResult<Self> {
        match id {
            0 => Ok(LayerKind::FullConnect),
            1 => Ok(LayerKind::Sigmoid),
            2 => Ok(LayerKind::Tanh),
            3 => Ok(LayerKind::Relu),
            4 => Ok(LayerKind::Softmax),
            _ => Err(StreamDeserError::bad_enum_tag(id)),
        }
    }
}

/// One edge of the graph: which node feeds the layer and which node it
/// produces. Structural equality is what the bind pass checks against the
/// frozen topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerInfo {
    pub kind: LayerKind,
    pub nindex_in: usize,
    pub nindex_out: usize,
}

impl LayerInfo {
    fn save(&self, out: &mut Vec<u8>) {
        write_u32(out, self.kind.wire_id());
        write_u32(out, self.nindex_in as u32);
        write_u32(out, self.nindex_out as u32);
    }

    fn load(src: &mut &[u8]) -> DeserResult<Self> {
        Ok(Self {
            kind: LayerKind::from_wire_id(read_u32(src)?)?,
            nindex_in: read_u32(src)? as usize,
            nindex_out: read_u32(src)? as usize,
        })
    }
}

/// General shape and bookkeeping parameters of the network.
#[derive(Clone, Debug)]
pub struct NetParam {
    pub num_nodes: usize,
    pub num_layers: usize,
    /// Input shape (z, y, x), batch dimension excluded.
    pub shape_in: [usize; 3],
    /// Topology is frozen once set; shape directives are ignored afterwards.
    pub init_end: bool,
    /// Monotonic epoch counter, persisted with the model.
    pub num_epoch_passed: i64,
    /// Extension marker; the averaging trainer uses it to recognize models
    /// saved without its trailer.
    pub reserved_flag: u32,
}

impl Default for NetParam {
    fn default() -> Self {
        Self {
            num_nodes: 0,
            num_layers: 0,
            shape_in: [0, 0, 0],
            init_end: false,
            num_epoch_passed: 0,
            reserved_flag: 0,
        }
    }
}

impl NetParam {
    /// Full input-node shape for a given batch size.
    pub fn shape_in_batch(&self, nbatch: usize) -> [usize; 4] {
        [nbatch, self.shape_in[0], self.shape_in[1], self.shape_in[2]]
    }

    fn save(&self, out: &mut Vec<u8>) {
        write_u32(out, self.num_nodes as u32);
        write_u32(out, self.num_layers as u32);
        for dim in self.shape_in {
            write_u32(out, dim as u32);
        }
        write_u32(out, self.init_end as u32);
        write_i64(out, self.num_epoch_passed);
        write_u32(out, self.reserved_flag);
    }

    fn load(src: &mut &[u8]) -> DeserResult<Self> {
        let num_nodes = read_u32(src)? as usize;
        let num_layers = read_u32(src)? as usize;
        let mut shape_in = [0usize; 3];
        for dim in shape_in.iter_mut() {
            *dim = read_u32(src)? as usize;
        }
        Ok(Self {
            num_nodes,
            num_layers,
            shape_in,
            init_end: read_u32(src)? != 0,
            num_epoch_passed: read_i64(src)?,
            reserved_flag: read_u32(src)?,
        })
    }
}

/// Declarative description of the network: global parameters plus one
/// [`LayerInfo`] per declared layer.
#[derive(Clone, Debug, Default)]
pub struct NetMetaModel {
    pub param: NetParam,
    pub layers: Vec<LayerInfo>,
}

impl NetMetaModel {
    pub fn set_param(&mut self, name: &str, val: &str) -> GenericResult<()> {
        if name == "reset_epoch" {
            self.param.num_epoch_passed = val
                .parse()
                .map_err(|_| anyhow!("reset_epoch expects an integer, got: {}", val))?;
        }
        if self.param.init_end {
            return Ok(());
        }
        if name == "input_shape" {
            self.param.shape_in = parse_shape3(val)?;
        }
        Ok(())
    }

    /// Derives node count from the declared layers and freezes the topology.
    pub fn init_model(&mut self) {
        self.param.num_layers = self.layers.len();
        self.param.num_nodes = self
            .layers
            .iter()
            .map(|info| info.nindex_out + 1)
            .max()
            .unwrap_or(0);
        self.param.init_end = true;
    }

    /// Output node index of the most recently declared layer; 0 for an empty
    /// graph. Relative layer references resolve against this.
    pub fn last_node(&self) -> usize {
        self.layers.last().map(|info| info.nindex_out).unwrap_or(0)
    }

    pub fn save(&self, out: &mut Vec<u8>) {
        self.param.save(out);
        for info in &self.layers {
            info.save(out);
        }
    }

    pub fn load(&mut self, src: &mut &[u8]) -> DeserResult<()> {
        self.param = NetParam::load(src)?;
        self.layers = Vec::with_capacity(self.param.num_layers);
        for _ in 0..self.param.num_layers {
            self.layers.push(LayerInfo::load(src)?);
        }
        Ok(())
    }
}

/// Parses an `input_shape` value: exactly three comma-separated integers in
/// z,y,x order.
pub fn parse_shape3(val: &str) -> GenericResult<[usize; 3]> {
    let parts: Vec<&str> = val.split(',').collect();
    if parts.len() != 3 {
        return Err(anyhow!(
            "input_shape must be three consecutive integers without space, example: 1,1,200; got: {}",
            val
        ));
    }
    let mut shape = [0usize; 3];
    for (slot, part) in shape.iter_mut().zip(parts) {
        *slot = part.trim().parse().map_err(|_| {
            anyhow!(
                "input_shape must be three consecutive integers without space, example: 1,1,200; got: {}",
                val
            )
        })?;
    }
    Ok(shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_layer_meta() -> NetMetaModel {
        let mut meta = NetMetaModel::default();
        meta.set_param("input_shape", "1,1,4").unwrap();
        meta.layers.push(LayerInfo {
            kind: LayerKind::FullConnect,
            nindex_in: 0,
            nindex_out: 1,
        });
        meta.layers.push(LayerInfo {
            kind: LayerKind::Softmax,
            nindex_in: 1,
            nindex_out: 2,
        });
        meta
    }

    #[test]
    fn test_init_model_derives_node_count() {
        let mut meta = two_layer_meta();
        meta.init_model();
        assert_eq!(meta.param.num_nodes, 3);
        assert_eq!(meta.param.num_layers, 2);
        assert!(meta.param.init_end);
    }

    #[test]
    fn test_empty_graph() {
        let mut meta = NetMetaModel::default();
        assert_eq!(meta.last_node(), 0);
        meta.init_model();
        assert_eq!(meta.param.num_nodes, 0);
    }

    #[test]
    fn test_shape_frozen_after_init() {
        let mut meta = two_layer_meta();
        meta.init_model();
        meta.set_param("input_shape", "3,2,8").unwrap();
        assert_eq!(meta.param.shape_in, [1, 1, 4]);

        // reset_epoch still applies after the freeze
        meta.set_param("reset_epoch", "7").unwrap();
        assert_eq!(meta.param.num_epoch_passed, 7);
    }

    #[test]
    fn test_bad_input_shape_rejected() {
        let mut meta = NetMetaModel::default();
        assert!(meta.set_param("input_shape", "1,1").is_err());
        assert!(meta.set_param("input_shape", "1,1,a").is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut meta = two_layer_meta();
        meta.init_model();
        meta.param.num_epoch_passed = 42;

        let mut bytes = Vec::new();
        meta.save(&mut bytes);

        let mut loaded = NetMetaModel::default();
        loaded.load(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded.layers, meta.layers);
        assert_eq!(loaded.param.num_epoch_passed, 42);
        assert_eq!(loaded.param.shape_in, [1, 1, 4]);

        let mut again = Vec::new();
        loaded.save(&mut again);
        assert_eq!(bytes, again);
    }

    #[test]
    fn test_truncated_load_fails() {
        let mut meta = two_layer_meta();
        meta.init_model();
        let mut bytes = Vec::new();
        meta.save(&mut bytes);
        bytes.truncate(bytes.len() - 4);

        let mut loaded = NetMetaModel::default();
        assert!(loaded.load(&mut bytes.as_slice()).is_err());
    }
}
