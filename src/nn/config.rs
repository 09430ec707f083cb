use anyhow::anyhow;
use rand::rngs::StdRng;

use crate::nn::layers::{
    init_layer, init_layer_params, layer_updaters, set_layer_param, Layer,
};
use crate::nn::meta::{LayerInfo, LayerKind, NetMetaModel};
use crate::nn::node::Node;
use crate::nn::storage::GenericStorage;
use crate::nn::updaters::{init_updater, set_updater_param, Updater};
use crate::utils::GenericResult;

/// Everything the bind pass mutates, bundled so the replay functions stay
/// readable.
pub struct BindData<'a> {
    pub nodes: &'a mut [Node],
    pub params: &'a mut GenericStorage,
    pub grads: &'a mut GenericStorage,
    pub rng: &'a mut StdRng,
}

/// Two-pass configuration binder. Directives accumulate into two ordered
/// logs: `defcfg` (globals, applied to every layer and updater) and `netcfg`
/// (the layer-scoped stream, replayed positionally at bind time). The logs
/// are never collapsed into a map: duplicate names and the position of
/// `layer[...]` markers carry meaning.
pub struct NetConfigHelper {
    updater_kind: String,
    pub batch_size: usize,
    netcfg: Vec<(String, String)>,
    defcfg: Vec<(String, String)>,
    netcfg_mode: u8,
}

impl Default for NetConfigHelper {
    fn default() -> Self {
        Self {
            updater_kind: "sgd".to_owned(),
            batch_size: 100,
            netcfg: Vec::new(),
            defcfg: Vec::new(),
            netcfg_mode: 0,
        }
    }
}

impl NetConfigHelper {
    pub fn set_param(
        &mut self,
        meta: &mut NetMetaModel,
        name: &str,
        val: &str,
    ) -> GenericResult<()> {
        meta.set_param(name, val)?;
        if name == "batch_size" {
            self.batch_size = val
                .parse()
                .map_err(|_| anyhow!("batch_size expects an integer, got: {}", val))?;
        }
        if name == "updater" {
            self.updater_kind = val.to_owned();
        }
        if name == "netconfig" && val == "start" {
            self.netcfg_mode = 1;
        }
        if name == "netconfig" && val == "end" {
            self.netcfg_mode = 0;
        }

        if name.starts_with("layer[") {
            self.netcfg_mode = 2;
            if !meta.param.init_end {
                let info = get_layer_info(name, val, meta.last_node())?;
                meta.layers.push(info);
                meta.param.num_layers = meta.layers.len();
            }
        }
        if self.netcfg_mode == 2 {
            self.netcfg.push((name.to_owned(), val.to_owned()));
        } else {
            self.defcfg.push((name.to_owned(), val.to_owned()));
        }
        Ok(())
    }

    /// Binding pass over already-instantiated layer objects. The first replay
    /// re-derives every layer reference and checks it against the frozen
    /// topology before forwarding parameters; the second replay builds and
    /// configures updaters, which needs the shapes the first pass settled.
    pub fn config_layers(
        &self,
        meta: &NetMetaModel,
        layers: &mut [Layer],
        updaters: &mut Vec<Updater>,
        data: BindData<'_>,
        init_model: bool,
    ) -> GenericResult<()> {
        let mut layer_index: Option<usize> = None;
        let mut top_node = 0;
        for (name, val) in &self.netcfg {
            if name.starts_with("layer[") {
                let index = layer_index.map(|i| i + 1).unwrap_or(0);
                if index >= meta.param.num_layers {
                    return Err(anyhow!(
                        "config setting mismatch: more layer sections than declared layers"
                    ));
                }
                let info = get_layer_info(name, val, top_node)?;
                top_node = info.nindex_out;
                if info != meta.layers[index] {
                    return Err(anyhow!("config setting mismatch at layer {}", index));
                }
                for (def_name, def_val) in &self.defcfg {
                    set_layer_param(&mut layers[index], def_name, def_val)?;
                }
                layer_index = Some(index);
            } else {
                let index = layer_index
                    .ok_or_else(|| anyhow!("directive before any layer section: {}", name))?;
                set_layer_param(&mut layers[index], name, val)?;
            }
        }

        if let Some(node0) = data.nodes.first_mut() {
            node0.reshape(meta.param.shape_in_batch(self.batch_size));
        }
        for layer in layers.iter_mut() {
            init_layer(layer, data.nodes, data.params, data.grads)?;
            if init_model {
                init_layer_params(layer, data.params, data.rng)?;
            }
        }

        let mut layer_index: Option<usize> = None;
        let mut ustart = 0;
        for (name, val) in &self.netcfg {
            if name.starts_with("layer[") {
                let index = layer_index.map(|i| i + 1).unwrap_or(0);
                ustart = updaters.len();
                layer_updaters(&layers[index], &self.updater_kind, updaters)?;
                for updater in updaters[ustart..].iter_mut() {
                    for (def_name, def_val) in &self.defcfg {
                        set_updater_param(updater, def_name, def_val)?;
                    }
                }
                layer_index = Some(index);
            } else {
                for updater in updaters[ustart..].iter_mut() {
                    set_updater_param(updater, name, val)?;
                }
            }
        }
        for updater in updaters.iter_mut() {
            init_updater(updater, data.params)?;
        }
        Ok(())
    }
}

/// Parses a layer reference plus its `type[:tag]` value. Two reference
/// syntaxes: absolute `layer[A->B]`, or relative `layer[+B]` which binds
/// input to `top_node` and output to `top_node + B`.
pub fn get_layer_info(name: &str, val: &str, top_node: usize) -> GenericResult<LayerInfo> {
    let inner = name
        .strip_prefix("layer[")
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| invalid_ref(name))?;

    let (nindex_in, nindex_out) = if let Some(offset) = inner.strip_prefix('+') {
        let offset: usize = offset.parse().map_err(|_| invalid_ref(name))?;
        (top_node, top_node + offset)
    } else {
        let (a, b) = inner.split_once("->").ok_or_else(|| invalid_ref(name))?;
        (
            a.parse().map_err(|_| invalid_ref(name))?,
            b.parse().map_err(|_| invalid_ref(name))?,
        )
    };

    // only the type token matters; the tag is free-form metadata
    let type_name = val.split(':').next().unwrap_or("");
    let kind = LayerKind::from_type_name(type_name)?;
    Ok(LayerInfo {
        kind,
        nindex_in,
        nindex_out,
    })
}

fn invalid_ref(name: &str) -> anyhow::Error {
    anyhow!(
        "invalid config format, correct example: layer[1->2]; got: {}",
        name
    )
}
