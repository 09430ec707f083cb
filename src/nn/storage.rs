use std::collections::HashMap;

use crate::utils::ArrayDynF;

/// Central storage for trainable parameters and their gradients.
/// Key: unique string per layer, assigned in declaration order.
/// Value: the layer's parameter (or gradient) arrays, slot-indexed.
/// Keeping parameters out of the layer objects lets updaters mutate them
/// without aliasing the layer graph, and makes serialization a plain walk.
pub type GenericStorage = HashMap<String, Vec<ArrayDynF>>;

pub fn clone_from_storage1(storage: &GenericStorage, key: &str) -> [ArrayDynF; 1] {
    let data = storage.get(key).unwrap();
    [data[0].clone()]
}

pub fn clone_from_storage2(storage: &GenericStorage, key: &str) -> [ArrayDynF; 2] {
    let data = storage.get(key).unwrap();
    [data[0].clone(), data[1].clone()]
}

pub fn get_mut_from_storage<'a>(
    storage: &'a mut GenericStorage,
    key: &str,
    index: usize,
) -> &'a mut ArrayDynF {
    let data = storage.get_mut(key).unwrap();
    data.get_mut(index).unwrap()
}

/// Hands out unique storage keys: repeated names get a numeric suffix in the
/// order they are requested, so declaration order fully determines every key.
pub struct KeyAssigner {
    keys: HashMap<String, u16>,
}

impl KeyAssigner {
    pub fn new() -> Self {
        Self { keys: HashMap::new() }
    }

    pub fn get_key(&mut self, name: String) -> String {
        let current = self.keys.get(&name).copied().unwrap_or(0);
        let key = format!("{}_{}", name, current);
        self.keys.insert(name, current + 1);
        key
    }
}

impl Default for KeyAssigner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_assigner_suffixes() {
        let mut assigner = KeyAssigner::new();
        assert_eq!(assigner.get_key("fullc_4_3".to_owned()), "fullc_4_3_0");
        assert_eq!(assigner.get_key("fullc_4_3".to_owned()), "fullc_4_3_1");
        assert_eq!(assigner.get_key("sigmoid".to_owned()), "sigmoid_0");
    }
}
