use std::collections::{BTreeMap, BTreeSet};

use super::tensor::ConstantTensor;

/// Named constant tensors referenced by Constant nodes.
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    entries: BTreeMap<String, ConstantTensor>,
    next_suffix: usize,
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `tensor` under a fresh name derived from `hint` and returns that name.
    pub fn insert_unique(&mut self, hint: &str, tensor: ConstantTensor) -> String {
        let base = if hint.is_empty() { "const" } else { hint };
        let mut name = base.to_string();
        while self.entries.contains_key(&name) {
            name = format!("{base}_{}", self.next_suffix);
            self.next_suffix += 1;
        }
        self.entries.insert(name.clone(), tensor);
        name
    }

    pub fn get(&self, name: &str) -> Option<&ConstantTensor> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ConstantTensor> {
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConstantTensor)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut ConstantTensor)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Drops every entry whose name is not in `live`, returning how many were removed.
    pub fn retain_names(&mut self, live: &BTreeSet<String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|name, _| live.contains(name));
        before - self.entries.len()
    }
}
