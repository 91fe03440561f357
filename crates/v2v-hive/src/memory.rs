use crate::{HiveError, HiveStore, NodeId, RegistryValue, names_equal};

#[derive(Debug, Clone)]
struct MemoryNode {
    name: String,
    children: Vec<NodeId>,
    values: Vec<RegistryValue>,
}

/// An in-memory hive backing store.
///
/// Nothing is persisted. [`commit`] only counts how many times it was
/// called, which makes this store useful for checking editing sessions.
///
/// [`commit`]: HiveStore::commit
#[derive(Debug, Clone)]
pub struct MemoryStore {
    nodes: Vec<MemoryNode>,
    commits: usize,
}

impl MemoryStore {
    /// Creates a store containing only a root key.
    pub fn new() -> Self {
        Self {
            nodes: vec![MemoryNode {
                name: String::from("ROOT"),
                children: Vec::new(),
                values: Vec::new(),
            }],
            commits: 0,
        }
    }

    /// Returns how many times the store was committed.
    pub fn commits(&self) -> usize {
        self.commits
    }

    fn node(&self, node: NodeId) -> Result<&MemoryNode, HiveError> {
        self.nodes
            .get(node.0 as usize)
            .ok_or(HiveError::Corrupted("node out of range"))
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut MemoryNode, HiveError> {
        self.nodes
            .get_mut(node.0 as usize)
            .ok_or(HiveError::Corrupted("node out of range"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HiveStore for MemoryStore {
    fn root(&self) -> Result<NodeId, HiveError> {
        Ok(NodeId(0))
    }

    fn node_name(&self, node: NodeId) -> Result<String, HiveError> {
        Ok(self.node(node)?.name.clone())
    }

    fn node_children(&self, node: NodeId) -> Result<Vec<NodeId>, HiveError> {
        Ok(self.node(node)?.children.clone())
    }

    fn node_add_child(&mut self, node: NodeId, name: &str) -> Result<NodeId, HiveError> {
        if name.is_empty() || name.contains('\\') {
            return Err(HiveError::InvalidKeyName(name.to_owned()));
        }

        if self.node_child(node, name)?.is_some() {
            return Err(HiveError::KeyExists(name.to_owned()));
        }

        let child = NodeId(self.nodes.len() as u32);
        self.node_mut(node)?.children.push(child);
        self.nodes.push(MemoryNode {
            name: name.to_owned(),
            children: Vec::new(),
            values: Vec::new(),
        });

        Ok(child)
    }

    fn node_values(&self, node: NodeId) -> Result<Vec<RegistryValue>, HiveError> {
        Ok(self.node(node)?.values.clone())
    }

    fn node_set_value(&mut self, node: NodeId, value: &RegistryValue) -> Result<(), HiveError> {
        let values = &mut self.node_mut(node)?.values;

        match values
            .iter_mut()
            .find(|existing| names_equal(&existing.name, &value.name))
        {
            Some(existing) => *existing = value.clone(),
            None => values.push(value.clone()),
        }

        Ok(())
    }

    fn commit(&mut self) -> Result<(), HiveError> {
        self.commits += 1;
        Ok(())
    }
}
