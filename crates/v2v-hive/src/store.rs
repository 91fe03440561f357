use crate::{HiveError, RegistryValue};

/// A reference to a key node inside a backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// A trait for implementing a hive backing store.
///
/// The store owns the binary representation of the hive. Mutations are
/// kept in memory until [`commit`] is called.
///
/// [`commit`]: HiveStore::commit
pub trait HiveStore {
    /// Returns the root key.
    fn root(&self) -> Result<NodeId, HiveError>;

    /// Returns the name of a key.
    fn node_name(&self, node: NodeId) -> Result<String, HiveError>;

    /// Returns the subkeys of a key.
    fn node_children(&self, node: NodeId) -> Result<Vec<NodeId>, HiveError>;

    /// Looks up a subkey by name.
    ///
    /// Names are compared case-insensitively.
    fn node_child(&self, node: NodeId, name: &str) -> Result<Option<NodeId>, HiveError> {
        for child in self.node_children(node)? {
            if names_equal(&self.node_name(child)?, name) {
                return Ok(Some(child));
            }
        }

        Ok(None)
    }

    /// Creates a new subkey.
    ///
    /// Fails with [`HiveError::KeyExists`] if the subkey already exists.
    fn node_add_child(&mut self, node: NodeId, name: &str) -> Result<NodeId, HiveError>;

    /// Returns the values of a key.
    fn node_values(&self, node: NodeId) -> Result<Vec<RegistryValue>, HiveError>;

    /// Looks up a value by name.
    ///
    /// Names are compared case-insensitively.
    fn node_value(&self, node: NodeId, name: &str) -> Result<Option<RegistryValue>, HiveError> {
        Ok(self
            .node_values(node)?
            .into_iter()
            .find(|value| names_equal(&value.name, name)))
    }

    /// Sets a value, replacing any existing value with the same name.
    fn node_set_value(&mut self, node: NodeId, value: &RegistryValue) -> Result<(), HiveError>;

    /// Writes all pending changes to persistent storage.
    fn commit(&mut self) -> Result<(), HiveError>;
}

/// Compares two key or value names the way the registry does.
pub fn names_equal(a: &str, b: &str) -> bool {
    a.chars()
        .map(upcase)
        .eq(b.chars().map(upcase))
}

/// Upcases a single character, keeping characters whose uppercase form
/// is not a single character.
pub(crate) fn upcase(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}
