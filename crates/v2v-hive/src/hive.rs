use std::path::Path;

use smallvec::SmallVec;

use crate::{
    HiveError, HiveStore, NodeId, RegfHive, RegistryValue, ValueData, ValueType,
};

/// The alias substituted by the name of the current control set.
pub const CURRENT_CONTROL_SET: &str = "CurrentControlSet";

/// Position of a [`Hive`] inside the key tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// The current key.
    pub node: NodeId,

    /// Whether the cursor is at the root key.
    pub at_root: bool,
}

/// An open registry hive with a navigation cursor.
///
/// Keys are addressed with `/` separated paths. A path starting with `/` is
/// absolute; any other path is relative to the cursor. When the cursor is at
/// the root, a leading `CurrentControlSet` segment is replaced by the name
/// of the control set selected by `Select\Current` (for example
/// `ControlSet001`).
///
/// Edits are held by the backing store until [`commit`] is called. Dropping
/// a `Hive` without committing discards them.
///
/// [`commit`]: Hive::commit
pub struct Hive<Store = RegfHive>
where
    Store: HiveStore,
{
    store: Store,
    cursor: Cursor,

    /// Name substituted for [`CURRENT_CONTROL_SET`], resolved once at open.
    control_set: String,
}

impl Hive<RegfHive> {
    /// Opens a hive file.
    pub fn open(path: impl AsRef<Path>, writable: bool) -> Result<Self, HiveError> {
        Self::new(RegfHive::open(path, writable)?)
    }
}

impl<Store> Hive<Store>
where
    Store: HiveStore,
{
    /// Creates a new hive on top of a backing store.
    ///
    /// The cursor starts at the root key.
    pub fn new(store: Store) -> Result<Self, HiveError> {
        let root = store.root()?;
        let control_set = resolve_control_set(&store, root)?;

        Ok(Self {
            store,
            cursor: Cursor {
                node: root,
                at_root: true,
            },
            control_set,
        })
    }

    /// Returns the name substituted for `CurrentControlSet`.
    pub fn control_set(&self) -> &str {
        &self.control_set
    }

    /// Returns the position of the cursor.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Returns the backing store without committing.
    pub fn into_store(self) -> Store {
        self.store
    }

    /// Moves the cursor along `path`.
    ///
    /// On failure the cursor is left wherever resolution stopped. Navigate
    /// from an absolute path before using the cursor again.
    pub fn navigate(&mut self, path: &str) -> Result<(), HiveError> {
        let mut segments = path.split('/').collect::<SmallVec<[&str; 8]>>();

        if segments.first() == Some(&"") {
            segments.remove(0);
            self.cursor = Cursor {
                node: self.store.root()?,
                at_root: true,
            };
        }

        segments.retain(|segment| !segment.is_empty());

        if self.cursor.at_root
            && let Some(first) = segments.first_mut()
            && *first == CURRENT_CONTROL_SET
        {
            *first = &self.control_set;
        }

        for segment in segments {
            match self.store.node_child(self.cursor.node, segment)? {
                Some(node) => {
                    self.cursor.node = node;
                    self.cursor.at_root = false;
                }
                None => {
                    return Err(HiveError::KeyNotFound {
                        key: segment.to_owned(),
                        path: path.to_owned(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Moves the cursor to the subkey `name`, creating it if it does not
    /// exist.
    pub fn add_subkey(&mut self, name: &str) -> Result<(), HiveError> {
        let node = match self.store.node_child(self.cursor.node, name)? {
            Some(node) => node,
            None => {
                tracing::debug!(name, "Creating subkey");
                self.store
                    .node_add_child(self.cursor.node, name)
                    .map_err(|err| HiveError::SubkeyCreateFailed {
                        name: name.to_owned(),
                        source: Box::new(err),
                    })?
            }
        };

        self.cursor = Cursor {
            node,
            at_root: false,
        };

        Ok(())
    }

    /// Writes a value under the current key.
    pub fn add_value(
        &mut self,
        value_type: ValueType,
        name: &str,
        data: ValueData<'_>,
    ) -> Result<(), HiveError> {
        let value = RegistryValue::encode(name, value_type, data)?;
        self.store.node_set_value(self.cursor.node, &value)
    }

    /// Writes a `REG_SZ` value under the current key.
    pub fn add_string(&mut self, name: &str, data: &str) -> Result<(), HiveError> {
        self.add_value(ValueType::String, name, ValueData::String(data))
    }

    /// Writes a `REG_EXPAND_SZ` value under the current key.
    pub fn add_expand_string(&mut self, name: &str, data: &str) -> Result<(), HiveError> {
        self.add_value(ValueType::ExpandString, name, ValueData::String(data))
    }

    /// Writes a `REG_DWORD` value under the current key.
    pub fn add_dword(&mut self, name: &str, data: u32) -> Result<(), HiveError> {
        self.add_value(ValueType::Dword, name, ValueData::Dword(data))
    }

    /// Reads a value under the current key.
    pub fn value(&self, name: &str) -> Result<Option<RegistryValue>, HiveError> {
        self.store.node_value(self.cursor.node, name)
    }

    /// Reads a string value under the current key.
    pub fn read_string(&self, name: &str) -> Result<Option<String>, HiveError> {
        Ok(self.value(name)?.as_ref().and_then(RegistryValue::as_string))
    }

    /// Reads a dword value under the current key.
    pub fn read_dword(&self, name: &str) -> Result<Option<u32>, HiveError> {
        Ok(self.value(name)?.as_ref().and_then(RegistryValue::as_dword))
    }

    /// Returns the names of the subkeys of the current key.
    pub fn subkeys(&self) -> Result<Vec<String>, HiveError> {
        self.store
            .node_children(self.cursor.node)?
            .into_iter()
            .map(|child| self.store.node_name(child))
            .collect()
    }

    /// Flushes all edits to the backing store and closes the hive.
    ///
    /// The store is handed back so that it can be inspected.
    pub fn commit(mut self) -> Result<Store, HiveError> {
        self.store.commit()?;
        Ok(self.store)
    }
}

fn resolve_control_set<Store>(store: &Store, root: NodeId) -> Result<String, HiveError>
where
    Store: HiveStore,
{
    let Some(select) = store.node_child(root, "Select")? else {
        tracing::debug!("Not a system hive");
        return Ok(String::from(CURRENT_CONTROL_SET));
    };

    match store
        .node_value(select, "Current")?
        .as_ref()
        .and_then(RegistryValue::as_dword)
    {
        Some(current) => {
            let control_set = format!("ControlSet{current:03}");
            tracing::debug!(%control_set, "System hive");
            Ok(control_set)
        }
        None => {
            tracing::warn!("Select key has no usable Current value");
            Ok(String::from(CURRENT_CONTROL_SET))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn system_store(current: Option<u32>) -> MemoryStore {
        let mut hive = Hive::new(MemoryStore::new()).unwrap();

        if let Some(current) = current {
            hive.add_subkey("Select").unwrap();
            hive.add_dword("Current", current).unwrap();
        }

        for control_set in ["ControlSet001", "ControlSet002", CURRENT_CONTROL_SET] {
            hive.navigate("/").unwrap();
            hive.add_subkey(control_set).unwrap();
            hive.add_subkey("X").unwrap();
            hive.add_string("Owner", control_set).unwrap();
        }

        hive.into_store()
    }

    #[test]
    fn alias_follows_select_current() {
        let mut hive = Hive::new(system_store(Some(2))).unwrap();
        assert_eq!(hive.control_set(), "ControlSet002");

        hive.navigate("/CurrentControlSet/X").unwrap();
        let via_alias = hive.cursor();

        hive.navigate("/ControlSet002/X").unwrap();
        assert_eq!(hive.cursor(), via_alias);
        assert_eq!(hive.read_string("Owner").unwrap().as_deref(), Some("ControlSet002"));
    }

    #[test]
    fn alias_is_zero_padded() {
        let hive = Hive::new(system_store(Some(12))).unwrap();
        assert_eq!(hive.control_set(), "ControlSet012");
    }

    #[test]
    fn missing_select_keeps_literal_name() {
        let mut hive = Hive::new(system_store(None)).unwrap();
        assert_eq!(hive.control_set(), CURRENT_CONTROL_SET);

        hive.navigate("/CurrentControlSet/X").unwrap();
        assert_eq!(
            hive.read_string("Owner").unwrap().as_deref(),
            Some(CURRENT_CONTROL_SET)
        );
    }

    #[test]
    fn alias_applies_only_at_root() {
        let mut hive = Hive::new(system_store(Some(1))).unwrap();
        hive.navigate("/ControlSet001").unwrap();
        hive.add_subkey(CURRENT_CONTROL_SET).unwrap();
        hive.add_string("Owner", "nested").unwrap();

        hive.navigate("/ControlSet001/CurrentControlSet").unwrap();
        assert_eq!(hive.read_string("Owner").unwrap().as_deref(), Some("nested"));

        // Relative navigation from the root still substitutes.
        hive.navigate("/").unwrap();
        assert!(hive.cursor().at_root);
        hive.navigate("CurrentControlSet/X").unwrap();
        assert_eq!(
            hive.read_string("Owner").unwrap().as_deref(),
            Some("ControlSet001")
        );
    }

    #[test]
    fn navigate_reports_missing_segment() {
        let mut hive = Hive::new(system_store(Some(1))).unwrap();

        let err = hive.navigate("/CurrentControlSet/Missing/X").unwrap_err();
        assert!(matches!(
            err,
            HiveError::KeyNotFound { ref key, ref path }
                if key == "Missing" && path == "/CurrentControlSet/Missing/X"
        ));
    }

    #[test]
    fn navigate_clears_at_root() {
        let mut hive = Hive::new(system_store(Some(1))).unwrap();
        assert!(hive.cursor().at_root);

        hive.navigate("/Select").unwrap();
        assert!(!hive.cursor().at_root);

        hive.navigate("/").unwrap();
        assert!(hive.cursor().at_root);
    }

    #[test]
    fn add_subkey_is_idempotent() {
        let mut hive = Hive::new(MemoryStore::new()).unwrap();

        hive.add_subkey("Services").unwrap();
        let first = hive.cursor();

        hive.navigate("/").unwrap();
        hive.add_subkey("Services").unwrap();
        let second = hive.cursor();

        assert_eq!(first, second);
        assert!(!second.at_root);

        hive.navigate("/").unwrap();
        assert_eq!(hive.subkeys().unwrap(), vec!["Services".to_owned()]);
    }

    #[test]
    fn values_round_trip_and_overwrite() {
        let mut hive = Hive::new(MemoryStore::new()).unwrap();
        hive.add_subkey("viostor").unwrap();

        hive.add_string("Group", "SCSI miniport").unwrap();
        hive.add_dword("Tag", 0x21).unwrap();
        hive.add_dword("tag", 0x22).unwrap();

        assert_eq!(
            hive.read_string("Group").unwrap().as_deref(),
            Some("SCSI miniport")
        );
        assert_eq!(hive.read_dword("Tag").unwrap(), Some(0x22));
        assert_eq!(hive.store().node_values(hive.cursor().node).unwrap().len(), 2);
    }

    #[test]
    fn unsupported_type_writes_nothing() {
        let mut hive = Hive::new(MemoryStore::new()).unwrap();

        let err = hive
            .add_value(ValueType::MultiString, "DependOnService", ValueData::String("RpcSs"))
            .unwrap_err();
        assert!(matches!(err, HiveError::UnsupportedValueType(ValueType::MultiString)));
        assert!(hive.value("DependOnService").unwrap().is_none());
    }

    #[test]
    fn commit_is_forwarded_once() {
        let mut hive = Hive::new(MemoryStore::new()).unwrap();
        hive.add_subkey("Services").unwrap();

        let store = hive.commit().unwrap();
        assert_eq!(store.commits(), 1);
    }
}
