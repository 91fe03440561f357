//! Windows registry hive editing.
//!
//! A [`Hive`] is a cursor-based navigator and editor layered over a
//! [`HiveStore`]. Two stores are provided: [`RegfHive`] edits a `regf` hive
//! file, and [`MemoryStore`] keeps the key tree in memory.
//!
//! ```no_run
//! use v2v_hive::Hive;
//!
//! # fn main() -> Result<(), v2v_hive::HiveError> {
//! let mut hive = Hive::open("system.hive", true)?;
//! hive.navigate("/CurrentControlSet/Services")?;
//! hive.add_subkey("viostor")?;
//! hive.add_dword("Start", 0)?;
//! hive.commit()?;
//! # Ok(())
//! # }
//! ```

mod error;
mod hive;
mod memory;
mod regf;
mod store;
pub mod value;

pub use self::{
    error::HiveError,
    hive::{CURRENT_CONTROL_SET, Cursor, Hive},
    memory::MemoryStore,
    regf::RegfHive,
    store::{HiveStore, NodeId, names_equal},
    value::{RegistryValue, ValueData, ValueType},
};
