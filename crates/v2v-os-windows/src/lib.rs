//! Windows guest fixups.
//!
//! Converting a Windows guest to KVM requires the virtio block driver to be
//! present on the guest and registered so that the boot loader starts it.
//! [`windows_common_fixups`] does both: it stages the driver package that
//! matches the guest version and architecture, and injects the registry
//! entries with [`stub_viostor`].

mod drivers;
mod fixups;
pub mod viostor;

pub use self::{
    drivers::{
        ARCH_MAP, GUEST_DRIVER_DIR, VERSION_MAP, driver_arch, driver_package,
        resolve_driver_source, stage_drivers,
    },
    fixups::{HIVE_DIR, download_hive, hive_path, windows_common_fixups},
    viostor::{guest_image_path, stub_viostor},
};
