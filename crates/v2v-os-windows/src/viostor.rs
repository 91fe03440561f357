//! Plug-and-Play registration of the virtio block driver.
//!
//! Windows only binds a boot-start storage driver to a controller it has
//! never seen if the controller is listed in the critical device database
//! and the driver service already exists. The entries written here follow
//! [KB314082], with the SCSI adapter class in place of the IDE one.
//!
//! [KB314082]: https://support.microsoft.com/kb/314082

use v2v_hive::{Hive, HiveError, HiveStore};

use crate::GUEST_DRIVER_DIR;

/// Name of the driver service.
pub const VIOSTOR_SERVICE: &str = "viostor";

/// Name of the driver binary inside the driver package.
pub const VIOSTOR_DRIVER_FILE: &str = "VIOSTOR.SYS";

/// PCI vendor of the virtio block controller.
pub const VIOSTOR_VENDOR_ID: &str = "1af4";

/// PCI device of the virtio block controller.
pub const VIOSTOR_DEVICE_ID: &str = "1001";

/// Subsystem identifiers the virtio block controller is known to report.
pub const VIOSTOR_SUBSYSTEMS: [&str; 3] = ["00000000", "00020000", "00021af4"];

/// Class GUID of SCSI adapters.
pub const SCSI_ADAPTER_CLASS_GUID: &str = "{4D36E97B-E325-11CE-BFC1-08002BE10318}";

/// Critical device database key.
pub const CRITICAL_DEVICE_DATABASE: &str = "/CurrentControlSet/Control/CriticalDeviceDatabase";

/// Services key.
pub const SERVICES: &str = "/CurrentControlSet/Services";

/// `ErrorControl`: log the error and continue booting.
pub const SERVICE_ERROR_NORMAL: u32 = 1;

/// `Start`: loaded by the boot loader.
pub const SERVICE_BOOT_START: u32 = 0;

/// `Type`: kernel-mode driver.
pub const SERVICE_KERNEL_DRIVER: u32 = 1;

/// `Tag` of the driver within its load order group.
pub const VIOSTOR_TAG: u32 = 0x21;

/// Load order group of the driver.
pub const VIOSTOR_GROUP: &str = "SCSI miniport";

/// Returns the critical device database key name for a subsystem.
pub fn device_key(subsystem: &str) -> String {
    format!("pci#ven_{VIOSTOR_VENDOR_ID}&dev_{VIOSTOR_DEVICE_ID}&subsys_{subsystem}")
}

/// Returns the NT path of a file staged into the guest driver directory.
///
/// The path goes through the `\??\` object directory, so it does not
/// depend on drive letters being assigned when the boot loader reads it.
///
/// ```
/// # use v2v_os_windows::guest_image_path;
/// assert_eq!(
///     guest_image_path("VIOSTOR.SYS"),
///     r"\??\C:\v2v-virtio\VIOSTOR.SYS"
/// );
/// ```
pub fn guest_image_path(file: &str) -> String {
    format!(r"\??\C:{}\{file}", GUEST_DRIVER_DIR.replace('/', "\\"))
}

/// Picks the driver binary among the staged files.
///
/// The file name is matched case-insensitively; [`VIOSTOR_DRIVER_FILE`] is
/// assumed when none matches.
pub fn viostor_driver_file(staged: &[String]) -> &str {
    staged
        .iter()
        .find(|file| file.eq_ignore_ascii_case(VIOSTOR_DRIVER_FILE))
        .map(String::as_str)
        .unwrap_or(VIOSTOR_DRIVER_FILE)
}

/// Registers the virtio block driver in a system hive and commits it.
///
/// `image_path` is the NT path of the staged driver binary. Nothing is
/// committed if any step fails.
pub fn stub_viostor<Store>(mut hive: Hive<Store>, image_path: &str) -> Result<Store, HiveError>
where
    Store: HiveStore,
{
    tracing::info!(control_set = hive.control_set(), "Registering viostor");

    //
    // Critical device database entries.
    //

    for subsystem in VIOSTOR_SUBSYSTEMS {
        hive.navigate(CRITICAL_DEVICE_DATABASE)?;
        hive.add_subkey(&device_key(subsystem))?;
        hive.add_string("ClassGUID", SCSI_ADAPTER_CLASS_GUID)?;
        hive.add_string("Service", VIOSTOR_SERVICE)?;
    }

    //
    // Service entry.
    //

    hive.navigate(SERVICES)?;
    hive.add_subkey(VIOSTOR_SERVICE)?;
    hive.add_dword("ErrorControl", SERVICE_ERROR_NORMAL)?;
    hive.add_string("Group", VIOSTOR_GROUP)?;
    hive.add_dword("Start", SERVICE_BOOT_START)?;
    hive.add_dword("Tag", VIOSTOR_TAG)?;
    hive.add_dword("Type", SERVICE_KERNEL_DRIVER)?;
    hive.add_expand_string("ImagePath", image_path)?;

    hive.commit()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use v2v_hive::{MemoryStore, RegfHive, ValueType};

    use super::*;

    const IMAGE_PATH: &str = r"\??\C:\v2v-virtio\VIOSTOR.SYS";

    /// A system hive selecting `ControlSet001`.
    fn system_hive() -> Hive<MemoryStore> {
        let mut hive = Hive::new(MemoryStore::new()).unwrap();
        hive.add_subkey("Select").unwrap();
        hive.add_dword("Current", 1).unwrap();

        hive.navigate("/").unwrap();
        hive.add_subkey("ControlSet001").unwrap();
        hive.add_subkey("Control").unwrap();
        hive.add_subkey("CriticalDeviceDatabase").unwrap();

        hive.navigate("/ControlSet001").unwrap();
        hive.add_subkey("Services").unwrap();

        Hive::new(hive.into_store()).unwrap()
    }

    #[test]
    fn device_keys() {
        assert_eq!(device_key("00000000"), "pci#ven_1af4&dev_1001&subsys_00000000");
        assert_eq!(device_key("00020000"), "pci#ven_1af4&dev_1001&subsys_00020000");
        assert_eq!(device_key("00021af4"), "pci#ven_1af4&dev_1001&subsys_00021af4");
    }

    #[test]
    fn driver_file_is_matched_case_insensitively() {
        let staged = vec!["viostor.cat".to_owned(), "viostor.sys".to_owned()];
        assert_eq!(viostor_driver_file(&staged), "viostor.sys");
        assert_eq!(viostor_driver_file(&[]), VIOSTOR_DRIVER_FILE);
    }

    #[test]
    fn writes_critical_device_database_entries() {
        let store = stub_viostor(system_hive(), IMAGE_PATH).unwrap();
        let mut hive = Hive::new(store).unwrap();

        hive.navigate("/ControlSet001/Control/CriticalDeviceDatabase")
            .unwrap();
        assert_eq!(
            hive.subkeys().unwrap(),
            vec![
                "pci#ven_1af4&dev_1001&subsys_00000000".to_owned(),
                "pci#ven_1af4&dev_1001&subsys_00020000".to_owned(),
                "pci#ven_1af4&dev_1001&subsys_00021af4".to_owned(),
            ]
        );

        for subsystem in VIOSTOR_SUBSYSTEMS {
            hive.navigate("/ControlSet001/Control/CriticalDeviceDatabase")
                .unwrap();
            hive.navigate(&device_key(subsystem)).unwrap();

            assert_eq!(
                hive.read_string("ClassGUID").unwrap().as_deref(),
                Some("{4D36E97B-E325-11CE-BFC1-08002BE10318}")
            );
            assert_eq!(
                hive.read_string("Service").unwrap().as_deref(),
                Some("viostor")
            );
        }
    }

    #[test]
    fn writes_service_entry() {
        let store = stub_viostor(system_hive(), IMAGE_PATH).unwrap();
        let mut hive = Hive::new(store).unwrap();

        hive.navigate("/ControlSet001/Services").unwrap();
        assert_eq!(hive.subkeys().unwrap(), vec!["viostor".to_owned()]);

        hive.navigate("viostor").unwrap();
        assert_eq!(hive.read_dword("ErrorControl").unwrap(), Some(1));
        assert_eq!(
            hive.read_string("Group").unwrap().as_deref(),
            Some("SCSI miniport")
        );
        assert_eq!(hive.read_dword("Start").unwrap(), Some(0));
        assert_eq!(hive.read_dword("Tag").unwrap(), Some(0x21));
        assert_eq!(hive.read_dword("Type").unwrap(), Some(1));

        let image_path = hive.value("ImagePath").unwrap().unwrap();
        assert_eq!(image_path.kind(), Some(ValueType::ExpandString));
        assert_eq!(image_path.as_string().as_deref(), Some(IMAGE_PATH));

        let names = hive
            .store()
            .node_values(hive.cursor().node)
            .unwrap()
            .into_iter()
            .map(|value| value.name)
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            ["ErrorControl", "Group", "Start", "Tag", "Type", "ImagePath"]
        );
    }

    #[test]
    fn commits_exactly_once() {
        let store = stub_viostor(system_hive(), IMAGE_PATH).unwrap();
        assert_eq!(store.commits(), 1);
    }

    #[test]
    fn running_twice_does_not_duplicate_keys() {
        let store = stub_viostor(system_hive(), IMAGE_PATH).unwrap();
        let store = stub_viostor(Hive::new(store).unwrap(), IMAGE_PATH).unwrap();
        assert_eq!(store.commits(), 2);

        let mut hive = Hive::new(store).unwrap();
        hive.navigate("/ControlSet001/Control/CriticalDeviceDatabase")
            .unwrap();
        assert_eq!(hive.subkeys().unwrap().len(), 3);
        hive.navigate("/ControlSet001/Services").unwrap();
        assert_eq!(hive.subkeys().unwrap().len(), 1);
    }

    #[test]
    fn missing_control_key_aborts_without_commit() {
        let mut hive = Hive::new(MemoryStore::new()).unwrap();
        hive.add_subkey("Select").unwrap();
        hive.add_dword("Current", 1).unwrap();
        hive.navigate("/").unwrap();
        hive.add_subkey("ControlSet001").unwrap();

        let err = stub_viostor(Hive::new(hive.into_store()).unwrap(), IMAGE_PATH)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            HiveError::KeyNotFound { ref key, .. } if key == "Control"
        ));
    }

    #[test]
    fn missing_services_key_leaves_hive_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("SYSTEM");
        RegfHive::create(&path).unwrap();

        // The critical device database exists, so its entries are written
        // before the missing services key is noticed.
        let mut hive = Hive::open(&path, true).unwrap();
        hive.add_subkey("Select").unwrap();
        hive.add_dword("Current", 1).unwrap();
        hive.navigate("/").unwrap();
        hive.add_subkey("ControlSet001").unwrap();
        hive.add_subkey("Control").unwrap();
        hive.add_subkey("CriticalDeviceDatabase").unwrap();
        hive.commit().unwrap();

        let before = std::fs::read(&path).unwrap();

        let err = stub_viostor(Hive::open(&path, true).unwrap(), IMAGE_PATH)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            HiveError::KeyNotFound { ref key, .. } if key == "Services"
        ));
        assert_eq!(std::fs::read(&path).unwrap(), before);

        let mut hive = Hive::open(&path, false).unwrap();
        hive.navigate("/ControlSet001/Control/CriticalDeviceDatabase")
            .unwrap();
        assert!(hive.subkeys().unwrap().is_empty());
    }

    #[test]
    fn image_path_is_an_nt_path() {
        assert_eq!(
            guest_image_path(VIOSTOR_DRIVER_FILE),
            r"\??\C:\v2v-virtio\VIOSTOR.SYS"
        );
        assert_eq!(
            guest_image_path("viostor.sys"),
            r"\??\C:\v2v-virtio\viostor.sys"
        );
    }
}
