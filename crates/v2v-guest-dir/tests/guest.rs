use std::path::Path;

use tempfile::TempDir;
use v2v_core::{GuestFs, GuestImage, GuestLauncher, OsType, V2vError};
use v2v_guest_dir::{DirectoryGuest, DirectoryLauncher};
use v2v_hive::{Hive, RegfHive};

/// Lays out a Windows 7 x64 guest tree.
fn windows_tree(root: &Path) {
    let config = root.join("Windows/System32/config");
    std::fs::create_dir_all(&config).unwrap();
    std::fs::create_dir_all(root.join("Windows/SysWOW64")).unwrap();

    let software = config.join("SOFTWARE");
    RegfHive::create(&software).unwrap();
    let mut hive = Hive::open(&software, true).unwrap();
    for key in ["Microsoft", "Windows NT", "CurrentVersion"] {
        hive.add_subkey(key).unwrap();
    }
    hive.add_string("ProductName", "Windows 7 Professional")
        .unwrap();
    hive.add_string("CurrentVersion", "6.1").unwrap();
    hive.commit().unwrap();

    let system = config.join("SYSTEM");
    RegfHive::create(&system).unwrap();
    let mut hive = Hive::open(&system, true).unwrap();
    hive.add_subkey("Select").unwrap();
    hive.add_dword("Current", 1).unwrap();
    hive.navigate("/").unwrap();
    for key in ["ControlSet001", "Control", "ComputerName", "ComputerName"] {
        hive.add_subkey(key).unwrap();
    }
    hive.add_string("ComputerName", "WIN7-GUEST").unwrap();
    hive.commit().unwrap();
}

#[test]
fn inspects_windows_guest() {
    let dir = TempDir::new().unwrap();
    windows_tree(dir.path());

    let guest = DirectoryGuest::new(dir.path(), true).unwrap();
    let info = guest.inspect().unwrap();

    assert_eq!(info.os_type, OsType::Windows);
    assert_eq!(info.distro, "windows");
    assert_eq!(info.arch, "x86_64");
    assert_eq!((info.major, info.minor), (6, 1));
    assert_eq!(info.version(), "6.1");
    assert_eq!(info.product, "Windows 7 Professional");
    assert_eq!(info.hostname, "WIN7-GUEST");
    assert_eq!(info.mountpoints.len(), 1);
    assert!(info.mountpoints.contains_key("/"));
}

#[test]
fn windows_without_syswow64_is_32_bit() {
    let dir = TempDir::new().unwrap();
    windows_tree(dir.path());
    std::fs::remove_dir(dir.path().join("Windows/SysWOW64")).unwrap();

    let guest = DirectoryGuest::new(dir.path(), true).unwrap();
    assert_eq!(guest.inspect().unwrap().arch, "i386");
}

#[test]
fn inspects_linux_guest() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("etc")).unwrap();
    std::fs::create_dir_all(dir.path().join("usr/bin")).unwrap();
    std::fs::write(
        dir.path().join("etc/os-release"),
        "NAME=\"Debian GNU/Linux\"\nID=debian\nVERSION_ID=\"12\"\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("etc/hostname"), "bookworm\n").unwrap();

    // The test binary stands in for a guest executable.
    let exe = std::env::current_exe().unwrap();
    std::fs::copy(exe, dir.path().join("usr/bin/ls")).unwrap();

    let guest = DirectoryGuest::new(dir.path(), true).unwrap();
    let info = guest.inspect().unwrap();

    assert_eq!(info.os_type, OsType::Linux);
    assert_eq!(info.distro, "debian");
    assert_eq!((info.major, info.minor), (12, 0));
    assert_eq!(info.hostname, "bookworm");

    if cfg!(target_os = "linux") && matches!(std::env::consts::ARCH, "x86_64" | "aarch64") {
        assert_eq!(info.arch, std::env::consts::ARCH);
    }
}

#[test]
fn empty_tree_is_not_an_image() {
    let dir = TempDir::new().unwrap();
    let guest = DirectoryGuest::new(dir.path(), true).unwrap();

    assert!(matches!(guest.inspect(), Err(V2vError::InvalidImage(_))));
}

#[test]
fn launcher_drives_guest_image() {
    let dir = TempDir::new().unwrap();
    windows_tree(dir.path());

    let image = GuestImage::new(DirectoryLauncher::new(dir.path()), "Slim.vmdk", true);
    let fs = image.mounted().unwrap();

    assert_eq!(fs.mounts().unwrap(), vec!["/".to_owned()]);
    assert_eq!(image.info().unwrap().os_type, OsType::Windows);
}

#[test]
fn launcher_rejects_missing_root() {
    let dir = TempDir::new().unwrap();
    let launcher = DirectoryLauncher::new(dir.path().join("missing"));

    assert!(matches!(
        launcher.launch(Path::new("disk.vmdk"), true),
        Err(V2vError::Guest(_))
    ));
}

#[cfg(unix)]
#[test]
fn symlinks_out_of_the_guest_are_refused() {
    use std::os::unix::fs::symlink;

    let dir = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let host = TempDir::new().unwrap();

    std::fs::write(outside.path().join("shadow"), "host secret").unwrap();
    symlink(outside.path(), dir.path().join("v2v-virtio")).unwrap();
    symlink(outside.path().join("shadow"), dir.path().join("shadow")).unwrap();
    symlink(outside.path().join("missing"), dir.path().join("dangling")).unwrap();

    let local = host.path().join("VIOSTOR.SYS");
    std::fs::write(&local, "driver").unwrap();

    let guest = DirectoryGuest::new(dir.path(), false).unwrap();

    assert!(guest.upload(&local, "/v2v-virtio/VIOSTOR.SYS").is_err());
    assert!(guest.upload(&local, "/dangling").is_err());
    assert!(guest.mkdir_all("/v2v-virtio/nested").is_err());
    assert!(guest.is_dir("/v2v-virtio").is_err());
    assert!(
        guest
            .download("/shadow", &host.path().join("shadow"))
            .is_err()
    );

    // Nothing was written to or read from the host.
    let mut entries = std::fs::read_dir(outside.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect::<Vec<_>>();
    entries.sort();
    assert_eq!(entries, ["shadow"]);
    assert!(!host.path().join("shadow").exists());
}

#[cfg(unix)]
#[test]
fn symlinks_within_the_guest_are_followed() {
    use std::os::unix::fs::symlink;

    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("etc")).unwrap();
    std::fs::create_dir_all(dir.path().join("usr/lib")).unwrap();
    std::fs::create_dir_all(dir.path().join("staging")).unwrap();
    std::fs::write(
        dir.path().join("usr/lib/os-release"),
        "ID=fedora\nVERSION_ID=40\n",
    )
    .unwrap();
    symlink("../usr/lib/os-release", dir.path().join("etc/os-release")).unwrap();
    symlink("staging", dir.path().join("drivers")).unwrap();

    let host = TempDir::new().unwrap();
    let local = host.path().join("viostor.sys");
    std::fs::write(&local, "driver").unwrap();

    let guest = DirectoryGuest::new(dir.path(), false).unwrap();

    let info = guest.inspect().unwrap();
    assert_eq!(info.os_type, OsType::Linux);
    assert_eq!(info.distro, "fedora");

    guest.upload(&local, "/drivers/viostor.sys").unwrap();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("staging/viostor.sys")).unwrap(),
        "driver"
    );
}
