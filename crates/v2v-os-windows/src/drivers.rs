use std::path::{Path, PathBuf};

use v2v_core::{GuestFs, V2vError};

/// Guest directory receiving the staged driver files.
pub const GUEST_DRIVER_DIR: &str = "/v2v-virtio";

/// Driver package directory for each supported `major.minor` version.
pub const VERSION_MAP: &[(&str, &str)] = &[
    ("6.2", "WIN8"), // Server 2012
    ("6.1", "WIN7"), // Server 2008 R2
    ("6.0", "WLH"),  // Server 2008
    ("5.2", "WNET"), // Server 2003, 2003 R2
];

/// Driver subdirectory for each supported CPU architecture.
pub const ARCH_MAP: &[(&str, &str)] = &[
    ("x86_64", "AMD64"),
    ("i386", "X86"),
];

fn lookup(map: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    map.iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, value)| *value)
}

/// Returns the driver package directory for a guest version.
pub fn driver_package(major: u32, minor: u32) -> Result<&'static str, V2vError> {
    let version = format!("{major}.{minor}");

    lookup(VERSION_MAP, &version).ok_or(V2vError::UnsupportedGuestVersion { version })
}

/// Returns the driver subdirectory for a guest architecture.
pub fn driver_arch(arch: &str) -> Result<&'static str, V2vError> {
    lookup(ARCH_MAP, arch).ok_or_else(|| V2vError::UnsupportedArchitecture {
        arch: arch.to_owned(),
    })
}

/// Resolves the host directory holding the drivers for a guest.
///
/// The version is checked before the architecture. Whether the returned
/// directory exists is not checked.
pub fn resolve_driver_source(
    major: u32,
    minor: u32,
    arch: &str,
    base: impl AsRef<Path>,
) -> Result<PathBuf, V2vError> {
    let package = driver_package(major, minor)?;
    let arch = driver_arch(arch)?;

    Ok(base.as_ref().join(package).join(arch))
}

/// Copies every regular file of `source` into [`GUEST_DRIVER_DIR`].
///
/// Subdirectories are not descended into. The guest directory is created
/// if it does not exist. Returns the names of the staged files, sorted.
pub fn stage_drivers(fs: &impl GuestFs, source: &Path) -> Result<Vec<String>, V2vError> {
    tracing::debug!(source = %source.display(), "Installing virtio driver files");

    let mut files = Vec::new();
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;

        if !entry.file_type()?.is_file() {
            continue;
        }

        files.push(entry.file_name().to_string_lossy().into_owned());
    }

    files.sort();

    if !fs.is_dir(GUEST_DRIVER_DIR)? {
        fs.mkdir_all(GUEST_DRIVER_DIR)?;
    }

    for file in &files {
        let local = source.join(file);
        let remote = format!("{GUEST_DRIVER_DIR}/{file}");

        tracing::debug!(local = %local.display(), %remote, "Uploading");
        fs.upload(&local, &remote)?;
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_versions() {
        let path = resolve_driver_source(6, 1, "x86_64", "virtio").unwrap();
        assert_eq!(path, Path::new("virtio/WIN7/AMD64"));

        let path = resolve_driver_source(5, 2, "i386", "/srv/virtio").unwrap();
        assert_eq!(path, Path::new("/srv/virtio/WNET/X86"));

        assert_eq!(driver_package(6, 2).unwrap(), "WIN8");
        assert_eq!(driver_package(6, 0).unwrap(), "WLH");
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err = resolve_driver_source(10, 0, "x86_64", "virtio").unwrap_err();
        assert!(matches!(
            err,
            V2vError::UnsupportedGuestVersion { ref version } if version == "10.0"
        ));
    }

    #[test]
    fn unknown_arch_is_rejected() {
        let err = resolve_driver_source(6, 1, "aarch64", "virtio").unwrap_err();
        assert!(matches!(
            err,
            V2vError::UnsupportedArchitecture { ref arch } if arch == "aarch64"
        ));
    }

    #[test]
    fn version_is_checked_before_arch() {
        let err = resolve_driver_source(10, 0, "aarch64", "virtio").unwrap_err();
        assert!(matches!(err, V2vError::UnsupportedGuestVersion { .. }));
    }
}
