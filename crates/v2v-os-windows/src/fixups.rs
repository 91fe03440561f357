use std::path::{Path, PathBuf};

use tempfile::TempDir;
use v2v_core::{GuestFs, GuestInfo, V2vError};
use v2v_hive::Hive;

use crate::{
    resolve_driver_source, stage_drivers, stub_viostor,
    viostor::{guest_image_path, viostor_driver_file},
};

/// Directory holding the registry hives of a Windows guest.
pub const HIVE_DIR: &str = "/windows/system32/config";

/// Returns the guest path of a hive, spelled as found on disk.
pub fn hive_path(fs: &impl GuestFs, hive: &str) -> Result<String, V2vError> {
    fs.case_sensitive_path(&format!("{HIVE_DIR}/{hive}"))
}

/// Downloads a registry hive of the guest into `dir`.
///
/// The hive is stored as `<dir>/<hive>.hive`. Returns the host path and the
/// guest path it was downloaded from.
pub fn download_hive(
    fs: &impl GuestFs,
    hive: &str,
    dir: &Path,
) -> Result<(PathBuf, String), V2vError> {
    let remote = hive_path(fs, hive)?;
    let local = dir.join(format!("{hive}.hive"));

    tracing::debug!(%remote, local = %local.display(), "Downloading hive");
    fs.download(&remote, &local)?;

    Ok((local, remote))
}

/// Prepares a Windows guest for the virtio block controller.
///
/// The driver package matching the guest is staged into the guest, the
/// driver is registered in the `SYSTEM` hive, and the edited hive is
/// uploaded back. The downloaded hive lives in a temporary directory that
/// is removed on return, whether or not the fixups succeed.
pub fn windows_common_fixups(
    fs: &impl GuestFs,
    info: &GuestInfo,
    virtio_base: &Path,
) -> Result<(), V2vError> {
    let source = resolve_driver_source(info.major, info.minor, &info.arch, virtio_base)?;

    let tmpdir = TempDir::new()?;
    let (system_hive, remote) = download_hive(fs, "system", tmpdir.path())?;
    tracing::debug!(path = %system_hive.display(), "Dropped system hive");

    let staged = stage_drivers(fs, &source)?;
    let image_path = guest_image_path(viostor_driver_file(&staged));

    let hive = Hive::open(&system_hive, true)?;
    stub_viostor(hive, &image_path)?;

    tracing::debug!(%remote, "Uploading system hive");
    fs.upload(&system_hive, &remote)?;

    Ok(())
}
