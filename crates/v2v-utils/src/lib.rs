//! Utilities for v2v.
//!
//! Currently this is the `qemu-img` backed [`ContainerConverter`] and the
//! [`to_qcow2`] helper built on top of it.

mod qemu_img;

use std::path::Path;

use v2v_core::{ContainerConverter, DiskFormat, V2vError};

pub use self::qemu_img::QemuImg;

/// Rewrites an image as qcow2.
///
/// Images whose name already ends in `.qcow2` are left alone. Returns
/// whether a conversion took place.
pub fn to_qcow2(
    converter: &impl ContainerConverter,
    source: &Path,
    destination: &Path,
    compress: bool,
) -> Result<bool, V2vError> {
    if DiskFormat::from_path(source) == DiskFormat::Qcow2 {
        tracing::debug!(source = %source.display(), "Image is already qcow2");
        return Ok(false);
    }

    tracing::info!(
        source = %source.display(),
        destination = %destination.display(),
        compress,
        "Converting image to qcow2"
    );

    converter.convert(source, destination, DiskFormat::Qcow2, compress)?;
    Ok(true)
}
