use std::path::Path;

use crate::{DiskFormat, V2vError};

/// A trait for rewriting the on-disk container format of an image.
pub trait ContainerConverter {
    /// Converts the image at `source` into `format`, writing it to
    /// `destination`.
    fn convert(
        &self,
        source: &Path,
        destination: &Path,
        format: DiskFormat,
        compress: bool,
    ) -> Result<(), V2vError>;
}
