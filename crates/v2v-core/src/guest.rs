use std::path::Path;

use crate::{GuestInfo, V2vError};

/// A trait for implementing a guest filesystem and inspection service.
///
/// All paths passed to the methods of this trait are absolute guest paths
/// using `/` as separator. Host paths are [`Path`]s.
pub trait GuestFs {
    /// Inspects the image and reports the operating system found on it.
    fn inspect(&self) -> Result<GuestInfo, V2vError>;

    /// Returns the mount points that are currently mounted.
    fn mounts(&self) -> Result<Vec<String>, V2vError>;

    /// Mounts `device` at `mountpoint`.
    fn mount(&self, mountpoint: &str, device: &str, readonly: bool) -> Result<(), V2vError>;

    /// Copies a guest file to the host.
    fn download(&self, remote: &str, local: &Path) -> Result<(), V2vError>;

    /// Copies a host file into the guest.
    fn upload(&self, local: &Path, remote: &str) -> Result<(), V2vError>;

    /// Creates a guest directory and all of its parents.
    fn mkdir_all(&self, path: &str) -> Result<(), V2vError>;

    /// Checks whether a guest path is a directory.
    fn is_dir(&self, path: &str) -> Result<bool, V2vError>;

    /// Resolves a case-insensitive guest path to its on-disk spelling.
    ///
    /// The final component does not need to exist.
    fn case_sensitive_path(&self, path: &str) -> Result<String, V2vError>;
}

/// A trait for establishing a [`GuestFs`] session for an image.
pub trait GuestLauncher {
    /// The session type produced by this launcher.
    type Fs: GuestFs;

    /// Launches a session for the image at `image`.
    fn launch(&self, image: &Path, readonly: bool) -> Result<Self::Fs, V2vError>;
}
