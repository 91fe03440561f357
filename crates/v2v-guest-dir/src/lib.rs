//! Guest filesystem service over a guest tree mounted on the host.
//!
//! The guest filesystems are expected to be reachable under a host
//! directory already, for example after `guestmount -a disk.vmdk -i /mnt`.
//! Guest paths are resolved relative to that directory. Inspection reads
//! the guest configuration directly: the registry hives of a Windows guest,
//! `/etc/os-release` and the ELF header of a system binary of a Linux guest.

mod error;
mod inspect;

use std::{
    cell::RefCell,
    path::{Component, Path, PathBuf},
};

use v2v_core::{GuestFs, GuestInfo, GuestLauncher, V2vError};

pub use self::error::Error;

/// Launches [`DirectoryGuest`] sessions over a fixed guest root.
#[derive(Debug, Clone)]
pub struct DirectoryLauncher {
    root: PathBuf,
}

impl DirectoryLauncher {
    /// Creates a new launcher for the guest tree at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl GuestLauncher for DirectoryLauncher {
    type Fs = DirectoryGuest;

    fn launch(&self, image: &Path, readonly: bool) -> Result<Self::Fs, V2vError> {
        tracing::debug!(
            image = %image.display(),
            root = %self.root.display(),
            "Using mounted guest tree"
        );

        Ok(DirectoryGuest::new(&self.root, readonly)?)
    }
}

/// A guest whose filesystems are mounted under a host directory.
#[derive(Debug)]
pub struct DirectoryGuest {
    root: PathBuf,
    readonly: bool,

    /// The root with every symlink resolved.
    canonical_root: PathBuf,

    /// Mount points recorded by [`GuestFs::mount`].
    mounts: RefCell<Vec<String>>,
}

impl DirectoryGuest {
    /// Creates a new guest over the tree at `root`.
    pub fn new(root: impl AsRef<Path>, readonly: bool) -> Result<Self, Error> {
        let root = root.as_ref();

        if !root.is_dir() {
            return Err(Error::NotADirectory(root.to_path_buf()));
        }

        Ok(Self {
            root: root.to_path_buf(),
            readonly,
            canonical_root: root.canonicalize()?,
            mounts: RefCell::new(Vec::new()),
        })
    }

    /// Returns the host directory holding the guest tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns whether the guest is read-only.
    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// Maps an absolute guest path onto the host.
    ///
    /// Symlinks in the guest tree are followed as long as they resolve to
    /// somewhere inside the guest root. A path that leaves the root, whether
    /// through `..` or through a symlink, is an [`Error::InvalidPath`].
    pub fn host_path(&self, path: &str) -> Result<PathBuf, Error> {
        let relative = path
            .strip_prefix('/')
            .ok_or_else(|| Error::InvalidPath(path.to_owned()))?;

        let mut host = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(name) => host.push(name),
                Component::CurDir => {}
                _ => return Err(Error::InvalidPath(path.to_owned())),
            }
        }

        self.ensure_confined(&host, path)?;
        Ok(host)
    }

    /// Resolves each component of a guest path case-insensitively.
    ///
    /// Components that exist are returned with their on-disk spelling. The
    /// final component is returned as given if it does not exist.
    pub fn resolve_path(&self, path: &str) -> Result<String, Error> {
        // Validate before walking the host tree.
        self.host_path(path)?;

        let segments = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>();

        let mut host = self.root.clone();
        let mut resolved = String::new();

        for (index, segment) in segments.iter().enumerate() {
            let name = match find_entry(&host, segment)? {
                Some(name) => name,
                None if index + 1 == segments.len() => (*segment).to_owned(),
                None => return Err(Error::NotFound(path.to_owned())),
            };

            host.push(&name);
            resolved.push('/');
            resolved.push_str(&name);
        }

        if resolved.is_empty() {
            resolved.push('/');
        }

        Ok(resolved)
    }

    /// Checks that the deepest existing ancestor of `host` resolves to a
    /// location inside the guest root.
    ///
    /// Anything below that ancestor does not exist yet and is created inside
    /// it.
    fn ensure_confined(&self, host: &Path, path: &str) -> Result<(), Error> {
        let existing = host
            .ancestors()
            .find(|ancestor| ancestor.symlink_metadata().is_ok())
            .unwrap_or(&self.root);

        // A dangling symlink fails to resolve and is rejected too.
        match existing.canonicalize() {
            Ok(resolved) if resolved.starts_with(&self.canonical_root) => Ok(()),
            _ => {
                tracing::warn!(
                    path,
                    host = %existing.display(),
                    "Guest path escapes the guest root"
                );
                Err(Error::InvalidPath(path.to_owned()))
            }
        }
    }

    fn ensure_writable(&self) -> Result<(), Error> {
        match self.readonly {
            true => Err(Error::ReadOnly),
            false => Ok(()),
        }
    }
}

/// Looks up a directory entry by name, ignoring case.
///
/// An exact match wins over a case-insensitive one.
fn find_entry(dir: &Path, name: &str) -> Result<Option<String>, Error> {
    if !dir.is_dir() {
        return Ok(None);
    }

    if dir.join(name).exists() {
        return Ok(Some(name.to_owned()));
    }

    let lowercase = name.to_lowercase();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?.file_name().to_string_lossy().into_owned();

        if entry.to_lowercase() == lowercase {
            return Ok(Some(entry));
        }
    }

    Ok(None)
}

impl GuestFs for DirectoryGuest {
    fn inspect(&self) -> Result<GuestInfo, V2vError> {
        inspect::inspect(self)
    }

    fn mounts(&self) -> Result<Vec<String>, V2vError> {
        Ok(self.mounts.borrow().clone())
    }

    fn mount(&self, mountpoint: &str, device: &str, readonly: bool) -> Result<(), V2vError> {
        let mut mounts = self.mounts.borrow_mut();

        if mounts.iter().any(|mounted| mounted == mountpoint) {
            return Err(Error::AlreadyMounted(mountpoint.to_owned()).into());
        }

        if !self.host_path(mountpoint)?.is_dir() {
            return Err(Error::NotFound(mountpoint.to_owned()).into());
        }

        tracing::trace!(mountpoint, device, readonly, "Recording mount");
        mounts.push(mountpoint.to_owned());

        Ok(())
    }

    fn download(&self, remote: &str, local: &Path) -> Result<(), V2vError> {
        std::fs::copy(self.host_path(remote)?, local)?;
        Ok(())
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<(), V2vError> {
        self.ensure_writable()?;
        std::fs::copy(local, self.host_path(remote)?)?;
        Ok(())
    }

    fn mkdir_all(&self, path: &str) -> Result<(), V2vError> {
        self.ensure_writable()?;
        std::fs::create_dir_all(self.host_path(path)?)?;
        Ok(())
    }

    fn is_dir(&self, path: &str) -> Result<bool, V2vError> {
        Ok(self.host_path(path)?.is_dir())
    }

    fn case_sensitive_path(&self, path: &str) -> Result<String, V2vError> {
        Ok(self.resolve_path(path)?)
    }
}
