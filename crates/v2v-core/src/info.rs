use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::V2vError;

/// Destination hypervisor of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hypervisor {
    /// KVM with virtio devices.
    Kvm,

    /// Xen.
    Xen,
}

impl Hypervisor {
    /// Returns the lowercase name of the hypervisor.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kvm => "kvm",
            Self::Xen => "xen",
        }
    }
}

impl fmt::Display for Hypervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hypervisor {
    type Err = V2vError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kvm" => Ok(Self::Kvm),
            "xen" => Ok(Self::Xen),
            _ => Err(V2vError::UnknownHypervisor(s.to_owned())),
        }
    }
}

/// Operating system family of a guest, as reported by inspection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OsType {
    /// Microsoft Windows.
    Windows,

    /// Linux.
    Linux,

    /// Any other family, kept verbatim.
    Other(String),
}

impl OsType {
    /// Returns the lowercase name of the OS family.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for OsType {
    fn from(value: &str) -> Self {
        match value {
            "windows" => Self::Windows,
            "linux" => Self::Linux,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for OsType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<OsType> for String {
    fn from(value: OsType) -> Self {
        value.as_str().to_owned()
    }
}

/// On-disk container format of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    /// QEMU copy-on-write v2.
    Qcow2,

    /// VMware virtual disk.
    Vmdk,

    /// Anything else.
    Unknown,
}

impl DiskFormat {
    /// Infers the container format from the image file name suffix.
    ///
    /// The content of the file is never inspected.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy();

        if path.ends_with(".qcow2") {
            Self::Qcow2
        }
        else if path.ends_with(".vmdk") {
            Self::Vmdk
        }
        else {
            Self::Unknown
        }
    }

    /// Returns the name used by `qemu-img` for this format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qcow2 => "qcow2",
            Self::Vmdk => "vmdk",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents the result of inspecting a guest image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestInfo {
    /// The OS family.
    pub os_type: OsType,

    /// The distribution (`windows` for Windows guests).
    pub distro: String,

    /// The CPU architecture, e.g. `x86_64` or `i386`.
    pub arch: String,

    /// The major version of the OS.
    pub major: u32,

    /// The minor version of the OS.
    pub minor: u32,

    /// The hostname configured in the guest.
    pub hostname: String,

    /// The product name, if known.
    pub product: String,

    /// Filesystems found on the image.
    pub filesystems: Vec<String>,

    /// Mapping of mount point to device.
    pub mountpoints: BTreeMap<String, String>,
}

impl GuestInfo {
    /// Returns the `major.minor` version string.
    pub fn version(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}
