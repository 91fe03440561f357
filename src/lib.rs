//! Prepare guest disk images captured on one hypervisor to boot on another.
//!
//! This crate ties the member crates together: [`convert`] inspects a
//! [`GuestImage`] and runs the conversion routine registered for the
//! destination hypervisor and the guest OS family.
//!
//! # Example
//!
//! ```no_run
//! use v2v::{ConvertOptions, GuestImage, Hypervisor, convert, guest_dir::DirectoryLauncher};
//!
//! # fn main() -> Result<(), v2v::V2vError> {
//! let launcher = DirectoryLauncher::new("/mnt/guest");
//! let image = GuestImage::new(launcher, "Slim.vmdk", false);
//!
//! convert(&image, Hypervisor::Kvm, &ConvertOptions::default())?;
//! # Ok(())
//! # }
//! ```

mod convert;

pub use v2v_core::{
    BoxedError, ContainerConverter, DiskFormat, GuestFs, GuestImage, GuestInfo, GuestLauncher,
    Hypervisor, OsType, V2vError,
};
pub use v2v_hive as hive;

pub use self::convert::{ConvertOptions, Converter, convert, converter};

/// Guest filesystem service over a mounted guest tree.
#[cfg(feature = "guest-dir")]
pub mod guest_dir {
    pub use v2v_guest_dir::*;
}

/// Operating system specific fixups.
pub mod os {
    /// Windows guest fixups.
    #[cfg(feature = "os-windows")]
    pub mod windows {
        pub use v2v_os_windows::*;
    }
}

/// Utilities.
#[cfg(feature = "utils")]
pub mod utils {
    pub use v2v_utils::*;
}
