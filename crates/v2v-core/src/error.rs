use std::process::ExitStatus;

use crate::{Hypervisor, OsType};

/// A boxed error coming from a collaborator layer.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// An error that can occur while converting a guest image.
#[derive(thiserror::Error, Debug)]
pub enum V2vError {
    /// An error occurred in the guest filesystem service.
    #[error(transparent)]
    Guest(BoxedError),

    /// An error occurred while editing a registry hive.
    #[error(transparent)]
    Hive(BoxedError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The image could not be inspected.
    #[error("Bad disk image: {0}")]
    InvalidImage(String),

    /// No driver package exists for the guest OS version.
    #[error("No virtio drivers for version \"{version}\"")]
    UnsupportedGuestVersion {
        /// The `major.minor` version of the guest.
        version: String,
    },

    /// No driver subdirectory exists for the guest CPU architecture.
    #[error("No virtio drivers for architecture \"{arch}\"")]
    UnsupportedArchitecture {
        /// The architecture reported by inspection.
        arch: String,
    },

    /// No conversion routine exists for the hypervisor and OS pair.
    #[error("No converter to \"{hypervisor}\" for platform \"{os}\"")]
    NoConverter {
        /// The destination hypervisor.
        hypervisor: Hypervisor,

        /// The guest OS family.
        os: OsType,
    },

    /// The conversion routine exists but is not implemented.
    #[error("No {hypervisor} specific conversion for {os} yet")]
    NotImplemented {
        /// The destination hypervisor.
        hypervisor: Hypervisor,

        /// The guest OS family.
        os: OsType,
    },

    /// An external program exited unsuccessfully.
    #[error("{program} failed with {status}")]
    ExternalTool {
        /// The program that was invoked.
        program: String,

        /// Its exit status.
        status: ExitStatus,
    },

    /// The hypervisor name is not recognized.
    #[error("Unknown hypervisor \"{0}\"")]
    UnknownHypervisor(String),

    /// Other error.
    #[error("{0}")]
    Other(&'static str),
}

impl V2vError {
    /// Wraps an error raised by a guest filesystem service.
    pub fn guest(err: impl Into<BoxedError>) -> Self {
        Self::Guest(err.into())
    }
}
