use std::path::PathBuf;

use v2v_core::{GuestImage, GuestLauncher, Hypervisor, OsType, V2vError};

/// Options of a conversion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Host directory holding the driver packages, laid out as
    /// `<package>/<arch>`.
    pub virtio_base: PathBuf,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            virtio_base: PathBuf::from("virtio"),
        }
    }
}

/// A conversion routine for one hypervisor and OS family pair.
pub type Converter<Launcher> = fn(&GuestImage<Launcher>, &ConvertOptions) -> Result<(), V2vError>;

/// Looks up the conversion routine for a hypervisor and OS family.
///
/// Returns `None` if no routine exists for the pair.
pub fn converter<Launcher>(hypervisor: Hypervisor, os: &OsType) -> Option<Converter<Launcher>>
where
    Launcher: GuestLauncher,
{
    let routine: Converter<Launcher> = match (hypervisor, os) {
        #[cfg(feature = "os-windows")]
        (Hypervisor::Kvm, OsType::Windows) => kvm_windows,
        (Hypervisor::Kvm, OsType::Linux) => kvm_linux,
        (Hypervisor::Xen, OsType::Windows) => xen_windows,
        (Hypervisor::Xen, OsType::Linux) => xen_linux,
        _ => return None,
    };

    Some(routine)
}

/// Converts a guest image to run on `hypervisor`.
///
/// The image is inspected first; the routine is then picked by the
/// destination hypervisor and the OS family found by inspection.
pub fn convert<Launcher>(
    image: &GuestImage<Launcher>,
    hypervisor: Hypervisor,
    options: &ConvertOptions,
) -> Result<(), V2vError>
where
    Launcher: GuestLauncher,
{
    let os = &image.info()?.os_type;

    let Some(routine) = converter::<Launcher>(hypervisor, os) else {
        return Err(V2vError::NoConverter {
            hypervisor,
            os: os.clone(),
        });
    };

    tracing::info!(%hypervisor, %os, path = %image.path().display(), "Converting");
    routine(image, options)
}

#[cfg(feature = "os-windows")]
fn kvm_windows<Launcher>(
    image: &GuestImage<Launcher>,
    options: &ConvertOptions,
) -> Result<(), V2vError>
where
    Launcher: GuestLauncher,
{
    let fs = image.mounted()?;
    let info = image.info()?;

    v2v_os_windows::windows_common_fixups(fs, info, &options.virtio_base)
}

fn kvm_linux<Launcher>(
    _image: &GuestImage<Launcher>,
    _options: &ConvertOptions,
) -> Result<(), V2vError>
where
    Launcher: GuestLauncher,
{
    tracing::debug!("Linux guests need no changes for KVM");
    Ok(())
}

fn xen_windows<Launcher>(
    _image: &GuestImage<Launcher>,
    _options: &ConvertOptions,
) -> Result<(), V2vError>
where
    Launcher: GuestLauncher,
{
    Err(V2vError::NotImplemented {
        hypervisor: Hypervisor::Xen,
        os: OsType::Windows,
    })
}

fn xen_linux<Launcher>(
    _image: &GuestImage<Launcher>,
    _options: &ConvertOptions,
) -> Result<(), V2vError>
where
    Launcher: GuestLauncher,
{
    Err(V2vError::NotImplemented {
        hypervisor: Hypervisor::Xen,
        os: OsType::Linux,
    })
}
