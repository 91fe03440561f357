use std::{collections::BTreeMap, path::Path};

use object::{Architecture, Object as _};
use v2v_core::{GuestInfo, OsType, V2vError};
use v2v_hive::{Hive, HiveError};

use crate::{DirectoryGuest, Error};

/// Registry key holding the Windows version.
const WINDOWS_VERSION_KEY: &str = "/Microsoft/Windows NT/CurrentVersion";

/// Registry key holding the computer name.
const WINDOWS_COMPUTER_NAME_KEY: &str = "/CurrentControlSet/Control/ComputerName/ComputerName";

/// Binaries whose ELF header reveals the architecture of a Linux guest.
const LINUX_PROBE_BINARIES: &[&str] = &["/usr/bin/ls", "/bin/ls", "/usr/bin/env", "/bin/sh"];

pub(crate) fn inspect(guest: &DirectoryGuest) -> Result<GuestInfo, V2vError> {
    match guest.resolve_path("/windows/system32/config/software") {
        Ok(software) if guest.host_path(&software)?.is_file() => {
            return Ok(inspect_windows(guest, &software)?);
        }
        Ok(_) | Err(Error::NotFound(_)) => {}
        Err(err) => return Err(err.into()),
    }

    if guest.host_path("/etc/os-release")?.is_file() {
        return Ok(inspect_linux(guest)?);
    }

    Err(V2vError::InvalidImage(String::from("no operating system found")))
}

fn inspect_windows(guest: &DirectoryGuest, software: &str) -> Result<GuestInfo, Error> {
    let mut hive = Hive::open(guest.host_path(software)?, false)?;
    hive.navigate(WINDOWS_VERSION_KEY)?;

    let product = hive.read_string("ProductName")?.unwrap_or_default();

    // Windows 10 and later freeze `CurrentVersion` at 6.3.
    let (major, minor) = match (
        hive.read_dword("CurrentMajorVersionNumber")?,
        hive.read_dword("CurrentMinorVersionNumber")?,
    ) {
        (Some(major), Some(minor)) => (major, minor),
        _ => parse_version(&hive.read_string("CurrentVersion")?.unwrap_or_default()),
    };

    let arch = match guest.host_path(&guest.resolve_path("/windows/syswow64")?)?.is_dir() {
        true => "x86_64",
        false => "i386",
    };

    let system = guest.resolve_path("/windows/system32/config/system")?;
    let system = guest.host_path(&system)?;
    let hostname = match system.is_file() {
        true => windows_hostname(&system)?,
        false => None,
    };

    Ok(guest_info(
        guest,
        OsType::Windows,
        "windows",
        arch,
        (major, minor),
        hostname,
        product,
    ))
}

fn windows_hostname(system: &Path) -> Result<Option<String>, Error> {
    let mut hive = Hive::open(system, false)?;

    match hive.navigate(WINDOWS_COMPUTER_NAME_KEY) {
        Ok(()) => Ok(hive.read_string("ComputerName")?),
        Err(HiveError::KeyNotFound { .. }) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn inspect_linux(guest: &DirectoryGuest) -> Result<GuestInfo, Error> {
    let os_release = std::fs::read_to_string(guest.host_path("/etc/os-release")?)?;
    let os_release = parse_os_release(&os_release);

    let distro = os_release.get("ID").cloned().unwrap_or_default();
    let version = os_release.get("VERSION_ID").cloned().unwrap_or_default();
    let product = os_release.get("PRETTY_NAME").cloned().unwrap_or_default();

    let hostname = guest.host_path("/etc/hostname")?;
    let hostname = match hostname.is_file() {
        true => Some(std::fs::read_to_string(hostname)?.trim().to_owned()),
        false => None,
    };

    let arch = linux_arch(guest)?;

    Ok(guest_info(
        guest,
        OsType::Linux,
        &distro,
        arch,
        parse_version(&version),
        hostname,
        product,
    ))
}

fn linux_arch(guest: &DirectoryGuest) -> Result<&'static str, Error> {
    for binary in LINUX_PROBE_BINARIES {
        let path = match guest.host_path(binary) {
            Ok(path) => path,
            Err(Error::InvalidPath(_)) => continue,
            Err(err) => return Err(err),
        };

        match std::fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => {}
            _ => continue,
        }

        let data = std::fs::read(&path)?;
        let arch = match object::File::parse(&*data)?.architecture() {
            Architecture::X86_64 => "x86_64",
            Architecture::I386 => "i386",
            Architecture::Aarch64 => "aarch64",
            Architecture::Arm => "arm",
            Architecture::PowerPc64 => "ppc64",
            Architecture::S390x => "s390x",
            Architecture::Riscv64 => "riscv64",
            _ => "unknown",
        };

        tracing::debug!(%binary, arch, "Detected architecture");
        return Ok(arch);
    }

    tracing::warn!("No binary to detect the architecture from");
    Ok("unknown")
}

fn guest_info(
    guest: &DirectoryGuest,
    os_type: OsType,
    distro: &str,
    arch: &str,
    (major, minor): (u32, u32),
    hostname: Option<String>,
    product: String,
) -> GuestInfo {
    let device = guest.root().display().to_string();

    GuestInfo {
        os_type,
        distro: distro.to_owned(),
        arch: arch.to_owned(),
        major,
        minor,
        hostname: hostname.unwrap_or_else(|| String::from("unknown")),
        product,
        filesystems: vec![device.clone()],
        mountpoints: BTreeMap::from([(String::from("/"), device)]),
    }
}

/// Parses a `major[.minor[...]]` version string. Missing or malformed
/// components are zero.
fn parse_version(version: &str) -> (u32, u32) {
    let mut parts = version
        .trim()
        .split('.')
        .map(|part| part.parse::<u32>().unwrap_or(0));

    (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

fn parse_os_release(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|value| value.strip_suffix('"'))
                .or_else(|| {
                    value
                        .strip_prefix('\'')
                        .and_then(|value| value.strip_suffix('\''))
                })
                .unwrap_or(value);

            (key.trim().to_owned(), value.to_owned())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions() {
        assert_eq!(parse_version("6.1"), (6, 1));
        assert_eq!(parse_version("22.04"), (22, 4));
        assert_eq!(parse_version("9"), (9, 0));
        assert_eq!(parse_version(""), (0, 0));
        assert_eq!(parse_version("rolling"), (0, 0));
    }

    #[test]
    fn os_release() {
        let release = parse_os_release(
            "# comment\nNAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID='22.04'\n\nPRETTY_NAME=\"Ubuntu 22.04.4 LTS\"\n",
        );

        assert_eq!(release.get("ID").map(String::as_str), Some("ubuntu"));
        assert_eq!(release.get("VERSION_ID").map(String::as_str), Some("22.04"));
        assert_eq!(
            release.get("PRETTY_NAME").map(String::as_str),
            Some("Ubuntu 22.04.4 LTS")
        );
        assert_eq!(release.len(), 4);
    }
}
