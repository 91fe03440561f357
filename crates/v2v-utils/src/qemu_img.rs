use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Command,
};

use v2v_core::{ContainerConverter, DiskFormat, V2vError};

/// Container converter driving the `qemu-img` program.
#[derive(Debug, Clone)]
pub struct QemuImg {
    program: PathBuf,
}

impl QemuImg {
    /// Creates a converter invoking `program`.
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
        }
    }

    /// Returns the program that is invoked.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Returns the arguments of a `qemu-img convert` invocation.
    pub fn convert_args(
        source: &Path,
        destination: &Path,
        format: DiskFormat,
        compress: bool,
    ) -> Vec<OsString> {
        let mut args = vec![OsString::from("convert")];

        if compress {
            args.push(OsString::from("-c"));
        }

        args.push(OsString::from("-O"));
        args.push(OsString::from(format.as_str()));
        args.push(source.into());
        args.push(destination.into());

        args
    }
}

impl Default for QemuImg {
    fn default() -> Self {
        Self::new("qemu-img")
    }
}

impl ContainerConverter for QemuImg {
    fn convert(
        &self,
        source: &Path,
        destination: &Path,
        format: DiskFormat,
        compress: bool,
    ) -> Result<(), V2vError> {
        if format == DiskFormat::Unknown {
            return Err(V2vError::Other("Cannot convert to an unknown disk format"));
        }

        let args = Self::convert_args(source, destination, format, compress);
        tracing::debug!(program = %self.program.display(), ?args, "Running");

        let status = Command::new(&self.program).args(&args).status()?;

        if !status.success() {
            tracing::error!(%status, "qemu-img failed");
            return Err(V2vError::ExternalTool {
                program: self.program.display().to_string(),
                status,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_arguments() {
        let args = QemuImg::convert_args(
            Path::new("in.vmdk"),
            Path::new("out.qcow2"),
            DiskFormat::Qcow2,
            true,
        );
        assert_eq!(args, ["convert", "-c", "-O", "qcow2", "in.vmdk", "out.qcow2"]);

        let args = QemuImg::convert_args(
            Path::new("in.qcow2"),
            Path::new("out.vmdk"),
            DiskFormat::Vmdk,
            false,
        );
        assert_eq!(args, ["convert", "-O", "vmdk", "in.qcow2", "out.vmdk"]);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let converter = QemuImg::new("/nonexistent/qemu-img");
        let err = converter
            .convert(
                Path::new("a.vmdk"),
                Path::new("b.img"),
                DiskFormat::Unknown,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, V2vError::Other(_)));
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let converter = QemuImg::new("/nonexistent/qemu-img");
        let err = converter
            .convert(
                Path::new("a.vmdk"),
                Path::new("b.qcow2"),
                DiskFormat::Qcow2,
                true,
            )
            .unwrap_err();
        assert!(matches!(err, V2vError::Io(_)));
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_is_reported() {
        let converter = QemuImg::new("false");
        let err = converter
            .convert(
                Path::new("a.vmdk"),
                Path::new("b.qcow2"),
                DiskFormat::Qcow2,
                true,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            V2vError::ExternalTool { ref program, .. } if program == "false"
        ));

        QemuImg::new("true")
            .convert(
                Path::new("a.vmdk"),
                Path::new("b.qcow2"),
                DiskFormat::Qcow2,
                true,
            )
            .unwrap();
    }
}
