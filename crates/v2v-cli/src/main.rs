//! The `v2v` command-line tool.
//!
//! | Command    | Description                                          |
//! |------------|------------------------------------------------------|
//! | `inspect`  | Print what inspection finds in a guest image as JSON |
//! | `convert`  | Prepare a guest image to boot on another hypervisor  |
//! | `to-qcow2` | Rewrite an image as qcow2 with `qemu-img`            |

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use v2v::{
    ConvertOptions, GuestImage, Hypervisor, convert,
    guest_dir::DirectoryLauncher,
    utils::{QemuImg, to_qcow2},
};

/// Prepare guest disk images captured on one hypervisor to boot on another.
#[derive(Parser, Debug)]
#[command(name = "v2v", version, about, long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect a guest image and print the result as JSON
    Inspect {
        /// Path to the disk image
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Host directory where the guest filesystems are mounted
        #[arg(long, value_name = "DIR")]
        root: PathBuf,
    },

    /// Prepare a guest image to boot on the destination hypervisor
    Convert {
        /// Path to the disk image
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Host directory where the guest filesystems are mounted
        #[arg(long, value_name = "DIR")]
        root: PathBuf,

        /// Destination hypervisor (kvm or xen)
        #[arg(long, value_name = "NAME", default_value = "kvm")]
        hypervisor: Hypervisor,

        /// Directory holding the virtio driver packages
        #[arg(long, value_name = "DIR", default_value = "virtio")]
        virtio_base: PathBuf,

        /// Open the guest read-only
        #[arg(long)]
        readonly: bool,
    },

    /// Rewrite an image as qcow2
    ToQcow2 {
        /// Path to the source image
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// Path of the qcow2 image to write
        #[arg(value_name = "DESTINATION")]
        destination: PathBuf,

        /// Do not compress the output
        #[arg(long)]
        no_compress: bool,

        /// Path to the qemu-img program
        #[arg(long, value_name = "PROGRAM", default_value = "qemu-img")]
        qemu_img: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Inspect { image, root } => {
            let image = GuestImage::new(DirectoryLauncher::new(root), image, true);
            println!("{}", serde_json::to_string_pretty(image.info()?)?);
        }

        Command::Convert {
            image,
            root,
            hypervisor,
            virtio_base,
            readonly,
        } => {
            let image = GuestImage::new(DirectoryLauncher::new(root), image, readonly);
            convert(&image, hypervisor, &ConvertOptions { virtio_base })?;
            tracing::info!(path = %image.path().display(), %hypervisor, "Conversion complete");
        }

        Command::ToQcow2 {
            source,
            destination,
            no_compress,
            qemu_img,
        } => {
            let converter = QemuImg::new(qemu_img);
            if !to_qcow2(&converter, &source, &destination, !no_compress)? {
                tracing::warn!(path = %source.display(), "Image is already qcow2, nothing to do");
            }
        }
    }

    Ok(())
}
