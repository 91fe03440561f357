//! Core types for guest image conversion.
//!
//! This crate defines the collaborator seams used by the conversion
//! routines: the guest filesystem service ([`GuestFs`]), the launcher that
//! establishes it ([`GuestLauncher`]), and the container format converter
//! ([`ContainerConverter`]). It also carries the shared error type.

mod converter;
mod error;
mod guest;
mod image;
mod info;

pub use self::{
    converter::ContainerConverter,
    error::{BoxedError, V2vError},
    guest::{GuestFs, GuestLauncher},
    image::GuestImage,
    info::{DiskFormat, GuestInfo, Hypervisor, OsType},
};
