// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! Provides [`BootError`], which encapsulates other errors

use thiserror::Error;

/// An `Error` resulting from the program.
#[derive(Error, Debug)]
pub enum BootError {
    /// An error with UEFI, or a service from the [`uefi`] crate.
    #[error("UEFI Error: {0}")]
    Uefi(#[from] uefi::Error),

    /// A `String` could not be converted into a `CString16`
    #[error("String Conversion Error: {0}")]
    StrError(#[from] crate::system::helper::StrError),

    /// An error occurred while performing filesystem operations.
    #[error("Filesystem Error: {0}")]
    FsError(#[from] crate::system::fs::FsError),

    /// An error occurred while reading or writing a UEFI variable.
    #[error("Variable Error: {0}")]
    VarError(#[from] crate::system::variable::VarError),

    /// An error occurred while building a `DevicePath`.
    #[error("DevicePath Error: {0}")]
    DevicePathError(#[from] crate::system::helper::DevicePathError),

    /// The firmware volumes could not be enumerated.
    #[error("Volume Catalog Error: {0}")]
    CatalogError(#[from] crate::volume::CatalogError),

    /// A launch attempt failed.
    #[error("Launch Error: {0}")]
    LaunchError(#[from] crate::launch::LaunchError),
}
