// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! The `refind-rs` library crate.
//!
//! This holds everything between "the firmware handed us control" and "we handed control to an OS loader":
//! the volume catalog, the loader classifier, the menu entry builder, the interactive menu loop, and the launch
//! sequencer.
//!
//! Firmware access goes through a small set of traits ([`volume::Storage`], [`launch::ImageServices`],
//! [`system::variable::NvramStore`] and [`menu::interact::Console`]). The [`system`] module provides the
//! implementations backed by the [`uefi`] crate, while the frontend provides the console. Because of this the
//! whole scanning and launching logic can also run on the host, which is how the unit tests exercise it.
//!
//! ## MSRV
//!
//! The minimum supported rust version is 1.88.0.

#![cfg_attr(not(any(fuzzing, test, doctest)), no_std)]

/// The primary result type that wraps around [`crate::error::BootError`].
pub type BootResult<T> = Result<T, crate::error::BootError>;

pub mod boot;
pub mod config;
pub mod error;
pub mod launch;
pub mod loader;
pub mod menu;
pub mod system;
pub mod text;
pub mod volume;

#[cfg(test)]
mod fakes;

extern crate alloc;
