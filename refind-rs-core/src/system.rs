// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! Implementations of the firmware traits on top of the [`uefi`] crate, and the glue that only makes sense on real
//! firmware (allocator, panic handler, logger).

pub mod fs;
pub mod helper;
pub mod image;
pub mod log_backend;
pub mod time;
pub mod variable;
pub mod volumes;

mod global_allocator;
mod panic_handler;
