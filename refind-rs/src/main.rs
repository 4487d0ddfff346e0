// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! The `refind-rs` boot manager application.
//!
//! Sets up logging and the text console, then hands everything to [`BootManager`]. The only option is
//! `-c <file>` (or `--config <file>`), which names a different configuration file next to the boot manager.

#![no_main]
#![no_std]

extern crate alloc;

use alloc::string::{String, ToString};

use getargs::{Arg, Options};
use log::{error, warn};
use refind_rs_core::{
    BootResult,
    boot::{
        BootManager, Collaborators,
        action::{Terminal, reset::cold_reset},
    },
    loader::Arch,
    system::{
        image::{UefiImageServices, self_image_path},
        log_backend::UefiLogger,
        variable::RuntimeNvram,
        volumes::UefiStorage,
    },
};
use thiserror::Error;
use uefi::{boot, cstr16, prelude::*, println, proto::loaded_image::LoadedImage};

use crate::console::{ConsoleError, TextConsole};

mod console;

/// How long a fatal error stays on screen before the reset, in microseconds.
const FATAL_STALL: usize = 5_000_000;

/// The global logging instance.
static LOGGER: UefiLogger = UefiLogger::new();

/// An error that ends the boot manager before the menu could be shown.
#[derive(Error, Debug)]
enum MainError {
    /// The boot manager could not find itself.
    #[error("Boot Error: {0}")]
    Boot(#[from] refind_rs_core::error::BootError),

    /// There is no console to show a menu on.
    #[error("Console Error: {0}")]
    Console(#[from] ConsoleError),
}

/// Reads the `-c` option from the load options of the image.
///
/// Unknown options are logged and ignored.
fn config_override() -> BootResult<Option<String>> {
    let load_options = {
        let loaded_image = boot::open_protocol_exclusive::<LoadedImage>(boot::image_handle())?;
        loaded_image
            .load_options_as_cstr16()
            .unwrap_or(cstr16!("refind-rs.efi"))
            .to_string()
    }; // loaded_image dropped here

    let mut args = load_options.split_whitespace();
    // the firmware passes the file name first when started from a boot option, the shell always does
    if args.clone().next().is_some_and(|x| !x.starts_with('-')) {
        let _ = args.next();
    }

    let mut opts = Options::new(args);
    let mut config = None;
    while let Ok(Some(arg)) = opts.next_arg() {
        match arg {
            Arg::Short('c') | Arg::Long("config") => match opts.value() {
                Ok(value) => config = Some(value.to_string()),
                Err(_) => warn!("-c was given without a file name"),
            },
            arg => warn!("Ignoring unknown argument {arg}"),
        }
    }
    Ok(config)
}

/// Runs the boot manager until the user picks a terminal action.
///
/// # Errors
///
/// May return an `Error` if the boot manager cannot find its own path, or there is no text console.
fn main_func() -> Result<Terminal, MainError> {
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(log::LevelFilter::Warn));

    let config_path = config_override()?;
    let self_path = self_image_path()?;
    let console = TextConsole::new()?;

    let io = Collaborators {
        storage: UefiStorage::new(),
        images: UefiImageServices::new(),
        nvram: RuntimeNvram,
        console,
    };
    let mut manager = BootManager::new(io, &self_path, config_path.as_deref(), Arch::current());
    Ok(manager.run())
}

/// The main function of the program.
///
/// Returning only happens when the user chose to exit. A fatal error is shown, then the machine is reset.
#[entry]
fn main() -> Status {
    if let Err(e) = uefi::helpers::init() {
        return e.status();
    }

    match main_func() {
        Ok(terminal) => {
            terminal.perform();
            Status::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            println!("refind-rs could not start: {e}");
            println!("Resetting in 5 seconds");
            boot::stall(FATAL_STALL);
            cold_reset()
        }
    }
}
