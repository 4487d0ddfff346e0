#![no_main]
#![no_std]

// Integration tests for refind-rs, run on real firmware or in a VM.

// DISCLAIMER: This code extensively uses unwrap and expect, as any errors in testing should be treated as fatal.

extern crate alloc;

use refind_rs_core::{boot::action::reset, system::log_backend::UefiLogger};
use uefi::{
    prelude::*,
    println,
    proto::console::text::{Input, Key},
};

use crate::{
    action::test_firmware_actions,
    load::{check_loaded, test_loading},
    variables::{check_variable, test_variables},
    volumes::test_volumes,
};

mod action;
mod load;
mod variables;
mod volumes;

/// The global logging instance.
static LOGGER: UefiLogger = UefiLogger::new();

fn main_func() -> anyhow::Result<()> {
    uefi::helpers::init().map_err(|e| anyhow::anyhow!("{e}"))?;
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Info))
        .expect("Failed to set logger"); // set up logger so that errors produced by the library will get caught as well

    check_loaded()?;
    check_variable()?;

    println!("Select the test you would like to do:");
    println!("1. Firmware action test");
    println!("2. Variables test");
    println!("3. Volume catalog test");
    println!("4. Load image test");
    println!(
        "It's recommended that the tests are tested in order, as they will rely on each other in that order."
    );
    loop {
        if let Key::Printable(char) = read_key() {
            let char = char::from(char);
            return match char {
                '1' => test_firmware_actions(),
                '2' => test_variables(),
                '3' => test_volumes(),
                '4' => test_loading(),
                _ => continue,
            };
        }
    }
}

#[entry]
fn main() -> Status {
    main_func().unwrap_or_else(|e| panic!("Failed to run test: {e}"));
    Status::SUCCESS
}

fn press_for_reboot() -> ! {
    let _ = read_key();
    reset::reboot();
}

fn read_key() -> Key {
    let handle = boot::get_handle_for_protocol::<Input>().unwrap();
    let mut input = boot::open_protocol_exclusive::<Input>(handle).unwrap();
    let mut events = [input.wait_for_key_event().unwrap()];
    boot::wait_for_event(&mut events).unwrap();
    input.read_key().unwrap().unwrap()
}
