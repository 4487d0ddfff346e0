use refind_rs_core::{
    boot::action::{
        firmware::{firmware_setup_supported, set_boot_to_firmware},
        reset,
    },
    system::variable::RuntimeNvram,
};
use uefi::{println, proto::console::text::Key};

use crate::read_key;

pub fn test_firmware_actions() -> anyhow::Result<()> {
    let mut nvram = RuntimeNvram;
    println!("Select the firmware action that you want to test:");
    println!("1. Reboot");
    println!("2. Shutdown");
    if firmware_setup_supported(&mut nvram) {
        println!("3. Reboot to Firmware Setup");
    } else {
        println!("(Reboot to Firmware Setup is not supported by this firmware)");
    }
    loop {
        if let Key::Printable(char) = read_key() {
            match char::from(char) {
                '1' => reset::reboot(),
                '2' => reset::shutdown(),
                '3' if firmware_setup_supported(&mut nvram) => {
                    set_boot_to_firmware(&mut nvram)?;
                    reset::reboot();
                }
                _ => (),
            }
        }
    }
}
