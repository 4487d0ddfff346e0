use alloc::borrow::ToOwned;

use refind_rs_core::{
    launch::{LaunchPolicy, LaunchRequest, LaunchSequencer, LaunchState},
    loader::Arch,
    menu::OsType,
    system::{
        image::UefiImageServices,
        variable::{NvramStore, REFIND_VENDOR, RuntimeNvram, get_variable, set_variable},
        volumes::UefiStorage,
    },
    volume::{Storage, VolumeCatalog},
};
use uefi::println;

use crate::{press_for_reboot, read_key};

const LOADED_VARIABLE_NAME: &str = "LoadedFromPrevTest";
const SHELL_PATH: &str = "\\shellx64.efi";
const FALLBACK_PATH: &str = "\\EFI\\BOOT\\BOOTx64.efi";

pub fn check_loaded() -> anyhow::Result<()> {
    let mut nvram = RuntimeNvram;
    if get_variable::<u64>(&mut nvram, &REFIND_VENDOR, LOADED_VARIABLE_NAME)? != 0 {
        nvram.set(&REFIND_VENDOR, LOADED_VARIABLE_NAME, &[], true)?;
        println!("Successfully passed load image test");
        println!(
            "If a panic from unwrap resulted before this, then the test was not actually passed."
        );
        println!("Press a key to reboot");
        press_for_reboot();
    }
    Ok(())
}

pub fn test_loading() -> anyhow::Result<()> {
    println!(
        "Will try to launch either {SHELL_PATH} or {FALLBACK_PATH} on same filesystem"
    );
    println!("Press a key to continue");
    let _ = read_key();

    let mut storage = UefiStorage::new();
    let mut catalog = VolumeCatalog::new();
    catalog.scan(&mut storage)?;
    let volume = catalog
        .self_volume()
        .expect("The volume of the test image was not found")
        .clone();

    let path = if storage.file_exists(&volume, SHELL_PATH) {
        SHELL_PATH
    } else if storage.file_exists(&volume, FALLBACK_PATH) {
        FALLBACK_PATH
    } else {
        println!(
            "Cannot test if load image works, as {SHELL_PATH} and {FALLBACK_PATH} do not exist"
        );
        println!("Press a key to reboot");
        press_for_reboot();
    };

    let request = LaunchRequest {
        volume,
        path: path.to_owned(),
        options: Some("-nostartup".to_owned()),
        os_type: OsType::Other,
        title: path.to_owned(),
        verbose: true,
        is_driver: false,
    };
    let policy = LaunchPolicy {
        write_systemd_vars: false,
        ignore_previous_boot: true,
        esp_guid: None,
        arch: Arch::current(),
        set_boot_args: None,
    };

    let mut nvram = RuntimeNvram;
    set_variable::<u64>(&mut nvram, &REFIND_VENDOR, LOADED_VARIABLE_NAME, &1)?;

    let mut images = UefiImageServices::new();
    let mut sequencer = LaunchSequencer::new(&mut storage, &mut images, &mut nvram, &policy);
    let result = sequencer.run(&request);
    println!("Launch went through {:?}", sequencer.trace);
    assert_eq!(sequencer.trace.last(), Some(&LaunchState::Returned));
    println!("{path} returned {result:?}");

    check_loaded()
}
