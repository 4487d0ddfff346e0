use refind_rs_core::system::variable::{
    REFIND_VENDOR, RuntimeNvram, get_variable, get_variable_str, set_variable, set_variable_str,
};
use uefi::println;

use crate::press_for_reboot;

const VARIABLE_NAME: &str = "TestVariable";
const STR_VARIABLE_NAME: &str = "TestStrVariable";
const VARIABLE_CONTENT: u64 = 23;
const UPDATED_VARIABLE_CONTENT: u64 = 24;
const STR_CONTENT: &str = "Boot Arch Linux from ESP";

pub fn check_variable() -> anyhow::Result<()> {
    let mut nvram = RuntimeNvram;
    let num = get_variable::<u64>(&mut nvram, &REFIND_VENDOR, VARIABLE_NAME)?;
    if num == 0 {
        return Ok(());
    }

    assert_ne!(num, UPDATED_VARIABLE_CONTENT);
    if num == VARIABLE_CONTENT {
        println!("Successfully got value of {VARIABLE_NAME}: {num}");
        assert_eq!(
            get_variable_str(&mut nvram, &REFIND_VENDOR, STR_VARIABLE_NAME)?.as_deref(),
            Some(STR_CONTENT)
        );
        println!("Successfully got value of {STR_VARIABLE_NAME}");
        set_variable::<u64>(&mut nvram, &REFIND_VENDOR, VARIABLE_NAME, &UPDATED_VARIABLE_CONTENT)?;

        println!("Now testing if variables can be deleted");
        println!("A panic will result on reboot if it fails");
        nvram_delete(&mut nvram)?;
        println!("Press a key to reboot");
        press_for_reboot();
    }
    Ok(())
}

fn nvram_delete(nvram: &mut RuntimeNvram) -> anyhow::Result<()> {
    use refind_rs_core::system::variable::NvramStore;

    nvram.set(&REFIND_VENDOR, VARIABLE_NAME, &[], true)?;
    nvram.set(&REFIND_VENDOR, STR_VARIABLE_NAME, &[], true)?;
    assert!(nvram.get(&REFIND_VENDOR, VARIABLE_NAME)?.is_none());
    Ok(())
}

pub fn test_variables() -> anyhow::Result<()> {
    let mut nvram = RuntimeNvram;
    set_variable(&mut nvram, &REFIND_VENDOR, VARIABLE_NAME, &VARIABLE_CONTENT)?;
    set_variable_str(&mut nvram, &REFIND_VENDOR, STR_VARIABLE_NAME, STR_CONTENT, true)?;
    println!("Set value of {VARIABLE_NAME} to {VARIABLE_CONTENT}");
    assert_eq!(
        get_variable::<u64>(&mut nvram, &REFIND_VENDOR, VARIABLE_NAME)?,
        VARIABLE_CONTENT
    );
    println!("Will now test if variables persist");
    println!("Press a key to reboot");
    press_for_reboot();
}
