//! Asking the firmware to do something on the next boot: start its setup, or start a particular boot option.
//!
//! Both only take effect after a warm reset, see [`super::reset::reboot`].

use uefi::runtime::VariableVendor;

use crate::system::variable::{NvramStore, VarError, get_variable, set_variable};

/// The bit that indicates to the firmware if booting into firmware setup should be done.
const EFI_OS_INDICATIONS_BOOT_TO_FW_UI: u64 = 1;

/// The variable holding the requests for the next boot.
const OS_INDICATIONS: &str = "OsIndications";

/// The variable listing which requests the firmware understands.
const OS_INDICATIONS_SUPPORTED: &str = "OsIndicationsSupported";

/// Checks if the firmware can be asked to start its setup.
#[must_use = "Has no effect if the result is unused"]
pub fn firmware_setup_supported(nvram: &mut impl NvramStore) -> bool {
    get_variable::<u64>(nvram, &VariableVendor::GLOBAL_VARIABLE, OS_INDICATIONS_SUPPORTED)
        .is_ok_and(|x| x & EFI_OS_INDICATIONS_BOOT_TO_FW_UI != 0)
}

/// Sets the [`EFI_OS_INDICATIONS_BOOT_TO_FW_UI`] bit, keeping any other request already in `OsIndications`.
///
/// # Errors
///
/// May return an `Error` if `OsIndications` could not be read or written.
pub fn set_boot_to_firmware(nvram: &mut impl NvramStore) -> Result<(), VarError> {
    // a missing variable reads as 0
    let osind = get_variable::<u64>(nvram, &VariableVendor::GLOBAL_VARIABLE, OS_INDICATIONS)?;
    set_variable(
        nvram,
        &VariableVendor::GLOBAL_VARIABLE,
        OS_INDICATIONS,
        &(osind | EFI_OS_INDICATIONS_BOOT_TO_FW_UI),
    )
}

/// Makes the firmware start `Boot####` option `boot_num` on the next boot only.
///
/// # Errors
///
/// May return an `Error` if `BootNext` could not be written.
pub fn set_boot_next(nvram: &mut impl NvramStore, boot_num: u16) -> Result<(), VarError> {
    set_variable(nvram, &VariableVendor::GLOBAL_VARIABLE, "BootNext", &boot_num)
}
