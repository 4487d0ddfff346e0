// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! Boot Loader Interface support module.
//!
//! The Boot Loader Interface lets systemd find out which boot loader started it and from where, through a set of
//! variables in a dedicated namespace. `refind-rs` only writes the informational variables, and only when
//! `write_systemd_vars` is set in the configuration.

use alloc::{format, string::ToString};

use uefi::{Guid, guid, runtime::VariableVendor};

use crate::system::variable::{NvramStore, VarError, set_variable_str};

/// The variable namespace for Boot Loader Interface UEFI variables.
pub const BLI_VENDOR: VariableVendor = VariableVendor(guid!("4a67b082-0a4c-41cf-b6c7-440b29bb8c4f"));

/// Export the variables at system initialization for Boot Loader Interface.
///
/// `init_usec` is the time the boot manager started, in microseconds since the firmware started.
///
/// # Errors
///
/// May return an `Error` if the variable could not be set.
pub fn export_variables(store: &mut impl NvramStore, init_usec: u64) -> Result<(), VarError> {
    let info = format!("refind-rs {}", env!("CARGO_PKG_VERSION"));
    set_variable_str(store, &BLI_VENDOR, "LoaderTimeInitUSec", &init_usec.to_string(), false)?;
    set_variable_str(store, &BLI_VENDOR, "LoaderInfo", &info, false)
}

/// Tells systemd which ESP the boot manager was started from.
///
/// # Errors
///
/// May return an `Error` if the variable could not be set.
pub fn set_device_part_uuid(store: &mut impl NvramStore, guid: Guid) -> Result<(), VarError> {
    set_variable_str(store, &BLI_VENDOR, "LoaderDevicePartUUID", &guid.to_string(), false)
}

/// Immediately before executing the image, record the time after the loader finishes its work.
///
/// # Errors
///
/// May return an `Error` if the variable could not be set.
pub fn record_exit_time(store: &mut impl NvramStore, exec_usec: u64) -> Result<(), VarError> {
    set_variable_str(store, &BLI_VENDOR, "LoaderTimeExecUSec", &exec_usec.to_string(), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fakes::FakeNvram, system::variable::get_variable_str};

    #[test]
    fn test_export_variables() -> Result<(), VarError> {
        let mut nvram = FakeNvram::default();
        export_variables(&mut nvram, 1500)?;
        assert_eq!(get_variable_str(&mut nvram, &BLI_VENDOR, "LoaderTimeInitUSec")?.as_deref(), Some("1500"));
        assert!(get_variable_str(&mut nvram, &BLI_VENDOR, "LoaderInfo")?.is_some_and(|x| x.starts_with("refind-rs")));

        let guid = guid!("01234567-89ab-cdef-0123-456789abcdef");
        set_device_part_uuid(&mut nvram, guid)?;
        assert_eq!(
            get_variable_str(&mut nvram, &BLI_VENDOR, "LoaderDevicePartUUID")?.as_deref(),
            Some("01234567-89ab-cdef-0123-456789abcdef")
        );
        Ok(())
    }
}
