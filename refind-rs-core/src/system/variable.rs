// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! UEFI variable storage helpers.
//!
//! Everything that reads or writes NVRAM goes through an [`NvramStore`]. [`RuntimeNvram`] is the implementation
//! backed by runtime services, while the typed helpers ([`get_variable`], [`set_variable`], [`get_variable_str`]
//! and [`set_variable_str`]) work on top of any store.

use alloc::{string::String, vec::Vec};

use thiserror::Error;
use uefi::{
    CStr16, Status, guid,
    runtime::{self, VariableAttributes, VariableVendor},
};

use crate::system::helper::{StrError, str_to_cstr};

/// The vendor namespace for variables owned by the boot manager, such as `PreviousBoot` and `HiddenTags`.
pub const REFIND_VENDOR: VariableVendor =
    VariableVendor(guid!("f8800da7-df1f-4a16-8fe3-7243dbb787ca"));

/// The vendor namespace of Apple firmware variables, such as `csr-active-config`.
pub const APPLE_VENDOR: VariableVendor =
    VariableVendor(guid!("7c436110-ab2a-4bbb-a880-fe41995c9f82"));

/// The maximum length in UCS-2 characters of a string stored by [`set_variable_str`].
const MAX_STR_LEN: usize = 256;

/// An `Error` that may result from reading or writing a UEFI variable.
#[derive(Error, Debug)]
pub enum VarError {
    /// The variable could not be read.
    #[error("Failed to get variable: {0}")]
    GetErr(Status),

    /// The variable could not be written.
    #[error("Failed to set variable: {0}")]
    SetErr(Status),

    /// The variable name could not be converted to UCS-2.
    #[error("Invalid variable name: {0}")]
    NameErr(#[from] StrError),

    /// The string slice could not be converted into a UCS-2 string.
    #[error("Failed to convert string to UCS-2: {0}")]
    Ucs2ConvErr(#[from] uefi::data_types::FromStrWithBufError),

    /// The variable did not hold a valid UCS-2 string.
    #[error("Variable does not contain a valid UCS-2 string")]
    StrErr,

    /// A structured variable could not be encoded or decoded.
    #[error("Failed to encode or decode variable: {0}")]
    CodecErr(#[from] postcard::Error),
}

/// Access to firmware variables.
///
/// A variable that does not exist is `Ok(None)`, not an error.
pub trait NvramStore {
    /// Reads a variable.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the variable exists but could not be read.
    fn get(&mut self, vendor: &VariableVendor, name: &str) -> Result<Option<Vec<u8>>, VarError>;

    /// Writes a variable. Non-persistent variables are lost on the next reset. Writing an empty slice deletes
    /// the variable.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the firmware refused the write.
    fn set(
        &mut self,
        vendor: &VariableVendor,
        name: &str,
        data: &[u8],
        persistent: bool,
    ) -> Result<(), VarError>;
}

/// An [`NvramStore`] backed by UEFI runtime services.
#[derive(Default)]
pub struct RuntimeNvram;

impl RuntimeNvram {
    /// Returns the attributes a variable is written with.
    const fn attributes(persistent: bool) -> VariableAttributes {
        let attrs = VariableAttributes::BOOTSERVICE_ACCESS.union(VariableAttributes::RUNTIME_ACCESS);
        if persistent {
            attrs.union(VariableAttributes::NON_VOLATILE)
        } else {
            attrs
        }
    }
}

impl NvramStore for RuntimeNvram {
    fn get(&mut self, vendor: &VariableVendor, name: &str) -> Result<Option<Vec<u8>>, VarError> {
        let name = str_to_cstr(name)?;
        match runtime::get_variable_boxed(&name, vendor) {
            Ok((var, _)) => Ok(Some(var.into_vec())),
            Err(e) if e.status() == Status::NOT_FOUND => Ok(None),
            Err(e) => Err(VarError::GetErr(e.status())),
        }
    }

    fn set(
        &mut self,
        vendor: &VariableVendor,
        name: &str,
        data: &[u8],
        persistent: bool,
    ) -> Result<(), VarError> {
        let name = str_to_cstr(name)?;
        match runtime::set_variable(&name, vendor, Self::attributes(persistent), data) {
            Ok(()) => Ok(()),
            // deleting a variable that never existed is fine
            Err(e) if data.is_empty() && e.status() == Status::NOT_FOUND => Ok(()),
            Err(e) => Err(VarError::SetErr(e.status())),
        }
    }
}

/// A fixed-size value that can be stored in a UEFI variable.
///
/// Values are stored little-endian, which is what the firmware uses for its own integer variables.
pub trait UefiVariable: Sized {
    /// Convert `Self` to a vector of bytes.
    fn to_bytes(&self) -> Vec<u8>;

    /// Convert bytes to `Self`. Missing bytes are treated as zero and extra bytes are ignored.
    fn from_bytes(bytes: &[u8]) -> Self;

    /// Return 0, or an equivalent value.
    fn default() -> Self;
}

/// Implements [`UefiVariable`] for an integer type.
macro_rules! impl_uefi_variable {
    ($($ty:ty),*) => {
        $(
            impl UefiVariable for $ty {
                fn to_bytes(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
                fn from_bytes(bytes: &[u8]) -> Self {
                    let mut array = [0; size_of::<Self>()];
                    let len = bytes.len().min(array.len());
                    array[..len].copy_from_slice(&bytes[..len]);
                    Self::from_le_bytes(array)
                }
                fn default() -> Self {
                    0
                }
            }
        )*
    };
}

impl_uefi_variable!(u8, u16, u32, u64);

/// Gets a UEFI variable of a [`UefiVariable`] given its vendor and name.
///
/// If the variable was not found, the default value of `0` is returned. This makes read-modify-write of bitmask
/// variables like `OsIndications` straightforward.
///
/// # Errors
///
/// May return an `Error` if the variable exists but could not be read.
pub fn get_variable<T: UefiVariable>(
    store: &mut impl NvramStore,
    vendor: &VariableVendor,
    name: &str,
) -> Result<T, VarError> {
    Ok(store
        .get(vendor, name)?
        .map_or_else(T::default, |x| T::from_bytes(&x)))
}

/// Sets a persistent UEFI variable to a [`UefiVariable`].
///
/// # Errors
///
/// May return an `Error` if the firmware refused the write.
pub fn set_variable<T: UefiVariable>(
    store: &mut impl NvramStore,
    vendor: &VariableVendor,
    name: &str,
    value: &T,
) -> Result<(), VarError> {
    store.set(vendor, name, &value.to_bytes(), true)
}

/// Sets a UEFI variable to a nul-terminated UCS-2 string.
///
/// # Errors
///
/// May return an `Error` if the string could not be converted into UCS-2, or the firmware refused the write.
pub fn set_variable_str(
    store: &mut impl NvramStore,
    vendor: &VariableVendor,
    name: &str,
    str: &str,
    persistent: bool,
) -> Result<(), VarError> {
    let mut buf = [0; MAX_STR_LEN];
    let str = CStr16::from_str_with_buf(str, &mut buf)?;
    store.set(
        vendor,
        name,
        bytemuck::must_cast_slice(str.to_u16_slice_with_nul()),
        persistent,
    )
}

/// Gets a UEFI variable holding a UCS-2 string. The string ends at the first nul character, if any.
///
/// Returns [`None`] if the variable does not exist.
///
/// # Errors
///
/// May return an `Error` if the variable could not be read, or does not hold valid UCS-2.
pub fn get_variable_str(
    store: &mut impl NvramStore,
    vendor: &VariableVendor,
    name: &str,
) -> Result<Option<String>, VarError> {
    let Some(bytes) = store.get(vendor, name)? else {
        return Ok(None);
    };
    if bytes.len() % 2 != 0 {
        return Err(VarError::StrErr);
    }

    // the buffer from the firmware is not guaranteed to be aligned for u16
    let units = bytes
        .chunks_exact(2)
        .map(|x| u16::from_le_bytes([x[0], x[1]]))
        .take_while(|x| *x != 0);
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map(Some)
        .map_err(|_| VarError::StrErr)
}

/// Encodes a value with `postcard` and stores it in a persistent variable.
///
/// # Errors
///
/// May return an `Error` if the value could not be encoded, or the firmware refused the write.
pub fn set_variable_encoded<T: serde::Serialize>(
    store: &mut impl NvramStore,
    vendor: &VariableVendor,
    name: &str,
    value: &T,
) -> Result<(), VarError> {
    let bytes = postcard::to_allocvec(value)?;
    store.set(vendor, name, &bytes, true)
}

/// Reads a `postcard` encoded variable. Returns [`None`] if the variable does not exist.
///
/// # Errors
///
/// May return an `Error` if the variable could not be read or decoded.
pub fn get_variable_encoded<T: serde::de::DeserializeOwned>(
    store: &mut impl NvramStore,
    vendor: &VariableVendor,
    name: &str,
) -> Result<Option<T>, VarError> {
    store
        .get(vendor, name)?
        .map(|x| postcard::from_bytes(&x).map_err(VarError::CodecErr))
        .transpose()
}

#[cfg(test)]
mod tests {
    use alloc::borrow::ToOwned;

    use super::*;
    use crate::fakes::FakeNvram;

    #[test]
    fn test_integer_default() -> Result<(), VarError> {
        let mut nvram = FakeNvram::default();
        let value: u64 = get_variable(&mut nvram, &VariableVendor::GLOBAL_VARIABLE, "OsIndications")?;
        assert_eq!(value, 0);

        set_variable(&mut nvram, &VariableVendor::GLOBAL_VARIABLE, "OsIndications", &5u64)?;
        let value: u64 = get_variable(&mut nvram, &VariableVendor::GLOBAL_VARIABLE, "OsIndications")?;
        assert_eq!(value, 5);
        Ok(())
    }

    #[test]
    fn test_short_integer() {
        assert_eq!(u32::from_bytes(&[1]), 1);
        assert_eq!(u16::from_bytes(&[1, 2, 3]), 0x0201);
    }

    #[test]
    fn test_string() -> Result<(), VarError> {
        let mut nvram = FakeNvram::default();
        assert_eq!(get_variable_str(&mut nvram, &REFIND_VENDOR, "PreviousBoot")?, None);

        set_variable_str(&mut nvram, &REFIND_VENDOR, "PreviousBoot", "Boot Linux", true)?;
        assert_eq!(
            get_variable_str(&mut nvram, &REFIND_VENDOR, "PreviousBoot")?,
            Some("Boot Linux".to_owned())
        );
        Ok(())
    }

    #[test]
    fn test_odd_string() {
        let mut nvram = FakeNvram::default();
        nvram.insert(&REFIND_VENDOR, "PreviousBoot", alloc::vec![b'a', 0, b'b']);
        assert!(get_variable_str(&mut nvram, &REFIND_VENDOR, "PreviousBoot").is_err());
    }
}
