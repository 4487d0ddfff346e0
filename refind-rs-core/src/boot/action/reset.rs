//! Provides [`reboot`], [`shutdown`] and [`cold_reset`], thin wrappers around [`runtime::reset`].
//!
//! None of these return. The firmware may accept the request and then fail to act on it, in which case the caller
//! hangs, which is the only sensible outcome at this point anyway.

use uefi::{
    Status,
    runtime::{self, ResetType},
};

/// Reboots the system.
///
/// A warm reset keeps `BootNext` and `OsIndications` intact, which the firmware actions rely on.
pub fn reboot() -> ! {
    runtime::reset(ResetType::WARM, Status::SUCCESS, None)
}

/// Shuts down the system.
pub fn shutdown() -> ! {
    runtime::reset(ResetType::SHUTDOWN, Status::SUCCESS, None)
}

/// Resets the system with a cold reset. Used as the last resort when the boot manager cannot go on.
pub fn cold_reset() -> ! {
    runtime::reset(ResetType::COLD, Status::SUCCESS, None)
}
