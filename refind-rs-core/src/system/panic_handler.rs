//! Panic handler for the boot manager binary.
//!
//! A panic cannot hand control back to the menu, so the message is shown and the machine is reset after a key is
//! pressed. It is enabled with the `panic_handler` feature, so host builds and fuzzing keep the standard one.

#![cfg(feature = "panic_handler")]
use core::fmt::Write;

use uefi::{boot, system};

/// How long the message stays up when no key can be waited for, in microseconds.
const PANIC_STALL: usize = 10_000_000;

/// The panic handler.
#[panic_handler]
fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    system::with_stdout(|stdout| {
        let _ = writeln!(stdout, "refind-rs panicked: {info}");
        let _ = writeln!(stdout, "Press a key to reboot");
    });

    let waited = system::with_stdin(|stdin| {
        stdin
            .wait_for_key_event()
            .is_some_and(|event| boot::wait_for_event(&mut [event]).is_ok())
    });
    if !waited {
        boot::stall(PANIC_STALL);
    }

    crate::boot::action::reset::cold_reset()
}
