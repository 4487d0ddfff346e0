// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! A monotonic microsecond clock for log timestamps and the `LoaderTime*USec` variables.
//!
//! The clock counts CPU timer ticks (`rdtsc` on x86, `CNTVCT_EL0` on aarch64). On x86 the tick rate is not exposed,
//! so it is measured once against a 1 ms firmware stall and cached.

use core::sync::atomic::{AtomicU64, Ordering};

/// The firmware stall used to measure the tick rate on x86, in microseconds.
const CALIBRATION_USEC: u64 = 1000;

/// Ticks per second, or 0 while not yet measured.
static TICKS_PER_SEC: AtomicU64 = AtomicU64::new(0);

/// Reads the CPU timer counter.
#[must_use = "Has no effect if the result is unused"]
fn read_ticks() -> u64 {
    // SAFETY: `rdtsc` only reads the timestamp counter. Boot services run on a single processor, so the missing
    // serialization cannot reorder it against other timer reads.
    #[cfg(target_arch = "x86")]
    unsafe {
        core::arch::x86::_rdtsc()
    }

    // SAFETY: see above.
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }

    // SAFETY: reading `CNTVCT_EL0` has no side effects.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        let mut ticks: u64;
        core::arch::asm!("mrs {}, cntvct_el0", out(reg) ticks);
        ticks
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
    {
        0
    }
}

/// Measures or reads the tick rate of [`read_ticks`].
#[must_use = "Has no effect if the result is unused"]
fn measure_ticks_per_sec() -> u64 {
    #[cfg(target_arch = "aarch64")]
    {
        let mut freq: u64;
        // SAFETY: reading `CNTFRQ_EL0` has no side effects.
        unsafe {
            core::arch::asm!("mrs {}, cntfrq_el0", out(reg) freq);
        }
        freq
    }

    #[cfg(not(target_arch = "aarch64"))]
    {
        let start = read_ticks();
        uefi::boot::stall(usize::try_from(CALIBRATION_USEC).unwrap_or(1000));
        rate_from_interval(start, read_ticks(), CALIBRATION_USEC)
    }
}

/// The tick rate implied by `start..end` ticks spanning `usec` microseconds.
#[must_use = "Has no effect if the result is unused"]
fn rate_from_interval(start: u64, end: u64, usec: u64) -> u64 {
    if usec == 0 {
        return 0;
    }
    u64::try_from(u128::from(end.wrapping_sub(start)) * 1_000_000 / u128::from(usec)).unwrap_or(u64::MAX)
}

/// Converts a tick count to microseconds. An unknown rate gives 0.
#[must_use = "Has no effect if the result is unused"]
fn ticks_to_usec(ticks: u64, ticks_per_sec: u64) -> u64 {
    if ticks_per_sec == 0 {
        return 0;
    }
    u64::try_from(u128::from(ticks) * 1_000_000 / u128::from(ticks_per_sec)).unwrap_or(u64::MAX)
}

/// Microseconds since the CPU timer started counting, usually at platform reset.
#[must_use = "Has no effect if the result is unused"]
pub fn timer_usec() -> u64 {
    let mut rate = TICKS_PER_SEC.load(Ordering::Relaxed);
    if rate == 0 {
        rate = measure_ticks_per_sec();
        TICKS_PER_SEC.store(rate, Ordering::Relaxed);
    }
    ticks_to_usec(read_ticks(), rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_to_usec() {
        assert_eq!(ticks_to_usec(3_000_000_000, 3_000_000_000), 1_000_000);
        assert_eq!(ticks_to_usec(1_500, 1_000_000_000), 1);
        assert_eq!(ticks_to_usec(12_345, 0), 0);
    }

    #[test]
    fn test_long_uptime_does_not_overflow() {
        // a week at 3 GHz
        let ticks = 3_000_000_000 * 60 * 60 * 24 * 7;
        assert_eq!(ticks_to_usec(ticks, 3_000_000_000), 1_000_000 * 60 * 60 * 24 * 7);
    }

    #[test]
    fn test_rate_from_interval() {
        assert_eq!(rate_from_interval(1_000, 3_001_000, CALIBRATION_USEC), 3_000_000_000);
        assert_eq!(rate_from_interval(5, 10, 0), 0);
        assert_eq!(rate_from_interval(u64::MAX, 999, 1), 1_000_000_000);
    }
}
