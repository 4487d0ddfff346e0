//! Apple's System Integrity Protection (SIP) policy, kept in the `csr-active-config` variable.
//!
//! The `csr_rotate` tool steps the variable through the `csr_values` list. The new policy applies from the next
//! boot of Mac OS.

use alloc::{format, string::String};

use log::info;

use crate::system::variable::{APPLE_VENDOR, NvramStore, VarError, get_variable, set_variable};

/// The variable holding the policy.
const CSR_VAR: &str = "csr-active-config";

/// The policy of a stock Mac, with protection enabled.
pub const SIP_ENABLED: u32 = 0x010;

/// Policies that are well known to disable protection.
const SIP_DISABLED: [u32; 8] = [0x067, 0x077, 0x07f, 0x877, 0x87f, 0x977, 0x97f, 0xa7f];

/// Reads the current policy. A Mac without the variable behaves as if protection was enabled.
///
/// # Errors
///
/// May return an `Error` if the variable exists but could not be read.
pub fn current_csr(nvram: &mut impl NvramStore) -> Result<u32, VarError> {
    if nvram.get(&APPLE_VENDOR, CSR_VAR)?.is_none() {
        return Ok(SIP_ENABLED);
    }
    get_variable(nvram, &APPLE_VENDOR, CSR_VAR)
}

/// Picks the policy after `current` in `values`. A current policy that is not listed, or is the last one, wraps
/// around to the first value.
#[must_use = "Has no effect if the result is unused"]
pub fn next_csr(values: &[u32], current: u32) -> Option<u32> {
    let next = values
        .iter()
        .position(|x| *x == current)
        .and_then(|i| values.get(i + 1));
    next.or_else(|| values.first()).copied()
}

/// Describes a policy for the user.
#[must_use = "Has no effect if the result is unused"]
pub fn describe_csr(value: u32) -> String {
    if value == SIP_ENABLED || value == 0 {
        format!("System Integrity Protection Enabled (0x{value:03x})")
    } else if SIP_DISABLED.contains(&value) {
        format!("System Integrity Protection Disabled (0x{value:03x})")
    } else {
        format!("System Integrity Protection Status: 0x{value:03x}")
    }
}

/// Moves the policy on to the next of `values` and returns the new policy. Nothing is written when `values` is
/// empty.
///
/// # Errors
///
/// May return an `Error` if the variable could not be read or written.
pub fn rotate_csr(nvram: &mut impl NvramStore, values: &[u32]) -> Result<Option<u32>, VarError> {
    let current = current_csr(nvram)?;
    let Some(next) = next_csr(values, current) else {
        return Ok(None);
    };
    set_variable(nvram, &APPLE_VENDOR, CSR_VAR, &next)?;
    info!("Changed {CSR_VAR} from 0x{current:03x} to 0x{next:03x}");
    Ok(Some(next))
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use proptest::prelude::*;

    use super::*;
    use crate::fakes::FakeNvram;

    #[test]
    fn test_rotate() -> Result<(), VarError> {
        let mut nvram = FakeNvram::default();
        let values = [SIP_ENABLED, 0x877];

        assert_eq!(rotate_csr(&mut nvram, &values)?, Some(0x877));
        assert_eq!(nvram.get(&APPLE_VENDOR, CSR_VAR)?, Some(vec![0x77, 0x08, 0, 0]));
        assert_eq!(rotate_csr(&mut nvram, &values)?, Some(SIP_ENABLED));
        assert_eq!(rotate_csr(&mut nvram, &[])?, None);
        assert_eq!(current_csr(&mut nvram)?, SIP_ENABLED);
        Ok(())
    }

    #[test]
    fn test_unlisted_policy() {
        assert_eq!(next_csr(&[0x67, 0x77], 0x3), Some(0x67));
        assert_eq!(next_csr(&[0x67, 0x77], 0x77), Some(0x67));
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe_csr(0x10), "System Integrity Protection Enabled (0x010)");
        assert_eq!(describe_csr(0x877), "System Integrity Protection Disabled (0x877)");
        assert_eq!(describe_csr(0x3), "System Integrity Protection Status: 0x003");
    }

    proptest! {
        #[test]
        fn next_is_always_listed(values in proptest::collection::vec(any::<u32>(), 1..8), current in any::<u32>()) {
            let next = next_csr(&values, current);
            prop_assert!(next.is_some_and(|x| values.contains(&x)));
        }
    }
}
