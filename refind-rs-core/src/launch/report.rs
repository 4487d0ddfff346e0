//! Reporting of launch failures to the user.
//!
//! Every failure goes through [`report`] or [`check_error`], so the decision of whether the user has to press a key
//! is made in one place.

use alloc::{format, string::String, vec::Vec};

use log::error;
use uefi::Status;

use crate::{
    launch::LaunchError,
    menu::interact::{Console, Severity},
};

/// Contexts that fail routinely on some hardware. Errors in these are shown, but never wait for a key.
const NO_PAUSE_CONTEXTS: [&str; 2] = ["While Reading Boot Sector", "in ReadHiddenTags"];

/// Shows an error status with a short "while doing X" context.
///
/// Returns `true` if `status` was an error. Unless the context is one that is known to fail on working hardware,
/// the user is asked to press a key.
pub fn check_error(console: &mut impl Console, status: Status, context: &str) -> bool {
    if !status.is_error() {
        return false;
    }

    let text = format!("Error: {status:?} {context}");
    error!("{text}");
    console.display_message(&text, Severity::Error);
    if !NO_PAUSE_CONTEXTS.iter().any(|x| context.contains(x)) {
        console.pause_for_key();
    }
    true
}

/// The lines explaining a Secure Boot validation failure.
///
/// The remedies are only listed when `verbose` is set.
#[must_use = "Has no effect if the result is unused"]
pub fn secure_boot_message(title: &str, verbose: bool) -> Vec<String> {
    let mut lines = alloc::vec![format!("Secure Boot Validation Failure While Loading {title}!")];
    if verbose {
        lines.extend([
            format!("This computer is configured with Secure Boot active but '{title}' has failed validation."),
            "You can:".into(),
            " * Launch another boot loader".into(),
            " * Disable Secure Boot in your firmware".into(),
            format!(" * Sign {title} with a machine owner key (MOK)"),
            format!(" * Use a MOK utility to add a MOK with which '{title}' has already been signed."),
            format!(" * Use a MOK utility to register '{title}' ('Enroll its Hash') without signing it"),
        ]);
    }
    lines
}

/// Shows a launch failure and waits for a key where appropriate.
pub fn report(console: &mut impl Console, err: &LaunchError, verbose: bool) {
    match err {
        LaunchError::InvalidLoader(_) => {
            error!("{err}");
            console.display_message(&format!("{err}"), Severity::Error);
            console.pause_for_key();
        }
        LaunchError::Authentication { title, status } => {
            error!("{status:?} returned by Secure Boot while loading {title}");
            for line in secure_boot_message(title, verbose) {
                console.display_message(&line, Severity::Error);
            }
            console.pause_for_key();
        }
        LaunchError::Service { context, status } => {
            let _ = check_error(console, *status, context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeConsole;

    #[test]
    fn test_check_error_pause() {
        let mut console = FakeConsole::default();
        assert!(!check_error(&mut console, Status::SUCCESS, "While Loading Linux"));
        assert!(console.messages.is_empty());

        assert!(check_error(&mut console, Status::NOT_FOUND, "While Loading Linux"));
        assert_eq!(console.pauses, 1);

        assert!(check_error(
            &mut console,
            Status::DEVICE_ERROR,
            "Found While Reading Boot Sector on Volume Below"
        ));
        assert_eq!(console.pauses, 1);
        assert_eq!(console.messages.len(), 2);
    }

    #[test]
    fn test_secure_boot_report() {
        let mut console = FakeConsole::default();
        let err = LaunchError::Authentication {
            title: "Arch Linux".into(),
            status: Status::SECURITY_VIOLATION,
        };
        report(&mut console, &err, false);
        assert_eq!(console.messages.len(), 1);
        assert_eq!(console.pauses, 1);

        let mut console = FakeConsole::default();
        report(&mut console, &err, true);
        assert!(console.messages.iter().any(|(x, _)| x.contains("machine owner key")));
    }
}
