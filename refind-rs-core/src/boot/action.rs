//! Provides [`Terminal`], the actions that end the boot manager, and the firmware actions offered in the second row.

pub mod csr;
pub mod firmware;
pub mod reset;

/// How the boot manager ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Terminal {
    /// Return to the firmware.
    Exit,

    /// Reboot the system.
    Reboot,

    /// Shut down the system.
    Shutdown,
}

impl Terminal {
    /// Carries out the action. Only [`Terminal::Exit`] returns, after which the caller should return to the firmware.
    pub fn perform(self) {
        match self {
            Self::Exit => (),
            Self::Reboot => reset::reboot(),
            Self::Shutdown => reset::shutdown(),
        }
    }
}
