// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! The launch sequencer.
//!
//! A launch walks through a fixed set of states:
//!
//! ```text
//! Validating -> Loading -> (SelfReloadHack) -> AuthChecking -> OptionsBinding -> NvramPreflight -> Starting
//!     -> Returned | Aborted
//! ```
//!
//! Every firmware call goes through [`ImageServices`], [`Storage`] and [`NvramStore`], so the whole sequence can be
//! driven by fakes on the host. Every state that was entered is recorded in [`LaunchSequencer::trace`].
//!
//! Failures never end the program. They come back as a [`LaunchError`], which [`report::report`] shows to the user.

use alloc::{
    borrow::ToOwned,
    format,
    string::{String, ToString},
    vec::Vec,
};

use log::{debug, error, info, warn};
use thiserror::Error;
use uefi::{Guid, Status};

use crate::{
    boot::bli,
    loader::{Arch, Validity, is_valid_loader},
    menu::{LoaderEntry, OsType},
    system::variable::{APPLE_VENDOR, NvramStore, REFIND_VENDOR, set_variable_str},
    volume::{Storage, Volume, VolumeCatalog},
};

#[cfg(feature = "gzip")]
pub mod gzip;
pub mod report;

/// The variable the title of the last launched entry is stored in.
pub const PREVIOUS_BOOT_VAR: &str = "PreviousBoot";

/// The result of asking the firmware to load an image.
///
/// The firmware may hand out an image even when it reports an error, for example when Secure Boot rejects an image
/// that was otherwise loaded. Such an image still has to be unloaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadAttempt<I> {
    /// The loaded image, if there is one.
    pub image: Option<I>,

    /// The status the firmware returned.
    pub status: Status,
}

impl<I> LoadAttempt<I> {
    /// A successful load.
    pub const fn loaded(image: I) -> Self {
        Self {
            image: Some(image),
            status: Status::SUCCESS,
        }
    }

    /// A failed load without an image.
    pub const fn failed(status: Status) -> Self {
        Self { image: None, status }
    }
}

/// The firmware image services.
pub trait ImageServices {
    /// A handle to a loaded image.
    type Image: Copy;

    /// Loads an image from a file on a volume.
    fn load(&mut self, volume: &Volume, path: &str) -> LoadAttempt<Self::Image>;

    /// Loads an image from memory. `path` is the file the buffer came from.
    fn load_buffer(&mut self, volume: &Volume, path: &str, data: &[u8]) -> LoadAttempt<Self::Image>;

    /// Loads another copy of the boot manager itself, without starting it.
    fn load_self(&mut self) -> Option<Self::Image>;

    /// Sets the load options of a loaded image.
    ///
    /// # Errors
    ///
    /// May return the firmware status if the loaded image protocol could not be opened on the image.
    fn set_load_options(&mut self, image: Self::Image, options: &str) -> Result<(), Status>;

    /// Starts an image. Only returns once the image exits.
    fn start(&mut self, image: Self::Image) -> Status;

    /// Unloads an image.
    fn unload(&mut self, image: Self::Image);

    /// Connects every controller again, so that a freshly started filesystem driver binds to its partitions.
    fn reconnect_drivers(&mut self, driver: Self::Image);

    /// Checks if Secure Boot is enforced.
    fn secure_boot_active(&mut self) -> bool;

    /// Checks if a shim validation layer is installed.
    fn shim_present(&mut self) -> bool;

    /// The microseconds since the firmware started.
    fn now_usec(&mut self) -> u64;
}

/// Everything needed for one launch. It lives only as long as the launch.
#[derive(Clone, Debug)]
pub struct LaunchRequest {
    /// The volume the image lives on.
    pub volume: Volume,

    /// The volume-relative path of the image.
    pub path: String,

    /// The load options.
    pub options: Option<String>,

    /// The kind of OS being started.
    pub os_type: OsType,

    /// The title shown in messages, and stored as the previous boot.
    pub title: String,

    /// Whether progress and detailed errors are shown.
    pub verbose: bool,

    /// Whether the image is a driver, which stays resident once started.
    pub is_driver: bool,
}

impl LaunchRequest {
    /// Resolves a loader entry against the current catalog.
    ///
    /// Returns [`None`] if the volume of the entry is from an earlier catalog generation.
    #[must_use = "Has no effect if the result is unused"]
    pub fn from_loader(catalog: &VolumeCatalog, loader: &LoaderEntry, title: &str) -> Option<Self> {
        let volume = catalog.get(loader.volume)?;
        Some(Self {
            volume: volume.clone(),
            path: loader.path.clone(),
            options: loader.options.clone(),
            os_type: loader.os_type,
            title: title.to_owned(),
            verbose: false,
            is_driver: false,
        })
    }

    /// Creates a request for a driver.
    #[must_use = "Has no effect if the result is unused"]
    pub fn driver(volume: &Volume, path: &str) -> Self {
        Self {
            volume: volume.clone(),
            path: path.to_owned(),
            options: None,
            os_type: OsType::Other,
            title: path.to_owned(),
            verbose: false,
            is_driver: true,
        }
    }
}

/// The parts of the configuration a launch needs.
#[derive(Clone, Debug)]
pub struct LaunchPolicy {
    /// Whether the systemd loader interface variables are written.
    pub write_systemd_vars: bool,

    /// Whether the previous boot is left unrecorded.
    pub ignore_previous_boot: bool,

    /// The partition GUID of the ESP the boot manager was started from.
    pub esp_guid: Option<Guid>,

    /// The architecture loaders must be built for.
    pub arch: Arch,

    /// Apple `boot-args` written before Mac OS is started.
    pub set_boot_args: Option<String>,
}

/// The states of a launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchState {
    /// Checking the format and architecture of the image.
    Validating,

    /// Asking the firmware to load the image.
    Loading,

    /// Loading a throwaway copy of the boot manager itself.
    SelfReloadHack,

    /// Checking how the firmware judged the image.
    AuthChecking,

    /// Handing the load options to the image.
    OptionsBinding,

    /// Writing the variables that describe this boot.
    NvramPreflight,

    /// Handing control to the image.
    Starting,

    /// The image gave control back.
    Returned,

    /// The launch failed before the image was started.
    Aborted,
}

/// An `Error` that may result from a launch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// The image is not a loader for this architecture, or is missing.
    #[error("Invalid Loader: {0}")]
    InvalidLoader(String),

    /// Secure Boot rejected the image.
    #[error("Secure Boot rejected {title}: {status:?}")]
    Authentication {
        /// The title of the image.
        title: String,

        /// The status the firmware returned.
        status: Status,
    },

    /// A firmware service failed.
    #[error("Error: {status:?} {context}")]
    Service {
        /// What was being done, like `While Loading Arch Linux`.
        context: String,

        /// The status the firmware returned.
        status: Status,
    },
}

/// Drives a launch through its states.
pub struct LaunchSequencer<'a, S: Storage, I: ImageServices, N: NvramStore> {
    /// The filesystem collaborator.
    storage: &'a mut S,

    /// The image collaborator.
    images: &'a mut I,

    /// The variable collaborator.
    nvram: &'a mut N,

    /// The configuration of the launch.
    policy: &'a LaunchPolicy,

    /// Every state entered by the last [`Self::run`].
    pub trace: Vec<LaunchState>,
}

impl<'a, S: Storage, I: ImageServices, N: NvramStore> LaunchSequencer<'a, S, I, N> {
    /// Creates a sequencer.
    pub const fn new(storage: &'a mut S, images: &'a mut I, nvram: &'a mut N, policy: &'a LaunchPolicy) -> Self {
        Self {
            storage,
            images,
            nvram,
            policy,
            trace: Vec::new(),
        }
    }

    /// Records a state transition.
    fn enter(&mut self, state: LaunchState) {
        debug!("Launch state: {state:?}");
        self.trace.push(state);
    }

    /// Enters [`LaunchState::Aborted`] and returns the error.
    fn abort<T>(&mut self, err: LaunchError) -> Result<T, LaunchError> {
        self.enter(LaunchState::Aborted);
        error!("{err}");
        Err(err)
    }

    /// Launches an image and waits for it to return.
    ///
    /// Returns the exit status of the image, if it returned successfully.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the image is not a valid loader, Secure Boot rejected it, a firmware service failed
    /// or the image exited with an error.
    pub fn run(&mut self, request: &LaunchRequest) -> Result<Status, LaunchError> {
        self.trace.clear();
        info!("Starting '{}' ... Load Options:- '{}'", request.title, request.options.as_deref().unwrap_or(""));

        self.enter(LaunchState::Validating);
        let validity = is_valid_loader(self.storage, Some(&request.volume), Some(&request.path), self.policy.arch);
        if !validity.is_valid() {
            return self.abort(LaunchError::InvalidLoader(request.path.clone()));
        }

        self.enter(LaunchState::Loading);
        let attempt = match self.load(request, validity) {
            Ok(attempt) => attempt,
            Err(err) => return self.abort(err),
        };

        if self.images.secure_boot_active() && self.images.shim_present() {
            // shim unregisters its validation hooks once an image that it loaded right before is started. Loading
            // ourselves here means the next start is never paired with the load of the real target, so the target
            // is still validated. The copy is never started, and it is left loaded.
            self.enter(LaunchState::SelfReloadHack);
            info!("Employing Shim 'LoadImage' Hack");
            if self.images.load_self().is_none() {
                debug!("Could not load a second copy of the boot manager");
            }
        }

        self.enter(LaunchState::AuthChecking);
        let image = match attempt {
            LoadAttempt { image, status } if status == Status::ACCESS_DENIED || status == Status::SECURITY_VIOLATION => {
                if let Some(image) = image {
                    self.images.unload(image);
                }
                return self.abort(LaunchError::Authentication {
                    title: request.title.clone(),
                    status,
                });
            }
            LoadAttempt { image: Some(image), status } if !status.is_error() => image,
            LoadAttempt { image, status } => {
                if let Some(image) = image {
                    self.images.unload(image);
                }
                let status = if status.is_error() { status } else { Status::LOAD_ERROR };
                return self.abort(LaunchError::Service {
                    context: format!("While Loading {}", request.title),
                    status,
                });
            }
        };

        self.enter(LaunchState::OptionsBinding);
        if let Some(options) = load_options(request) {
            debug!("Using load options '{options}'");
            if let Err(status) = self.images.set_load_options(image, &options) {
                if !request.is_driver {
                    self.images.unload(image);
                }
                return self.abort(LaunchError::Service {
                    context: "while Getting LoadedImageProtocol Handle".to_owned(),
                    status,
                });
            }
        }

        self.enter(LaunchState::NvramPreflight);
        self.preflight(request);

        self.enter(LaunchState::Starting);
        // no file handles to close: `UefiStorage` opens the filesystem per call and drops it before returning
        let status = self.images.start(image);

        self.enter(LaunchState::Returned);
        info!("'{status:?}' Returned from {}", request.title);
        if request.is_driver {
            self.images.reconnect_drivers(image);
        } else {
            self.images.unload(image);
        }

        if status.is_error() {
            return Err(LaunchError::Service {
                context: format!("Returned from {}", request.title),
                status,
            });
        }
        Ok(status)
    }

    /// Loads the image, inflating compressed images first.
    fn load(&mut self, request: &LaunchRequest, validity: Validity) -> Result<LoadAttempt<I::Image>, LaunchError> {
        if validity != Validity::ValidCompressed {
            return Ok(self.images.load(&request.volume, &request.path));
        }
        self.load_compressed(request)
    }

    /// Reads and inflates a compressed image, then loads it from memory.
    #[cfg(feature = "gzip")]
    fn load_compressed(&mut self, request: &LaunchRequest) -> Result<LoadAttempt<I::Image>, LaunchError> {
        let data = self.storage.read_file(&request.volume, &request.path).map_err(|e| {
            warn!("Could not read {}: {e}", request.path);
            LaunchError::Service {
                context: format!("While Loading {}", request.title),
                status: Status::LOAD_ERROR,
            }
        })?;

        let image = gzip::inflate(&data).map_err(|e| {
            warn!("Could not inflate {}: {e}", request.path);
            LaunchError::InvalidLoader(request.path.clone())
        })?;

        // the architecture gate applies to what is inside, too
        if crate::loader::classify_header(&image, self.policy.arch) != Validity::ValidExecutable {
            return Err(LaunchError::InvalidLoader(request.path.clone()));
        }

        Ok(self.images.load_buffer(&request.volume, &request.path, &image))
    }

    /// Compressed images cannot be loaded without the `gzip` feature.
    #[cfg(not(feature = "gzip"))]
    fn load_compressed(&mut self, request: &LaunchRequest) -> Result<LoadAttempt<I::Image>, LaunchError> {
        Err(LaunchError::InvalidLoader(request.path.clone()))
    }

    /// Writes the variables that describe this boot. Failures are only logged.
    fn preflight(&mut self, request: &LaunchRequest) {
        if !request.is_driver && !self.policy.ignore_previous_boot {
            if let Err(e) = set_variable_str(self.nvram, &REFIND_VENDOR, PREVIOUS_BOOT_VAR, &request.title, true) {
                warn!("Could not store the previous boot: {e}");
            }
        }

        if self.policy.write_systemd_vars && request.os_type.wants_systemd_vars() {
            if let Some(guid) = self.policy.esp_guid {
                info!("Systemd LoaderDevicePartUUID:- '{guid}'");
                if let Err(e) = bli::set_device_part_uuid(self.nvram, guid) {
                    warn!("Could not set LoaderDevicePartUUID: {e}");
                }
            }
            let now = self.images.now_usec();
            if let Err(e) = bli::record_exit_time(self.nvram, now) {
                warn!("Could not set LoaderTimeExecUSec: {e}");
            }
        }

        if request.os_type == OsType::Mac
            && let Some(args) = &self.policy.set_boot_args
        {
            if let Err(e) = self.nvram.set(&APPLE_VENDOR, "boot-args", args.as_bytes(), true) {
                warn!("Could not set boot-args: {e}");
            }
        }
    }
}

/// The load options handed to the image.
///
/// Apple's `boot.efi` only parses its options correctly with a trailing space, which the EFI shell also adds.
fn load_options(request: &LaunchRequest) -> Option<String> {
    let options = request.options.as_deref()?;
    if request.os_type == OsType::Mac {
        Some(format!("{options} "))
    } else {
        Some(options.to_string())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::{
        fakes::{FakeImages, FakeNvram, FakeStorage, ImageCall, pe_header},
        system::variable::get_variable_str,
    };

    const KERNEL: &str = "\\EFI\\arch\\vmlinuz-linux";

    fn policy() -> LaunchPolicy {
        LaunchPolicy {
            write_systemd_vars: true,
            ignore_previous_boot: false,
            esp_guid: Some(uefi::guid!("01234567-89ab-cdef-0123-456789abcdef")),
            arch: Arch::X64,
            set_boot_args: None,
        }
    }

    fn setup() -> (FakeStorage, FakeImages, FakeNvram) {
        let mut storage = FakeStorage::with_volumes(&["ESP"]);
        storage.add_file(0, KERNEL, pe_header(Arch::X64.machine()));
        storage.add_file(0, "\\EFI\\drivers\\ext4_x64.efi", pe_header(Arch::X64.machine()));
        (storage, FakeImages::default(), FakeNvram::default())
    }

    fn request(storage: &FakeStorage, path: &str, is_driver: bool) -> LaunchRequest {
        LaunchRequest {
            volume: storage.volumes[0].clone(),
            path: path.to_owned(),
            options: Some("root=/dev/sda2 rw".to_owned()),
            os_type: if is_driver { OsType::Other } else { OsType::Linux },
            title: "Boot Arch Linux from ESP".to_owned(),
            verbose: false,
            is_driver,
        }
    }

    #[test]
    fn test_successful_launch() {
        let (mut storage, mut images, mut nvram) = setup();
        let policy = policy();
        let request = request(&storage, KERNEL, false);
        let mut sequencer = LaunchSequencer::new(&mut storage, &mut images, &mut nvram, &policy);

        assert_eq!(sequencer.run(&request), Ok(Status::SUCCESS));
        assert_eq!(
            sequencer.trace,
            vec![
                LaunchState::Validating,
                LaunchState::Loading,
                LaunchState::AuthChecking,
                LaunchState::OptionsBinding,
                LaunchState::NvramPreflight,
                LaunchState::Starting,
                LaunchState::Returned,
            ]
        );

        assert!(images.calls.contains(&ImageCall::SetOptions(0, "root=/dev/sda2 rw".to_owned())));
        assert_eq!(
            get_variable_str(&mut nvram, &REFIND_VENDOR, PREVIOUS_BOOT_VAR).ok().flatten(),
            Some("Boot Arch Linux from ESP".to_owned())
        );
        assert!(nvram.writes.iter().any(|x| x == "LoaderDevicePartUUID"));
    }

    #[test]
    fn test_storage_usable_after_return() {
        let (mut storage, mut images, mut nvram) = setup();
        let policy = policy();
        let request = request(&storage, KERNEL, false);
        let mut sequencer = LaunchSequencer::new(&mut storage, &mut images, &mut nvram, &policy);

        assert_eq!(sequencer.run(&request), Ok(Status::SUCCESS));
        assert_eq!(
            is_valid_loader(sequencer.storage, Some(&request.volume), Some(KERNEL), Arch::X64),
            Validity::ValidExecutable
        );

        let first = sequencer.trace.clone();
        assert_eq!(sequencer.run(&request), Ok(Status::SUCCESS));
        assert_eq!(sequencer.trace, first);
        assert_eq!(images.started(), 2);
    }

    #[test]
    fn test_secure_boot_rejection() {
        let (mut storage, mut images, mut nvram) = setup();
        images.load_status = Status::SECURITY_VIOLATION;
        images.load_yields_image = true;
        let policy = policy();
        let request = request(&storage, KERNEL, false);
        let mut sequencer = LaunchSequencer::new(&mut storage, &mut images, &mut nvram, &policy);

        let result = sequencer.run(&request);
        assert!(matches!(result, Err(LaunchError::Authentication { .. })));
        assert_eq!(sequencer.trace.last(), Some(&LaunchState::Aborted));
        assert!(!sequencer.trace.contains(&LaunchState::NvramPreflight));

        assert!(nvram.writes.is_empty());
        assert!(images.calls.contains(&ImageCall::Unload(0)));
        assert!(!images.calls.iter().any(|x| matches!(x, ImageCall::Start(_))));
    }

    #[test]
    fn test_driver_reconnects_without_unload() {
        let (mut storage, mut images, mut nvram) = setup();
        let policy = policy();
        let request = request(&storage, "\\EFI\\drivers\\ext4_x64.efi", true);
        let mut sequencer = LaunchSequencer::new(&mut storage, &mut images, &mut nvram, &policy);

        assert!(sequencer.run(&request).is_ok());
        assert!(images.calls.contains(&ImageCall::Reconnect(0)));
        assert!(!images.calls.contains(&ImageCall::Unload(0)));
        assert!(nvram.get(&REFIND_VENDOR, PREVIOUS_BOOT_VAR).ok().flatten().is_none());
    }

    #[test]
    fn test_loader_unloads_without_reconnect() {
        let (mut storage, mut images, mut nvram) = setup();
        images.start_status = Status::ABORTED;
        let policy = policy();
        let request = request(&storage, KERNEL, false);
        let mut sequencer = LaunchSequencer::new(&mut storage, &mut images, &mut nvram, &policy);

        let result = sequencer.run(&request);
        assert_eq!(
            result,
            Err(LaunchError::Service {
                context: "Returned from Boot Arch Linux from ESP".to_owned(),
                status: Status::ABORTED
            })
        );
        assert_eq!(sequencer.trace.last(), Some(&LaunchState::Returned));
        assert!(images.calls.contains(&ImageCall::Unload(0)));
        assert!(!images.calls.iter().any(|x| matches!(x, ImageCall::Reconnect(_))));
    }

    #[test]
    fn test_invalid_loader_is_never_loaded() {
        let (mut storage, mut images, mut nvram) = setup();
        storage.add_file(0, "\\EFI\\arm\\grubaa64.efi", pe_header(Arch::Aa64.machine()));
        let policy = policy();
        let mut sequencer = LaunchSequencer::new(&mut storage, &mut images, &mut nvram, &policy);

        for path in ["\\EFI\\arm\\grubaa64.efi", "\\EFI\\missing.efi"] {
            let request = request(sequencer.storage, path, false);
            assert_eq!(sequencer.run(&request), Err(LaunchError::InvalidLoader(path.to_owned())));
            assert_eq!(sequencer.trace, vec![LaunchState::Validating, LaunchState::Aborted]);
        }
        assert!(images.calls.is_empty());
    }

    #[test]
    fn test_self_reload_hack() {
        let (mut storage, mut images, mut nvram) = setup();
        images.secure_boot = true;
        images.shim = true;
        let policy = policy();
        let request = request(&storage, KERNEL, false);
        let mut sequencer = LaunchSequencer::new(&mut storage, &mut images, &mut nvram, &policy);

        assert!(sequencer.run(&request).is_ok());
        assert!(sequencer.trace.contains(&LaunchState::SelfReloadHack));
        assert!(images.calls.contains(&ImageCall::LoadSelf));
        // only the target is unloaded
        assert_eq!(images.calls.iter().filter(|x| matches!(x, ImageCall::Unload(_))).count(), 1);
    }

    #[test]
    fn test_mac_options_and_boot_args() {
        let (mut storage, mut images, mut nvram) = setup();
        let mut policy = policy();
        policy.set_boot_args = Some("-v".to_owned());
        let mut request = request(&storage, KERNEL, false);
        request.os_type = OsType::Mac;
        let mut sequencer = LaunchSequencer::new(&mut storage, &mut images, &mut nvram, &policy);

        assert!(sequencer.run(&request).is_ok());
        assert!(images.calls.contains(&ImageCall::SetOptions(0, "root=/dev/sda2 rw ".to_owned())));
        assert_eq!(nvram.get(&APPLE_VENDOR, "boot-args").ok().flatten(), Some(b"-v".to_vec()));
        // Mac OS does not read the systemd variables
        assert!(!nvram.writes.iter().any(|x| x == "LoaderDevicePartUUID"));
    }

    #[test]
    fn test_nvram_failures_do_not_abort() {
        let (mut storage, mut images, mut nvram) = setup();
        nvram.fail_writes = true;
        let policy = policy();
        let request = request(&storage, KERNEL, false);
        let mut sequencer = LaunchSequencer::new(&mut storage, &mut images, &mut nvram, &policy);

        assert_eq!(sequencer.run(&request), Ok(Status::SUCCESS));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_compressed_loader() {
        use miniz_oxide::deflate::compress_to_vec;

        let compress = |payload: &[u8]| {
            let mut data = vec![0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 0, 3];
            data.extend_from_slice(&compress_to_vec(payload, 6));
            data.extend_from_slice(&gzip::crc32(payload).to_le_bytes());
            data.extend_from_slice(&u32::try_from(payload.len()).unwrap_or_default().to_le_bytes());
            data
        };

        let (mut storage, mut images, mut nvram) = setup();
        storage.add_file(0, "\\vmlinuz.gz", compress(&pe_header(Arch::X64.machine())));
        storage.add_file(0, "\\arm.gz", compress(&pe_header(Arch::Aa64.machine())));
        let policy = policy();
        let mut sequencer = LaunchSequencer::new(&mut storage, &mut images, &mut nvram, &policy);

        let request = request(sequencer.storage, "\\vmlinuz.gz", false);
        assert!(sequencer.run(&request).is_ok());

        let request = LaunchRequest {
            path: "\\arm.gz".to_owned(),
            ..request
        };
        assert_eq!(sequencer.run(&request), Err(LaunchError::InvalidLoader("\\arm.gz".to_owned())));
        assert_eq!(images.calls.iter().filter(|x| matches!(x, ImageCall::LoadBuffer(_))).count(), 1);
    }
}
