// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! [`ImageServices`] backed by UEFI boot services.
//!
//! Images are loaded by device path with [`BootPolicy::ExactMatch`], so the firmware never goes looking for a
//! default loader on its own. Compressed images are inflated by the caller and handed over as a buffer.

use alloc::string::String;
use core::cell::RefCell;

use log::{debug, warn};
use uefi::{
    CString16, Handle, Status,
    boot::{self, LoadImageSource, OpenProtocolAttributes, OpenProtocolParams, SearchType},
    proto::{
        BootPolicy,
        device_path::{DevicePath, LoadedImageDevicePath},
        loaded_image::LoadedImage,
        shim::ShimLock,
    },
    runtime::VariableVendor,
};

use crate::{
    BootResult,
    launch::{ImageServices, LoadAttempt},
    system::{
        fs::to_fs_path,
        helper::{device_path_to_text, join_to_device_path, str_to_cstr},
        time::timer_usec,
        variable::{RuntimeNvram, get_variable},
    },
    volume::Volume,
};

/// The load options of the image that is about to be started.
///
/// The firmware only keeps a pointer to the options, so they have to outlive the call that sets them. Only one image
/// is ever started at a time, so a single slot is enough.
static LOAD_OPTIONS: LoadOptions = LoadOptions {
    options: RefCell::new(None),
};

/// Storage for the UCS-2 load options of an image.
struct LoadOptions {
    /// The options most recently handed to an image.
    options: RefCell<Option<CString16>>,
}

impl LoadOptions {
    /// Replaces the stored options.
    fn set(&self, options: CString16) {
        *self.options.borrow_mut() = Some(options);
    }

    /// Points the loaded image at the stored options.
    fn bind(&self, image: &mut LoadedImage) {
        let options = self.options.borrow();
        let Some(options) = options.as_ref() else {
            return;
        };
        let size = u32::try_from(options.num_bytes()).unwrap_or(u32::MAX);

        // SAFETY: the options live in a static slot that is only replaced when the next image is bound, and an image
        // is always started before the next one is loaded.
        unsafe {
            image.set_load_options(options.as_ptr().cast::<u8>(), size);
        }
    }
}

// SAFETY: uefi is a single threaded environment, thread safety is irrelevant
unsafe impl Sync for LoadOptions {}

/// Image services of the running firmware.
#[derive(Default)]
pub struct UefiImageServices;

impl UefiImageServices {
    /// Creates the image services.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn new() -> Self {
        Self
    }
}

/// Converts the result of [`boot::load_image`] into a [`LoadAttempt`].
///
/// The [`uefi`] wrapper does not hand out an image on failure, so a rejected image never needs unloading here.
fn attempt(result: uefi::Result<Handle>) -> LoadAttempt<Handle> {
    match result {
        Ok(handle) => LoadAttempt::loaded(handle),
        Err(e) => LoadAttempt::failed(e.status()),
    }
}

impl ImageServices for UefiImageServices {
    type Image = Handle;

    fn load(&mut self, volume: &Volume, path: &str) -> LoadAttempt<Handle> {
        let Some(handle) = volume.handle else {
            return LoadAttempt::failed(Status::NOT_FOUND);
        };
        let Ok(path) = to_fs_path(path) else {
            return LoadAttempt::failed(Status::INVALID_PARAMETER);
        };
        let dev_path = match boot::open_protocol_exclusive::<DevicePath>(handle) {
            Ok(dev_path) => dev_path,
            Err(e) => return LoadAttempt::failed(e.status()),
        };

        let mut buf = [0; 2048]; // device paths to files on a partition stay well below this
        let full_path = match join_to_device_path(&dev_path, &path, &mut buf) {
            Ok(full_path) => full_path,
            Err(e) => {
                warn!("Could not build a device path for {path}: {e}");
                return LoadAttempt::failed(Status::INVALID_PARAMETER);
            }
        };

        attempt(boot::load_image(
            boot::image_handle(),
            LoadImageSource::FromDevicePath {
                device_path: &full_path,
                boot_policy: BootPolicy::ExactMatch,
            },
        ))
    }

    fn load_buffer(&mut self, volume: &Volume, path: &str, data: &[u8]) -> LoadAttempt<Handle> {
        // the file path only tells the image where it came from, a missing one is not fatal
        let dev_path = volume
            .handle
            .and_then(|handle| boot::open_protocol_exclusive::<DevicePath>(handle).ok());
        let path = to_fs_path(path).ok();
        let mut buf = [0; 2048];
        let full_path = match (&dev_path, &path) {
            (Some(dev_path), Some(path)) => join_to_device_path(dev_path, path, &mut buf).ok(),
            _ => None,
        };

        attempt(boot::load_image(
            boot::image_handle(),
            LoadImageSource::FromBuffer {
                buffer: data,
                file_path: full_path.as_deref(),
            },
        ))
    }

    fn load_self(&mut self) -> Option<Handle> {
        let dev_path = boot::open_protocol_exclusive::<LoadedImageDevicePath>(boot::image_handle()).ok()?;
        boot::load_image(
            boot::image_handle(),
            LoadImageSource::FromDevicePath {
                device_path: &dev_path,
                boot_policy: BootPolicy::ExactMatch,
            },
        )
        .ok()
    }

    fn set_load_options(&mut self, image: Handle, options: &str) -> Result<(), Status> {
        let options = str_to_cstr(options).map_err(|_| Status::INVALID_PARAMETER)?;
        let mut loaded = boot::open_protocol_exclusive::<LoadedImage>(image).map_err(|e| e.status())?;
        LOAD_OPTIONS.set(options);
        LOAD_OPTIONS.bind(&mut loaded);
        Ok(())
    }

    fn start(&mut self, image: Handle) -> Status {
        match boot::start_image(image) {
            Ok(()) => Status::SUCCESS,
            Err(e) => e.status(),
        }
    }

    fn unload(&mut self, image: Handle) {
        if let Err(e) = boot::unload_image(image) {
            debug!("Could not unload image: {e}");
        }
    }

    fn reconnect_drivers(&mut self, _driver: Handle) {
        reconnect_all();
    }

    fn secure_boot_active(&mut self) -> bool {
        matches!(
            get_variable::<u8>(&mut RuntimeNvram, &VariableVendor::GLOBAL_VARIABLE, "SecureBoot"),
            Ok(1)
        )
    }

    fn shim_present(&mut self) -> bool {
        boot::get_handle_for_protocol::<ShimLock>().is_ok()
    }

    fn now_usec(&mut self) -> u64 {
        timer_usec()
    }
}

/// Returns the path of the running boot manager image on its volume, like `\EFI\refind\refind_x64.efi`.
///
/// # Errors
///
/// May return an `Error` if the image has no [`LoadedImage`] protocol or no file path, or the firmware cannot turn
/// device paths into text.
pub fn self_image_path() -> BootResult<String> {
    let loaded = boot::open_protocol_exclusive::<LoadedImage>(boot::image_handle())?;
    let file_path = loaded
        .file_path()
        .ok_or(uefi::Error::from(Status::NOT_FOUND))?;
    Ok(String::from(&*device_path_to_text(file_path)?))
}

/// Connects every controller recursively, so that freshly loaded drivers bind to their devices.
pub(crate) fn reconnect_all() {
    let Ok(handles) = boot::locate_handle_buffer(SearchType::AllHandles) else {
        warn!("Could not list handles to reconnect");
        return;
    };
    for handle in handles.iter() {
        let _ = boot::connect_controller(*handle, None, None, true); // most handles are not controllers
    }
}

/// Opens a protocol without taking it away from the drivers that already use it.
///
/// # Errors
///
/// May return an `Error` if the handle does not support the protocol.
pub(crate) fn open_shared<P: uefi::proto::ProtocolPointer + ?Sized>(
    handle: Handle,
) -> uefi::Result<boot::ScopedProtocol<P>> {
    // SAFETY: the protocol is only read from, and it is dropped before any image is started or unloaded, so the
    // driver that installed it stays in place for the whole time it is open.
    unsafe {
        boot::open_protocol::<P>(
            OpenProtocolParams {
                handle,
                agent: boot::image_handle(),
                controller: None,
            },
            OpenProtocolAttributes::GetProtocol,
        )
    }
}
