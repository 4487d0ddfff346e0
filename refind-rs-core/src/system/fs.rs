//! Filesystem helper functions for other modules.
//!
//! These mostly wrap around the UEFI [`SimpleFileSystem`] protocol to make an interface that's slightly more
//! intuitive and more in line with the Rust standard library.
//!
//! These filesystem helpers are guaranteed to support FAT filesystems. This is mandated by the UEFI specification.
//! Other filesystems become visible once a driver for them is loaded, for example from the `drivers` directory next
//! to the boot manager. Loading such a driver reconnects every controller, so a rescan picks the new filesystems up.
//!
//! Every file handle opened here is dropped before the function returns. There are never any handles of the
//! boot manager left open across a call into the firmware image services.

use alloc::{string::String, vec, vec::Vec};
use thiserror::Error;
use uefi::{
    CStr16, Handle, Status,
    boot::{self, ScopedProtocol},
    fs::{COMMON_SKIP_DIRS, UefiDirectoryIter},
    proto::media::{
        file::{Directory, File, FileAttribute, FileInfo, FileMode, FileSystemVolumeLabel, RegularFile},
        fs::SimpleFileSystem,
    },
    runtime::Time,
};

use crate::{BootResult, volume::DirEntry};

/// The size of one gigabyte in bytes. This is the default value if a file is too big to be read.
///
/// This is also a reasonable maximum size for files that may be read.
pub(crate) const ONE_GIGABYTE: usize = 1024 * 1024 * 1024;

/// An error that may result from performing filesystem operations
#[derive(Error, Debug)]
pub enum FsError {
    /// A file could not be opened.
    #[error("Failed to open file: {0}")]
    OpenErr(Status),

    /// A file could not be read.
    #[error("Failed to read file: {0}")]
    ReadErr(Status),

    /// Failed to get a volume label on a partition.
    #[error("Could not get volume label of a partition")]
    VolumeLabelErr,

    /// A path could not be converted into UCS-2.
    #[error("Invalid path")]
    InvalidPath,
}

/// A rust-ier wrapper around [`SimpleFileSystem`].
///
/// This is similar to [`uefi::fs::FileSystem`], with different design decisions.
pub struct UefiFileSystem(ScopedProtocol<SimpleFileSystem>);

impl UefiFileSystem {
    /// Create a new [`UefiFileSystem`] from a handle that supports [`SimpleFileSystem`].
    ///
    /// # Errors
    ///
    /// May return an `Error` if the handle does not actually support [`SimpleFileSystem`].
    pub fn from_handle(handle: Handle) -> Result<Self, FsError> {
        let fs = boot::open_protocol_exclusive(handle).map_err(|e| FsError::OpenErr(e.status()))?;
        Ok(Self(fs))
    }

    /// Create a new [`UefiFileSystem`] from the same filesystem as the boot manager.
    ///
    /// This is mainly used when the boot manager wants to read from a file on the same filesystem as itself (for
    /// example, the configuration file).
    ///
    /// # Errors
    ///
    /// May return an `Error` if the boot image's filesystem does not support [`SimpleFileSystem`] for some reason.
    pub fn from_image_fs() -> BootResult<Self> {
        let fs = boot::get_image_file_system(boot::image_handle())?;
        Ok(Self(fs))
    }

    /// Checks if the root directory of the filesystem can be opened.
    pub fn has_root(&mut self) -> bool {
        self.0.open_volume().is_ok()
    }

    /// Gets the volume label from a [`SimpleFileSystem`]
    ///
    /// # Errors
    ///
    /// May return an `Error` if the volume could not be opened, or the volume does not support
    /// [`FileSystemVolumeLabel`]
    pub fn get_volume_label(&mut self) -> Result<String, FsError> {
        let mut root = self
            .0
            .open_volume()
            .map_err(|x| FsError::OpenErr(x.status()))?;
        let info = root
            .get_boxed_info::<FileSystemVolumeLabel>()
            .map_err(|_| FsError::VolumeLabelErr)?;
        Ok(String::from(info.volume_label()))
    }

    /// Checks if a file exists.
    ///
    /// It makes no distinction between whether a file could not be verified to exist or a file that really
    /// does not exist. Both will return `false`. This means that if the volume could not be opened, it will return
    /// `false` as the file cannot be verified to exist.
    pub fn exists(&mut self, path: &CStr16) -> bool {
        let Ok(mut root) = self.0.open_volume() else {
            return false;
        };

        root.open(path, FileMode::Read, FileAttribute::empty())
            .is_ok()
    }

    /// Reads the start of a file into a byte buffer, returning the amount of bytes read.
    ///
    /// Unlike [`Self::read`], a file larger than the buffer is not an error.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the volume couldn't be opened, the path does not point to a valid file, or the
    /// file could not be read for any reason.
    pub fn read_into(&mut self, path: &CStr16, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut file = self.get_regular_file(path)?;
        file.read(buf).map_err(|e| FsError::ReadErr(e.status()))
    }

    /// Reads the entire content of a file into a [`Vec<u8>`].
    ///
    /// # Errors
    ///
    /// May return an `Error` if the volume couldn't be opened, the path does not point to a valid file, or
    /// the file could not be read for any reason.
    pub fn read(&mut self, path: &CStr16) -> Result<Vec<u8>, FsError> {
        let mut file = self.get_regular_file(path)?;

        let info = file
            .get_boxed_info::<FileInfo>()
            .map_err(|e| FsError::ReadErr(e.status()))?;

        let size = usize::try_from(info.file_size()).unwrap_or(ONE_GIGABYTE);

        let mut buf = vec![0; size];
        let read = file
            .read(&mut buf)
            .map_err(|e| FsError::ReadErr(e.status()))?;
        buf.truncate(read);

        Ok(buf)
    }

    /// Lists the files and directories in a directory, excluding `.` and `..`.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the volume couldn't be opened, or the path does not point to a directory.
    pub fn list_dir(&mut self, path: &CStr16) -> Result<Vec<DirEntry>, FsError> {
        let dir = self.get_directory(path)?;
        Ok(UefiDirectoryIter::new(dir)
            .filter_map(Result::ok)
            .filter(|x| !COMMON_SKIP_DIRS.contains(&x.file_name()))
            .map(|x| DirEntry {
                name: String::from(x.file_name()),
                is_dir: x.is_directory(),
                size: x.file_size(),
                modified: time_key(x.modification_time()),
            })
            .collect())
    }

    /// Gets a handle to a [`RegularFile`] in the filesystem.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the volume couldn't be opened, or the path does not point to a file.
    fn get_regular_file(&mut self, path: &CStr16) -> Result<RegularFile, FsError> {
        let mut root = self
            .0
            .open_volume()
            .map_err(|e| FsError::OpenErr(e.status()))?;
        root.open(path, FileMode::Read, FileAttribute::empty())
            .map_err(|e| FsError::OpenErr(e.status()))?
            .into_regular_file()
            .ok_or(FsError::OpenErr(Status::INVALID_PARAMETER))
    }

    /// Gets a handle to a [`Directory`] in the filesystem.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the volume couldn't be opened, or the path does not point to a folder.
    fn get_directory(&mut self, path: &CStr16) -> Result<Directory, FsError> {
        let mut root = self
            .0
            .open_volume()
            .map_err(|e| FsError::OpenErr(e.status()))?;
        if path.is_empty() {
            return Ok(root);
        }
        root.open(path, FileMode::Read, FileAttribute::empty())
            .map_err(|e| FsError::OpenErr(e.status()))?
            .into_directory()
            .ok_or(FsError::OpenErr(Status::INVALID_PARAMETER))
    }
}

/// Packs a firmware timestamp into an integer that sorts chronologically.
#[must_use = "Has no effect if the result is unused"]
pub(crate) fn time_key(time: &Time) -> u64 {
    let date =
        (u64::from(time.year()) << 40) | (u64::from(time.month()) << 32) | (u64::from(time.day()) << 24);
    date | (u64::from(time.hour()) << 16) | (u64::from(time.minute()) << 8) | u64::from(time.second())
}

/// Converts a volume-relative path into the rooted UCS-2 form used by [`UefiFileSystem`].
///
/// # Errors
///
/// May return an `Error` if the path contains characters that cannot be represented in UCS-2.
pub(crate) fn to_fs_path(path: &str) -> Result<uefi::CString16, FsError> {
    let clean = crate::text::clean_path(path);
    let rooted = if clean.is_empty() {
        String::new()
    } else {
        alloc::format!("\\{clean}")
    };
    uefi::CString16::try_from(rooted.as_str()).map_err(|_| FsError::InvalidPath)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_fs_path() -> Result<(), FsError> {
        assert_eq!(String::from(&to_fs_path("EFI/ubuntu//grubx64.efi")?), "\\EFI\\ubuntu\\grubx64.efi");
        assert_eq!(String::from(&to_fs_path("\\")?), "");
        Ok(())
    }
}
