// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! The volume catalog.
//!
//! A [`VolumeCatalog`] owns every firmware-visible filesystem or block device found during one scan. Each
//! rescan throws away the previous collection and builds a new one, bumping the catalog generation. Menu entries
//! refer to volumes through a [`VolumeRef`] (generation + ordinal), so an entry built from an older generation
//! can never resolve to a volume of the current one.
//!
//! The firmware itself is reached through the [`Storage`] trait. [`crate::system::volumes::UefiStorage`] is the
//! implementation backed by UEFI boot services.

use alloc::{borrow::ToOwned, format, string::String, vec::Vec};

use log::{info, warn};
use thiserror::Error;
use uefi::{Guid, Handle, Status};

use crate::{
    system::fs::FsError,
    text::{contains_ignore_case, eq_ignore_case, sanitize_name},
};

pub mod fs_type;

pub use fs_type::FsType;

/// An `Error` that may result from enumerating volumes.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The firmware could not list the handles supporting block or filesystem protocols.
    #[error("Failed to enumerate volumes: {0}")]
    Enumerate(Status),
}

/// The kind of device a volume lives on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VolumeKind {
    /// A fixed, internal disk.
    #[default]
    Internal,

    /// A removable disk, such as USB storage or an SD card.
    External,

    /// An optical disc.
    Optical,

    /// A network device.
    Net,
}

/// One firmware-visible filesystem or block device.
#[derive(Clone, Debug, Default)]
pub struct Volume {
    /// The ordinal of the volume in its scan generation.
    pub index: usize,

    /// The firmware handle of the volume. Volumes that did not come from the firmware have none.
    pub handle: Option<Handle>,

    /// Whether the root directory could be opened.
    ///
    /// A volume without a root directory must never be passed to file operations.
    pub has_root: bool,

    /// The kind of device the volume lives on.
    pub kind: VolumeKind,

    /// The filesystem found on the volume.
    pub fs_type: FsType,

    /// The unique GUID of the partition, if it is a GPT partition.
    pub part_guid: Option<Guid>,

    /// The filesystem label.
    pub fs_name: String,

    /// The GPT partition name.
    pub part_name: String,

    /// The name shown to the user.
    pub name: String,

    /// Whether the boot manager itself was loaded from this volume.
    pub is_self: bool,

    /// Whether this is a whole disk rather than a partition.
    pub is_whole_disk: bool,
}

impl Volume {
    /// Checks if a volume description (GUID, filesystem label or partition name) matches this volume.
    ///
    /// A description that parses as a GUID is only ever compared to the partition GUID.
    #[must_use = "Has no effect if the result is unused"]
    pub fn matches_description(&self, description: &str) -> bool {
        if let Ok(guid) = Guid::try_parse(description) {
            return self.part_guid == Some(guid);
        }
        eq_ignore_case(description, &self.name)
            || eq_ignore_case(description, &self.fs_name)
            || eq_ignore_case(description, &self.part_name)
    }

    /// Returns every name that the volume can be identified by.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        [&*self.fs_name, &*self.name, &*self.part_name]
            .into_iter()
            .filter(|x| !x.is_empty())
    }
}

/// Picks the name shown for a volume: its filesystem label, else its partition name, else a name made up from the
/// filesystem type.
#[must_use = "Has no effect if the result is unused"]
pub fn display_name(volume: &Volume) -> String {
    let name = [&volume.fs_name, &volume.part_name]
        .into_iter()
        .map(|x| sanitize_name(x))
        .find(|x| !x.is_empty());
    if let Some(name) = name {
        return name;
    }

    match (volume.fs_type, volume.is_whole_disk) {
        (_, true) => "whole disk volume".to_owned(),
        (FsType::Unknown, false) => "unknown volume".to_owned(),
        (fs_type, false) => format!("{fs_type} volume"),
    }
}

/// A reference from a menu entry to the volume that owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeRef {
    /// The catalog generation the volume belongs to.
    pub generation: u32,

    /// The ordinal of the volume in that generation.
    pub index: usize,
}

/// A directory entry as returned by [`Storage::list_dir`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirEntry {
    /// The name of the file or directory.
    pub name: String,

    /// Whether the entry is a directory.
    pub is_dir: bool,

    /// The size of the file in bytes.
    pub size: u64,

    /// A key that sorts by modification time (larger is newer).
    pub modified: u64,
}

/// Access to firmware volumes and the files on them.
///
/// Paths are volume-relative, with backslash separators. Implementations are only ever handed volumes with
/// [`Volume::has_root`] set for file operations.
pub trait Storage {
    /// Enumerates every block or filesystem instance the firmware currently exposes.
    ///
    /// The returned volumes are numbered in enumeration order by the catalog.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the firmware could not enumerate its handles at all.
    fn enumerate(&mut self) -> Result<Vec<Volume>, CatalogError>;

    /// Asks the firmware to reconnect drivers to every controller, so that new media becomes visible.
    fn reconnect(&mut self);

    /// Checks if a file exists.
    fn file_exists(&mut self, volume: &Volume, path: &str) -> bool;

    /// Reads the start of a file into `buf`, returning the number of bytes read.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the file could not be opened or read.
    fn read_header(&mut self, volume: &Volume, path: &str, buf: &mut [u8])
    -> Result<usize, FsError>;

    /// Reads an entire file.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the file could not be opened or read.
    fn read_file(&mut self, volume: &Volume, path: &str) -> Result<Vec<u8>, FsError>;

    /// Lists a directory, excluding `.` and `..`.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the path could not be opened as a directory.
    fn list_dir(&mut self, volume: &Volume, path: &str) -> Result<Vec<DirEntry>, FsError>;
}

/// The collection of volumes found in the most recent scan.
#[derive(Default)]
pub struct VolumeCatalog {
    /// The current scan generation.
    generation: u32,

    /// The volumes of the current generation, in enumeration order.
    volumes: Vec<Volume>,
}

impl VolumeCatalog {
    /// Creates an empty catalog.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn new() -> Self {
        Self {
            generation: 0,
            volumes: Vec::new(),
        }
    }

    /// Discards the current volumes and enumerates them again.
    ///
    /// A failure to enumerate leaves an empty catalog. The error is returned so the caller can report it, but the
    /// catalog is usable either way.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the firmware could not enumerate its volumes.
    pub fn scan(&mut self, storage: &mut impl Storage) -> Result<(), CatalogError> {
        self.volumes.clear();
        self.generation = self.generation.wrapping_add(1);

        let volumes = storage.enumerate()?;
        for (i, mut volume) in volumes.into_iter().enumerate() {
            volume.index = i;
            if !volume.has_root {
                warn!("Volume {i} ({}) is unreadable", volume.name);
            }
            self.volumes.push(volume);
        }
        info!(
            "Found {} volumes (generation {})",
            self.volumes.len(),
            self.generation
        );
        Ok(())
    }

    /// Returns the current generation.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Returns the volumes of the current generation.
    #[must_use = "Has no effect if the result is unused"]
    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    /// Creates a [`VolumeRef`] for a volume of this generation.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn reference(&self, volume: &Volume) -> VolumeRef {
        VolumeRef {
            generation: self.generation,
            index: volume.index,
        }
    }

    /// Resolves a [`VolumeRef`]. References from an older generation never resolve.
    #[must_use = "Has no effect if the result is unused"]
    pub fn get(&self, volume: VolumeRef) -> Option<&Volume> {
        if volume.generation != self.generation {
            return None;
        }
        self.volumes.get(volume.index)
    }

    /// Returns the volume the boot manager was loaded from.
    #[must_use = "Has no effect if the result is unused"]
    pub fn self_volume(&self) -> Option<&Volume> {
        self.volumes.iter().find(|x| x.is_self)
    }

    /// Finds a volume by identifier.
    ///
    /// The identifier is matched, in order of priority, as an exact partition GUID, as an exact case-insensitive
    /// name, as a case-insensitive substring of a name, or as a `fsN` volume number token. The first volume in
    /// enumeration order matching the highest-priority rule wins.
    #[must_use = "Has no effect if the result is unused"]
    pub fn find(&self, identifier: &str) -> Option<&Volume> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return None;
        }

        if let Ok(guid) = Guid::try_parse(identifier) {
            return self.volumes.iter().find(|x| x.part_guid == Some(guid));
        }

        self.volumes
            .iter()
            .find(|x| x.names().any(|name| eq_ignore_case(name, identifier)))
            .or_else(|| {
                self.volumes
                    .iter()
                    .find(|x| x.names().any(|name| contains_ignore_case(name, identifier)))
            })
            .or_else(|| {
                let number = identifier
                    .strip_prefix("fs")
                    .or_else(|| identifier.strip_prefix("FS"))?;
                let number: usize = number.parse().ok()?;
                self.volumes.iter().filter(|x| x.has_root).nth(number)
            })
    }
}

#[cfg(test)]
mod tests {
    use alloc::borrow::ToOwned;

    use uefi::guid;

    use super::*;
    use crate::fakes::FakeStorage;

    fn volume(name: &str) -> Volume {
        Volume {
            has_root: true,
            name: name.to_owned(),
            fs_name: name.to_owned(),
            ..Volume::default()
        }
    }

    #[test]
    fn test_find_priority() {
        let mut storage = FakeStorage::default();
        let mut guid_vol = volume("Data");
        guid_vol.part_guid = Some(guid!("11111111-2222-3333-4444-555555555555"));
        storage.volumes = alloc::vec![volume("Linux Data"), volume("Linux"), guid_vol];

        let mut catalog = VolumeCatalog::new();
        catalog.scan(&mut storage).expect("scan should succeed");

        assert_eq!(catalog.find("linux").map(|x| x.index), Some(1));
        assert_eq!(catalog.find("DATA").map(|x| x.index), Some(2));
        assert_eq!(catalog.find("Dat").map(|x| x.index), Some(0));
        assert_eq!(
            catalog
                .find("11111111-2222-3333-4444-555555555555")
                .map(|x| x.index),
            Some(2)
        );
        assert_eq!(catalog.find("fs1").map(|x| x.index), Some(1));
        assert!(catalog.find("Windows").is_none());
        assert!(catalog.find("").is_none());
    }

    #[test]
    fn test_stale_reference() {
        let mut storage = FakeStorage::default();
        storage.volumes = alloc::vec![volume("ESP")];

        let mut catalog = VolumeCatalog::new();
        catalog.scan(&mut storage).expect("scan should succeed");
        let old = catalog.reference(&catalog.volumes()[0]);
        assert!(catalog.get(old).is_some());

        catalog.scan(&mut storage).expect("scan should succeed");
        assert!(catalog.get(old).is_none());
    }

    #[test]
    fn test_enumeration_failure_is_empty() {
        let mut storage = FakeStorage {
            fail_enumerate: true,
            ..FakeStorage::default()
        };
        storage.volumes = alloc::vec![volume("ESP")];

        let mut catalog = VolumeCatalog::new();
        assert!(catalog.scan(&mut storage).is_err());
        assert!(catalog.volumes().is_empty());
    }

    #[test]
    fn test_display_name() {
        let mut vol = Volume {
            fs_type: FsType::Ext4,
            ..Volume::default()
        };
        assert_eq!(display_name(&vol), "ext4 volume");

        vol.part_name = " Linux\u{7}root ".to_owned();
        assert_eq!(display_name(&vol), "Linuxroot");

        vol.fs_name = "\t".to_owned();
        assert_eq!(display_name(&vol), "Linuxroot");

        vol.fs_name = "ROOT".to_owned();
        assert_eq!(display_name(&vol), "ROOT");

        let disk = Volume {
            is_whole_disk: true,
            ..Volume::default()
        };
        assert_eq!(display_name(&disk), "whole disk volume");
    }

    #[test]
    fn test_matches_description() {
        let mut vol = volume("Boot");
        vol.part_name = "EFI system partition".to_owned();
        assert!(vol.matches_description("boot"));
        assert!(vol.matches_description("efi SYSTEM partition"));
        assert!(!vol.matches_description("efi"));
        assert!(!vol.matches_description("00000000-0000-0000-0000-000000000001"));
    }
}
