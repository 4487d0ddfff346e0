//! [`Storage`] backed by UEFI boot services.
//!
//! Every instance of [`BlockIO`] becomes a volume, whole disks included. Filesystems that the firmware exposes
//! without a block device underneath are added after them. File operations open the [`SimpleFileSystem`] of the
//! volume for the length of one call.

use alloc::{string::String, vec::Vec};

use log::{debug, warn};
use uefi::{
    CStr16, Handle,
    boot::{self, SearchType},
    proto::{
        device_path::{DevicePath, DeviceSubType, DeviceType},
        loaded_image::LoadedImage,
        media::{block::BlockIO, disk::DiskIo, fs::SimpleFileSystem, partition::PartitionInfo},
    },
};

use crate::{
    system::{
        fs::{FsError, UefiFileSystem, to_fs_path},
        image::{open_shared, reconnect_all},
    },
    volume::{CatalogError, DirEntry, FsType, Storage, Volume, VolumeKind, display_name},
};

/// Volumes of the running firmware.
#[derive(Default)]
pub struct UefiStorage;

impl UefiStorage {
    /// Creates the storage.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn new() -> Self {
        Self
    }

    /// Opens the filesystem of a volume.
    fn open(volume: &Volume) -> Result<UefiFileSystem, FsError> {
        let handle = volume
            .handle
            .ok_or(FsError::OpenErr(uefi::Status::NOT_FOUND))?;
        UefiFileSystem::from_handle(handle)
    }
}

/// Works out the kind of device from the nodes of its device path.
fn kind_of(handle: Handle, removable: bool) -> VolumeKind {
    let mut kind = if removable { VolumeKind::External } else { VolumeKind::Internal };
    let Ok(dev_path) = open_shared::<DevicePath>(handle) else {
        return kind;
    };
    for node in dev_path.node_iter() {
        match (node.device_type(), node.sub_type()) {
            (DeviceType::MEDIA, DeviceSubType::MEDIA_CD_ROM) => return VolumeKind::Optical,
            (DeviceType::MESSAGING, DeviceSubType::MESSAGING_USB) => kind = VolumeKind::External,
            _ => (),
        }
    }
    kind
}

/// Reads the GPT partition GUID and name.
fn partition_of(handle: Handle) -> (Option<uefi::Guid>, String) {
    let Ok(info) = open_shared::<PartitionInfo>(handle) else {
        return (None, String::new());
    };
    let Some(entry) = info.gpt_partition_entry() else {
        return (None, String::new());
    };
    let guid = entry.unique_partition_guid;
    let name = entry.partition_name;
    let name = CStr16::from_char16_until_nul(&name)
        .map(String::from)
        .unwrap_or_default();
    (Some(guid), name)
}

/// Sniffs the filesystem type from the raw bytes of the volume.
fn fs_type_of(handle: Handle, media_id: u32) -> FsType {
    let Ok(disk) = open_shared::<DiskIo>(handle) else {
        return FsType::Unknown;
    };
    FsType::sniff(|offset, buf| disk.read_disk(media_id, offset, buf).is_ok())
}

/// Describes one volume.
fn describe(handle: Handle, self_device: Option<Handle>) -> Volume {
    let mut volume = Volume {
        handle: Some(handle),
        is_self: self_device == Some(handle),
        ..Volume::default()
    };

    if let Ok(block) = open_shared::<BlockIO>(handle) {
        let media = block.media();
        volume.is_whole_disk = !media.is_logical_partition();
        volume.kind = kind_of(handle, media.is_removable_media());
        if media.is_media_present() {
            volume.fs_type = fs_type_of(handle, media.media_id());
        }
    } else {
        volume.kind = kind_of(handle, false);
    }

    (volume.part_guid, volume.part_name) = partition_of(handle);

    if let Ok(mut fs) = UefiFileSystem::from_handle(handle) {
        volume.has_root = fs.has_root();
        if volume.has_root {
            volume.fs_name = fs.get_volume_label().unwrap_or_default();
        }
    }

    volume.name = display_name(&volume);
    debug!(
        "Volume '{}': {:?}, {}, readable: {}",
        volume.name, volume.kind, volume.fs_type, volume.has_root
    );
    volume
}

impl Storage for UefiStorage {
    fn enumerate(&mut self) -> Result<Vec<Volume>, CatalogError> {
        let self_device = boot::open_protocol_exclusive::<LoadedImage>(boot::image_handle())
            .ok()
            .and_then(|x| x.device());

        let blocks = boot::locate_handle_buffer(SearchType::from_proto::<BlockIO>())
            .map_err(|e| CatalogError::Enumerate(e.status()))?;
        let mut handles: Vec<Handle> = blocks.iter().copied().collect();

        // some firmware filesystems have no block device under them
        match boot::locate_handle_buffer(SearchType::from_proto::<SimpleFileSystem>()) {
            Ok(filesystems) => {
                for handle in filesystems.iter() {
                    if !handles.contains(handle) {
                        handles.push(*handle);
                    }
                }
            }
            Err(e) => warn!("Could not list filesystems: {e}"),
        }

        Ok(handles
            .into_iter()
            .map(|handle| describe(handle, self_device))
            .collect())
    }

    fn reconnect(&mut self) {
        reconnect_all();
    }

    fn file_exists(&mut self, volume: &Volume, path: &str) -> bool {
        let Ok(path) = to_fs_path(path) else {
            return false;
        };
        Self::open(volume).is_ok_and(|mut fs| fs.exists(&path))
    }

    fn read_header(&mut self, volume: &Volume, path: &str, buf: &mut [u8]) -> Result<usize, FsError> {
        let path = to_fs_path(path)?;
        Self::open(volume)?.read_into(&path, buf)
    }

    fn read_file(&mut self, volume: &Volume, path: &str) -> Result<Vec<u8>, FsError> {
        let path = to_fs_path(path)?;
        Self::open(volume)?.read(&path)
    }

    fn list_dir(&mut self, volume: &Volume, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let path = to_fs_path(path)?;
        Self::open(volume)?.list_dir(&path)
    }
}
