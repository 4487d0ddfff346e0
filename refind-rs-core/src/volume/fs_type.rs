//! Filesystem type detection from on-disk superblock signatures.

use core::fmt;

/// The size of the window read from the start of the volume.
pub const HEAD_SIZE: usize = 4096;

/// The byte offset of the ISO-9660 primary volume descriptor.
const ISO9660_OFFSET: u64 = 32768;

/// The byte offset of the Btrfs superblock magic.
const BTRFS_MAGIC_OFFSET: u64 = 65536 + 64;

/// The byte offset of the ext2/3/4 superblock.
const EXT_SUPERBLOCK: usize = 1024;

/// The filesystem found on a volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FsType {
    /// No recognized signature.
    #[default]
    Unknown,

    /// FAT12, FAT16 or FAT32.
    Fat,

    /// exFAT.
    ExFat,

    /// NTFS.
    Ntfs,

    /// ext2.
    Ext2,

    /// ext3.
    Ext3,

    /// ext4.
    Ext4,

    /// Btrfs.
    Btrfs,

    /// XFS.
    Xfs,

    /// HFS+.
    HfsPlus,

    /// APFS.
    Apfs,

    /// ISO-9660.
    Iso9660,
}

impl FsType {
    /// Detects the filesystem of a volume.
    ///
    /// `read` fills a buffer starting at a byte offset of the volume and returns whether it succeeded.
    pub fn sniff(mut read: impl FnMut(u64, &mut [u8]) -> bool) -> Self {
        let mut head = [0; HEAD_SIZE];
        if read(0, &mut head) {
            let detected = Self::from_head(&head);
            if detected != Self::Unknown {
                return detected;
            }
        }

        let mut magic = [0; 8];
        if read(ISO9660_OFFSET, &mut magic) && &magic[1..6] == b"CD001" {
            return Self::Iso9660;
        }
        if read(BTRFS_MAGIC_OFFSET, &mut magic) && &magic == b"_BHRfS_M" {
            return Self::Btrfs;
        }
        Self::Unknown
    }

    /// Detects the filesystem from the first [`HEAD_SIZE`] bytes of a volume.
    #[must_use = "Has no effect if the result is unused"]
    pub fn from_head(head: &[u8]) -> Self {
        if head.len() < HEAD_SIZE {
            return Self::Unknown;
        }

        if &head[3..11] == b"NTFS    " {
            return Self::Ntfs;
        }
        if &head[3..11] == b"EXFAT   " {
            return Self::ExFat;
        }
        if head[510] == 0x55
            && head[511] == 0xAA
            && (&head[0x36..0x39] == b"FAT" || &head[0x52..0x57] == b"FAT32")
        {
            return Self::Fat;
        }
        if &head[0..4] == b"XFSB" {
            return Self::Xfs;
        }
        if &head[32..36] == b"NXSB" {
            return Self::Apfs;
        }
        if &head[EXT_SUPERBLOCK..EXT_SUPERBLOCK + 2] == b"H+"
            || &head[EXT_SUPERBLOCK..EXT_SUPERBLOCK + 2] == b"HX"
        {
            return Self::HfsPlus;
        }

        let ext = &head[EXT_SUPERBLOCK..];
        if u16::from_le_bytes([ext[56], ext[57]]) == 0xEF53 {
            let compat = u32::from_le_bytes([ext[92], ext[93], ext[94], ext[95]]);
            let incompat = u32::from_le_bytes([ext[96], ext[97], ext[98], ext[99]]);
            return if incompat & (0x40 | 0x80 | 0x200) != 0 {
                Self::Ext4
            } else if compat & 0x4 != 0 {
                Self::Ext3
            } else {
                Self::Ext2
            };
        }

        Self::Unknown
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Fat => "FAT",
            Self::ExFat => "exFAT",
            Self::Ntfs => "NTFS",
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Btrfs => "Btrfs",
            Self::Xfs => "XFS",
            Self::HfsPlus => "HFS+",
            Self::Apfs => "APFS",
            Self::Iso9660 => "ISO-9660",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fat() {
        let mut head = [0; HEAD_SIZE];
        head[0x52..0x57].copy_from_slice(b"FAT32");
        head[510] = 0x55;
        head[511] = 0xAA;
        assert_eq!(FsType::from_head(&head), FsType::Fat);
    }

    #[test]
    fn test_ext() {
        let mut head = [0; HEAD_SIZE];
        head[EXT_SUPERBLOCK + 56] = 0x53;
        head[EXT_SUPERBLOCK + 57] = 0xEF;
        assert_eq!(FsType::from_head(&head), FsType::Ext2);
        head[EXT_SUPERBLOCK + 92] = 0x4;
        assert_eq!(FsType::from_head(&head), FsType::Ext3);
        head[EXT_SUPERBLOCK + 96] = 0x40;
        assert_eq!(FsType::from_head(&head), FsType::Ext4);
    }

    #[test]
    fn test_sniff_btrfs() {
        let fs = FsType::sniff(|offset, buf| {
            if offset == BTRFS_MAGIC_OFFSET {
                buf.copy_from_slice(b"_BHRfS_M");
            } else {
                buf.fill(0);
            }
            true
        });
        assert_eq!(fs, FsType::Btrfs);
    }

    #[test]
    fn test_sniff_unreadable() {
        assert_eq!(FsType::sniff(|_, _| false), FsType::Unknown);
    }
}
