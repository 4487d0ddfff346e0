// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! The loader classifier.
//!
//! Decides whether a file on a volume is something the firmware can be asked to execute. This is deliberately
//! strict: handing a foreign-architecture PE image to `LoadImage` has been seen to hang or crash real firmware, so
//! a machine type mismatch is a normal "not a loader" outcome rather than an error.
//!
//! Only a small header window is ever read. Compressed loaders are recognized by their magic here and inflated in
//! the launch sequencer.

use log::debug;
use object::{
    LittleEndian as LE, ReadRef, U32Bytes,
    pe::{self, ImageDosHeader, ImageFileHeader},
};

use crate::{
    loader::exclude::ExcludeList,
    volume::{Storage, Volume},
};

pub mod exclude;
pub mod linux;

/// The number of bytes read from the start of a candidate file.
pub const HEADER_SIZE: usize = 512;

/// The PE header must start below this offset.
const MAX_PE_OFFSET: u64 = 0x180;

/// The magic value of an Apple "fat" multi-architecture binary, as a little-endian `u32`.
pub const FAT_BINARY_MAGIC: u32 = 0x0ef1_fab9;

/// The gzip magic bytes.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A CPU architecture the boot manager can be built for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Arch {
    /// x86-64.
    #[default]
    X64,

    /// 32-bit x86.
    Ia32,

    /// 64-bit ARM.
    Aa64,
}

impl Arch {
    /// The architecture this binary was built for.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn current() -> Self {
        if cfg!(target_arch = "aarch64") {
            Self::Aa64
        } else if cfg!(target_arch = "x86") {
            Self::Ia32
        } else {
            Self::X64
        }
    }

    /// The PE/COFF machine type of the architecture.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn machine(self) -> u16 {
        match self {
            Self::X64 => pe::IMAGE_FILE_MACHINE_AMD64,
            Self::Ia32 => pe::IMAGE_FILE_MACHINE_I386,
            Self::Aa64 => pe::IMAGE_FILE_MACHINE_ARM64,
        }
    }

    /// The suffix used in file names like `bootx64.efi` and `shell_x64.efi`.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Ia32 => "ia32",
            Self::Aa64 => "aa64",
        }
    }
}

/// The outcome of classifying a candidate file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validity {
    /// Not something that may be handed to the firmware.
    Invalid,

    /// A PE/COFF image for this architecture, or a fat binary.
    ValidExecutable,

    /// A gzip compressed image. It is checked again once inflated.
    ValidCompressed,
}

impl Validity {
    /// Checks if the file may be offered as a loader.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Invalid)
    }
}

/// Classifies a file from its first [`HEADER_SIZE`] bytes.
///
/// A header shorter than [`HEADER_SIZE`] is always [`Validity::Invalid`].
#[must_use = "Has no effect if the result is unused"]
pub fn classify_header(header: &[u8], arch: Arch) -> Validity {
    if header.len() < HEADER_SIZE {
        return Validity::Invalid;
    }

    if is_pe_for(header, arch) {
        return Validity::ValidExecutable;
    }

    if u32::from_le_bytes([header[0], header[1], header[2], header[3]]) == FAT_BINARY_MAGIC {
        return Validity::ValidExecutable;
    }

    if cfg!(feature = "gzip") && header[..2] == GZIP_MAGIC {
        return Validity::ValidCompressed;
    }

    Validity::Invalid
}

/// A header window with the alignment `object`'s PE structures need.
#[repr(C, align(8))]
struct HeaderWindow([u8; HEADER_SIZE]);

/// Checks for an `MZ` stub leading to a `PE\0\0` header with the machine type of `arch`.
///
/// Only the first [`HEADER_SIZE`] bytes are ever looked at.
#[must_use = "Has no effect if the result is unused"]
pub fn is_pe_for(header: &[u8], arch: Arch) -> bool {
    let Some(header) = header.get(..HEADER_SIZE) else {
        return false;
    };
    let mut window = HeaderWindow([0; HEADER_SIZE]);
    window.0.copy_from_slice(header);
    let data = &window.0[..];

    let Ok(dos_header) = ImageDosHeader::parse(data) else {
        return false;
    };
    let offset = u64::from(dos_header.nt_headers_offset());
    if offset >= MAX_PE_OFFSET {
        return false;
    }

    let is_signed = data
        .read_at::<U32Bytes<LE>>(offset)
        .is_ok_and(|x| x.get(LE) == pe::IMAGE_NT_SIGNATURE);
    is_signed
        && data
            .read_at::<ImageFileHeader>(offset + 4)
            .is_ok_and(|x| x.machine.get(LE) == arch.machine())
}

/// Decides whether a file may be launched.
///
/// A missing volume root or path is treated as valid. Some firmware cannot hand out a root directory for media on
/// certain removable buses, and callers in that position have already validated the file some other way.
pub fn is_valid_loader(
    storage: &mut impl Storage,
    volume: Option<&Volume>,
    path: Option<&str>,
    arch: Arch,
) -> Validity {
    let (Some(volume), Some(path)) = (volume.filter(|x| x.has_root), path) else {
        return Validity::ValidExecutable;
    };

    if !storage.file_exists(volume, path) {
        return Validity::Invalid;
    }

    let mut header = [0; HEADER_SIZE];
    match storage.read_header(volume, path, &mut header) {
        Ok(read) => classify_header(&header[..read], arch),
        Err(e) => {
            debug!("Could not read header of {path}: {e}");
            Validity::Invalid
        }
    }
}

/// Decides whether a tool may be offered: it must exist, be a valid loader and not be excluded.
pub fn is_valid_tool(
    storage: &mut impl Storage,
    volume: &Volume,
    path: &str,
    exclusions: &ExcludeList,
    arch: Arch,
) -> bool {
    volume.has_root
        && storage.file_exists(volume, path)
        && is_valid_loader(storage, Some(volume), Some(path), arch).is_valid()
        && !exclusions.excludes(volume, path)
}

#[cfg(test)]
mod tests {
    use alloc::{borrow::ToOwned, vec};

    use proptest::prelude::*;

    use super::*;
    use crate::fakes::{FakeStorage, pe_header};

    #[test]
    fn test_architecture_gate() {
        for arch in [Arch::X64, Arch::Ia32, Arch::Aa64] {
            assert_eq!(
                classify_header(&pe_header(arch.machine()), arch),
                Validity::ValidExecutable
            );
        }
        assert_eq!(
            classify_header(&pe_header(Arch::Aa64.machine()), Arch::X64),
            Validity::Invalid
        );
        assert_eq!(
            classify_header(&pe_header(Arch::X64.machine())[..HEADER_SIZE - 1], Arch::X64),
            Validity::Invalid
        );
        assert_eq!(classify_header(&[0; HEADER_SIZE], Arch::X64), Validity::Invalid);
    }

    #[test]
    fn test_pe_offset_bound() {
        let header = pe_header(Arch::X64.machine());
        assert_eq!(header[0x3c..0x40], [0x80, 0, 0, 0]);
        assert!(is_pe_for(&header, Arch::X64));

        let mut moved = vec![0; HEADER_SIZE];
        moved[..0x40].copy_from_slice(&header[..0x40]);
        moved[0x3c..0x40].copy_from_slice(&0x180_u32.to_le_bytes());
        moved[0x180..0x186].copy_from_slice(&header[0x80..0x86]);
        assert!(!is_pe_for(&moved, Arch::X64));
        assert_eq!(classify_header(&moved, Arch::X64), Validity::Invalid);
    }

    #[test]
    fn test_unaligned_header() {
        let mut buf = vec![0; HEADER_SIZE + 1];
        buf[1..].copy_from_slice(&pe_header(Arch::X64.machine()));
        assert!(is_pe_for(&buf[1..], Arch::X64));
        assert!(!is_pe_for(&buf[1..], Arch::Ia32));
    }

    #[test]
    fn test_missing_pe_signature() {
        let mut header = pe_header(Arch::X64.machine());
        header[0x80..0x84].copy_from_slice(b"NE\0\0");
        assert!(!is_pe_for(&header, Arch::X64));
    }

    #[test]
    fn test_gzip() {
        let mut header = vec![0; HEADER_SIZE];
        header[..2].copy_from_slice(&GZIP_MAGIC);
        let expected = if cfg!(feature = "gzip") {
            Validity::ValidCompressed
        } else {
            Validity::Invalid
        };
        assert_eq!(classify_header(&header, Arch::X64), expected);
    }

    #[test]
    fn test_is_valid_loader() {
        let mut storage = FakeStorage::with_volumes(&["ESP"]);
        storage.add_file(0, "EFI\\ubuntu\\grubx64.efi", pe_header(Arch::X64.machine()));
        storage.add_file(0, "EFI\\arm\\grubaa64.efi", pe_header(Arch::Aa64.machine()));
        storage.add_file(0, "EFI\\short.efi", vec![b'M', b'Z']);
        let volume = storage.volumes[0].clone();

        let mut check = |path: &str| is_valid_loader(&mut storage, Some(&volume), Some(path), Arch::X64);
        assert_eq!(check("EFI\\ubuntu\\grubx64.efi"), Validity::ValidExecutable);
        assert_eq!(check("EFI\\arm\\grubaa64.efi"), Validity::Invalid);
        assert_eq!(check("EFI\\short.efi"), Validity::Invalid);
        assert_eq!(check("EFI\\missing.efi"), Validity::Invalid);
    }

    #[test]
    fn test_missing_root_is_valid() {
        let mut storage = FakeStorage::with_volumes(&["USB"]);
        storage.volumes[0].has_root = false;
        let volume = storage.volumes[0].clone();
        assert!(is_valid_loader(&mut storage, Some(&volume), Some("\\anything.efi"), Arch::X64).is_valid());
        assert!(is_valid_loader(&mut storage, None, Some("\\anything.efi"), Arch::X64).is_valid());
        assert!(is_valid_loader(&mut storage, Some(&volume), None, Arch::X64).is_valid());
    }

    #[test]
    fn test_is_valid_tool() {
        let mut storage = FakeStorage::with_volumes(&["ESP"]);
        storage.add_file(0, "EFI\\tools\\shell.efi", pe_header(Arch::X64.machine()));
        let volume = storage.volumes[0].clone();

        let none = ExcludeList::default();
        assert!(is_valid_tool(&mut storage, &volume, "EFI\\tools\\shell.efi", &none, Arch::X64));
        assert!(!is_valid_tool(&mut storage, &volume, "EFI\\tools\\gdisk.efi", &none, Arch::X64));

        let excluded = ExcludeList::parse(&["ESP:\\EFI\\tools\\shell.efi".to_owned()]);
        assert!(!is_valid_tool(&mut storage, &volume, "EFI\\tools\\shell.efi", &excluded, Arch::X64));
    }

    proptest! {
        #[test]
        fn doesnt_panic(x in proptest::collection::vec(any::<u8>(), 0..1024)) {
            let _ = classify_header(&x, Arch::X64);
        }

        #[test]
        fn only_matching_machine_is_valid(machine in any::<u16>()) {
            let valid = classify_header(&pe_header(machine), Arch::X64) == Validity::ValidExecutable;
            prop_assert_eq!(valid, machine == Arch::X64.machine());
        }

        #[test]
        fn fat_magic_is_valid(rest in proptest::collection::vec(any::<u8>(), HEADER_SIZE - 4)) {
            let mut header = FAT_BINARY_MAGIC.to_le_bytes().to_vec();
            header.extend(rest);
            prop_assert_eq!(classify_header(&header, Arch::Aa64), Validity::ValidExecutable);
        }
    }
}
