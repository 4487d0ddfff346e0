//! The scan policy: which sources are scanned in what order, and what is excluded.
//!
//! The core only ever reads a [`ScanPolicy`]. It is produced by the configuration parser and then merged with the
//! hidden tags stored in NVRAM.

use alloc::{format, string::String, vec::Vec};

use bitflags::bitflags;
use tinyvec::ArrayVec;

use crate::{
    loader::Arch,
    text::{split_list, split_list_owned},
};

/// The maximum number of distinct scan sources.
pub const MAX_SCAN_SOURCES: usize = 16;

/// A source of menu entries, written as a single letter in `scanfor`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanSource {
    /// `m`: the `menuentry` stanzas of the configuration file.
    #[default]
    Manual,

    /// `i`: internal disks.
    Internal,

    /// `e`: external (removable) disks.
    External,

    /// `o`: optical discs.
    Optical,

    /// `n`: network boot through iPXE.
    Netboot,

    /// `h`: legacy BIOS boot options for hard disks.
    LegacyInternal,

    /// `b`: legacy BIOS boot options for removable media.
    LegacyExternal,

    /// `c`: legacy BIOS boot options for optical discs.
    LegacyOptical,

    /// `f`: UEFI boot options registered with the firmware.
    Firmware,
}

impl ScanSource {
    /// Gets a scan source from its letter, in either case.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn from_letter(letter: char) -> Option<Self> {
        Some(match letter.to_ascii_lowercase() {
            'm' => Self::Manual,
            'i' => Self::Internal,
            'e' => Self::External,
            'o' => Self::Optical,
            'n' => Self::Netboot,
            'h' => Self::LegacyInternal,
            'b' => Self::LegacyExternal,
            'c' => Self::LegacyOptical,
            'f' => Self::Firmware,
            _ => return None,
        })
    }

    /// Parses a `scanfor` value.
    ///
    /// Only the first letter of each element counts, so both `internal,external` and `i,e` work. Repeats are
    /// dropped, keeping the first position. An empty or unrecognized value gives the default order.
    #[must_use = "Has no effect if the result is unused"]
    pub fn parse_order(value: &str) -> ArrayVec<[Self; MAX_SCAN_SOURCES]> {
        let mut order = ArrayVec::new();
        for source in split_list(value).filter_map(|x| x.chars().next().and_then(Self::from_letter)) {
            if !order.contains(&source) {
                order.push(source);
            }
        }
        if order.is_empty() {
            return Self::default_order();
        }
        order
    }

    /// The scan order used when `scanfor` is not set.
    #[must_use = "Has no effect if the result is unused"]
    pub fn default_order() -> ArrayVec<[Self; MAX_SCAN_SOURCES]> {
        [Self::Internal, Self::External, Self::Optical, Self::Manual]
            .into_iter()
            .collect()
    }
}

/// A tool that can be shown in the second row of the menu.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolTag {
    /// An EFI shell.
    Shell,

    /// Memtest86.
    Memtest,

    /// The `gdisk` partitioning tool.
    Gdisk,

    /// The `gptsync` hybrid MBR tool.
    Gptsync,

    /// Shim's MOK manager.
    MokTool,

    /// The firmware update tool.
    FwUpdate,

    /// iPXE as a tool rather than a scan source.
    Netboot,

    /// The Mac OS recovery partition.
    AppleRecovery,

    /// The Windows recovery environment.
    WindowsRecovery,

    /// The "about" page.
    About,

    /// The page for restoring hidden entries.
    HiddenTags,

    /// Shut down the computer.
    Shutdown,

    /// Reboot the computer.
    Reboot,

    /// Exit the boot manager.
    Exit,

    /// Reboot into the firmware setup.
    Firmware,

    /// Rotate through the SIP/CSR values.
    CsrRotate,
}

impl ToolTag {
    /// Gets a tool from its `showtools` name.
    #[must_use = "Has no effect if the result is unused"]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match &*name.to_ascii_lowercase() {
            "shell" => Self::Shell,
            "memtest" | "memtest86" => Self::Memtest,
            "gdisk" => Self::Gdisk,
            "gptsync" => Self::Gptsync,
            "mok_tool" => Self::MokTool,
            "fwupdate" => Self::FwUpdate,
            "netboot" => Self::Netboot,
            "apple_recovery" => Self::AppleRecovery,
            "windows_recovery" => Self::WindowsRecovery,
            "about" => Self::About,
            "hidden_tags" => Self::HiddenTags,
            "shutdown" => Self::Shutdown,
            "reboot" => Self::Reboot,
            "exit" => Self::Exit,
            "firmware" => Self::Firmware,
            "csr_rotate" => Self::CsrRotate,
            _ => return None,
        })
    }

    /// Parses a `showtools` value, dropping unknown names and repeats.
    #[must_use = "Has no effect if the result is unused"]
    pub fn parse_list(value: &str) -> Vec<Self> {
        let mut tools = Vec::new();
        for tool in split_list(value).filter_map(Self::from_name) {
            if !tools.contains(&tool) {
                tools.push(tool);
            }
        }
        tools
    }

    /// The tools shown when `showtools` is not set.
    #[must_use = "Has no effect if the result is unused"]
    pub fn default_list() -> Vec<Self> {
        Self::parse_list(
            "shell,memtest,gdisk,mok_tool,apple_recovery,windows_recovery,about,hidden_tags,shutdown,reboot,firmware",
        )
    }

    /// Checks if the tool is built into the boot manager rather than a program on disk.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn is_internal(self) -> bool {
        matches!(
            self,
            Self::About
                | Self::HiddenTags
                | Self::Shutdown
                | Self::Reboot
                | Self::Exit
                | Self::Firmware
                | Self::CsrRotate
        )
    }
}

bitflags! {
    /// The OS types that are started in graphics mode rather than text mode.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct GraphicsFor: u8 {
        /// Mac OS.
        const OSX = 1 << 0;
        /// Linux kernels booted directly.
        const LINUX = 1 << 1;
        /// ELILO.
        const ELILO = 1 << 2;
        /// GRUB.
        const GRUB = 1 << 3;
        /// Windows.
        const WINDOWS = 1 << 4;
    }
}

impl GraphicsFor {
    /// Parses a `use_graphics_for` value.
    #[must_use = "Has no effect if the result is unused"]
    pub fn parse(value: &str) -> Self {
        split_list(value).fold(Self::empty(), |flags, x| {
            flags
                | match &*x.to_ascii_lowercase() {
                    "osx" => Self::OSX,
                    "linux" => Self::LINUX,
                    "elilo" => Self::ELILO,
                    "grub" => Self::GRUB,
                    "windows" => Self::WINDOWS,
                    _ => Self::empty(),
                }
        })
    }
}

/// Everything that decides which volumes, directories and files become menu entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanPolicy {
    /// The scan sources, in order.
    pub scan_order: ArrayVec<[ScanSource; MAX_SCAN_SOURCES]>,

    /// Volumes that are never scanned, by label, partition name or GUID.
    pub dont_scan_volumes: Vec<String>,

    /// Directories that are never scanned, optionally prefixed by a volume.
    pub dont_scan_dirs: Vec<String>,

    /// Loader files that are never added, as `[volume:][dir\]file` entries.
    pub dont_scan_files: Vec<String>,

    /// Tool files that are never added, as `[volume:][dir\]file` entries.
    pub dont_scan_tools: Vec<String>,

    /// Firmware boot option descriptions that are never added.
    pub dont_scan_firmware: Vec<String>,

    /// Extra directories scanned on every volume.
    pub also_scan_dirs: Vec<String>,

    /// Files that identify the Windows recovery environment.
    pub windows_recovery_files: Vec<String>,

    /// The tools shown in the second row.
    pub tools: Vec<ToolTag>,

    /// Whether Linux kernels differing only by version are folded into one entry.
    pub fold_linux_kernels: bool,

    /// Extra strings treated as part of a kernel version, like `linux-lts`.
    pub extra_kernel_version_strings: Vec<String>,

    /// Whether legacy boot options are scanned even when the firmware does not look like it supports them.
    pub deep_legacy_scan: bool,

    /// The OS types started in graphics mode.
    pub graphics_for: GraphicsFor,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        let arch = Arch::current().suffix();
        Self {
            scan_order: ScanSource::default_order(),
            dont_scan_volumes: split_list_owned("LRS_ESP"),
            dont_scan_dirs: Vec::new(),
            dont_scan_files: split_list_owned(&format!(
                "shim.efi,shim{arch}.efi,shim-fedora.efi,shim-centos.efi,PreLoader.efi,fb.efi,fb{arch}.efi"
            )),
            dont_scan_tools: Vec::new(),
            dont_scan_firmware: Vec::new(),
            also_scan_dirs: split_list_owned("boot,@\\boot"),
            windows_recovery_files: split_list_owned(&format!(
                "EFI\\Microsoft\\Boot\\LrsBootmgr.efi,Recovery:\\EFI\\BOOT\\boot{arch}.efi,\\EFI\\OEM\\Boot\\bootmgfw.efi"
            )),
            tools: ToolTag::default_list(),
            fold_linux_kernels: true,
            extra_kernel_version_strings: Vec::new(),
            deep_legacy_scan: false,
            graphics_for: GraphicsFor::OSX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_order() {
        let order = ScanSource::parse_order("external, internal,e,manual,bogus");
        assert_eq!(
            order.as_slice(),
            &[ScanSource::External, ScanSource::Internal, ScanSource::Manual]
        );
        assert_eq!(ScanSource::parse_order(""), ScanSource::default_order());
    }

    #[test]
    fn test_tools() {
        let tools = ToolTag::parse_list("shell, about,shell,nonsense,Reboot");
        assert_eq!(tools, [ToolTag::Shell, ToolTag::About, ToolTag::Reboot]);
        assert!(ToolTag::About.is_internal());
        assert!(!ToolTag::Shell.is_internal());
    }

    #[test]
    fn test_graphics_for() {
        assert_eq!(GraphicsFor::parse("osx, linux"), GraphicsFor::OSX | GraphicsFor::LINUX);
        assert_eq!(GraphicsFor::parse(""), GraphicsFor::empty());
    }
}
