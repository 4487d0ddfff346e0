//! Boot options registered with the firmware (`BootOrder` and `Boot####`).
//!
//! Options with a BIOS Boot Specification device path are legacy BIOS options, and become entries for the `h`, `b`
//! and `c` scan sources by their device type. Every other active option is offered by the `f` scan source as a
//! reboot into that option.

use alloc::{format, string::String, vec::Vec};

use log::{debug, warn};
use uefi::runtime::VariableVendor;

use crate::{
    config::policy::{ScanPolicy, ScanSource},
    menu::{
        EntryKind, FirmwareBoot, LegacyEntry, MenuEntry, Row,
        hidden::{HiddenTags, TagKind},
    },
    system::variable::NvramStore,
    text::{is_in_substring, sanitize_name},
};

/// The option is active.
pub const LOAD_OPTION_ACTIVE: u32 = 0x0000_0001;

/// The option is hidden from firmware boot menus.
pub const LOAD_OPTION_HIDDEN: u32 = 0x0000_0008;

/// The device path type of BIOS Boot Specification nodes.
const BBS_TYPE: u8 = 0x05;

/// The device path subtype of BIOS Boot Specification nodes.
const BBS_SUBTYPE: u8 = 0x01;

/// The device path type that ends a device path.
const END_TYPE: u8 = 0x7f;

/// The BBS device type of hard disks.
const BBS_HARDDISK: u16 = 0x02;

/// The BBS device type of optical drives.
const BBS_CDROM: u16 = 0x03;

/// One parsed `Boot####` variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootOption {
    /// The `####` of the variable.
    pub boot_num: u16,

    /// The `LOAD_OPTION_*` attributes.
    pub attributes: u32,

    /// The description shown in firmware boot menus.
    pub description: String,

    /// The BBS device type, if this is a legacy BIOS option.
    pub bbs_device_type: Option<u16>,
}

impl BootOption {
    /// Parses the contents of an `EFI_LOAD_OPTION`. Returns [`None`] if it is malformed.
    #[must_use = "Has no effect if the result is unused"]
    pub fn parse(boot_num: u16, bytes: &[u8]) -> Option<Self> {
        let attributes = u32::from_le_bytes(bytes.get(0..4)?.try_into().ok()?);
        let path_len = usize::from(u16::from_le_bytes(bytes.get(4..6)?.try_into().ok()?));

        let mut units = Vec::new();
        let mut offset = 6;
        loop {
            let unit = u16::from_le_bytes(bytes.get(offset..offset + 2)?.try_into().ok()?);
            offset += 2;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        let description = char::decode_utf16(units)
            .map(|x| x.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect::<String>();

        let path = bytes.get(offset..offset.checked_add(path_len)?)?;
        Some(Self {
            boot_num,
            attributes,
            description: sanitize_name(&description),
            bbs_device_type: bbs_device_type(path),
        })
    }

    /// Checks if the option is active.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn is_active(&self) -> bool {
        self.attributes & LOAD_OPTION_ACTIVE != 0
    }

    /// Checks if the option is hidden from firmware boot menus.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn is_hidden(&self) -> bool {
        self.attributes & LOAD_OPTION_HIDDEN != 0
    }

    /// The legacy scan source that offers this option, if it is a legacy option.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn legacy_source(&self) -> Option<ScanSource> {
        match self.bbs_device_type {
            Some(BBS_HARDDISK) => Some(ScanSource::LegacyInternal),
            Some(BBS_CDROM) => Some(ScanSource::LegacyOptical),
            Some(_) => Some(ScanSource::LegacyExternal),
            None => None,
        }
    }
}

/// Walks a device path list for a BBS node, returning its device type.
fn bbs_device_type(mut path: &[u8]) -> Option<u16> {
    while path.len() >= 4 {
        let (node_type, sub_type) = (path[0], path[1]);
        let len = usize::from(u16::from_le_bytes([path[2], path[3]]));
        if node_type == END_TYPE || len < 4 || len > path.len() {
            return None;
        }
        if node_type == BBS_TYPE && sub_type == BBS_SUBTYPE && len >= 6 {
            return Some(u16::from_le_bytes([path[4], path[5]]));
        }
        path = &path[len..];
    }
    None
}

/// Reads every option listed in `BootOrder`, in that order. Options that are missing or malformed are skipped.
pub fn read_boot_options(nvram: &mut impl NvramStore) -> Vec<BootOption> {
    let order = match nvram.get(&VariableVendor::GLOBAL_VARIABLE, "BootOrder") {
        Ok(Some(order)) => order,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!("While reading BootOrder: {e}");
            return Vec::new();
        }
    };

    order
        .chunks_exact(2)
        .map(|x| u16::from_le_bytes([x[0], x[1]]))
        .filter_map(|num| {
            let name = format!("Boot{num:04X}");
            match nvram.get(&VariableVendor::GLOBAL_VARIABLE, &name) {
                Ok(Some(bytes)) => {
                    let option = BootOption::parse(num, &bytes);
                    if option.is_none() {
                        debug!("{name} is malformed");
                    }
                    option
                }
                Ok(None) => None,
                Err(e) => {
                    warn!("While reading {name}: {e}");
                    None
                }
            }
        })
        .collect()
}

/// Builds the entries of one legacy scan source.
///
/// Only active options are offered unless `deep_legacy_scan` is set.
#[must_use = "Has no effect if the result is unused"]
pub fn legacy_entries(
    options: &[BootOption],
    source: ScanSource,
    policy: &ScanPolicy,
    hidden: &HiddenTags,
) -> Vec<MenuEntry> {
    options
        .iter()
        .filter(|x| x.legacy_source() == Some(source))
        .filter(|x| x.is_active() || policy.deep_legacy_scan)
        .filter(|x| !hidden.contains(TagKind::Legacy, &x.description))
        .map(|x| MenuEntry {
            title: format!("Boot {}", x.description),
            row: Row::Main,
            shortcut: None,
            icon: "os_legacy".into(),
            kind: EntryKind::Legacy(LegacyEntry {
                description: x.description.clone(),
                boot_num: x.boot_num,
            }),
        })
        .collect()
}

/// Builds the entries of the `f` scan source: every active, visible UEFI option not excluded by
/// `dont_scan_firmware` or hidden by the user.
#[must_use = "Has no effect if the result is unused"]
pub fn firmware_entries(options: &[BootOption], policy: &ScanPolicy, hidden: &HiddenTags) -> Vec<MenuEntry> {
    options
        .iter()
        .filter(|x| x.bbs_device_type.is_none() && x.is_active() && !x.is_hidden())
        .filter(|x| !x.description.is_empty())
        .filter(|x| !is_in_substring(&x.description, &policy.dont_scan_firmware))
        .filter(|x| !hidden.contains(TagKind::Firmware, &x.description))
        .map(|x| MenuEntry {
            title: format!("Reboot to {}", x.description),
            row: Row::Main,
            shortcut: None,
            icon: "func_firmware".into(),
            kind: EntryKind::FirmwareBoot(FirmwareBoot {
                description: x.description.clone(),
                boot_num: x.boot_num,
            }),
        })
        .collect()
}
