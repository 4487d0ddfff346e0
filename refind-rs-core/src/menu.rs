// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! The menu model.
//!
//! A [`Menu`] is an ordered list of [`MenuEntry`]s, rebuilt as a whole after every volume scan. What an entry does
//! is decided by its [`EntryKind`]; only loaders and tools carry a [`LoaderEntry`], so a legacy or internal entry
//! has no loader path to misuse.
//!
//! Entries are produced by [`scan`] (boot loaders) and [`tools`] (the second row), and driven by the loop in
//! [`interact`].

use alloc::{
    borrow::ToOwned,
    format,
    string::{String, ToString},
    vec::Vec,
};

use crate::{
    config::policy::{GraphicsFor, ToolTag},
    text::{contains_ignore_case, eq_ignore_case},
    volume::VolumeRef,
};

pub mod builder;
pub mod hidden;
pub mod interact;
pub mod legacy;
pub mod scan;
pub mod tools;

pub use builder::LoaderEntryBuilder;

/// The title given to the boot manager itself when it is found at the Mac OS loader path.
pub const SELF_TITLE: &str = "RefindPlus";

/// The path marker of the Mac OS loader.
const MAC_MARKER: &str = "System\\Library\\CoreServices";

/// The path marker of the Windows boot manager.
const WINDOWS_MARKER: &str = "EFI\\Microsoft\\Boot";

/// The kind of OS a loader starts. Some launch quirks and the default shortcut key depend on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OsType {
    /// Mac OS, through Apple's `boot.efi`.
    Mac,

    /// Windows, through `bootmgfw.efi`.
    Windows,

    /// A Linux kernel started through its EFI stub.
    Linux,

    /// ELILO.
    Elilo,

    /// GRUB.
    Grub,

    /// Windows XP on Apple hardware (XoM).
    Xom,

    /// rEFIt or rEFInd.
    Refit,

    /// Network boot through iPXE.
    Net,

    /// Anything else.
    #[default]
    Other,
}

impl OsType {
    /// Gets an OS type from an `ostype` configuration value.
    #[must_use = "Has no effect if the result is unused"]
    pub fn from_name(name: &str) -> Self {
        match &*name.trim().to_ascii_lowercase() {
            "macos" | "osx" | "mac" => Self::Mac,
            "windows" => Self::Windows,
            "linux" => Self::Linux,
            "elilo" => Self::Elilo,
            "grub" => Self::Grub,
            "xom" => Self::Xom,
            _ => Self::Other,
        }
    }

    /// The single-letter code of the OS type.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn letter(self) -> char {
        match self {
            Self::Mac => 'M',
            Self::Windows => 'W',
            Self::Linux => 'L',
            Self::Elilo => 'E',
            Self::Grub => 'G',
            Self::Xom => 'X',
            Self::Refit => 'R',
            Self::Net => 'N',
            Self::Other => 'O',
        }
    }

    /// The `use_graphics_for` flag that covers this OS type.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn graphics_flag(self) -> GraphicsFor {
        match self {
            Self::Mac => GraphicsFor::OSX,
            Self::Linux => GraphicsFor::LINUX,
            Self::Elilo => GraphicsFor::ELILO,
            Self::Grub => GraphicsFor::GRUB,
            Self::Windows | Self::Xom => GraphicsFor::WINDOWS,
            Self::Refit | Self::Net | Self::Other => GraphicsFor::empty(),
        }
    }

    /// Checks if the systemd loader variables are published before starting this OS type.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn wants_systemd_vars(self) -> bool {
        matches!(self, Self::Linux | Self::Elilo | Self::Grub)
    }
}

/// Where a loader entry came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Origin {
    /// Found by scanning a volume.
    #[default]
    Auto,

    /// Written as a `menuentry` stanza.
    Manual,
}

/// An alternative way to boot a loader, shown in its details submenu.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubEntry {
    /// The title shown in the submenu.
    pub title: String,

    /// A different loader on the same volume, such as an older kernel folded into this entry.
    pub path: Option<String>,

    /// The load options.
    pub options: Option<String>,
}

/// Everything needed to launch a loader or a tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoaderEntry {
    /// The volume the loader lives on.
    pub volume: VolumeRef,

    /// The display name of that volume.
    pub volume_name: String,

    /// The short title, such as `Mac OS`. When empty, the path stands in for it.
    pub name: String,

    /// The volume-relative path of the loader, rooted with a backslash.
    pub path: String,

    /// The load options.
    pub options: Option<String>,

    /// The kind of OS the loader starts.
    pub os_type: OsType,

    /// Whether the loader is started in graphics mode.
    pub use_graphics: bool,

    /// Where the entry came from.
    pub origin: Origin,

    /// The alternatives shown in the details submenu.
    pub submenu: Vec<SubEntry>,
}

impl LoaderEntry {
    /// Starts a [`LoaderEntryBuilder`].
    pub fn builder(volume: VolumeRef, volume_name: impl Into<String>, path: impl Into<String>) -> LoaderEntryBuilder {
        LoaderEntryBuilder::new(volume, volume_name, path)
    }

    /// The title shown in the menu, like `Boot Mac OS from Macintosh HD`.
    #[must_use = "Has no effect if the result is unused"]
    pub fn display_title(&self) -> String {
        let name = if self.name.is_empty() { &self.path } else { &self.name };
        if self.volume_name.is_empty() || self.volume_name == "Recovery HD" {
            format!("Boot {name}")
        } else {
            format!("Boot {name} from {}", self.volume_name)
        }
    }

    /// The key this entry is hidden under.
    #[must_use = "Has no effect if the result is unused"]
    pub fn hidden_tag(&self) -> String {
        format!("{}:{}", self.volume_name, self.path)
    }

    /// Turns a submenu alternative into a loader entry of its own.
    #[must_use = "Has no effect if the result is unused"]
    pub fn with_sub_entry(&self, sub: &SubEntry) -> Self {
        Self {
            name: sub.title.clone(),
            path: sub.path.clone().unwrap_or_else(|| self.path.clone()),
            options: sub.options.clone(),
            submenu: Vec::new(),
            ..self.clone()
        }
    }
}

/// A legacy BIOS boot option, started through the compatibility support module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyEntry {
    /// The description of the firmware boot option.
    pub description: String,

    /// The `Boot####` number of the option.
    pub boot_num: u16,
}

/// A UEFI boot option registered with the firmware, started by rebooting into it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareBoot {
    /// The description of the firmware boot option.
    pub description: String,

    /// The `Boot####` number of the option.
    pub boot_num: u16,
}

/// What happens when an entry is chosen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Start an OS loader.
    Loader(LoaderEntry),

    /// Start a tool found on disk.
    Tool(ToolTag, LoaderEntry),

    /// Boot a legacy BIOS option.
    Legacy(LegacyEntry),

    /// Reboot into a firmware boot option.
    FirmwareBoot(FirmwareBoot),

    /// Show the hidden entries and allow restoring them.
    HiddenTags,

    /// Show the about page.
    About,

    /// Rotate the SIP/CSR policy.
    ToggleCsr,

    /// Reboot the computer.
    Reboot,

    /// Shut down the computer.
    Shutdown,

    /// Exit the boot manager.
    Exit,

    /// Reboot into the firmware setup.
    FirmwareSetup,

    /// Leave a submenu.
    Return,

    /// One option of a submenu, by index.
    Choice(usize),
}

impl EntryKind {
    /// Returns the loader of a loader or tool entry.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn loader(&self) -> Option<&LoaderEntry> {
        match self {
            Self::Loader(loader) | Self::Tool(_, loader) => Some(loader),
            _ => None,
        }
    }
}

/// The row an entry is shown in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Row {
    /// The first row: things that boot an OS.
    #[default]
    Main,

    /// The second row: tools and actions.
    Tools,
}

/// One entry of a [`Menu`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuEntry {
    /// The title shown to the user.
    pub title: String,

    /// The row the entry is shown in.
    pub row: Row,

    /// The key that selects and starts the entry.
    pub shortcut: Option<char>,

    /// The base name of the icon, such as `os_linux` or `func_reboot`.
    pub icon: String,

    /// What happens when the entry is chosen.
    pub kind: EntryKind,
}

impl MenuEntry {
    /// Creates an entry for a loader.
    #[must_use = "Has no effect if the result is unused"]
    pub fn loader(loader: LoaderEntry, shortcut: Option<char>) -> Self {
        Self {
            title: loader.display_title(),
            row: Row::Main,
            shortcut,
            icon: icon_for(loader.os_type).to_owned(),
            kind: EntryKind::Loader(loader),
        }
    }

    /// Creates an entry in the second row.
    #[must_use = "Has no effect if the result is unused"]
    pub fn tool(title: impl Into<String>, shortcut: Option<char>, icon: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            title: title.into(),
            row: Row::Tools,
            shortcut,
            icon: icon.into(),
            kind,
        }
    }
}

/// The icon base name for an OS type.
const fn icon_for(os_type: OsType) -> &'static str {
    match os_type {
        OsType::Mac => "os_mac",
        OsType::Windows | OsType::Xom => "os_win",
        OsType::Linux => "os_linux",
        OsType::Elilo => "os_elilo",
        OsType::Grub => "os_grub",
        OsType::Refit => "os_refit",
        OsType::Net => "os_network",
        OsType::Other => "os_unknown",
    }
}

/// An ordered list of entries with a title and an optional countdown.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Menu {
    /// The title drawn in the header.
    pub title: String,

    /// The entries, in display order.
    pub entries: Vec<MenuEntry>,

    /// The countdown in seconds. 0 disables it, and a negative value picks the default entry at once unless a key
    /// is already waiting.
    pub timeout: i32,

    /// What the countdown does, as in `Boot default in 5 seconds`.
    pub timeout_text: String,
}

impl Menu {
    /// Creates an empty menu.
    #[must_use = "Has no effect if the result is unused"]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Finds the entry a key selects.
    ///
    /// A digit picks one of the first ten entries of the main row (`1` is the first, `0` the tenth). Any other key is
    /// compared case-insensitively to the entry shortcuts.
    #[must_use = "Has no effect if the result is unused"]
    pub fn find_shortcut(&self, key: char) -> Option<usize> {
        if let Some(digit) = key.to_digit(10) {
            let nth = if digit == 0 { 9 } else { digit as usize - 1 };
            return self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, x)| x.row == Row::Main)
                .nth(nth)
                .map(|(i, _)| i);
        }

        let key = key.to_ascii_uppercase();
        self.entries
            .iter()
            .position(|x| x.shortcut.is_some_and(|s| s.to_ascii_uppercase() == key))
    }

    /// Finds the default entry.
    ///
    /// Each selection is tried in order. A single character is looked up like a shortcut key; anything longer
    /// matches the first entry whose title contains it.
    #[must_use = "Has no effect if the result is unused"]
    pub fn find_default(&self, selections: &[String]) -> Option<usize> {
        selections.iter().find_map(|selection| {
            let mut chars = selection.chars();
            match (chars.next(), chars.next()) {
                (Some(key), None) => self.find_shortcut(key),
                (Some(_), Some(_)) => self
                    .entries
                    .iter()
                    .position(|x| contains_ignore_case(&x.title, selection)),
                _ => None,
            }
        })
    }

    /// Checks if the menu has no entry that boots anything.
    #[must_use = "Has no effect if the result is unused"]
    pub fn has_no_loaders(&self) -> bool {
        !self.entries.iter().any(|x| x.row == Row::Main)
    }
}

/// Corrects the short title of a loader from well-known path markers.
///
/// A loader at the Mac OS loader path is called `Mac OS` when it lives on a `PreBoot` volume, and is the boot
/// manager itself otherwise. A loader in the Windows boot manager directory is called `Windows (UEFI)`. A title that
/// already names the OS is left alone, so applying this twice gives the same result as applying it once.
#[must_use = "Has no effect if the result is unused"]
pub fn infer_title(title: &str, path: &str, volume_name: &str) -> String {
    if contains_ignore_case(path, MAC_MARKER) {
        if contains_ignore_case(title, "Mac OS") || eq_ignore_case(title, SELF_TITLE) {
            return title.to_string();
        }
        return if eq_ignore_case(volume_name, "PreBoot") {
            "Mac OS".to_owned()
        } else {
            SELF_TITLE.to_owned()
        };
    }
    if contains_ignore_case(path, WINDOWS_MARKER) && !contains_ignore_case(title, "Windows") {
        return "Windows (UEFI)".to_owned();
    }
    title.to_string()
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use proptest::prelude::*;

    use super::*;

    fn entry(title: &str, row: Row, shortcut: Option<char>) -> MenuEntry {
        MenuEntry {
            title: title.to_owned(),
            row,
            shortcut,
            icon: String::new(),
            kind: EntryKind::About,
        }
    }

    #[test]
    fn test_os_type() {
        assert_eq!(OsType::from_name("OSX"), OsType::Mac);
        assert_eq!(OsType::from_name(" Linux "), OsType::Linux);
        assert_eq!(OsType::from_name("BeOS"), OsType::Other);
        assert_eq!(OsType::Xom.graphics_flag(), GraphicsFor::WINDOWS);
        assert!(OsType::Grub.wants_systemd_vars());
        assert!(!OsType::Windows.wants_systemd_vars());
    }

    #[test]
    fn test_display_title() {
        let volume = VolumeRef { generation: 1, index: 0 };
        let loader = LoaderEntry::builder(volume, "ESP", "\\EFI\\ubuntu\\grubx64.efi").build();
        assert_eq!(loader.display_title(), "Boot \\EFI\\ubuntu\\grubx64.efi from ESP");

        let loader = LoaderEntry::builder(volume, "Recovery HD", "\\boot.efi").name("Recovery").build();
        assert_eq!(loader.display_title(), "Boot Recovery");
    }

    #[test]
    fn test_find_shortcut() {
        let menu = Menu {
            entries: vec![
                entry("Boot Linux", Row::Main, Some('L')),
                entry("Reboot", Row::Tools, Some('R')),
                entry("Boot Windows", Row::Main, Some('W')),
            ],
            ..Menu::default()
        };
        assert_eq!(menu.find_shortcut('w'), Some(2));
        assert_eq!(menu.find_shortcut('1'), Some(0));
        assert_eq!(menu.find_shortcut('2'), Some(2));
        assert_eq!(menu.find_shortcut('3'), None);
        assert_eq!(menu.find_shortcut('x'), None);
    }

    #[test]
    fn test_find_default() {
        let menu = Menu {
            entries: vec![
                entry("Boot Windows (UEFI) from ESP", Row::Main, Some('W')),
                entry("Boot \\boot\\vmlinuz from Linux", Row::Main, Some('L')),
            ],
            ..Menu::default()
        };
        let select = |x: &[&str]| menu.find_default(&x.iter().map(|x| (*x).to_owned()).collect::<Vec<_>>());
        assert_eq!(select(&["linux"]), Some(1));
        assert_eq!(select(&["macos", "Windows"]), Some(0));
        assert_eq!(select(&["L"]), Some(1));
        assert_eq!(select(&["nothing"]), None);
    }

    #[test]
    fn test_infer_title() {
        let mac = "\\System\\Library\\CoreServices\\boot.efi";
        assert_eq!(infer_title("", mac, "PreBoot"), "Mac OS");
        assert_eq!(infer_title("", mac, "Macintosh HD"), SELF_TITLE);
        assert_eq!(infer_title("Mac OS", mac, "Macintosh HD"), "Mac OS");
        assert_eq!(
            infer_title("bootmgfw.efi", "\\EFI\\Microsoft\\Boot\\bootmgfw.efi", "ESP"),
            "Windows (UEFI)"
        );
        assert_eq!(infer_title("Arch", "\\boot\\vmlinuz-linux", "ESP"), "Arch");
    }

    proptest! {
        #[test]
        fn title_inference_is_idempotent(
            title in "[a-zA-Z ()]{0,16}",
            path in prop_oneof![
                Just("\\System\\Library\\CoreServices\\boot.efi".to_owned()),
                Just("\\EFI\\Microsoft\\Boot\\bootmgfw.efi".to_owned()),
                "[a-zA-Z\\\\]{0,24}",
            ],
            volume in prop_oneof![Just("PreBoot".to_owned()), "[a-zA-Z ]{0,8}"],
        ) {
            let once = infer_title(&title, &path, &volume);
            let twice = infer_title(&once, &path, &volume);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn doesnt_panic(key in any::<char>(), selection in any::<String>()) {
            let menu = Menu {
                entries: vec![entry("a", Row::Main, Some('a'))],
                ..Menu::default()
            };
            let _ = menu.find_shortcut(key);
            let _ = menu.find_default(&[selection]);
        }
    }
}
