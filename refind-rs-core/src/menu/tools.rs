//! The second row of the menu: tools found on disk and the built-in actions.
//!
//! Tools are listed in `showtools` order. On-disk tools are looked up under a fixed set of directories, and a tool
//! that cannot be found, is excluded by `dont_scan_tools` or was hidden by the user is simply left out.

use alloc::{format, string::String, vec::Vec};

use log::{debug, info};

use crate::{
    config::policy::ToolTag,
    loader::{Arch, is_valid_tool},
    menu::{
        EntryKind, LoaderEntry, MenuEntry, OsType, SELF_TITLE,
        scan::{EntryScanner, strip_volume},
    },
    text::{clean_path, is_in, join_path},
    volume::{Storage, Volume},
};

/// Directories that shim and `MokManager` are installed into by various distributions.
const MOK_LOCATIONS: [&str; 8] = [
    "",
    "EFI\\tools",
    "EFI\\fedora",
    "EFI\\redhat",
    "EFI\\ubuntu",
    "EFI\\suse",
    "EFI\\opensuse",
    "EFI\\altlinux",
];

/// The Mac OS recovery loader.
const APPLE_RECOVERY: &str = "\\com.apple.recovery.boot\\boot.efi";

/// Returns every path a tool may be installed at, in the order they are tried.
///
/// `name` is the bare tool name, like `shell`. Each of the tool directories is tried with `shell.efi`,
/// `shellx64.efi` and `shell_x64.efi` style names.
#[must_use = "Has no effect if the result is unused"]
pub fn tool_candidates(name: &str, arch: Arch) -> Vec<String> {
    let arch = arch.suffix();
    let dirs = [
        format!("EFI\\BOOT\\tools_{arch}"),
        format!("EFI\\tools_{arch}"),
        "EFI\\tools".into(),
        "EFI".into(),
        String::new(),
    ];
    let names = [
        format!("{name}{arch}.efi"),
        format!("{name}_{arch}.efi"),
        format!("{name}.efi"),
    ];

    dirs.iter()
        .flat_map(|dir| names.iter().map(move |name| join_path(dir, name)))
        .collect()
}

/// The MOK manager names shim installs.
fn mok_names(arch: Arch) -> [String; 6] {
    [
        "MokManager.efi".into(),
        "HashTool.efi".into(),
        "HashTool-signed.efi".into(),
        "KeyTool.efi".into(),
        "KeyTool-signed.efi".into(),
        format!("mm{}.efi", arch.suffix()),
    ]
}

impl<S: Storage> EntryScanner<'_, S> {
    /// Builds the second row of the menu.
    ///
    /// `firmware_setup` tells whether the firmware can be asked to start its setup on the next boot; the firmware
    /// tool is left out otherwise.
    pub fn scan_for_tools(&mut self, firmware_setup: bool) -> Vec<MenuEntry> {
        let mut entries = Vec::new();

        for tool in self.policy().tools.iter().copied() {
            let before = entries.len();
            match tool {
                ToolTag::About => entries.push(MenuEntry::tool(
                    format!("About {SELF_TITLE}"),
                    Some('A'),
                    "func_about",
                    EntryKind::About,
                )),
                ToolTag::Reboot => entries.push(MenuEntry::tool(
                    "System Restart",
                    Some('R'),
                    "func_reset",
                    EntryKind::Reboot,
                )),
                ToolTag::Shutdown => entries.push(MenuEntry::tool(
                    "System Shutdown",
                    Some('U'),
                    "func_shutdown",
                    EntryKind::Shutdown,
                )),
                ToolTag::Exit => entries.push(MenuEntry::tool(
                    format!("Exit {SELF_TITLE}"),
                    None,
                    "func_exit",
                    EntryKind::Exit,
                )),
                ToolTag::Firmware if firmware_setup => entries.push(MenuEntry::tool(
                    "Boot into Firmware",
                    None,
                    "func_firmware",
                    EntryKind::FirmwareSetup,
                )),
                ToolTag::HiddenTags if !self.hidden.is_empty() => entries.push(MenuEntry::tool(
                    "Manage Hidden Tags",
                    None,
                    "func_hidden",
                    EntryKind::HiddenTags,
                )),
                ToolTag::CsrRotate if !self.config.csr_values.is_empty() => entries.push(MenuEntry::tool(
                    "Toggle CSR Policy",
                    None,
                    "func_csr_rotate",
                    EntryKind::ToggleCsr,
                )),
                ToolTag::Firmware | ToolTag::HiddenTags | ToolTag::CsrRotate => (),
                ToolTag::Shell => entries.extend(self.find_self_tool(tool, &["shell"], "UEFI Shell", Some('S'))),
                ToolTag::Gptsync => {
                    entries.extend(self.find_self_tool(tool, &["gptsync"], "Hybrid MBR tool", None));
                }
                ToolTag::Gdisk => {
                    entries.extend(self.find_self_tool(tool, &["gdisk"], "disk partitioning tool", Some('G')));
                }
                ToolTag::Netboot => entries.extend(self.find_self_tool(tool, &["ipxe"], "Netboot", Some('N'))),
                ToolTag::Memtest => entries.extend(self.find_self_tool(
                    tool,
                    &["memtest86", "memtest"],
                    "Memory Test Utility",
                    None,
                )),
                ToolTag::MokTool => {
                    let names = mok_names(self.arch);
                    entries.extend(self.find_everywhere(tool, &names, "MOK Utility"));
                }
                ToolTag::FwUpdate => {
                    let names = [format!("fwup{}.efi", self.arch.suffix())];
                    entries.extend(self.find_everywhere(tool, &names, "Firmware Update Utility"));
                }
                ToolTag::AppleRecovery => entries.extend(self.find_apple_recovery()),
                ToolTag::WindowsRecovery => entries.extend(self.find_windows_recovery()),
            }
            if entries.len() == before {
                debug!("Could not find tool {tool:?}");
            }
        }

        info!("Found {} tools", entries.len());
        entries
    }

    /// Creates a tool entry for a file on a volume.
    fn tool_entry(
        &self,
        tool: ToolTag,
        volume: &Volume,
        path: &str,
        title: String,
        shortcut: Option<char>,
    ) -> MenuEntry {
        let os_type = if tool == ToolTag::Netboot { OsType::Net } else { OsType::Other };
        let loader = LoaderEntry::builder(self.catalog.reference(volume), volume.name.clone(), path)
            .name(title.clone())
            .os_type(os_type)
            .build();
        MenuEntry::tool(title, shortcut, tool_icon(tool), EntryKind::Tool(tool, loader))
    }

    /// Finds the first valid copy of a tool on the boot manager's own volume.
    fn find_self_tool(
        &mut self,
        tool: ToolTag,
        names: &[&str],
        title: &str,
        shortcut: Option<char>,
    ) -> Option<MenuEntry> {
        let catalog = self.catalog;
        let volume = catalog.self_volume()?;
        let path = names
            .iter()
            .flat_map(|name| tool_candidates(name, self.arch))
            .find(|path| is_valid_tool(self.storage, volume, path, &self.dont_scan_tools, self.arch))?;
        Some(self.tool_entry(tool, volume, &path, title.into(), shortcut))
    }

    /// Finds every copy of a tool in the MOK locations of every volume.
    fn find_everywhere(&mut self, tool: ToolTag, names: &[String], title: &str) -> Vec<MenuEntry> {
        let catalog = self.catalog;
        let mut locations: Vec<String> = MOK_LOCATIONS.iter().map(|x| (*x).into()).collect();
        if !is_in(&self.self_dir, &locations) {
            locations.push(clean_path(&self.self_dir));
        }

        let mut entries = Vec::new();
        for dir in &locations {
            for name in names {
                let path = join_path(dir, name);
                for volume in catalog.volumes().iter().filter(|x| x.has_root) {
                    if is_valid_tool(self.storage, volume, &path, &self.dont_scan_tools, self.arch) {
                        debug!("Found {name} on {}", volume.name);
                        entries.push(self.tool_entry(tool, volume, &path, title.into(), None));
                    }
                }
            }
        }
        entries
    }

    /// Finds the Mac OS recovery loader on every volume.
    fn find_apple_recovery(&mut self) -> Vec<MenuEntry> {
        let catalog = self.catalog;
        let mut entries = Vec::new();
        for volume in catalog.volumes().iter().filter(|x| x.has_root) {
            if is_valid_tool(self.storage, volume, APPLE_RECOVERY, &self.dont_scan_tools, self.arch) {
                let title = format!("Apple Recovery on {}", volume.name);
                entries.push(self.tool_entry(ToolTag::AppleRecovery, volume, APPLE_RECOVERY, title, None));
            }
        }
        entries
    }

    /// Finds the Windows recovery environment from `windows_recovery_files`.
    ///
    /// An entry may carry a volume prefix, as in `Recovery:\EFI\BOOT\bootx64.efi`, limiting it to that volume.
    fn find_windows_recovery(&mut self) -> Vec<MenuEntry> {
        let catalog = self.catalog;
        let mut entries = Vec::new();
        for file in &self.policy().windows_recovery_files {
            let (wanted, path) = strip_volume(file);
            let volumes = catalog
                .volumes()
                .iter()
                .filter(|x| x.has_root && wanted.is_none_or(|wanted| x.matches_description(wanted)));
            for volume in volumes {
                if is_valid_tool(self.storage, volume, &path, &self.dont_scan_tools, self.arch) {
                    let title = format!("Windows Recovery on {}", volume.name);
                    entries.push(self.tool_entry(ToolTag::WindowsRecovery, volume, &path, title, None));
                }
            }
        }
        entries
    }
}

/// The icon base name of a tool.
const fn tool_icon(tool: ToolTag) -> &'static str {
    match tool {
        ToolTag::Shell => "tool_shell",
        ToolTag::Gptsync | ToolTag::Gdisk => "tool_part",
        ToolTag::Netboot => "tool_netboot",
        ToolTag::Memtest => "tool_memtest",
        ToolTag::MokTool => "tool_mok_tool",
        ToolTag::FwUpdate => "tool_fwupdate",
        ToolTag::AppleRecovery => "tool_apple_rescue",
        ToolTag::WindowsRecovery => "tool_windows_rescue",
        ToolTag::About => "func_about",
        ToolTag::HiddenTags => "func_hidden",
        ToolTag::Shutdown => "func_shutdown",
        ToolTag::Reboot => "func_reset",
        ToolTag::Exit => "func_exit",
        ToolTag::Firmware => "func_firmware",
        ToolTag::CsrRotate => "func_csr_rotate",
    }
}
