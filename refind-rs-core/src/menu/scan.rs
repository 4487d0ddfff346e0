// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! Discovers boot loaders and turns them into menu entries.
//!
//! The scan sources are visited in the configured order. Volume sources look at the well-known Mac OS and Windows
//! loader paths first, then at the root directory, every directory under `EFI`, and the `also_scan_dirs`. The
//! fallback loader is only offered when nothing else on the volume is a byte-for-byte copy of it.
//!
//! Every loader is offered at most once per volume, whichever source finds it first.

use alloc::{borrow::ToOwned, format, string::String, vec::Vec};

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::{
    config::{
        BootConfig,
        policy::{ScanPolicy, ScanSource},
    },
    loader::{
        Arch,
        exclude::{ExcludeList, should_scan, volume_excluded},
        is_valid_loader,
        linux::{add_initrd, find_initrd, fold_key, is_kernel_name, main_options, read_options},
    },
    menu::{
        EntryKind, LoaderEntry, MenuEntry, Origin, OsType, SELF_TITLE, SubEntry,
        builder::loader_defaults,
        hidden::{HiddenTags, TagKind},
        infer_title,
        legacy::{BootOption, firmware_entries, legacy_entries, read_boot_options},
    },
    system::variable::NvramStore,
    text::{clean_path, dirname, eq_ignore_case, join_path},
    volume::{DirEntry, Storage, Volume, VolumeCatalog, VolumeKind},
};

/// The directory of the Mac OS loader.
const MAC_DIR: &str = "System\\Library\\CoreServices";

/// The directory of the Windows boot manager.
const WINDOWS_DIR: &str = "EFI\\Microsoft\\Boot";

/// The directory of the fallback loader.
const FALLBACK_DIR: &str = "EFI\\BOOT";

/// Configuration files whose presence marks the Mac OS loader path as a copy of this boot manager.
const SELF_CONFIGS: [&str; 2] = ["\\EFI\\refind\\config.conf", "\\EFI\\refind\\refind.conf"];

/// The kernel that is always sorted after every other kernel of its directory.
const RESCUE_KERNEL: &str = "vmlinuz-0-rescue";

/// The iPXE loader offered by the network boot source.
const IPXE_PATH: &str = "\\EFI\\tools\\ipxe.efi";

/// The name of the fallback loader for an architecture, like `bootx64.efi`.
#[must_use = "Has no effect if the result is unused"]
pub fn fallback_name(arch: Arch) -> String {
    format!("boot{}.efi", arch.suffix())
}

/// Scans for boot loaders and tools. Borrows everything it needs for one menu build.
pub struct EntryScanner<'a, S: Storage> {
    /// The firmware volumes.
    pub(super) storage: &'a mut S,

    /// The volumes of the current generation.
    pub(super) catalog: &'a VolumeCatalog,

    /// The configuration.
    pub(super) config: &'a BootConfig,

    /// The entries the user has hidden.
    pub(super) hidden: &'a HiddenTags,

    /// The directory of the boot manager, in [`clean_path`] form.
    pub(super) self_dir: String,

    /// The path of the boot manager on its volume.
    pub(super) self_path: String,

    /// The architecture loaders must be built for.
    pub(super) arch: Arch,

    /// The parsed `dont_scan_files`.
    dont_scan_files: ExcludeList,

    /// The parsed `dont_scan_tools`.
    pub(super) dont_scan_tools: ExcludeList,

    /// Every loader added so far, as the volume index and the lowercase clean path.
    seen: Vec<(usize, String)>,
}

impl<'a, S: Storage> EntryScanner<'a, S> {
    /// Creates a scanner for the volumes of a catalog.
    ///
    /// `self_path` is the path of the boot manager itself on the volume marked [`Volume::is_self`].
    pub fn new(
        storage: &'a mut S,
        catalog: &'a VolumeCatalog,
        config: &'a BootConfig,
        hidden: &'a HiddenTags,
        self_path: &str,
        arch: Arch,
    ) -> Self {
        let mut dont_scan_tools = ExcludeList::parse(&config.policy.dont_scan_tools);
        for tool in &hidden.tools {
            dont_scan_tools.push(tool);
        }
        Self {
            storage,
            catalog,
            config,
            hidden,
            self_dir: dirname(self_path),
            self_path: join_path("", self_path),
            arch,
            dont_scan_files: ExcludeList::parse(&config.policy.dont_scan_files),
            dont_scan_tools,
            seen: Vec::new(),
        }
    }

    /// The scan policy.
    pub(super) const fn policy(&self) -> &'a ScanPolicy {
        &self.config.policy
    }

    /// Builds the first row of the menu by visiting every scan source in order.
    ///
    /// The firmware boot options are only read from NVRAM if a legacy or firmware source is configured.
    pub fn scan_for_bootloaders(&mut self, nvram: &mut impl NvramStore) -> Vec<MenuEntry> {
        let mut entries = Vec::new();
        let mut boot_options: Option<Vec<BootOption>> = None;

        for source in self.policy().scan_order.iter().copied() {
            debug!("Scanning source {source:?}");
            match source {
                ScanSource::Manual => entries.extend(self.scan_manual()),
                ScanSource::Internal => entries.extend(self.scan_kind(VolumeKind::Internal)),
                ScanSource::External => entries.extend(self.scan_kind(VolumeKind::External)),
                ScanSource::Optical => entries.extend(self.scan_kind(VolumeKind::Optical)),
                ScanSource::Netboot => entries.extend(self.scan_netboot()),
                ScanSource::LegacyInternal | ScanSource::LegacyExternal | ScanSource::LegacyOptical => {
                    let options = boot_options.get_or_insert_with(|| read_boot_options(nvram));
                    entries.extend(legacy_entries(options, source, self.policy(), self.hidden));
                }
                ScanSource::Firmware => {
                    let options = boot_options.get_or_insert_with(|| read_boot_options(nvram));
                    entries.extend(firmware_entries(options, self.policy(), self.hidden));
                }
            }
        }

        info!("Found {} boot entries", entries.len());
        entries
    }

    /// Records a loader as added. Returns `false` if it was added before.
    fn mark_seen(&mut self, volume: &Volume, path: &str) -> bool {
        let key = (volume.index, clean_path(path).to_lowercase());
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.push(key);
        true
    }

    /// Turns the `menuentry` stanzas into entries.
    ///
    /// A stanza without a `volume`, or naming a volume that does not exist, uses the boot manager's own volume.
    fn scan_manual(&mut self) -> Vec<MenuEntry> {
        let mut entries = Vec::new();
        let config = self.config;
        let catalog = self.catalog;
        let graphics_for = config.policy.graphics_for;

        for stanza in config.manual.iter().filter(|x| x.is_usable()) {
            let Some(loader) = &stanza.loader else {
                continue;
            };
            let volume = stanza
                .volume
                .as_deref()
                .and_then(|x| {
                    let found = catalog.find(x);
                    if found.is_none() {
                        warn!("Volume {x} of \"{}\" not found, using the boot manager volume", stanza.title);
                    }
                    found
                })
                .or_else(|| catalog.self_volume());
            let Some(volume) = volume else {
                warn!("No volume for \"{}\"", stanza.title);
                continue;
            };

            if !is_valid_loader(self.storage, Some(volume), Some(loader), self.arch).is_valid() {
                warn!("\"{}\" has no valid loader at {loader}", stanza.title);
                continue;
            }

            let defaults = loader_defaults(loader, graphics_for);
            let os_type = if stanza.os_type == OsType::Other {
                defaults.os_type
            } else {
                stanza.os_type
            };
            let entry = LoaderEntry::builder(catalog.reference(volume), volume.name.clone(), loader.clone())
                .name(stanza.title.clone())
                .maybe_options(stanza.options.clone())
                .os_type(os_type)
                .use_graphics(
                    stanza
                        .use_graphics
                        .unwrap_or_else(|| graphics_for.intersects(os_type.graphics_flag())),
                )
                .origin(Origin::Manual)
                .build();

            let _ = self.mark_seen(volume, loader);
            let shortcut = if stanza.os_type == OsType::Other {
                defaults.shortcut
            } else {
                Some(stanza.os_type.letter())
            };
            entries.push(MenuEntry::loader(entry, shortcut));
        }

        entries
    }

    /// Scans every volume of one kind.
    fn scan_kind(&mut self, kind: VolumeKind) -> Vec<MenuEntry> {
        let catalog = self.catalog;
        let mut entries = Vec::new();
        for volume in catalog.volumes().iter().filter(|x| x.kind == kind) {
            if !volume.has_root || volume_excluded(volume, self.policy()) {
                debug!("Skipping volume {} ({})", volume.index, volume.name);
                continue;
            }
            self.scan_volume(volume, &mut entries);
        }
        entries
    }

    /// Checks if a loader is excluded by `dont_scan_files`.
    fn file_excluded(&self, volume: &Volume, path: &str) -> bool {
        self.dont_scan_files.excludes(volume, path)
    }

    /// Finds every loader of one volume.
    fn scan_volume(&mut self, volume: &Volume, entries: &mut Vec<MenuEntry>) {
        let fallback = join_path(FALLBACK_DIR, &fallback_name(self.arch));
        let mut scan_fallback = true;
        let self_dir = self.self_dir.clone();

        if should_scan(volume, MAC_DIR, self.policy(), &self_dir) {
            let path = join_path(MAC_DIR, "boot.efi");
            if self.storage.file_exists(volume, &path) && !self.file_excluded(volume, &path) {
                let is_self = SELF_CONFIGS.iter().any(|x| self.storage.file_exists(volume, x));
                let title = if is_self { SELF_TITLE } else { "Mac OS" };
                self.add_loader(volume, &path, title, entries);
                if self.duplicates_fallback(volume, &path) {
                    scan_fallback = false;
                }
            }

            let path = join_path(MAC_DIR, "xom.efi");
            if self.storage.file_exists(volume, &path) && !self.file_excluded(volume, &path) {
                self.add_loader(volume, &path, "Windows XP (XoM)", entries);
                if self.duplicates_fallback(volume, &path) {
                    scan_fallback = false;
                }
            }
        }

        if should_scan(volume, WINDOWS_DIR, self.policy(), &self_dir) {
            let mut found_backup = false;
            let path = join_path(WINDOWS_DIR, "bkpbootmgfw.efi");
            if self.storage.file_exists(volume, &path) && !self.file_excluded(volume, &path) {
                self.add_loader(volume, &path, "UEFI Windows (BRBackup)", entries);
                found_backup = true;
                if self.duplicates_fallback(volume, &path) {
                    scan_fallback = false;
                }
            }

            let path = join_path(WINDOWS_DIR, "bootmgfw.efi");
            if self.storage.file_exists(volume, &path) && !self.file_excluded(volume, &path) {
                // boot repair tools move the real Windows loader aside and put something else in its place
                let title = if found_backup {
                    "Assumed UEFI Windows (Potentially GRUB)"
                } else {
                    "Windows (UEFI)"
                };
                self.add_loader(volume, &path, title, entries);
                if self.duplicates_fallback(volume, &path) {
                    scan_fallback = false;
                }
            }
        }

        if self.scan_loader_dir(volume, "", entries) {
            scan_fallback = false;
        }

        let efi_dirs = match self.storage.list_dir(volume, "EFI") {
            Ok(dirs) => dirs,
            Err(e) => {
                debug!("No EFI directory on {}: {e}", volume.name);
                Vec::new()
            }
        };
        for dir in efi_dirs.iter().filter(|x| x.is_dir) {
            if eq_ignore_case(&dir.name, "tools") || dir.name.starts_with('.') {
                continue;
            }
            if self.scan_loader_dir(volume, &format!("EFI\\{}", dir.name), entries) {
                scan_fallback = false;
            }
        }

        for dir in &self.policy().also_scan_dirs {
            if !should_scan(volume, dir, self.policy(), &self_dir) {
                continue;
            }
            let path = clean_path(dir.split_once(':').map_or(dir.as_str(), |(_, path)| path));
            if !path.is_empty() && self.scan_loader_dir(volume, &path, entries) {
                scan_fallback = false;
            }
        }

        if volume.is_self {
            let self_path = self.self_path.clone();
            if self.duplicates_fallback(volume, &self_path) {
                scan_fallback = false;
            }
        }

        if scan_fallback
            && self.storage.file_exists(volume, &fallback)
            && should_scan(volume, FALLBACK_DIR, self.policy(), &self_dir)
            && !self.file_excluded(volume, &fallback)
        {
            self.add_loader(volume, &fallback, "Fallback Boot Loader", entries);
        }
    }

    /// Adds a loader found at a well-known path.
    fn add_loader(&mut self, volume: &Volume, path: &str, title: &str, entries: &mut Vec<MenuEntry>) {
        if !is_valid_loader(self.storage, Some(volume), Some(path), self.arch).is_valid() {
            debug!("Not a loader: {path}");
            return;
        }
        if let Some(entry) = self.loader_entry(volume, path, title) {
            entries.push(entry);
        }
    }

    /// Creates the entry of an automatically found loader, or [`None`] if it was already added or is hidden.
    fn loader_entry(&mut self, volume: &Volume, path: &str, title: &str) -> Option<MenuEntry> {
        let name = infer_title(title, path, &volume.name);
        let defaults = loader_defaults(path, self.policy().graphics_for);

        let mut builder = LoaderEntry::builder(self.catalog.reference(volume), volume.name.clone(), path)
            .name(name)
            .os_type(defaults.os_type)
            .use_graphics(defaults.use_graphics);

        if defaults.os_type == OsType::Linux {
            let extra = &self.policy().extra_kernel_version_strings;
            builder = builder.maybe_options(main_options(self.storage, volume, path, extra));
            let initrd = find_initrd(self.storage, volume, path, extra);
            for line in read_options(self.storage, volume, path).unwrap_or_default() {
                builder = builder.sub_entry(SubEntry {
                    title: line.title,
                    path: None,
                    options: add_initrd(Some(&line.options), initrd.as_deref(), extra),
                });
            }
        }

        let entry = builder.build();
        if self.hidden.contains(TagKind::Loader, &entry.hidden_tag()) {
            debug!("Hidden: {}", entry.hidden_tag());
            return None;
        }
        if !self.mark_seen(volume, path) {
            debug!("Already added: {path}");
            return None;
        }
        Some(MenuEntry::loader(entry, defaults.shortcut))
    }

    /// Scans one directory of a volume for loaders, newest first.
    ///
    /// Returns whether any loader found is a copy of the fallback loader.
    fn scan_loader_dir(&mut self, volume: &Volume, dir: &str, entries: &mut Vec<MenuEntry>) -> bool {
        let self_dir = self.self_dir.clone();
        if !should_scan(volume, dir, self.policy(), &self_dir) {
            return false;
        }

        let listing = match self.storage.list_dir(volume, dir) {
            Ok(listing) => listing,
            Err(e) => {
                debug!("Could not scan {dir} on {}: {e}", volume.name);
                return false;
            }
        };

        let mut candidates: Vec<&DirEntry> = listing
            .iter()
            .filter(|x| !x.is_dir && is_loader_name(&x.name))
            .filter(|x| self.keep_candidate(volume, dir, &x.name, &listing))
            .collect();
        candidates.sort_by(|a, b| {
            is_rescue(&a.name)
                .cmp(&is_rescue(&b.name))
                .then(b.modified.cmp(&a.modified))
        });

        let fold = self.policy().fold_linux_kernels;
        let extra = self.policy().extra_kernel_version_strings.clone();
        let mut duplicate = false;
        // the index into `entries` of the first kernel of each fold key
        let mut folds: Vec<(String, usize)> = Vec::new();

        for candidate in candidates {
            let path = join_path(dir, &candidate.name);
            if !is_valid_loader(self.storage, Some(volume), Some(&path), self.arch).is_valid() {
                debug!("Not a loader: {path}");
                continue;
            }

            if fold && is_kernel_name(&candidate.name) {
                let key = fold_key(&candidate.name, &extra);
                if let Some((_, i)) = folds.iter().find(|(x, _)| *x == key)
                    && let Some(loader) = entries.get_mut(*i).and_then(|x| match &mut x.kind {
                        EntryKind::Loader(loader) => Some(loader),
                        _ => None,
                    })
                {
                    if !self.hidden.contains(TagKind::Loader, &format!("{}:{path}", volume.name))
                        && self.mark_seen(volume, &path)
                    {
                        let options = main_options(self.storage, volume, &path, &extra);
                        loader.submenu.push(SubEntry {
                            title: format!("Boot {}", candidate.name),
                            path: Some(path.clone()),
                            options,
                        });
                    }
                    if self.duplicates_fallback(volume, &path) {
                        duplicate = true;
                    }
                    continue;
                }
                if let Some(entry) = self.loader_entry(volume, &path, "") {
                    folds.push((key, entries.len()));
                    entries.push(entry);
                }
            } else if let Some(entry) = self.loader_entry(volume, &path, "") {
                entries.push(entry);
            }

            if self.duplicates_fallback(volume, &path) {
                duplicate = true;
            }
        }

        duplicate
    }

    /// Applies the name-based skip rules to a loader candidate.
    fn keep_candidate(&self, volume: &Volume, dir: &str, name: &str, listing: &[DirEntry]) -> bool {
        let lower = name.to_lowercase();
        if name.starts_with('.') || lower.ends_with(".icns") || lower.ends_with(".png") {
            return false;
        }
        if eq_ignore_case(&clean_path(dir), FALLBACK_DIR) && eq_ignore_case(name, &fallback_name(self.arch)) {
            return false;
        }
        if is_shell_name(name, self.arch) {
            return false;
        }
        // Ubuntu ships signed copies of its kernels next to the unsigned ones
        let signed = format!("{name}.efi.signed");
        if listing.iter().any(|x| eq_ignore_case(&x.name, &signed)) {
            return false;
        }
        !self.dont_scan_files.excludes_file(volume, dir, name)
    }

    /// Checks if a loader has exactly the same contents as the fallback loader of its volume.
    fn duplicates_fallback(&mut self, volume: &Volume, path: &str) -> bool {
        let fallback = join_path(FALLBACK_DIR, &fallback_name(self.arch));
        if eq_ignore_case(&clean_path(path), &clean_path(&fallback))
            || !self.storage.file_exists(volume, path)
            || !self.storage.file_exists(volume, &fallback)
        {
            return false;
        }

        let digest = |storage: &mut S, path: &str| match storage.read_file(volume, path) {
            Ok(bytes) => Some((bytes.len(), Sha256::digest(&bytes))),
            Err(e) => {
                debug!("Could not read {path}: {e}");
                None
            }
        };
        let (Some(file), Some(fallback)) = (digest(self.storage, path), digest(self.storage, &fallback)) else {
            return false;
        };
        file == fallback
    }

    /// Offers iPXE from the boot manager's volume.
    fn scan_netboot(&mut self) -> Vec<MenuEntry> {
        let catalog = self.catalog;
        let Some(volume) = catalog.self_volume() else {
            return Vec::new();
        };
        if !self.storage.file_exists(volume, IPXE_PATH)
            || !is_valid_loader(self.storage, Some(volume), Some(IPXE_PATH), self.arch).is_valid()
        {
            return Vec::new();
        }
        self.loader_entry(volume, IPXE_PATH, "Network Boot").into_iter().collect()
    }
}

/// Checks if a file name may be a loader: any `.efi` file, or a Linux kernel.
fn is_loader_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".efi") || ["vmlinuz", "bzimage", "kernel"].iter().any(|x| lower.starts_with(x))
}

/// Checks if a file name is the rescue kernel.
fn is_rescue(name: &str) -> bool {
    name.to_lowercase().starts_with(RESCUE_KERNEL)
}

/// Checks if a file name is one of the EFI shell names, which are offered as tools instead.
pub(super) fn is_shell_name(name: &str, arch: Arch) -> bool {
    let arch = arch.suffix();
    ["shell.efi".to_owned(), format!("shell{arch}.efi"), format!("shell_{arch}.efi")]
        .iter()
        .any(|x| eq_ignore_case(x, name))
}

/// Strips the volume prefix of a configured path.
pub(super) fn strip_volume(path: &str) -> (Option<&str>, String) {
    match path.split_once(':') {
        Some((volume, path)) => (Some(volume.trim()).filter(|x| !x.is_empty()), join_path("", path)),
        None => (None, join_path("", path)),
    }
}

#[cfg(test)]
mod tests {
    use alloc::{borrow::ToOwned, vec, vec::Vec};

    use super::*;
    use crate::{
        fakes::{FakeNvram, FakeStorage, pe_header},
        volume::VolumeKind,
    };

    const SELF_PATH: &str = "\\EFI\\refind\\refind_x64.efi";

    const OPTIONS_FILE: &str = "\"Boot with standard options\" \"root=/dev/sda2 ro\"\n\"Single user\" \"root=/dev/sda2 ro single\"\n";

    /// An ESP with Windows, GRUB and the boot manager, and a Linux volume with two kernels.
    fn storage() -> FakeStorage {
        let pe = pe_header(Arch::X64.machine());
        let mut self_image = pe.clone();
        self_image[0x200 - 1] = 1;

        let mut storage = FakeStorage::with_volumes(&["ESP", "Linux"]);
        storage.volumes[0].is_self = true;
        storage.add_file(0, SELF_PATH, self_image);
        storage.add_file(0, "\\EFI\\Microsoft\\Boot\\bootmgfw.efi", pe.clone());
        storage.add_file(0, "\\EFI\\BOOT\\bootx64.efi", pe.clone());
        storage.add_file(0, "\\EFI\\ubuntu\\grubx64.efi", pe.clone());
        storage.add_file(0, "\\EFI\\tools\\shell.efi", pe.clone());

        storage.add_file(1, "\\boot\\vmlinuz-6.1.0", pe.clone());
        storage.add_file(1, "\\boot\\vmlinuz-6.2.0", pe);
        storage.add_file(1, "\\boot\\initrd.img-6.2.0", vec![0; 16]);
        storage.add_file(1, "\\boot\\refind_linux.conf", OPTIONS_FILE.as_bytes().to_vec());
        storage
    }

    fn build(storage: &mut FakeStorage, catalog: &VolumeCatalog, config: &BootConfig, hidden: &HiddenTags) -> Vec<MenuEntry> {
        let mut scanner = EntryScanner::new(storage, catalog, config, hidden, SELF_PATH, Arch::X64);
        scanner.scan_for_bootloaders(&mut FakeNvram::default())
    }

    fn scan(storage: &mut FakeStorage, config: &BootConfig, hidden: &HiddenTags) -> Vec<MenuEntry> {
        let mut catalog = VolumeCatalog::new();
        let _ = catalog.scan(storage);
        build(storage, &catalog, config, hidden)
    }

    fn titles(entries: &[MenuEntry]) -> Vec<&str> {
        entries.iter().map(|x| &*x.title).collect()
    }

    fn loader(entry: &MenuEntry) -> &LoaderEntry {
        match &entry.kind {
            EntryKind::Loader(loader) => loader,
            kind => panic!("not a loader entry: {kind:?}"),
        }
    }

    #[test]
    fn test_scan_order_and_fallback_duplicate() {
        let mut storage = storage();
        let entries = scan(&mut storage, &BootConfig::default(), &HiddenTags::default());

        // the fallback loader is a copy of the Windows loader, and the boot manager's own directory is skipped
        assert_eq!(titles(&entries), [
            "Boot Windows (UEFI) from ESP",
            "Boot \\EFI\\ubuntu\\grubx64.efi from ESP",
            "Boot \\boot\\vmlinuz-6.2.0 from Linux",
        ]);
        assert_eq!(entries[0].shortcut, Some('W'));
        assert_eq!(loader(&entries[0]).os_type, OsType::Windows);
        assert_eq!(loader(&entries[1]).os_type, OsType::Grub);
    }

    #[test]
    fn test_kernel_folding() {
        let mut storage = storage();
        let entries = scan(&mut storage, &BootConfig::default(), &HiddenTags::default());

        let kernel = loader(&entries[2]);
        assert_eq!(kernel.os_type, OsType::Linux);
        assert_eq!(entries[2].shortcut, Some('B'));
        assert!(kernel.options.as_deref().is_some_and(|x| x.starts_with("root=/dev/sda2 ro")));
        assert!(kernel.options.as_deref().is_some_and(|x| x.contains("initrd=")));

        let submenu: Vec<_> = kernel.submenu.iter().map(|x| &*x.title).collect();
        assert_eq!(submenu, ["Boot with standard options", "Single user", "Boot vmlinuz-6.1.0"]);
        assert_eq!(kernel.submenu[2].path.as_deref(), Some("\\boot\\vmlinuz-6.1.0"));

        let mut config = BootConfig::default();
        config.policy.fold_linux_kernels = false;
        let entries = scan(&mut storage, &config, &HiddenTags::default());
        assert_eq!(&titles(&entries)[2..], [
            "Boot \\boot\\vmlinuz-6.2.0 from Linux",
            "Boot \\boot\\vmlinuz-6.1.0 from Linux",
        ]);
    }

    #[test]
    fn test_rescan_never_keeps_stale_volumes() {
        let mut storage = storage();
        let config = BootConfig::default();
        let hidden = HiddenTags::default();

        let mut catalog = VolumeCatalog::new();
        let _ = catalog.scan(&mut storage);
        let first = build(&mut storage, &catalog, &config, &hidden);

        let _ = catalog.scan(&mut storage);
        let second = build(&mut storage, &catalog, &config, &hidden);

        assert_eq!(titles(&first), titles(&second));
        assert!(first.iter().all(|x| catalog.get(loader(x).volume).is_none()));
        assert!(second.iter().all(|x| {
            loader(x).volume.generation == catalog.generation() && catalog.get(loader(x).volume).is_some()
        }));
    }

    #[test]
    fn test_fallback_loader() {
        let mut storage = FakeStorage::with_volumes(&["USB"]);
        storage.volumes[0].kind = VolumeKind::External;
        storage.add_file(0, "\\EFI\\BOOT\\bootx64.efi", pe_header(Arch::X64.machine()));
        storage.add_file(0, "\\EFI\\BOOT\\bootaa64.efi", pe_header(Arch::Aa64.machine()));

        let entries = scan(&mut storage, &BootConfig::default(), &HiddenTags::default());
        assert_eq!(titles(&entries), ["Boot Fallback Boot Loader from USB"]);

        let mut config = BootConfig::default();
        config.policy.dont_scan_volumes = vec!["usb".to_owned()];
        assert!(scan(&mut storage, &config, &HiddenTags::default()).is_empty());
    }

    #[test]
    fn test_skip_rules() {
        let pe = pe_header(Arch::X64.machine());
        let mut storage = FakeStorage::with_volumes(&["ESP"]);
        for name in [".hidden.efi", "shellx64.efi", "skip.efi", "keep.efi", "vmlinuz-1", "vmlinuz-1.efi.signed"] {
            storage.add_file(0, &format!("\\EFI\\foo\\{name}"), pe.clone());
        }
        storage.add_file(0, "\\EFI\\foo\\logo.png", vec![0; 4]);
        storage.add_file(0, "\\EFI\\foo\\arm.efi", pe_header(Arch::Aa64.machine()));

        let mut config = BootConfig::default();
        config.policy.dont_scan_files = vec!["skip.efi".to_owned()];
        let entries = scan(&mut storage, &config, &HiddenTags::default());
        let mut found = titles(&entries);
        found.sort_unstable();
        assert_eq!(found, ["Boot \\EFI\\foo\\keep.efi from ESP", "Boot \\EFI\\foo\\vmlinuz-1.efi.signed from ESP"]);

        let mut hidden = HiddenTags::default();
        let _ = hidden.hide(TagKind::Loader, "ESP:\\EFI\\foo\\keep.efi".to_owned());
        let entries = scan(&mut storage, &config, &hidden);
        assert_eq!(titles(&entries), ["Boot \\EFI\\foo\\vmlinuz-1.efi.signed from ESP"]);

        config.policy.dont_scan_dirs = vec!["ESP:EFI\\foo".to_owned()];
        assert!(scan(&mut storage, &config, &HiddenTags::default()).is_empty());
    }

    #[test]
    fn test_manual_entries() {
        let mut storage = storage();
        let config = BootConfig::parse(
            r#"
scanfor manual,internal
menuentry "My Arch" {
    volume Linux
    loader \boot\vmlinuz-6.2.0
    options "root=/dev/sda2 rw"
    ostype Linux
}
menuentry "Old" {
    loader \EFI\ubuntu\grubx64.efi
    disabled
}
menuentry "Missing" {
    loader \EFI\nothing.efi
}
"#,
        );
        let entries = scan(&mut storage, &config, &HiddenTags::default());
        assert_eq!(titles(&entries), [
            "Boot My Arch from Linux",
            "Boot Windows (UEFI) from ESP",
            "Boot \\EFI\\ubuntu\\grubx64.efi from ESP",
            "Boot \\boot\\vmlinuz-6.1.0 from Linux",
        ]);

        let manual = loader(&entries[0]);
        assert_eq!(manual.origin, Origin::Manual);
        assert_eq!(manual.options.as_deref(), Some("root=/dev/sda2 rw"));
        assert_eq!(entries[0].shortcut, Some('L'));
    }

    #[test]
    fn test_mac_and_netboot() {
        let pe = pe_header(Arch::X64.machine());
        let mut storage = FakeStorage::with_volumes(&["PreBoot", "ESP"]);
        storage.volumes[1].is_self = true;
        storage.add_file(0, "\\System\\Library\\CoreServices\\boot.efi", pe.clone());
        storage.add_file(1, SELF_PATH, pe.clone());
        storage.add_file(1, IPXE_PATH, pe);

        let config = BootConfig::parse("scanfor internal,netboot");
        let entries = scan(&mut storage, &config, &HiddenTags::default());
        assert_eq!(titles(&entries), ["Boot Mac OS from PreBoot", "Boot Network Boot from ESP"]);
        assert_eq!(loader(&entries[0]).os_type, OsType::Mac);
        assert_eq!(loader(&entries[1]).os_type, OsType::Net);
    }

    #[test]
    fn test_strip_volume() {
        assert_eq!(strip_volume("Recovery:\\EFI\\BOOT\\bootx64.efi"), (Some("Recovery"), "\\EFI\\BOOT\\bootx64.efi".to_owned()));
        assert_eq!(strip_volume("EFI\\OEM\\Boot\\bootmgfw.efi"), (None, "\\EFI\\OEM\\Boot\\bootmgfw.efi".to_owned()));
        assert_eq!(strip_volume(":boot.efi"), (None, "\\boot.efi".to_owned()));
    }
}
