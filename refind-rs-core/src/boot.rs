//! Provides [`BootManager`], the context object that owns the volume catalog, the configuration and the menu.
//!
//! The frontend creates one at startup with the firmware collaborators and calls [`BootManager::run`], which only
//! returns when the user (or the countdown) picks a [`Terminal`] action.

use alloc::{borrow::ToOwned, format, string::String, vec::Vec};

use log::{debug, info, warn};

use crate::{
    boot::action::{
        Terminal,
        csr::{describe_csr, rotate_csr},
        firmware::{firmware_setup_supported, set_boot_next, set_boot_to_firmware},
    },
    config::BootConfig,
    launch::{
        ImageServices, LaunchPolicy, LaunchRequest, LaunchSequencer,
        report::{check_error, report},
    },
    loader::Arch,
    menu::{
        EntryKind, LoaderEntry, Menu, MenuEntry, Row, SELF_TITLE,
        hidden::{HiddenTags, TagKind, tag_for},
        interact::{Console, MenuExit, Outcome, Severity, run_menu},
        scan::EntryScanner,
    },
    system::variable::{NvramStore, VarError},
    text::{dirname, join_path},
    volume::{Storage, VolumeCatalog},
};

pub mod action;
pub mod bli;

/// The title of the main menu.
const MAIN_MENU_TITLE: &str = "Main Menu";

/// How long a message about a firmware action stays on screen.
const MESSAGE_SECONDS: u32 = 4;

/// The firmware collaborators of a [`BootManager`].
pub struct Collaborators<S, I, N, C> {
    /// Volumes and files.
    pub storage: S,

    /// Loading and starting images.
    pub images: I,

    /// Firmware variables.
    pub nvram: N,

    /// The screen and the keyboard.
    pub console: C,
}

/// The boot manager: everything that lives from startup until a [`Terminal`] action.
pub struct BootManager<S: Storage, I: ImageServices, N: NvramStore, C: Console> {
    /// The firmware collaborators.
    pub io: Collaborators<S, I, N, C>,

    /// The volumes of the current generation.
    catalog: VolumeCatalog,

    /// The configuration, read again on every rescan.
    config: BootConfig,

    /// The `-c` override of the configuration file name.
    config_path: Option<String>,

    /// The entries the user has hidden.
    hidden: HiddenTags,

    /// The path of the boot manager on its own volume.
    self_path: String,

    /// The architecture loaders must be built for.
    arch: Arch,

    /// Whether the firmware can be asked to start its setup.
    firmware_setup: bool,

    /// The main menu, rebuilt after every scan.
    menu: Menu,

    /// Whether the next display of the main menu still counts down.
    countdown: bool,

    /// The title of the entry chosen last, which stays selected when the menu is shown again.
    last_choice: Option<String>,
}

impl<S: Storage, I: ImageServices, N: NvramStore, C: Console> BootManager<S, I, N, C> {
    /// Creates a [`BootManager`]: scans the volumes, reads the configuration, loads drivers, then builds the menu.
    ///
    /// `self_path` is the path of the boot manager image on its volume, and `config_path` replaces the usual
    /// configuration file names. Nothing here is fatal: a failed volume enumeration gives an empty catalog, and a
    /// missing configuration gives the defaults.
    pub fn new(
        mut io: Collaborators<S, I, N, C>,
        self_path: &str,
        config_path: Option<&str>,
        arch: Arch,
    ) -> Self {
        let init_usec = io.images.now_usec();

        let mut catalog = VolumeCatalog::new();
        if let Err(e) = catalog.scan(&mut io.storage) {
            warn!("{e}");
        }

        let mut manager = Self {
            io,
            catalog,
            config: BootConfig::default(),
            config_path: config_path.map(ToOwned::to_owned),
            hidden: HiddenTags::default(),
            self_path: join_path("", self_path),
            arch,
            firmware_setup: false,
            menu: Menu::new(MAIN_MENU_TITLE),
            countdown: true,
            last_choice: None,
        };
        manager.read_config();

        if manager.config.write_systemd_vars
            && let Err(e) = bli::export_variables(&mut manager.io.nvram, init_usec)
        {
            warn!("Failed to export the boot loader interface variables: {e}");
        }

        // drivers may make more volumes readable
        if manager.load_drivers() > 0
            && let Err(e) = manager.catalog.scan(&mut manager.io.storage)
        {
            warn!("{e}");
        }

        manager.hidden = HiddenTags::load(&mut manager.io.nvram);
        manager.firmware_setup = firmware_setup_supported(&mut manager.io.nvram);
        manager.build_menu();
        manager
    }

    /// Returns the configuration in effect.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn config(&self) -> &BootConfig {
        &self.config
    }

    /// Returns the main menu as it was last built.
    #[must_use = "Has no effect if the result is unused"]
    pub const fn menu(&self) -> &Menu {
        &self.menu
    }

    /// Reads the configuration from the boot manager's own volume.
    fn read_config(&mut self) {
        let self_dir = dirname(&self.self_path);
        self.config = BootConfig::load(
            &mut self.io.storage,
            self.catalog.self_volume(),
            &self_dir,
            self.config_path.as_deref(),
        );
        self.config.resolve_previous_boot(&mut self.io.nvram);
        log::set_max_level(self.config.log_level);
    }

    /// The launch settings, for a loader or a tool.
    fn launch_policy(&self, record_previous_boot: bool) -> LaunchPolicy {
        LaunchPolicy {
            write_systemd_vars: self.config.write_systemd_vars,
            ignore_previous_boot: self.config.ignore_previous_boot || !record_previous_boot,
            esp_guid: self.catalog.self_volume().and_then(|x| x.part_guid),
            arch: self.arch,
            set_boot_args: self.config.set_boot_args.clone(),
        }
    }

    /// Starts every driver in the `drivers` and `drivers_<arch>` directories next to the boot manager.
    ///
    /// Returns the number of drivers started.
    fn load_drivers(&mut self) -> usize {
        let Some(volume) = self.catalog.self_volume().filter(|x| x.has_root).cloned() else {
            return 0;
        };
        let self_dir = dirname(&self.self_path);
        let dirs = [
            join_path(&self_dir, "drivers"),
            join_path(&self_dir, &format!("drivers_{}", self.arch.suffix())),
        ];
        let policy = self.launch_policy(false);

        let mut loaded = 0;
        for dir in dirs {
            if !self.io.storage.file_exists(&volume, &dir) {
                continue;
            }
            let files = match self.io.storage.list_dir(&volume, &dir) {
                Ok(files) => files,
                Err(e) => {
                    warn!("Could not read {dir}: {e}");
                    continue;
                }
            };

            for file in files
                .iter()
                .filter(|x| !x.is_dir && x.name.to_ascii_lowercase().ends_with(".efi"))
            {
                let request = LaunchRequest::driver(&volume, &join_path(&dir, &file.name));
                let mut sequencer =
                    LaunchSequencer::new(&mut self.io.storage, &mut self.io.images, &mut self.io.nvram, &policy);
                match sequencer.run(&request) {
                    Ok(_) => {
                        info!("Started driver {}", request.path);
                        loaded += 1;
                    }
                    Err(e) => report(&mut self.io.console, &e, false),
                }
            }
        }
        loaded
    }

    /// Builds the main menu from the current catalog: the boot loaders, then the tools.
    fn build_menu(&mut self) {
        let mut scanner = EntryScanner::new(
            &mut self.io.storage,
            &self.catalog,
            &self.config,
            &self.hidden,
            &self.self_path,
            self.arch,
        );
        let mut entries = scanner.scan_for_bootloaders(&mut self.io.nvram);
        entries.extend(scanner.scan_for_tools(self.firmware_setup));

        self.menu = Menu {
            title: MAIN_MENU_TITLE.to_owned(),
            entries,
            timeout: 0,
            timeout_text: if self.config.shutdown_after_timeout {
                "Shutdown".to_owned()
            } else {
                "Boot default".to_owned()
            },
        };
        if self.menu.has_no_loaders() {
            warn!("No boot loaders found");
        }
    }

    /// Throws the menu away, reconnects the filesystem drivers, and scans everything again.
    fn rescan(&mut self) {
        info!("Rescanning all volumes");
        self.io.storage.reconnect();
        if let Err(e) = self.catalog.scan(&mut self.io.storage) {
            warn!("{e}");
        }
        self.read_config();
        self.build_menu();
    }

    /// The entry to highlight: the one chosen last, else the configured default.
    fn initial_selection(&self) -> usize {
        self.last_choice
            .as_deref()
            .and_then(|title| self.menu.entries.iter().position(|x| x.title == title))
            .or_else(|| self.menu.find_default(&self.config.default_selection))
            .unwrap_or(0)
    }

    /// Runs the main menu until a [`Terminal`] action is chosen.
    ///
    /// Escape rescans every volume. Launched programs that return, and actions like the about page, come back to
    /// the menu. The countdown only runs on the first display of the menu.
    pub fn run(&mut self) -> Terminal {
        loop {
            let _ = self.io.console.drain_keys();
            if self.menu.has_no_loaders() {
                self.io
                    .console
                    .display_message("No boot loaders found. Press Escape to rescan.", Severity::Warning);
            }

            self.menu.timeout = if self.countdown { self.config.timeout } else { 0 };
            self.countdown = false;
            let selected = self.initial_selection();
            let outcome = run_menu(&mut self.io.console, &self.menu, selected);

            if let Some(terminal) = self.dispatch(outcome) {
                info!("Leaving the boot manager: {terminal:?}");
                return terminal;
            }
        }
    }

    /// Acts on the result of the main menu. Returns the [`Terminal`] action, if one was chosen.
    fn dispatch(&mut self, outcome: Outcome) -> Option<Terminal> {
        if outcome.exit == MenuExit::Escape {
            self.rescan();
            return None;
        }
        if outcome.exit == MenuExit::Timeout && self.config.shutdown_after_timeout {
            return Some(Terminal::Shutdown);
        }

        let entry = self.menu.entries.get(outcome.selected)?.clone();
        self.last_choice = Some(entry.title.clone());
        debug!("Menu exit {:?} on \"{}\"", outcome.exit, entry.title);

        match outcome.exit {
            MenuExit::Hide => {
                self.hide(&entry);
                None
            }
            MenuExit::Details => {
                if let EntryKind::Loader(loader) = &entry.kind {
                    self.run_details(loader, &entry.title);
                }
                None
            }
            MenuExit::Enter | MenuExit::Timeout => self.choose(&entry),
            MenuExit::Escape => None,
        }
    }

    /// Carries out a chosen entry.
    fn choose(&mut self, entry: &MenuEntry) -> Option<Terminal> {
        match &entry.kind {
            EntryKind::Loader(loader) => {
                self.launch(loader, &entry.title, true);
                None
            }
            EntryKind::Tool(_, loader) => {
                self.launch(loader, &entry.title, false);
                None
            }
            EntryKind::Legacy(legacy) => self.reboot_into(legacy.boot_num, &legacy.description),
            EntryKind::FirmwareBoot(firmware) => self.reboot_into(firmware.boot_num, &firmware.description),
            EntryKind::FirmwareSetup => match set_boot_to_firmware(&mut self.io.nvram) {
                Ok(()) => Some(Terminal::Reboot),
                Err(e) => {
                    self.firmware_action_failed("setting OsIndications", &e);
                    None
                }
            },
            EntryKind::HiddenTags => {
                self.manage_hidden();
                None
            }
            EntryKind::About => {
                self.about();
                None
            }
            EntryKind::ToggleCsr => {
                self.toggle_csr();
                None
            }
            EntryKind::Reboot => Some(Terminal::Reboot),
            EntryKind::Shutdown => Some(Terminal::Shutdown),
            EntryKind::Exit => Some(Terminal::Exit),
            EntryKind::Return | EntryKind::Choice(_) => None,
        }
    }

    /// Launches a loader or a tool, and reports the failure if there is one.
    ///
    /// Only loaders are recorded as the previous boot.
    fn launch(&mut self, loader: &LoaderEntry, title: &str, record_previous_boot: bool) {
        let Some(mut request) = LaunchRequest::from_loader(&self.catalog, loader, title) else {
            warn!("The volume of \"{title}\" is gone");
            self.io
                .console
                .display_message(&format!("The volume of {title} is no longer available"), Severity::Error);
            self.io.console.pause_for_key();
            return;
        };
        request.verbose = !loader.use_graphics;

        if loader.use_graphics {
            self.io.console.switch_to_graphics();
        } else {
            self.io.console.switch_to_text();
            self.io
                .console
                .display_message(&format!("Starting {title}"), Severity::Info);
        }

        let policy = self.launch_policy(record_previous_boot);
        let mut sequencer =
            LaunchSequencer::new(&mut self.io.storage, &mut self.io.images, &mut self.io.nvram, &policy);
        let result = sequencer.run(&request);
        self.io.console.switch_to_graphics();

        match result {
            Ok(status) => info!("{title} returned {status:?}"),
            Err(e) => report(&mut self.io.console, &e, request.verbose),
        }
    }

    /// Sets `BootNext` and reboots into a firmware boot option.
    fn reboot_into(&mut self, boot_num: u16, description: &str) -> Option<Terminal> {
        info!("Rebooting into Boot{boot_num:04X} ({description})");
        match set_boot_next(&mut self.io.nvram, boot_num) {
            Ok(()) => Some(Terminal::Reboot),
            Err(e) => {
                self.firmware_action_failed("setting BootNext", &e);
                None
            }
        }
    }

    /// Shows a failed variable write of a firmware action.
    fn firmware_action_failed(&mut self, context: &str, err: &VarError) {
        let status = match err {
            VarError::GetErr(status) | VarError::SetErr(status) => *status,
            _ => uefi::Status::INVALID_PARAMETER,
        };
        let _ = check_error(&mut self.io.console, status, &format!("while {context}"));
    }

    /// Hides an entry and rebuilds the menu without it.
    fn hide(&mut self, entry: &MenuEntry) {
        let Some((kind, tag)) = tag_for(entry) else {
            debug!("\"{}\" cannot be hidden", entry.title);
            return;
        };
        info!("Hiding {tag}");
        if self.hidden.hide(kind, tag) {
            if let Err(e) = self.hidden.save(&mut self.io.nvram) {
                warn!("Could not save the hidden tags: {e}");
            }
            self.last_choice = None;
            self.build_menu();
        }
    }

    /// Shows the hidden tags and restores the ones the user picks, until the user leaves.
    fn manage_hidden(&mut self) {
        let mut changed = false;
        loop {
            let tags: Vec<(TagKind, String)> = self.hidden.iter().map(|(kind, tag)| (kind, tag.to_owned())).collect();
            if tags.is_empty() {
                break;
            }

            let mut menu = Menu::new("Manage Hidden Tags");
            menu.entries = tags
                .iter()
                .enumerate()
                .map(|(i, (_, tag))| MenuEntry::tool(tag.clone(), None, "func_hidden", EntryKind::Choice(i)))
                .collect();
            menu.entries.push(return_entry());

            let outcome = run_menu(&mut self.io.console, &menu, 0);
            if outcome.exit == MenuExit::Escape {
                break;
            }
            let Some(EntryKind::Choice(i)) = menu.entries.get(outcome.selected).map(|x| &x.kind) else {
                break;
            };
            if outcome.exit == MenuExit::Enter
                && let Some((kind, tag)) = tags.get(*i)
                && self.hidden.restore(*kind, tag)
            {
                info!("Restored {tag}");
                changed = true;
            }
        }

        if changed {
            if let Err(e) = self.hidden.save(&mut self.io.nvram) {
                warn!("Could not save the hidden tags: {e}");
            }
            self.build_menu();
        }
    }

    /// Shows the alternatives of a loader, and launches the one the user picks.
    fn run_details(&mut self, loader: &LoaderEntry, title: &str) {
        if loader.submenu.is_empty() {
            return;
        }

        let mut menu = Menu::new(format!("Boot Options for {title}"));
        menu.entries = loader
            .submenu
            .iter()
            .enumerate()
            .map(|(i, sub)| MenuEntry {
                title: sub.title.clone(),
                row: Row::Main,
                shortcut: None,
                icon: String::new(),
                kind: EntryKind::Choice(i),
            })
            .collect();
        menu.entries.push(return_entry());

        let outcome = run_menu(&mut self.io.console, &menu, 0);
        if outcome.exit != MenuExit::Enter {
            return;
        }
        if let Some(EntryKind::Choice(i)) = menu.entries.get(outcome.selected).map(|x| &x.kind)
            && let Some(sub) = loader.submenu.get(*i)
        {
            self.launch(&loader.with_sub_entry(sub), &sub.title, true);
        }
    }

    /// Rotates the SIP policy and shows the new one.
    fn toggle_csr(&mut self) {
        match rotate_csr(&mut self.io.nvram, &self.config.csr_values) {
            Ok(Some(value)) => {
                self.io.console.display_message(&describe_csr(value), Severity::Info);
                self.io.console.pause_seconds(MESSAGE_SECONDS);
            }
            Ok(None) => (),
            Err(e) => {
                warn!("Could not rotate the CSR policy: {e}");
                self.io
                    .console
                    .display_message("Error setting System Integrity Protection status", Severity::Error);
                self.io.console.pause_seconds(MESSAGE_SECONDS);
            }
        }
    }

    /// Shows the about page.
    fn about(&mut self) {
        let secure_boot = if self.io.images.secure_boot_active() {
            "active"
        } else {
            "inactive"
        };
        let lines = [
            format!("{SELF_TITLE} compatible boot manager, refind-rs {}", env!("CARGO_PKG_VERSION")),
            format!("Platform: {} ({:?})", self.arch.suffix(), self.arch),
            format!("Secure Boot: {secure_boot}"),
            format!("Volumes: {}", self.catalog.volumes().len()),
            format!("Boot entries: {}", self.menu.entries.iter().filter(|x| x.row == Row::Main).count()),
        ];

        self.io.console.draw_header(&format!("About {SELF_TITLE}"));
        for line in lines {
            self.io.console.display_message(&line, Severity::Info);
        }
        self.io.console.pause_for_key();
    }
}

/// The entry that leaves a submenu.
fn return_entry() -> MenuEntry {
    MenuEntry::tool("Return to Main Menu", None, "func_exit", EntryKind::Return)
}
