//! Provides [`BootConfig`], the configuration file for the boot manager.
//!
//! Each line is a key followed by its values. Values are separated by whitespace, commas or `=`, and may be
//! quoted to keep spaces. Keys are case-insensitive, and `#` starts a comment.
//!
//! Example configuration:
//!
//! ```text
//! # Seconds before the default entry is booted. 0 waits forever, -1 boots immediately.
//! timeout 10
//!
//! # Boot whatever was booted last, or else anything with "Linux" in its title
//! default_selection +,Linux
//!
//! # Scan internal disks before the manual stanzas
//! scanfor internal,manual
//!
//! # Append to the default list instead of replacing it
//! dont_scan_files + ,grubx64.efi
//!
//! showtools shell, about, reboot
//!
//! menuentry "Arch Linux" {
//!     loader  /boot/vmlinuz-linux
//!     initrd  /boot/initramfs-linux.img
//!     options "root=LABEL=arch rw"
//! }
//! ```
//!
//! Parsing never fails. Unknown keys and malformed values are ignored, and missing keys keep their defaults.

use alloc::{borrow::ToOwned, string::String, vec::Vec};

use log::{LevelFilter, info, warn};

use crate::{
    config::{
        manual::{ManualStanza, StanzaParser},
        policy::{GraphicsFor, ScanPolicy, ScanSource, ToolTag},
    },
    system::variable::{NvramStore, REFIND_VENDOR, get_variable_str},
    text::{basename, clean_path, join_path},
    volume::{Storage, Volume},
};

pub mod manual;
pub mod policy;

/// The configuration file names tried in the boot manager's directory, in order.
pub const CONFIG_NAMES: [&str; 2] = ["config.conf", "refind.conf"];

/// The largest configuration file that is read.
const MAX_CONFIG_SIZE: usize = 256 * 1024;

/// The placeholder in `default_selection` that stands for the previously booted entry.
pub const PREVIOUS_BOOT: &str = "+";

/// The configuration file for the boot manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootConfig {
    /// What is scanned, and what is excluded.
    pub policy: ScanPolicy,

    /// The seconds before the default entry is picked. 0 disables the countdown, and a negative value boots the
    /// default immediately unless a key is already pressed.
    pub timeout: i32,

    /// Whether the computer is shut down instead of booting the default entry when the countdown runs out.
    pub shutdown_after_timeout: bool,

    /// Titles (or parts of titles) of the default entry, tried in order.
    pub default_selection: Vec<String>,

    /// Whether the systemd loader interface variables are written.
    pub write_systemd_vars: bool,

    /// Whether the `PreviousBoot` variable is neither read nor written.
    pub ignore_previous_boot: bool,

    /// The values the SIP/CSR tool rotates through.
    pub csr_values: Vec<u32>,

    /// Arguments written to Apple's `boot-args` variable before Mac OS is booted.
    pub set_boot_args: Option<String>,

    /// How much is logged.
    pub log_level: LevelFilter,

    /// The `menuentry` stanzas, in file order.
    pub manual: Vec<ManualStanza>,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            policy: ScanPolicy::default(),
            timeout: 0,
            shutdown_after_timeout: false,
            default_selection: Vec::new(),
            write_systemd_vars: false,
            ignore_previous_boot: false,
            csr_values: Vec::new(),
            set_boot_args: None,
            log_level: LevelFilter::Warn,
            manual: Vec::new(),
        }
    }
}

impl BootConfig {
    /// Loads the configuration from the boot manager's own directory.
    ///
    /// `config_path` replaces the usual file names. A relative path is resolved against `self_dir`. If no file
    /// can be read, the defaults are returned.
    pub fn load(
        storage: &mut impl Storage,
        self_volume: Option<&Volume>,
        self_dir: &str,
        config_path: Option<&str>,
    ) -> Self {
        let Some(volume) = self_volume.filter(|x| x.has_root) else {
            warn!("Boot manager volume is unreadable, using the default configuration");
            return Self::default();
        };

        let candidates: Vec<String> = match config_path {
            Some(path) if path.starts_with(['\\', '/']) => alloc::vec![clean_path(path)],
            Some(path) => alloc::vec![join_path(self_dir, path)],
            None => CONFIG_NAMES.iter().map(|x| join_path(self_dir, x)).collect(),
        };

        for path in candidates {
            let Some(content) = read_config(storage, volume, &path) else {
                continue;
            };
            info!("Reading configuration from {path}");

            let mut config = Self::default();
            let includes = config.apply(&content, true);
            for include in includes {
                let include = join_path(self_dir, &include);
                if basename(&include).eq_ignore_ascii_case(basename(&path)) {
                    continue;
                }
                if let Some(content) = read_config(storage, volume, &include) {
                    // included files may not include further files
                    let _ = config.apply(&content, false);
                }
            }
            return config;
        }

        warn!("No configuration file found, using the defaults");
        Self::default()
    }

    /// Parses the contents of a configuration file.
    #[must_use = "Has no effect if the result is unused"]
    pub fn parse(content: &str) -> Self {
        let mut config = Self::default();
        let _ = config.apply(content, false);
        config
    }

    /// Applies the lines of a configuration file on top of the current values, returning any `include` paths.
    fn apply(&mut self, content: &str, allow_include: bool) -> Vec<String> {
        let mut stanzas = StanzaParser::default();
        let mut includes = Vec::new();

        for line in content.lines() {
            let mut tokens = tokenize(line);
            if tokens.is_empty() {
                continue;
            }
            let key = tokens.remove(0).to_ascii_lowercase();
            let values = tokens;

            if stanzas.is_open() {
                stanzas.feed(&key, &values);
                continue;
            }

            match &*key {
                "menuentry" => stanzas.open(&values),
                "include" if allow_include => includes.extend(values.first().cloned()),
                _ => self.apply_key(&key, &values),
            }
        }

        self.manual.extend(stanzas.finish());
        includes
    }

    /// Applies one top-level key.
    fn apply_key(&mut self, key: &str, values: &[String]) {
        let policy = &mut self.policy;
        match key {
            "timeout" => {
                if let Some(Ok(value)) = values.first().map(|x| x.parse()) {
                    self.timeout = value;
                }
            }
            "shutdown_after_timeout" => self.shutdown_after_timeout = parse_bool(values),
            "default_selection" => self.default_selection = values.to_vec(),
            "scanfor" => policy.scan_order = ScanSource::parse_order(&values.join(",")),
            "dont_scan_volumes" => merge_list(&mut policy.dont_scan_volumes, values),
            "dont_scan_dirs" => merge_list(&mut policy.dont_scan_dirs, values),
            "dont_scan_files" => merge_list(&mut policy.dont_scan_files, values),
            "dont_scan_tools" => merge_list(&mut policy.dont_scan_tools, values),
            "dont_scan_firmware" => merge_list(&mut policy.dont_scan_firmware, values),
            "also_scan_dirs" => merge_list(&mut policy.also_scan_dirs, values),
            "windows_recovery_files" => merge_list(&mut policy.windows_recovery_files, values),
            "extra_kernel_version_strings" => {
                merge_list(&mut policy.extra_kernel_version_strings, values);
            }
            "showtools" => policy.tools = ToolTag::parse_list(&values.join(",")),
            "fold_linux_kernels" => policy.fold_linux_kernels = parse_bool(values),
            "deep_legacy_scan" => policy.deep_legacy_scan = parse_bool(values),
            "use_graphics_for" => match values.split_first() {
                Some((first, rest)) if first == "+" => {
                    policy.graphics_for |= GraphicsFor::parse(&rest.join(","));
                }
                _ => policy.graphics_for = GraphicsFor::parse(&values.join(",")),
            },
            "write_systemd_vars" => self.write_systemd_vars = parse_bool(values),
            "ignore_previous_boot" => self.ignore_previous_boot = parse_bool(values),
            "csr_values" => {
                self.csr_values = values
                    .iter()
                    .filter_map(|x| {
                        let digits = x.trim_start_matches("0x").trim_start_matches("0X");
                        u32::from_str_radix(digits, 16).ok()
                    })
                    .collect();
            }
            "set_boot_args" => {
                let args = values.join(" ");
                self.set_boot_args = (!args.is_empty()).then_some(args);
            }
            "log_level" => {
                if let Some(Ok(level)) = values.first().map(|x| x.parse::<u8>()) {
                    self.log_level = match level {
                        0 => LevelFilter::Warn,
                        1 => LevelFilter::Info,
                        2 => LevelFilter::Debug,
                        _ => LevelFilter::Trace,
                    };
                }
            }
            _ => (),
        }
    }

    /// Replaces the `+` placeholder of `default_selection` with the title stored in `PreviousBoot`.
    ///
    /// The placeholder is dropped when there is no previous boot, or when previous boots are ignored.
    pub fn resolve_previous_boot(&mut self, nvram: &mut impl NvramStore) {
        let Some(pos) = self.default_selection.iter().position(|x| x == PREVIOUS_BOOT) else {
            return;
        };

        let previous = if self.ignore_previous_boot {
            None
        } else {
            match get_variable_str(nvram, &REFIND_VENDOR, "PreviousBoot") {
                Ok(previous) => previous.filter(|x| !x.is_empty()),
                Err(e) => {
                    warn!("Could not read PreviousBoot: {e}");
                    None
                }
            }
        };

        match previous {
            Some(previous) => self.default_selection[pos] = previous,
            None => {
                self.default_selection.remove(pos);
            }
        }
    }
}

/// Reads a configuration file as text, if it exists and is small enough.
fn read_config(storage: &mut impl Storage, volume: &Volume, path: &str) -> Option<String> {
    if !storage.file_exists(volume, path) {
        return None;
    }
    match storage.read_file(volume, path) {
        Ok(bytes) if bytes.len() <= MAX_CONFIG_SIZE => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Ok(_) => {
            warn!("Configuration file {path} is too large");
            None
        }
        Err(e) => {
            warn!("Could not read {path}: {e}");
            None
        }
    }
}

/// Splits a configuration line into tokens.
///
/// Tokens are separated by whitespace, commas and `=` outside of double quotes. Everything from an unquoted `#`
/// onwards is a comment.
#[must_use = "Has no effect if the result is unused"]
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            '#' if !in_quotes => break,
            c if !in_quotes && (c.is_whitespace() || c == ',' || c == '=') => {
                if !current.is_empty() || quoted {
                    tokens.push(core::mem::take(&mut current));
                }
                quoted = false;
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() || quoted {
        tokens.push(current);
    }

    tokens
}

/// Parses a boolean value. A key given without a value counts as true.
#[must_use = "Has no effect if the result is unused"]
pub fn parse_bool(values: &[String]) -> bool {
    values.first().is_none_or(|x| {
        matches!(
            &*x.to_ascii_lowercase(),
            "true" | "on" | "1" | "yes"
        )
    })
}

/// Replaces a list with new values, or appends to it when the first value is `+`.
fn merge_list(list: &mut Vec<String>, values: &[String]) {
    match values.split_first() {
        Some((first, rest)) if first == "+" => {
            for value in rest.iter().filter(|x| !x.is_empty()) {
                if !list.iter().any(|x| x.eq_ignore_ascii_case(value)) {
                    list.push(value.to_owned());
                }
            }
        }
        _ => *list = values.iter().filter(|x| !x.is_empty()).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use proptest::prelude::*;

    use super::*;
    use crate::{
        fakes::{FakeNvram, FakeStorage},
        menu::OsType,
        system::variable::set_variable_str,
    };

    const SAMPLE: &str = r#"
# a comment
timeout 10
Default_Selection "+", Linux
scanfor external,internal
dont_scan_dirs ESP:\EFI\boot,EFI\memtest   # trailing comment
dont_scan_files + ,grubx64.efi
showtools shell about
use_graphics_for + linux
log_level 2
csr_values 10,0x77,zz
set_boot_args "-v keepsyms=1"

menuentry "Arch Linux" {
    volume  "ARCH ROOT"
    loader  /boot/vmlinuz-linux
    initrd  /boot/initramfs-linux.img
    options "root=LABEL=arch rw"
    ostype  Linux
    graphics off
}

menuentry Disabled {
    loader \EFI\old\boot.efi
    disabled
}
"#;

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("  timeout=5 "), vec!["timeout", "5"]);
        assert_eq!(
            tokenize(r#"options "root=/dev/sda1 ro" quiet # comment"#),
            vec!["options", "root=/dev/sda1 ro", "quiet"]
        );
        assert_eq!(tokenize(r#"set_boot_args """#), vec!["set_boot_args", ""]);
        assert!(tokenize("# only a comment").is_empty());
    }

    #[test]
    fn test_parse() {
        let config = BootConfig::parse(SAMPLE);
        assert_eq!(config.timeout, 10);
        assert_eq!(config.default_selection, vec!["+", "Linux"]);
        assert_eq!(
            config.policy.scan_order.as_slice(),
            &[ScanSource::External, ScanSource::Internal]
        );
        assert_eq!(config.policy.dont_scan_dirs, vec!["ESP:\\EFI\\boot", "EFI\\memtest"]);
        assert!(config.policy.dont_scan_files.contains(&"shim.efi".to_owned()));
        assert_eq!(config.policy.dont_scan_files.last().map(String::as_str), Some("grubx64.efi"));
        assert_eq!(config.policy.tools, vec![ToolTag::Shell, ToolTag::About]);
        assert_eq!(config.policy.graphics_for, GraphicsFor::OSX | GraphicsFor::LINUX);
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.csr_values, vec![0x10, 0x77]);
        assert_eq!(config.set_boot_args.as_deref(), Some("-v keepsyms=1"));
    }

    #[test]
    fn test_menuentry() {
        let config = BootConfig::parse(SAMPLE);
        assert_eq!(config.manual.len(), 2);

        let arch = &config.manual[0];
        assert_eq!(arch.title, "Arch Linux");
        assert_eq!(arch.volume.as_deref(), Some("ARCH ROOT"));
        assert_eq!(arch.loader.as_deref(), Some("\\boot\\vmlinuz-linux"));
        assert_eq!(
            arch.options.as_deref(),
            Some("initrd=\\boot\\initramfs-linux.img root=LABEL=arch rw")
        );
        assert_eq!(arch.os_type, OsType::Linux);
        assert_eq!(arch.use_graphics, Some(false));
        assert!(arch.is_usable());

        assert!(!config.manual[1].is_usable());
    }

    #[test]
    fn test_defaults() {
        let config = BootConfig::parse("bogus line\ntimeout abc\n");
        assert_eq!(config, BootConfig::default());
        assert!(parse_bool(&[]));
        assert!(!parse_bool(&["false".to_owned()]));
    }

    #[test]
    fn test_resolve_previous_boot() -> Result<(), crate::system::variable::VarError> {
        let mut nvram = FakeNvram::default();
        let mut config = BootConfig::parse("default_selection +,Linux");
        config.resolve_previous_boot(&mut nvram);
        assert_eq!(config.default_selection, vec!["Linux"]);

        set_variable_str(&mut nvram, &REFIND_VENDOR, "PreviousBoot", "Boot Windows from ESP", true)?;
        let mut config = BootConfig::parse("default_selection +,Linux");
        config.resolve_previous_boot(&mut nvram);
        assert_eq!(config.default_selection, vec!["Boot Windows from ESP", "Linux"]);

        let mut config = BootConfig::parse("default_selection +\nignore_previous_boot");
        config.resolve_previous_boot(&mut nvram);
        assert!(config.default_selection.is_empty());
        Ok(())
    }

    #[test]
    fn test_load() {
        let mut storage = FakeStorage::with_volumes(&["ESP"]);
        storage.volumes[0].is_self = true;
        storage.add_file(0, "EFI\\refind\\refind.conf", b"timeout 3\ninclude extra.conf\n".to_vec());
        storage.add_file(0, "EFI\\refind\\extra.conf", b"timeout 7\nshowtools reboot\n".to_vec());
        storage.add_file(0, "EFI\\other.conf", b"timeout 9\n".to_vec());
        let volume = storage.volumes[0].clone();

        let config = BootConfig::load(&mut storage, Some(&volume), "EFI\\refind", None);
        assert_eq!(config.timeout, 7);
        assert_eq!(config.policy.tools, vec![ToolTag::Reboot]);

        let config = BootConfig::load(&mut storage, Some(&volume), "EFI\\refind", Some("\\EFI\\other.conf"));
        assert_eq!(config.timeout, 9);

        let config = BootConfig::load(&mut storage, Some(&volume), "EFI\\refind", Some("missing.conf"));
        assert_eq!(config, BootConfig::default());
    }

    proptest! {
        #[test]
        fn doesnt_panic(x in any::<String>()) {
            let _ = BootConfig::parse(&x);
        }
    }
}
