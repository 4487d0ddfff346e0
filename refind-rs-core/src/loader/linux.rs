//! Linux kernels booted directly through their EFI stub.
//!
//! A kernel is any loader whose name contains `vmlinuz`, `bzImage` or `kernel`. Its options come from a
//! `refind_linux.conf` next to it, where every line is a title and an option string:
//!
//! ```text
//! "Boot with standard options"  "ro root=UUID=0123-4567 quiet"
//! "Boot to single-user mode"    "ro root=UUID=0123-4567 single"
//! ```
//!
//! Without that file, options are guessed from the root entry of `/etc/fstab` on the kernel's volume. The matching
//! initrd is found by version number and added to the options unless they already name one.

use alloc::{borrow::ToOwned, format, string::String, vec::Vec};

use log::{debug, warn};

use crate::{
    config::tokenize,
    text::{
        basename, chars_in_common, contains_ignore_case, dirname, eq_ignore_case, find_numbers,
        find_numbers_span, join_path,
    },
    volume::{Storage, Volume},
};

/// The options files looked for next to a kernel, in order.
pub const OPTIONS_FILES: [&str; 2] = ["refind_linux.conf", "refind-linux.conf"];

/// The variable in an option string that is replaced by the kernel version.
pub const KERNEL_VERSION_VAR: &str = "%v";

/// The title of an option line that has none.
const DEFAULT_OPTION_TITLE: &str = "Boot Linux";

/// One line of an options file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionLine {
    /// The title shown in the submenu.
    pub title: String,

    /// The option string.
    pub options: String,
}

/// Checks if a file name looks like a Linux kernel.
#[must_use = "Has no effect if the result is unused"]
pub fn is_kernel_name(name: &str) -> bool {
    ["bzImage", "vmlinuz", "kernel"]
        .iter()
        .any(|x| contains_ignore_case(name, x))
}

/// Returns the key that kernels are folded by: the file name without its version string.
///
/// `vmlinuz-5.15.0.efi` and `vmlinuz-6.1.efi` both give `vmlinuz-.efi`.
#[must_use = "Has no effect if the result is unused"]
pub fn fold_key(name: &str, extra: &[String]) -> String {
    let name = basename(name);
    let key = match find_numbers_span(name, extra) {
        Some(span) => format!("{}{}", &name[..span.start], &name[span.end..]),
        None => name.to_owned(),
    };
    key.to_ascii_lowercase()
}

/// Finds the initrd matching a kernel.
///
/// The initrd must be in the same directory, start with `init` or `booster`, and carry exactly the same version
/// string as the kernel (or both have none). When several match, the one sharing the most characters with the
/// kernel from the version onwards wins, and then the shortest name.
pub fn find_initrd(
    storage: &mut impl Storage,
    volume: &Volume,
    kernel_path: &str,
    extra: &[String],
) -> Option<String> {
    let dir = dirname(kernel_path);
    let kernel_name = basename(kernel_path);
    let kernel_version = find_numbers(kernel_name, extra);

    let entries = match storage.list_dir(volume, &dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Could not list {dir} for an initrd: {e}");
            return None;
        }
    };

    let kernel_tail = kernel_version
        .and_then(|version| kernel_name.find(version).map(|x| &kernel_name[x..]))
        .unwrap_or_default();

    let mut best: Option<(usize, String)> = None;
    for entry in entries.iter().filter(|x| !x.is_dir) {
        let lower = entry.name.to_ascii_lowercase();
        if !(lower.starts_with("init") || lower.starts_with("booster")) {
            continue;
        }

        let initrd_version = find_numbers(&entry.name, extra);
        let matches = match (kernel_version, initrd_version) {
            (Some(kernel), Some(initrd)) => eq_ignore_case(kernel, initrd),
            (None, None) => true,
            _ => false,
        };
        if !matches {
            continue;
        }

        let shared = kernel_version
            .and_then(|version| entry.name.find(version))
            .map_or(0, |x| chars_in_common(kernel_tail, &entry.name[x..]));
        let better = best.as_ref().is_none_or(|(best_shared, best_name)| {
            shared > *best_shared || (shared == *best_shared && entry.name.len() < best_name.len())
        });
        if better {
            best = Some((shared, entry.name.clone()));
        }
    }

    let initrd = best.map(|(_, name)| join_path(&dir, &name));
    debug!("Initrd for {kernel_path}: {initrd:?}");
    initrd
}

/// Adds an initrd to an option string.
///
/// A `%v` in the options is replaced with the version of the initrd instead. Options that already carry an
/// `initrd=` are left alone.
#[must_use = "Has no effect if the result is unused"]
pub fn add_initrd(options: Option<&str>, initrd: Option<&str>, extra: &[String]) -> Option<String> {
    let Some(initrd) = initrd else {
        return options.map(ToOwned::to_owned);
    };
    let options = options.unwrap_or_default();

    if options.contains(KERNEL_VERSION_VAR) {
        let version = find_numbers(basename(initrd), extra).unwrap_or_default();
        return Some(options.replace(KERNEL_VERSION_VAR, version));
    }
    if contains_ignore_case(options, "initrd=") {
        return Some(options.to_owned());
    }
    if options.is_empty() {
        Some(format!("initrd={initrd}"))
    } else {
        Some(format!("{options} initrd={initrd}"))
    }
}

/// Reads the options file next to a kernel, falling back to options guessed from `/etc/fstab`.
///
/// Returns [`None`] if neither gives any option lines.
pub fn read_options(
    storage: &mut impl Storage,
    volume: &Volume,
    kernel_path: &str,
) -> Option<Vec<OptionLine>> {
    let dir = dirname(kernel_path);
    for name in OPTIONS_FILES {
        let path = join_path(&dir, name);
        if !storage.file_exists(volume, &path) {
            continue;
        }
        match storage.read_file(volume, &path) {
            Ok(bytes) => return Some(parse_options(&String::from_utf8_lossy(&bytes))),
            Err(e) => warn!("While loading the Linux options file {path}: {e}"),
        }
    }

    options_from_fstab(storage, volume)
}

/// Parses the lines of an options file. Lines with fewer than two tokens are skipped.
#[must_use = "Has no effect if the result is unused"]
pub fn parse_options(content: &str) -> Vec<OptionLine> {
    content
        .lines()
        .map(quoted_tokens)
        .filter(|x| x.len() > 1)
        .map(|mut x| {
            let options = x.swap_remove(1);
            let title = core::mem::take(&mut x[0]);
            OptionLine {
                title: if title.is_empty() {
                    DEFAULT_OPTION_TITLE.to_owned()
                } else {
                    title
                },
                options,
            }
        })
        .collect()
}

/// Splits an options file line into tokens. A line without quotes is only split on whitespace, so an unquoted
/// `root=/dev/sda2` stays whole.
fn quoted_tokens(line: &str) -> Vec<String> {
    if !line.contains('"') {
        return line
            .split('#')
            .next()
            .unwrap_or_default()
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect();
    }
    tokenize(line)
}

/// Guesses options from the root filesystem entry of `/etc/fstab`.
fn options_from_fstab(storage: &mut impl Storage, volume: &Volume) -> Option<Vec<OptionLine>> {
    let path = "etc\\fstab";
    if !storage.file_exists(volume, path) {
        return None;
    }
    let fstab = match storage.read_file(volume, path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!("While reading /etc/fstab: {e}");
            return None;
        }
    };

    let mut lines = Vec::new();
    for line in fstab.lines() {
        let tokens: Vec<&str> = line.split('#').next().unwrap_or_default().split_whitespace().collect();
        if tokens.len() < 2 {
            continue;
        }
        // `UUID=abcd / ...` has the mount point second, `UUID = abcd / ...` style lines have it third
        let root = if tokens[1] == "/" {
            tokens[0].to_owned()
        } else if tokens.len() > 3 && tokens[1] == "=" && tokens[3] == "/" {
            format!("{}={}", tokens[0], tokens[2])
        } else {
            continue;
        };
        lines.push(OptionLine {
            title: "Boot with normal options".to_owned(),
            options: format!("ro root={root}"),
        });
        lines.push(OptionLine {
            title: "Boot into single-user mode".to_owned(),
            options: format!("ro root={root} single"),
        });
    }

    (!lines.is_empty()).then_some(lines)
}

/// Gets the options of the main entry of a kernel: the first option line with the initrd added.
pub fn main_options(
    storage: &mut impl Storage,
    volume: &Volume,
    kernel_path: &str,
    extra: &[String],
) -> Option<String> {
    let first = read_options(storage, volume, kernel_path).and_then(|x| x.into_iter().next());
    let initrd = find_initrd(storage, volume, kernel_path, extra);
    let version = find_numbers(basename(kernel_path), extra).unwrap_or_default();
    let options = first.map(|x| x.options.replace(KERNEL_VERSION_VAR, version));
    add_initrd(options.as_deref(), initrd.as_deref(), extra)
}
