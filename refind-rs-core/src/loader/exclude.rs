//! Exclusion rules for volumes, directories and files.
//!
//! An exclusion entry is written as `[volume:][dir\]file`. Each missing component matches anything, so `shim.efi`
//! excludes every `shim.efi` while `ESP:\EFI\ubuntu\shimx64.efi` only excludes one file on one volume.

use alloc::{string::ToString, vec::Vec};

use crate::{
    config::policy::ScanPolicy,
    text::{PathParts, basename, clean_path, dirname, eq_ignore_case, is_in, split_path_name},
    volume::Volume,
};

/// One `[volume:][dir\]file` exclusion entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExcludeRule {
    /// The components of the entry.
    parts: PathParts,
}

impl ExcludeRule {
    /// Parses an exclusion entry.
    #[must_use = "Has no effect if the result is unused"]
    pub fn parse(entry: &str) -> Self {
        Self {
            parts: split_path_name(entry),
        }
    }

    /// Checks if this rule excludes `file` in directory `dir` of `volume`.
    ///
    /// A rule without a file name never matches anything.
    #[must_use = "Has no effect if the result is unused"]
    pub fn matches(&self, volume: &Volume, dir: &str, file: &str) -> bool {
        let Some(rule_file) = &self.parts.file else {
            return false;
        };
        if !eq_ignore_case(rule_file, file) {
            return false;
        }
        if let Some(rule_dir) = &self.parts.dir
            && !eq_ignore_case(rule_dir, &clean_path(dir))
        {
            return false;
        }
        if let Some(rule_volume) = &self.parts.volume
            && !volume.matches_description(rule_volume)
        {
            return false;
        }
        true
    }
}

/// A list of [`ExcludeRule`]s, such as `dont_scan_files` or `dont_scan_tools`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExcludeList(Vec<ExcludeRule>);

impl ExcludeList {
    /// Parses every entry of a list.
    #[must_use = "Has no effect if the result is unused"]
    pub fn parse(entries: &[impl AsRef<str>]) -> Self {
        Self(entries.iter().map(|x| ExcludeRule::parse(x.as_ref())).collect())
    }

    /// Adds one more entry to the list.
    pub fn push(&mut self, entry: &str) {
        self.0.push(ExcludeRule::parse(entry));
    }

    /// Checks if a volume-relative file path is excluded.
    #[must_use = "Has no effect if the result is unused"]
    pub fn excludes(&self, volume: &Volume, path: &str) -> bool {
        self.excludes_file(volume, &dirname(path), basename(path))
    }

    /// Checks if `file` in directory `dir` is excluded.
    #[must_use = "Has no effect if the result is unused"]
    pub fn excludes_file(&self, volume: &Volume, dir: &str, file: &str) -> bool {
        self.0.iter().any(|x| x.matches(volume, dir, file))
    }

    /// Checks if the list has no entries.
    #[must_use = "Has no effect if the result is unused"]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Checks if a volume is excluded as a whole by `dont_scan_volumes`.
///
/// Any of the filesystem label, the partition name, the display name or the partition GUID may be listed.
#[must_use = "Has no effect if the result is unused"]
pub fn volume_excluded(volume: &Volume, policy: &ScanPolicy) -> bool {
    volume.names().any(|x| is_in(x, &policy.dont_scan_volumes))
        || volume
            .part_guid
            .is_some_and(|x| is_in(&x.to_string(), &policy.dont_scan_volumes))
}

/// Decides whether a directory of a volume should be scanned for loaders.
///
/// `path` may carry a `volume:` prefix, in which case it is only scanned on that volume. `self_dir` is the directory
/// the boot manager was loaded from, which is never scanned on the boot manager's own volume.
#[must_use = "Has no effect if the result is unused"]
pub fn should_scan(volume: &Volume, path: &str, policy: &ScanPolicy, self_dir: &str) -> bool {
    if volume_excluded(volume, policy) {
        return false;
    }

    let (path_volume, path) = match path.split_once(':') {
        Some((volume, path)) => (Some(volume.trim()), clean_path(path)),
        None => (None, clean_path(path)),
    };

    if volume.is_self && eq_ignore_case(&path, &clean_path(self_dir)) {
        return false;
    }

    if let Some(path_volume) = path_volume
        && !path_volume.is_empty()
        && !volume.matches_description(path_volume)
    {
        return false;
    }

    !policy.dont_scan_dirs.iter().any(|entry| match entry.split_once(':') {
        Some((rule_volume, rule_path)) => {
            volume.matches_description(rule_volume.trim()) && eq_ignore_case(&clean_path(rule_path), &path)
        }
        None => eq_ignore_case(&clean_path(entry), &path),
    })
}
