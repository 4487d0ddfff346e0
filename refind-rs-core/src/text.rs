//! Text helpers for comma-delimited lists, case-insensitive matching and path names.
//!
//! Configuration values such as `dont_scan_dirs` are comma-delimited lists. These are split once into a
//! [`Vec<String>`] when the configuration is parsed, so everything here works on slices of owned strings
//! rather than re-scanning the delimited string on every lookup.
//!
//! Paths are always volume-relative and use backslashes. [`clean_path`] is the canonical form used for
//! comparisons: forward slashes become backslashes, repeated separators collapse, and leading and
//! trailing separators are removed.

use alloc::{
    borrow::ToOwned,
    string::{String, ToString},
    vec::Vec,
};
use core::ops::Range;

/// Splits a comma-delimited list into trimmed, non-empty elements.
pub fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|x| !x.is_empty())
}

/// Splits a comma-delimited list into owned elements.
#[must_use = "Has no effect if the result is unused"]
pub fn split_list_owned(list: &str) -> Vec<String> {
    split_list(list).map(ToOwned::to_owned).collect()
}

/// Compares two strings without regard to case.
#[must_use = "Has no effect if the result is unused"]
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Lowercases a string for case-insensitive searching.
fn fold(str: &str) -> String {
    str.chars().flat_map(char::to_lowercase).collect()
}

/// Checks if `needle` appears anywhere in `haystack`, without regard to case.
#[must_use = "Has no effect if the result is unused"]
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    fold(haystack).contains(&fold(needle))
}

/// Checks if `item` exactly matches (case-insensitively) any element of `list`.
#[must_use = "Has no effect if the result is unused"]
pub fn is_in(item: &str, list: &[String]) -> bool {
    list.iter().any(|x| eq_ignore_case(x, item))
}

/// Checks if any element of `list` is a case-insensitive substring of `big`.
///
/// Empty elements never match, and neither do elements longer than `big`.
#[must_use = "Has no effect if the result is unused"]
pub fn is_in_substring(big: &str, list: &[String]) -> bool {
    let big_folded = fold(big);
    list.iter().any(|x| {
        !x.is_empty() && x.chars().count() <= big.chars().count() && big_folded.contains(&fold(x))
    })
}

/// Returns the number of leading characters `a` and `b` share before they diverge.
#[must_use = "Has no effect if the result is unused"]
pub fn chars_in_common(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(a, b)| a == b).count()
}

/// Finds the version span of a file name.
///
/// This is the smallest byte range covering the first and the last ASCII digit of `name`, widened to also cover
/// the first element of `extra` that appears in `name`. Returns [`None`] if neither digits nor an extra version
/// string were found.
#[must_use = "Has no effect if the result is unused"]
pub fn find_numbers_span(name: &str, extra: &[String]) -> Option<Range<usize>> {
    let mut span: Option<Range<usize>> = extra
        .iter()
        .filter(|x| !x.is_empty())
        .find_map(|x| name.find(x.as_str()).map(|start| start..start + x.len()));

    for (i, c) in name.char_indices() {
        if c.is_ascii_digit() {
            span = Some(match span {
                Some(range) => range.start.min(i)..range.end.max(i + 1),
                None => i..i + 1,
            });
        }
    }

    span
}

/// Finds the version string of a file name. See [`find_numbers_span`].
#[must_use = "Has no effect if the result is unused"]
pub fn find_numbers<'a>(name: &'a str, extra: &[String]) -> Option<&'a str> {
    find_numbers_span(name, extra).map(|x| &name[x])
}

/// Normalizes a volume-relative path.
///
/// Forward slashes become backslashes, runs of separators collapse into one, and leading or trailing separators
/// are removed. The root directory therefore normalizes to an empty string.
#[must_use = "Has no effect if the result is unused"]
pub fn clean_path(path: &str) -> String {
    path.split(['\\', '/'])
        .filter(|x| !x.is_empty())
        .collect::<Vec<_>>()
        .join("\\")
}

/// Joins a directory and a file name into a rooted volume path (`\dir\file`).
#[must_use = "Has no effect if the result is unused"]
pub fn join_path(dir: &str, file: &str) -> String {
    let dir = clean_path(dir);
    let file = clean_path(file);
    match (dir.is_empty(), file.is_empty()) {
        (true, _) => alloc::format!("\\{file}"),
        (false, true) => alloc::format!("\\{dir}"),
        (false, false) => alloc::format!("\\{dir}\\{file}"),
    }
}

/// Returns the last component of a path.
#[must_use = "Has no effect if the result is unused"]
pub fn basename(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

/// Returns the directory of a path in [`clean_path`] form.
#[must_use = "Has no effect if the result is unused"]
pub fn dirname(path: &str) -> String {
    let path = clean_path(path);
    path.rsplit_once('\\')
        .map_or_else(String::new, |(dir, _)| dir.to_owned())
}

/// A path split into its volume, directory and file name parts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathParts {
    /// The volume, if the path was written as `volume:path`.
    pub volume: Option<String>,

    /// The directory, in [`clean_path`] form.
    pub dir: Option<String>,

    /// The file name.
    pub file: Option<String>,
}

/// Splits a `volume:\dir\file` style string into its parts.
///
/// Each part is [`None`] when it is missing or empty. For example `BIGVOL:\EFI\ubuntu\grubx64.efi` splits
/// into `BIGVOL`, `EFI\ubuntu` and `grubx64.efi`, while `grubx64.efi` only has a file name.
#[must_use = "Has no effect if the result is unused"]
pub fn split_path_name(input: &str) -> PathParts {
    let (volume, rest) = match input.split_once(':') {
        Some((volume, rest)) => (Some(volume.trim().to_string()), rest),
        None => (None, input),
    };
    let rest = clean_path(rest);
    let (dir, file) = match rest.rsplit_once('\\') {
        Some((dir, file)) => (dir.to_owned(), file.to_owned()),
        None => (String::new(), rest),
    };

    let non_empty = |x: String| (!x.is_empty()).then_some(x);
    PathParts {
        volume: volume.and_then(non_empty),
        dir: non_empty(dir),
        file: non_empty(file),
    }
}

/// Removes control characters and surrounding whitespace from a name shown to the user.
#[must_use = "Has no effect if the result is unused"]
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|x| !x.is_control())
        .collect::<String>()
        .trim()
        .to_owned()
}
