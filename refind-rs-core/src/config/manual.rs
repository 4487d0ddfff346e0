//! `menuentry` stanzas: loaders written out by hand in the configuration file.
//!
//! ```text
//! menuentry "Arch Linux" {
//!     volume   "Arch"
//!     loader   /boot/vmlinuz-linux
//!     initrd   /boot/initramfs-linux.img
//!     options  "root=PARTUUID=... rw"
//!     ostype   Linux
//!     graphics on
//! }
//! ```

use alloc::{format, string::String, vec::Vec};

use crate::{menu::OsType, text::clean_path};

/// One `menuentry` stanza.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManualStanza {
    /// The title given after `menuentry`.
    pub title: String,

    /// The volume the loader lives on. The boot manager's own volume when missing.
    pub volume: Option<String>,

    /// The loader path, rooted with a backslash.
    pub loader: Option<String>,

    /// The load options, including any `initrd=` given with `initrd`.
    pub options: Option<String>,

    /// The OS type given with `ostype`.
    pub os_type: OsType,

    /// Whether the loader is started in graphics mode, when given with `graphics`.
    pub use_graphics: Option<bool>,

    /// Whether the stanza is `disabled`.
    pub disabled: bool,
}

impl ManualStanza {
    /// Starts a new stanza with a title.
    #[must_use = "Has no effect if the result is unused"]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Applies one tokenized line from inside the braces of the stanza.
    pub(crate) fn apply(&mut self, key: &str, values: &[String]) {
        let joined = values.join(" ");
        match key {
            "volume" => self.volume = Some(joined),
            "loader" => self.loader = Some(format!("\\{}", clean_path(&joined))),
            "initrd" => {
                let initrd = format!("initrd=\\{}", clean_path(&joined));
                self.options = Some(match self.options.take() {
                    Some(options) => format!("{initrd} {options}"),
                    None => initrd,
                });
            }
            "options" => {
                self.options = Some(match self.options.take() {
                    Some(initrd) if initrd.starts_with("initrd=") => format!("{initrd} {joined}"),
                    _ => joined,
                });
            }
            "ostype" => self.os_type = OsType::from_name(&joined),
            "graphics" => self.use_graphics = Some(super::parse_bool(values)),
            "disabled" => self.disabled = true,
            _ => (),
        }
    }

    /// Checks if the stanza can become a menu entry.
    #[must_use = "Has no effect if the result is unused"]
    pub fn is_usable(&self) -> bool {
        !self.disabled && self.loader.is_some()
    }
}

/// Collects the stanzas of a configuration file, in file order.
#[derive(Default)]
pub(crate) struct StanzaParser {
    /// The stanza currently being read, if inside braces.
    current: Option<ManualStanza>,

    /// Every finished stanza.
    pub(crate) stanzas: Vec<ManualStanza>,
}

impl StanzaParser {
    /// Checks if a stanza is currently open.
    pub(crate) const fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Opens a stanza. The title is the joined values, without any `{`.
    pub(crate) fn open(&mut self, values: &[String]) {
        let title = values
            .iter()
            .filter(|x| x.as_str() != "{")
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        self.current = Some(ManualStanza::new(title));
    }

    /// Feeds a line from inside an open stanza. A `}` closes it.
    pub(crate) fn feed(&mut self, key: &str, values: &[String]) {
        if key == "}" {
            if let Some(stanza) = self.current.take() {
                self.stanzas.push(stanza);
            }
            return;
        }
        if let Some(stanza) = &mut self.current {
            stanza.apply(key, values);
        }
    }

    /// Finishes parsing. A stanza that was never closed is kept.
    pub(crate) fn finish(mut self) -> Vec<ManualStanza> {
        if let Some(stanza) = self.current.take() {
            self.stanzas.push(stanza);
        }
        self.stanzas
    }
}
