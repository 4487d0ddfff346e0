//! Loader entry builder, and the defaults guessed from a loader's path.

use alloc::{string::String, vec::Vec};

use crate::{
    config::policy::GraphicsFor,
    loader::linux::is_kernel_name,
    menu::{LoaderEntry, Origin, OsType, SubEntry},
    text::{basename, contains_ignore_case, dirname, eq_ignore_case},
    volume::VolumeRef,
};

/// A builder to configure a [`LoaderEntry`]
///
/// # Example
///
/// ```
/// use refind_rs_core::{menu::{LoaderEntry, OsType}, volume::VolumeRef};
///
/// let volume = VolumeRef { generation: 1, index: 0 };
/// let loader = LoaderEntry::builder(volume, "ESP", "\\EFI\\arch\\vmlinuz-linux.efi")
///     .name("Arch Linux")
///     .options("root=LABEL=arch rw")
///     .os_type(OsType::Linux)
///     .build();
///
/// assert_eq!(loader.display_title(), "Boot Arch Linux from ESP");
/// ```
#[must_use = "Has no effect if the result is unused"]
pub struct LoaderEntryBuilder {
    /// The inner [`LoaderEntry`] that the builder operates on.
    loader: LoaderEntry,
}

impl LoaderEntryBuilder {
    /// Constructs a new [`LoaderEntry`] for a loader path on a volume.
    pub fn new(volume: VolumeRef, volume_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            loader: LoaderEntry {
                volume,
                volume_name: volume_name.into(),
                name: String::new(),
                path: path.into(),
                options: None,
                os_type: OsType::Other,
                use_graphics: false,
                origin: Origin::Auto,
                submenu: Vec::new(),
            },
        }
    }

    /// Sets the short title of a [`LoaderEntry`].
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.loader.name = name.into();
        self
    }

    /// Sets the load options of a [`LoaderEntry`].
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.loader.options = Some(options.into());
        self
    }

    /// Sets the load options of a [`LoaderEntry`] if there are any.
    pub fn maybe_options(mut self, options: Option<String>) -> Self {
        self.loader.options = options;
        self
    }

    /// Sets the OS type of a [`LoaderEntry`].
    pub const fn os_type(mut self, os_type: OsType) -> Self {
        self.loader.os_type = os_type;
        self
    }

    /// Sets whether a [`LoaderEntry`] starts in graphics mode.
    pub const fn use_graphics(mut self, use_graphics: bool) -> Self {
        self.loader.use_graphics = use_graphics;
        self
    }

    /// Sets where a [`LoaderEntry`] came from.
    pub const fn origin(mut self, origin: Origin) -> Self {
        self.loader.origin = origin;
        self
    }

    /// Adds an alternative to the details submenu of a [`LoaderEntry`].
    pub fn sub_entry(mut self, sub: SubEntry) -> Self {
        self.loader.submenu.push(sub);
        self
    }

    /// Builds a [`LoaderEntry`]
    #[must_use = "Has no effect if the result is unused"]
    pub fn build(self) -> LoaderEntry {
        self.loader
    }
}

/// The OS type, shortcut key and graphics mode guessed for a loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoaderDefaults {
    /// The guessed OS type.
    pub os_type: OsType,

    /// The shortcut key, always uppercase.
    pub shortcut: Option<char>,

    /// Whether the loader should start in graphics mode.
    pub use_graphics: bool,
}

/// Guesses the OS type and shortcut of a loader from its path.
#[must_use = "Has no effect if the result is unused"]
pub fn loader_defaults(path: &str, graphics_for: GraphicsFor) -> LoaderDefaults {
    let name = basename(path);
    let (os_type, shortcut) = if is_kernel_name(name) {
        // kernels are named after their distribution directory, as in `\EFI\arch\vmlinuz`
        let dir = dirname(path);
        let letter = basename(&dir).chars().next().filter(char::is_ascii_alphabetic);
        (OsType::Linux, Some(letter.unwrap_or('L')))
    } else if contains_ignore_case(path, "refit") || contains_ignore_case(path, "refind") {
        (OsType::Refit, Some('R'))
    } else if contains_ignore_case(path, "System\\Library\\CoreServices") {
        (OsType::Mac, Some('M'))
    } else if eq_ignore_case(name, "e.efi") || eq_ignore_case(name, "elilo.efi") || contains_ignore_case(name, "elilo") {
        (OsType::Elilo, Some('L'))
    } else if contains_ignore_case(name, "grub") {
        (OsType::Grub, Some('G'))
    } else if ["cdboot.efi", "bootmgr.efi", "bootmgfw.efi", "bkpbootmgfw.efi"]
        .iter()
        .any(|x| eq_ignore_case(name, x))
    {
        (OsType::Windows, Some('W'))
    } else if eq_ignore_case(name, "xom.efi") {
        (OsType::Xom, Some('W'))
    } else if contains_ignore_case(name, "ipxe") {
        (OsType::Net, Some('N'))
    } else {
        (OsType::Other, None)
    };

    LoaderDefaults {
        os_type,
        shortcut: shortcut.map(|x| x.to_ascii_uppercase()),
        use_graphics: graphics_for.intersects(os_type.graphics_flag()),
    }
}
