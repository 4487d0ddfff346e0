//! Entries the user has hidden from the menu.
//!
//! The tags are kept in the `HiddenTags` variable as a `postcard` encoded [`HiddenTags`]. Loaders and tools are
//! tagged as `volume:path`, while legacy and firmware options are tagged by their description.

use alloc::{string::String, vec::Vec};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    menu::{EntryKind, MenuEntry},
    system::variable::{NvramStore, REFIND_VENDOR, VarError, get_variable_encoded, set_variable_encoded},
    text::{eq_ignore_case, is_in},
};

/// The variable the tags are stored in.
const HIDDEN_TAGS_VAR: &str = "HiddenTags";

/// Every hidden entry, by category.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenTags {
    /// Hidden OS loaders.
    pub loaders: Vec<String>,

    /// Hidden tools.
    pub tools: Vec<String>,

    /// Hidden legacy boot options.
    pub legacy: Vec<String>,

    /// Hidden firmware boot options.
    pub firmware: Vec<String>,
}

/// Which list a tag lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagKind {
    /// An OS loader.
    Loader,
    /// A tool.
    Tool,
    /// A legacy boot option.
    Legacy,
    /// A firmware boot option.
    Firmware,
}

impl HiddenTags {
    /// Loads the hidden tags. A missing or unreadable variable gives no tags.
    pub fn load(nvram: &mut impl NvramStore) -> Self {
        match get_variable_encoded(nvram, &REFIND_VENDOR, HIDDEN_TAGS_VAR) {
            Ok(tags) => tags.unwrap_or_default(),
            Err(e) => {
                warn!("While reading hidden tags: {e}");
                Self::default()
            }
        }
    }

    /// Stores the hidden tags.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the variable could not be written.
    pub fn save(&self, nvram: &mut impl NvramStore) -> Result<(), VarError> {
        set_variable_encoded(nvram, &REFIND_VENDOR, HIDDEN_TAGS_VAR, self)
    }

    /// Returns the list of a kind of tag.
    fn list(&self, kind: TagKind) -> &Vec<String> {
        match kind {
            TagKind::Loader => &self.loaders,
            TagKind::Tool => &self.tools,
            TagKind::Legacy => &self.legacy,
            TagKind::Firmware => &self.firmware,
        }
    }

    /// Returns the list of a kind of tag, mutably.
    fn list_mut(&mut self, kind: TagKind) -> &mut Vec<String> {
        match kind {
            TagKind::Loader => &mut self.loaders,
            TagKind::Tool => &mut self.tools,
            TagKind::Legacy => &mut self.legacy,
            TagKind::Firmware => &mut self.firmware,
        }
    }

    /// Checks if a tag is hidden.
    #[must_use = "Has no effect if the result is unused"]
    pub fn contains(&self, kind: TagKind, tag: &str) -> bool {
        is_in(tag, self.list(kind))
    }

    /// Hides a tag. Returns `false` if it was already hidden.
    pub fn hide(&mut self, kind: TagKind, tag: String) -> bool {
        if self.contains(kind, &tag) {
            return false;
        }
        self.list_mut(kind).push(tag);
        true
    }

    /// Restores a hidden tag. Returns `false` if it was not hidden.
    pub fn restore(&mut self, kind: TagKind, tag: &str) -> bool {
        let list = self.list_mut(kind);
        let before = list.len();
        list.retain(|x| !eq_ignore_case(x, tag));
        list.len() != before
    }

    /// Returns every tag with its kind, in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (TagKind, &str)> {
        [TagKind::Loader, TagKind::Tool, TagKind::Legacy, TagKind::Firmware]
            .into_iter()
            .flat_map(|kind| self.list(kind).iter().map(move |x| (kind, x.as_str())))
    }

    /// Checks if nothing is hidden.
    #[must_use = "Has no effect if the result is unused"]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// Returns the tag a menu entry is hidden under, or [`None`] if the entry cannot be hidden.
#[must_use = "Has no effect if the result is unused"]
pub fn tag_for(entry: &MenuEntry) -> Option<(TagKind, String)> {
    match &entry.kind {
        EntryKind::Loader(loader) => Some((TagKind::Loader, loader.hidden_tag())),
        EntryKind::Tool(_, loader) => Some((TagKind::Tool, loader.hidden_tag())),
        EntryKind::Legacy(legacy) => Some((TagKind::Legacy, legacy.description.clone())),
        EntryKind::FirmwareBoot(firmware) => Some((TagKind::Firmware, firmware.description.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use alloc::borrow::ToOwned;

    use super::*;
    use crate::{
        config::policy::ToolTag,
        fakes::FakeNvram,
        menu::{LegacyEntry, LoaderEntry},
        volume::VolumeRef,
    };

    #[test]
    fn test_persist() -> Result<(), VarError> {
        let mut nvram = FakeNvram::default();
        assert!(HiddenTags::load(&mut nvram).is_empty());

        let mut tags = HiddenTags::default();
        assert!(tags.hide(TagKind::Loader, "ESP:\\EFI\\ubuntu\\grubx64.efi".to_owned()));
        assert!(!tags.hide(TagKind::Loader, "esp:\\efi\\ubuntu\\GRUBX64.EFI".to_owned()));
        assert!(tags.hide(TagKind::Legacy, "Hard Drive".to_owned()));
        tags.save(&mut nvram)?;

        let mut loaded = HiddenTags::load(&mut nvram);
        assert_eq!(loaded, tags);
        assert!(loaded.contains(TagKind::Loader, "ESP:\\EFI\\UBUNTU\\grubx64.efi"));
        assert!(!loaded.contains(TagKind::Tool, "ESP:\\EFI\\ubuntu\\grubx64.efi"));

        assert!(loaded.restore(TagKind::Legacy, "Hard Drive"));
        assert!(!loaded.restore(TagKind::Legacy, "Hard Drive"));
        assert_eq!(loaded.iter().count(), 1);
        Ok(())
    }

    #[test]
    fn test_corrupt_variable() {
        let mut nvram = FakeNvram::default();
        nvram.insert(&REFIND_VENDOR, HIDDEN_TAGS_VAR, alloc::vec![0xff; 3]);
        assert!(HiddenTags::load(&mut nvram).is_empty());
    }

    #[test]
    fn test_tag_for() {
        let volume = VolumeRef { generation: 1, index: 0 };
        let loader = LoaderEntry::builder(volume, "ESP", "\\EFI\\tools\\shell.efi").build();
        let tool = MenuEntry::tool("UEFI Shell", Some('S'), "tool_shell", EntryKind::Tool(ToolTag::Shell, loader));
        assert_eq!(tag_for(&tool), Some((TagKind::Tool, "ESP:\\EFI\\tools\\shell.efi".to_owned())));

        let legacy = MenuEntry::tool(
            "Boot Hard Drive",
            None,
            "os_legacy",
            EntryKind::Legacy(LegacyEntry {
                description: "Hard Drive".to_owned(),
                boot_num: 3,
            }),
        );
        assert_eq!(tag_for(&legacy), Some((TagKind::Legacy, "Hard Drive".to_owned())));

        let reboot = MenuEntry::tool("System Restart", Some('R'), "func_reset", EntryKind::Reboot);
        assert_eq!(tag_for(&reboot), None);
    }
}
