//! In-memory stand-ins for the firmware, used by the unit tests.

use alloc::{
    borrow::ToOwned,
    collections::{BTreeMap, VecDeque},
    string::String,
    vec,
    vec::Vec,
};

use uefi::{Status, runtime::VariableVendor};

use crate::{
    launch::{ImageServices, LoadAttempt},
    menu::{
        Menu,
        interact::{Console, InputEvent, MenuKey, Severity},
    },
    system::{
        fs::FsError,
        variable::{NvramStore, VarError},
    },
    text::clean_path,
    volume::{CatalogError, DirEntry, Storage, Volume},
};

/// Builds a minimal PE header for a machine type.
pub fn pe_header(machine: u16) -> Vec<u8> {
    let mut header = vec![0; 512];
    header[0] = b'M';
    header[1] = b'Z';
    header[0x3c] = 0x80;
    header[0x80..0x84].copy_from_slice(b"PE\0\0");
    header[0x84..0x86].copy_from_slice(&machine.to_le_bytes());
    header
}

/// A file of a [`FakeStorage`].
struct FakeFile {
    /// The path as it was added, in [`clean_path`] form.
    path: String,
    data: Vec<u8>,
    modified: u64,
}

/// Volumes and files held in memory.
#[derive(Default)]
pub struct FakeStorage {
    pub volumes: Vec<Volume>,
    pub fail_enumerate: bool,
    pub enumerate_calls: usize,
    pub reconnect_calls: usize,
    pub(crate) files: BTreeMap<(usize, String), FakeFile>,
    pub(crate) clock: u64,
}

impl FakeStorage {
    /// Creates readable internal volumes with the given names.
    pub fn with_volumes(names: &[&str]) -> Self {
        let volumes = names
            .iter()
            .enumerate()
            .map(|(index, name)| Volume {
                index,
                has_root: true,
                name: (*name).to_owned(),
                fs_name: (*name).to_owned(),
                ..Volume::default()
            })
            .collect();
        Self {
            volumes,
            ..Self::default()
        }
    }

    /// Adds a file. Every file added is newer than the ones before it.
    pub fn add_file(&mut self, volume: usize, path: &str, data: Vec<u8>) {
        self.clock += 1;
        let modified = self.clock;
        self.add_file_at(volume, path, data, modified);
    }

    /// Adds a file with a modification key.
    pub fn add_file_at(&mut self, volume: usize, path: &str, data: Vec<u8>, modified: u64) {
        let path = clean_path(path);
        self.files
            .insert((volume, path.to_lowercase()), FakeFile { path, data, modified });
    }

    /// Removes a file.
    pub fn remove_file(&mut self, volume: usize, path: &str) {
        self.files.remove(&(volume, clean_path(path).to_lowercase()));
    }

    fn file(&self, volume: &Volume, path: &str) -> Option<&FakeFile> {
        self.files.get(&(volume.index, clean_path(path).to_lowercase()))
    }

    fn dir_exists(&self, volume: &Volume, dir: &str) -> bool {
        let prefix = dir_prefix(dir);
        self.files
            .keys()
            .any(|(index, key)| *index == volume.index && key.starts_with(&prefix))
    }
}

/// The lowercase key prefix of everything inside a directory.
fn dir_prefix(dir: &str) -> String {
    let dir = clean_path(dir).to_lowercase();
    if dir.is_empty() { dir } else { alloc::format!("{dir}\\") }
}

impl Storage for FakeStorage {
    fn enumerate(&mut self) -> Result<Vec<Volume>, CatalogError> {
        self.enumerate_calls += 1;
        if self.fail_enumerate {
            return Err(CatalogError::Enumerate(Status::DEVICE_ERROR));
        }
        Ok(self.volumes.clone())
    }

    fn reconnect(&mut self) {
        self.reconnect_calls += 1;
    }

    fn file_exists(&mut self, volume: &Volume, path: &str) -> bool {
        assert!(volume.has_root, "file operation on a volume without a root");
        self.file(volume, path).is_some() || self.dir_exists(volume, path)
    }

    fn read_header(&mut self, volume: &Volume, path: &str, buf: &mut [u8]) -> Result<usize, FsError> {
        let file = self.file(volume, path).ok_or(FsError::OpenErr(Status::NOT_FOUND))?;
        let len = file.data.len().min(buf.len());
        buf[..len].copy_from_slice(&file.data[..len]);
        Ok(len)
    }

    fn read_file(&mut self, volume: &Volume, path: &str) -> Result<Vec<u8>, FsError> {
        self.file(volume, path)
            .map(|x| x.data.clone())
            .ok_or(FsError::OpenErr(Status::NOT_FOUND))
    }

    fn list_dir(&mut self, volume: &Volume, path: &str) -> Result<Vec<DirEntry>, FsError> {
        assert!(volume.has_root, "file operation on a volume without a root");
        let prefix = dir_prefix(path);
        if !prefix.is_empty() && !self.dir_exists(volume, path) {
            return Err(FsError::OpenErr(Status::NOT_FOUND));
        }

        let mut entries: Vec<DirEntry> = Vec::new();
        for ((index, key), file) in &self.files {
            if *index != volume.index || !key.starts_with(&prefix) {
                continue;
            }
            let rest = &file.path[prefix.len()..];
            let (name, is_dir) = rest.split_once('\\').map_or((rest, false), |(dir, _)| (dir, true));
            if entries.iter().any(|x| x.name.eq_ignore_ascii_case(name)) {
                continue;
            }
            entries.push(DirEntry {
                name: name.to_owned(),
                is_dir,
                size: if is_dir { 0 } else { file.data.len() as u64 },
                modified: if is_dir { 0 } else { file.modified },
            });
        }
        Ok(entries)
    }
}

/// Firmware variables held in memory.
#[derive(Default)]
pub struct FakeNvram {
    vars: BTreeMap<([u8; 16], String), Vec<u8>>,
    /// The names of every successful write, in order.
    pub writes: Vec<String>,
    pub fail_writes: bool,
}

impl FakeNvram {
    /// Inserts a variable without recording a write.
    pub fn insert(&mut self, vendor: &VariableVendor, name: &str, data: Vec<u8>) {
        self.vars.insert((vendor.0.to_bytes(), name.to_owned()), data);
    }
}

impl NvramStore for FakeNvram {
    fn get(&mut self, vendor: &VariableVendor, name: &str) -> Result<Option<Vec<u8>>, VarError> {
        Ok(self.vars.get(&(vendor.0.to_bytes(), name.to_owned())).cloned())
    }

    fn set(&mut self, vendor: &VariableVendor, name: &str, data: &[u8], _persistent: bool) -> Result<(), VarError> {
        if self.fail_writes {
            return Err(VarError::SetErr(Status::WRITE_PROTECTED));
        }
        self.writes.push(name.to_owned());
        if data.is_empty() {
            self.vars.remove(&(vendor.0.to_bytes(), name.to_owned()));
        } else {
            self.vars.insert((vendor.0.to_bytes(), name.to_owned()), data.to_vec());
        }
        Ok(())
    }
}

/// A call made to [`FakeImages`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageCall {
    Load(String),
    LoadBuffer(String),
    LoadSelf,
    SetOptions(usize, String),
    Start(usize),
    Unload(usize),
    Reconnect(usize),
}

/// Image services that record what was asked of them.
pub struct FakeImages {
    pub calls: Vec<ImageCall>,
    pub load_status: Status,
    /// Whether a failed load still hands out an image.
    pub load_yields_image: bool,
    pub options_status: Status,
    pub start_status: Status,
    pub secure_boot: bool,
    pub shim: bool,
    next_image: usize,
}

impl Default for FakeImages {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            load_status: Status::SUCCESS,
            load_yields_image: false,
            options_status: Status::SUCCESS,
            start_status: Status::SUCCESS,
            secure_boot: false,
            shim: false,
            next_image: 0,
        }
    }
}

impl FakeImages {
    fn attempt(&mut self) -> LoadAttempt<usize> {
        if self.load_status.is_error() && !self.load_yields_image {
            return LoadAttempt::failed(self.load_status);
        }
        let image = self.next_image;
        self.next_image += 1;
        LoadAttempt {
            image: Some(image),
            status: self.load_status,
        }
    }

    /// How many images were started.
    pub fn started(&self) -> usize {
        self.calls.iter().filter(|x| matches!(x, ImageCall::Start(_))).count()
    }
}

impl ImageServices for FakeImages {
    type Image = usize;

    fn load(&mut self, _volume: &Volume, path: &str) -> LoadAttempt<usize> {
        self.calls.push(ImageCall::Load(path.to_owned()));
        self.attempt()
    }

    fn load_buffer(&mut self, _volume: &Volume, path: &str, _data: &[u8]) -> LoadAttempt<usize> {
        self.calls.push(ImageCall::LoadBuffer(path.to_owned()));
        self.attempt()
    }

    fn load_self(&mut self) -> Option<usize> {
        self.calls.push(ImageCall::LoadSelf);
        let image = self.next_image;
        self.next_image += 1;
        Some(image)
    }

    fn set_load_options(&mut self, image: usize, options: &str) -> Result<(), Status> {
        self.calls.push(ImageCall::SetOptions(image, options.to_owned()));
        if self.options_status.is_error() {
            return Err(self.options_status);
        }
        Ok(())
    }

    fn start(&mut self, image: usize) -> Status {
        self.calls.push(ImageCall::Start(image));
        self.start_status
    }

    fn unload(&mut self, image: usize) {
        self.calls.push(ImageCall::Unload(image));
    }

    fn reconnect_drivers(&mut self, driver: usize) {
        self.calls.push(ImageCall::Reconnect(driver));
    }

    fn secure_boot_active(&mut self) -> bool {
        self.secure_boot
    }

    fn shim_present(&mut self) -> bool {
        self.shim
    }

    fn now_usec(&mut self) -> u64 {
        1_000_000
    }
}

/// A console driven by a script of input events.
///
/// Running out of events while waiting for input is a test bug, so it panics.
#[derive(Default)]
pub struct FakeConsole {
    pub events: VecDeque<InputEvent>,
    /// Keys already waiting, returned by `poll_key` and thrown away by `drain_keys`.
    pub polled: VecDeque<MenuKey>,
    pub headers: Vec<String>,
    /// The titles of every menu drawn.
    pub menus: Vec<Vec<String>>,
    pub messages: Vec<(String, Severity)>,
    pub pauses: usize,
    pub timeouts: Vec<Option<String>>,
    pub waits_with_tick: usize,
    pub drains: usize,
    pub moves: Vec<(usize, usize)>,
}

impl FakeConsole {
    pub fn with_events(events: Vec<InputEvent>) -> Self {
        Self {
            events: events.into(),
            ..Self::default()
        }
    }
}

impl Console for FakeConsole {
    fn draw_header(&mut self, title: &str) {
        self.headers.push(title.to_owned());
    }

    fn draw_menu(&mut self, menu: &Menu, _selected: usize) {
        self.menus.push(menu.entries.iter().map(|x| x.title.clone()).collect());
    }

    fn move_selection(&mut self, _menu: &Menu, previous: usize, selected: usize) {
        self.moves.push((previous, selected));
    }

    fn draw_timeout(&mut self, text: Option<&str>) {
        self.timeouts.push(text.map(ToOwned::to_owned));
    }

    fn display_message(&mut self, text: &str, severity: Severity) {
        self.messages.push((text.to_owned(), severity));
    }

    fn pause_for_key(&mut self) {
        self.pauses += 1;
    }

    fn pause_seconds(&mut self, _seconds: u32) {}

    fn switch_to_text(&mut self) {}

    fn switch_to_graphics(&mut self) {}

    fn drain_keys(&mut self) -> bool {
        self.drains += 1;
        let drained = !self.polled.is_empty();
        self.polled.clear();
        drained
    }

    fn poll_key(&mut self) -> Option<MenuKey> {
        self.polled.pop_front()
    }

    fn wait_for_input(&mut self, tick: bool) -> InputEvent {
        if tick {
            self.waits_with_tick += 1;
        }
        let Some(event) = self.events.pop_front() else {
            panic!("the console script ran out of input");
        };
        event
    }
}
