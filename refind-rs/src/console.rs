//! A [`Console`] on the firmware text console.
//!
//! The main row and the tools row are drawn as two lists, one entry per line. Messages are stacked below the menu
//! and cleared with the next header.

use core::fmt::Write;

use log::warn;
use refind_rs_core::menu::{
    Menu, Row,
    interact::{Console, InputEvent, MenuKey, Severity},
};
use thiserror::Error;
use uefi::{
    Event,
    boot::{self, EventType, ScopedProtocol, TimerTrigger, Tpl},
    proto::console::text::{Color, Input, Key, Output, ScanCode},
};

/// One second, in the 100ns units of the timer.
const TICK: u64 = 10_000_000;

/// The first line of the menu.
const FIRST_LINE: usize = 2;

/// An `Error` that may result from opening the console.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// The firmware has no text input or output.
    #[error("No console available: {0}")]
    Protocol(#[from] uefi::Error),

    /// The text input cannot be waited on.
    #[error("The console input has no key event")]
    NoKeyEvent,
}

/// The firmware text console.
pub struct TextConsole {
    /// Keyboard.
    input: ScopedProtocol<Input>,

    /// Screen.
    output: ScopedProtocol<Output>,

    /// Screen width in characters.
    columns: usize,

    /// Screen height in lines.
    rows: usize,

    /// Where the next message goes.
    message_line: usize,
}

impl TextConsole {
    /// Opens the console input and output.
    ///
    /// # Errors
    ///
    /// May return an `Error` if the firmware has no text console.
    pub fn new() -> Result<Self, ConsoleError> {
        let input = boot::open_protocol_exclusive::<Input>(boot::get_handle_for_protocol::<Input>()?)?;
        let mut output = boot::open_protocol_exclusive::<Output>(boot::get_handle_for_protocol::<Output>()?)?;
        if input.wait_for_key_event().is_none() {
            return Err(ConsoleError::NoKeyEvent);
        }

        let (columns, rows) = match output.current_mode() {
            Ok(Some(mode)) => (mode.columns(), mode.rows()),
            _ => (80, 25),
        };
        let _ = output.enable_cursor(false);

        Ok(Self {
            input,
            output,
            columns,
            rows,
            message_line: FIRST_LINE,
        })
    }

    /// The screen line an entry is drawn on. The tools row starts after a blank line.
    fn line_of(menu: &Menu, index: usize) -> usize {
        let has_main = menu.entries.iter().any(|x| x.row == Row::Main);
        let gap = usize::from(has_main && menu.entries.get(index).is_some_and(|x| x.row == Row::Tools));
        FIRST_LINE + index + gap
    }

    /// Writes text at the start of a line, padded to the screen width.
    fn write_line(&mut self, line: usize, text: &str, fg: Color, bg: Color) {
        if line >= self.rows {
            return;
        }
        let width = self.columns.saturating_sub(1);
        let _ = self.output.set_color(fg, bg);
        let _ = self.output.set_cursor_position(0, line);
        let _ = write!(self.output, "{text:<width$.width$}");
        let _ = self.output.set_color(Color::LightGray, Color::Black);
    }

    /// Draws one entry, highlighted or not.
    fn draw_entry(&mut self, menu: &Menu, index: usize, selected: bool) {
        let Some(entry) = menu.entries.get(index) else {
            return;
        };
        let shortcut = entry.shortcut.unwrap_or(' ');
        let text = alloc::format!("  {shortcut}  {}", entry.title);
        let (fg, bg) = if selected {
            (Color::Black, Color::LightGray)
        } else {
            (Color::LightGray, Color::Black)
        };
        self.write_line(Self::line_of(menu, index), &text, fg, bg);
    }

    /// Reads a key, if there is one waiting.
    fn read_key(&mut self) -> Option<MenuKey> {
        loop {
            match self.input.read_key() {
                Ok(Some(key)) => {
                    // keys the menu has no use for are skipped
                    if let Some(key) = map_key(key) {
                        return Some(key);
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    warn!("Could not read a key: {e}");
                    return None;
                }
            }
        }
    }

    /// Creates a one-shot timer for one second.
    fn tick_event() -> Option<Event> {
        // SAFETY: the event has no notification function, so nothing runs when it is signaled.
        let event = unsafe { boot::create_event(EventType::TIMER, Tpl::APPLICATION, None, None) }.ok()?;
        if boot::set_timer(&event, TimerTrigger::Relative(TICK)).is_err() {
            let _ = boot::close_event(event);
            return None;
        }
        Some(event)
    }
}

/// Translates a firmware key into a [`MenuKey`].
fn map_key(key: Key) -> Option<MenuKey> {
    match key {
        Key::Printable(c) => match char::from(c) {
            '\r' | '\n' => Some(MenuKey::Enter),
            '\t' => Some(MenuKey::Tab),
            '\u{8}' => Some(MenuKey::Backspace),
            c if c.is_control() => None,
            c => Some(MenuKey::Char(c)),
        },
        Key::Special(code) => Some(match code {
            ScanCode::UP => MenuKey::Up,
            ScanCode::DOWN => MenuKey::Down,
            ScanCode::LEFT => MenuKey::Left,
            ScanCode::RIGHT => MenuKey::Right,
            ScanCode::HOME => MenuKey::Home,
            ScanCode::END => MenuKey::End,
            ScanCode::PAGE_UP => MenuKey::PageUp,
            ScanCode::PAGE_DOWN => MenuKey::PageDown,
            ScanCode::ESCAPE => MenuKey::Escape,
            ScanCode::DELETE => MenuKey::Delete,
            ScanCode::INSERT => MenuKey::Insert,
            ScanCode::FUNCTION_2 => MenuKey::F2,
            _ => return None,
        }),
    }
}

impl Console for TextConsole {
    fn draw_header(&mut self, title: &str) {
        let _ = self.output.set_color(Color::LightGray, Color::Black);
        let _ = self.output.clear();
        let pad = self.columns.saturating_sub(title.chars().count()) / 2;
        let text = alloc::format!("{:pad$}{title}", "");
        self.write_line(0, &text, Color::White, Color::Blue);
        self.message_line = FIRST_LINE;
    }

    fn draw_menu(&mut self, menu: &Menu, selected: usize) {
        for index in 0..menu.entries.len() {
            self.draw_entry(menu, index, index == selected);
        }
        self.message_line = menu
            .entries
            .len()
            .checked_sub(1)
            .map_or(FIRST_LINE, |last| Self::line_of(menu, last) + 2);
    }

    fn move_selection(&mut self, menu: &Menu, previous: usize, selected: usize) {
        self.draw_entry(menu, previous, false);
        self.draw_entry(menu, selected, true);
    }

    fn draw_timeout(&mut self, text: Option<&str>) {
        let line = self.rows.saturating_sub(2);
        self.write_line(line, text.unwrap_or(""), Color::White, Color::Black);
    }

    fn display_message(&mut self, text: &str, severity: Severity) {
        let fg = match severity {
            Severity::Info => Color::LightGray,
            Severity::Warning => Color::Yellow,
            Severity::Error => Color::LightRed,
        };
        let line = self.message_line;
        self.write_line(line, text, fg, Color::Black);
        self.message_line = (line + 1).min(self.rows.saturating_sub(3));
    }

    fn pause_for_key(&mut self) {
        self.display_message("Hit any key to continue...", Severity::Info);
        while self.wait_for_input(false) == InputEvent::Tick {}
    }

    fn pause_seconds(&mut self, seconds: u32) {
        for _ in 0..seconds {
            if let InputEvent::Key(_) = self.wait_for_input(true) {
                break;
            }
        }
    }

    fn switch_to_text(&mut self) {
        let _ = self.output.set_color(Color::LightGray, Color::Black);
        let _ = self.output.clear();
        let _ = self.output.enable_cursor(true);
        self.message_line = 0;
    }

    fn switch_to_graphics(&mut self) {
        let _ = self.output.enable_cursor(false);
        let _ = self.output.clear();
    }

    fn drain_keys(&mut self) -> bool {
        let mut drained = false;
        while let Ok(Some(_)) = self.input.read_key() {
            drained = true;
        }
        drained
    }

    fn poll_key(&mut self) -> Option<MenuKey> {
        self.read_key()
    }

    fn wait_for_input(&mut self, tick: bool) -> InputEvent {
        loop {
            if let Some(key) = self.read_key() {
                return InputEvent::Key(key);
            }

            let Some(key_event) = self.input.wait_for_key_event() else {
                boot::stall(100_000);
                continue;
            };
            let timer = if tick { Self::tick_event() } else { None };

            let woke = match timer {
                Some(timer) => {
                    // SAFETY: the clone only lives for this wait, and the timer is closed right after it.
                    let clone = unsafe { timer.unsafe_clone() };
                    let mut events = [key_event, clone];
                    let woke = boot::wait_for_event(&mut events);
                    let _ = boot::close_event(timer);
                    woke
                }
                None => boot::wait_for_event(&mut [key_event]),
            };

            match woke {
                Ok(1) => return InputEvent::Tick,
                Ok(_) => (),
                Err(e) => {
                    warn!("Waiting for input failed: {e}");
                    boot::stall(100_000);
                }
            }
        }
    }
}
