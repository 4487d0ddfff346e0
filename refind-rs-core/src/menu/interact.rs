// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

//! The interactive menu loop.
//!
//! [`run_menu`] draws a [`Menu`], then blocks on the [`Console`] for either a key or a one second tick of the
//! countdown. Navigation only moves the highlight. Everything else ends the loop with a [`MenuExit`], which the
//! caller dispatches.

use alloc::format;

use log::debug;

use crate::menu::Menu;

/// How many entries a page key moves by.
const PAGE_SIZE: usize = 10;

/// A key press, as far as the menu is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuKey {
    /// The up arrow.
    Up,
    /// The down arrow.
    Down,
    /// The left arrow.
    Left,
    /// The right arrow.
    Right,
    /// Home.
    Home,
    /// End.
    End,
    /// Page up.
    PageUp,
    /// Page down.
    PageDown,
    /// Enter or return.
    Enter,
    /// Escape.
    Escape,
    /// Delete.
    Delete,
    /// Insert.
    Insert,
    /// F2.
    F2,
    /// Tab.
    Tab,
    /// Backspace.
    Backspace,
    /// Any printable character.
    Char(char),
}

/// What woke up [`Console::wait_for_input`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// A key was pressed.
    Key(MenuKey),

    /// A second passed without a key.
    Tick,
}

/// How serious a message is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Progress or information.
    Info,

    /// Something went wrong, but nothing was lost.
    Warning,

    /// An action failed.
    Error,
}

/// The presentation surface: the screen and the keyboard.
pub trait Console {
    /// Clears the screen and draws a header with a title.
    fn draw_header(&mut self, title: &str);

    /// Draws every entry of a menu, highlighting `selected`.
    fn draw_menu(&mut self, menu: &Menu, selected: usize);

    /// Moves the highlight without redrawing the whole menu.
    fn move_selection(&mut self, menu: &Menu, previous: usize, selected: usize);

    /// Draws the countdown text, or clears it with [`None`].
    fn draw_timeout(&mut self, text: Option<&str>);

    /// Shows a message.
    fn display_message(&mut self, text: &str, severity: Severity);

    /// Waits until a key is pressed.
    fn pause_for_key(&mut self);

    /// Waits for a number of seconds, or until a key is pressed.
    fn pause_seconds(&mut self, seconds: u32);

    /// Switches the screen to text mode.
    fn switch_to_text(&mut self);

    /// Switches the screen to graphics mode.
    fn switch_to_graphics(&mut self);

    /// Throws away every pending key. Returns whether there were any.
    fn drain_keys(&mut self) -> bool;

    /// Returns a pending key without waiting.
    fn poll_key(&mut self) -> Option<MenuKey>;

    /// Blocks until a key is pressed, or, when `tick` is set, until one second has passed.
    fn wait_for_input(&mut self, tick: bool) -> InputEvent;
}

/// Why [`run_menu`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuExit {
    /// The selected entry was chosen, by Enter or by its shortcut.
    Enter,

    /// The user asked to leave the menu (and rescan).
    Escape,

    /// The countdown ran out.
    Timeout,

    /// The user asked to hide the selected entry.
    Hide,

    /// The user asked for the details submenu of the selected entry.
    Details,
}

/// The result of [`run_menu`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// Why the loop ended.
    pub exit: MenuExit,

    /// The entry that was selected at the time.
    pub selected: usize,
}

/// What a single key does.
enum KeyAction {
    /// Highlight another entry.
    Move(usize),

    /// Leave the loop with an entry selected.
    Exit(MenuExit, usize),

    /// Nothing.
    Ignore,
}

/// Decides what a key does in a menu.
fn key_action(menu: &Menu, selected: usize, key: MenuKey) -> KeyAction {
    let last = menu.entries.len().saturating_sub(1);
    match key {
        MenuKey::Up | MenuKey::Left => KeyAction::Move(selected.saturating_sub(1)),
        MenuKey::Down | MenuKey::Right => KeyAction::Move((selected + 1).min(last)),
        MenuKey::Home => KeyAction::Move(0),
        MenuKey::End => KeyAction::Move(last),
        MenuKey::PageUp => KeyAction::Move(selected.saturating_sub(PAGE_SIZE)),
        MenuKey::PageDown => KeyAction::Move((selected + PAGE_SIZE).min(last)),
        MenuKey::Insert | MenuKey::F2 | MenuKey::Tab | MenuKey::Char('+') => {
            KeyAction::Exit(MenuExit::Details, selected)
        }
        MenuKey::Escape | MenuKey::Backspace => KeyAction::Exit(MenuExit::Escape, selected),
        MenuKey::Delete | MenuKey::Char('-') => KeyAction::Exit(MenuExit::Hide, selected),
        MenuKey::Enter | MenuKey::Char(' ' | '\n' | '\r') => KeyAction::Exit(MenuExit::Enter, selected),
        MenuKey::Char(c) => menu
            .find_shortcut(c)
            .map_or(KeyAction::Ignore, |i| KeyAction::Exit(MenuExit::Enter, i)),
    }
}

/// Runs a menu until an entry is chosen, the user leaves, or the countdown runs out.
///
/// With a positive [`Menu::timeout`] the countdown is redrawn every second, and any key cancels it. With a
/// negative timeout the loop returns [`MenuExit::Timeout`] at once unless a key is already waiting. A waiting
/// shortcut key is honored, while any other key is thrown away together with the rest of the pending input and
/// the menu is shown without a countdown.
pub fn run_menu(console: &mut impl Console, menu: &Menu, selected: usize) -> Outcome {
    let mut selected = selected.min(menu.entries.len().saturating_sub(1));

    console.draw_header(&menu.title);
    console.draw_menu(menu, selected);

    let mut remaining = u32::try_from(menu.timeout).unwrap_or(0);
    if menu.timeout < 0 {
        match console.poll_key() {
            None => {
                return Outcome {
                    exit: MenuExit::Timeout,
                    selected,
                };
            }
            Some(key) => {
                if let MenuKey::Char(c) = key
                    && let Some(i) = menu.find_shortcut(c)
                {
                    return Outcome {
                        exit: MenuExit::Enter,
                        selected: i,
                    };
                }
                let _ = console.drain_keys();
            }
        }
    }

    loop {
        if remaining > 0 {
            console.draw_timeout(Some(&format!("{} in {remaining} seconds", menu.timeout_text)));
        }

        match console.wait_for_input(remaining > 0) {
            InputEvent::Tick if remaining > 0 => {
                remaining -= 1;
                if remaining == 0 {
                    console.draw_timeout(None);
                    debug!("Menu countdown expired on entry {selected}");
                    return Outcome {
                        exit: MenuExit::Timeout,
                        selected,
                    };
                }
            }
            InputEvent::Tick => (),
            InputEvent::Key(key) => {
                if remaining > 0 {
                    remaining = 0;
                    console.draw_timeout(None);
                }
                match key_action(menu, selected, key) {
                    KeyAction::Move(next) if next != selected => {
                        console.move_selection(menu, selected, next);
                        selected = next;
                    }
                    KeyAction::Exit(exit, selected) => return Outcome { exit, selected },
                    KeyAction::Move(_) | KeyAction::Ignore => (),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::{borrow::ToOwned, string::String, vec, vec::Vec};

    use super::*;
    use crate::{
        fakes::FakeConsole,
        menu::{EntryKind, MenuEntry, Row},
    };

    fn menu(timeout: i32) -> Menu {
        let entry = |title: &str, shortcut| MenuEntry {
            title: title.to_owned(),
            row: Row::Main,
            shortcut,
            icon: String::new(),
            kind: EntryKind::About,
        };
        Menu {
            title: "Main Menu".to_owned(),
            entries: vec![
                entry("Boot Windows (UEFI) from ESP", Some('W')),
                entry("Boot \\boot\\vmlinuz from Linux", Some('L')),
                entry("Boot Mac OS from Macintosh HD", Some('M')),
            ],
            timeout,
            timeout_text: "Boot default".to_owned(),
        }
    }

    #[test]
    fn test_countdown_picks_default() {
        let menu = menu(5);
        let default = menu.find_default(&["Linux".to_owned()]).unwrap_or_default();
        let mut console = FakeConsole::with_events(vec![InputEvent::Tick; 5]);

        let outcome = run_menu(&mut console, &menu, default);
        assert_eq!(outcome, Outcome {
            exit: MenuExit::Timeout,
            selected: 1
        });
        assert_eq!(
            console.timeouts.first().cloned().flatten().as_deref(),
            Some("Boot default in 5 seconds")
        );
        assert_eq!(console.timeouts.last(), Some(&None));
    }

    #[test]
    fn test_key_cancels_countdown() {
        let menu = menu(3);
        let mut console = FakeConsole::with_events(vec![
            InputEvent::Tick,
            InputEvent::Key(MenuKey::Down),
            InputEvent::Key(MenuKey::Down),
            InputEvent::Key(MenuKey::Down),
            InputEvent::Key(MenuKey::Up),
            InputEvent::Key(MenuKey::Enter),
        ]);

        let outcome = run_menu(&mut console, &menu, 0);
        assert_eq!(outcome, Outcome {
            exit: MenuExit::Enter,
            selected: 1
        });
        assert_eq!(console.waits_with_tick, 2);
    }

    #[test]
    fn test_immediate_timeout() {
        let menu = menu(-1);

        let mut console = FakeConsole::default();
        assert_eq!(run_menu(&mut console, &menu, 2).exit, MenuExit::Timeout);

        let mut console = FakeConsole::default();
        console.polled.push_back(MenuKey::Char('w'));
        assert_eq!(run_menu(&mut console, &menu, 2), Outcome {
            exit: MenuExit::Enter,
            selected: 0
        });

        let mut console = FakeConsole::with_events(vec![InputEvent::Key(MenuKey::Escape)]);
        console.polled.push_back(MenuKey::Down);
        assert_eq!(run_menu(&mut console, &menu, 2).exit, MenuExit::Escape);
        assert_eq!(console.drains, 1);
        assert!(console.timeouts.is_empty());
    }

    #[test]
    fn test_exit_keys() {
        let menu = menu(0);
        let exits: Vec<_> = [
            (MenuKey::Escape, MenuExit::Escape),
            (MenuKey::Backspace, MenuExit::Escape),
            (MenuKey::Delete, MenuExit::Hide),
            (MenuKey::Char('-'), MenuExit::Hide),
            (MenuKey::F2, MenuExit::Details),
            (MenuKey::Char('+'), MenuExit::Details),
            (MenuKey::Char(' '), MenuExit::Enter),
        ]
        .into_iter()
        .map(|(key, expected)| {
            let mut console = FakeConsole::with_events(vec![InputEvent::Key(key)]);
            (run_menu(&mut console, &menu, 1).exit, expected)
        })
        .collect();

        for (exit, expected) in exits {
            assert_eq!(exit, expected);
        }
    }

    #[test]
    fn test_shortcut_and_unknown_keys() {
        let menu = menu(0);
        let mut console = FakeConsole::with_events(vec![
            InputEvent::Key(MenuKey::Char('z')),
            InputEvent::Tick,
            InputEvent::Key(MenuKey::End),
            InputEvent::Key(MenuKey::PageDown),
            InputEvent::Key(MenuKey::Char('3')),
        ]);
        assert_eq!(run_menu(&mut console, &menu, 0), Outcome {
            exit: MenuExit::Enter,
            selected: 2
        });
        assert_eq!(console.moves, vec![(0, 2)]);
    }
}
