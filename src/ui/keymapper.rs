//! Key mapping for console input
//!
//! Converts crossterm key events into application commands or console
//! edits for the input relay.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::core::relay::{EditKey, Motion};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// Application-level commands bound to Ctrl keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NewCommand,
    RunPrevious,
    EndProcess,
    ChangeDirectory,
    Clear,
    JumpToTop,
    Copy,
    Paste,
    Quit,
}

/// What a key press means for the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Command(Command),
    Edit(EditKey),
}

/// Key mapper for converting key events to console actions
pub struct KeyMapper;

impl KeyMapper {
    /// Map a crossterm KeyEvent to a console action
    pub fn map(event: &KeyEvent) -> Option<KeyAction> {
        let mods = Modifiers::from(event.modifiers);

        if mods.contains(Modifiers::CTRL) {
            return Self::map_ctrl(event.code).map(KeyAction::Command);
        }

        let extend = mods.contains(Modifiers::SHIFT);
        let edit = match event.code {
            KeyCode::Char(ch) => EditKey::Char(ch),
            KeyCode::Enter => EditKey::Enter,
            KeyCode::Backspace => EditKey::Backspace,
            KeyCode::Delete => EditKey::Delete,
            KeyCode::Tab => EditKey::Char('\t'),
            KeyCode::Left => Self::motion(Motion::Left, extend),
            KeyCode::Right => Self::motion(Motion::Right, extend),
            KeyCode::Up => Self::motion(Motion::Up, extend),
            KeyCode::Down => Self::motion(Motion::Down, extend),
            KeyCode::Home => Self::motion(Motion::LineStart, extend),
            KeyCode::End => Self::motion(Motion::LineEnd, extend),
            KeyCode::PageUp => Self::motion(Motion::Top, extend),
            KeyCode::PageDown => Self::motion(Motion::Bottom, extend),
            _ => return None,
        };
        Some(KeyAction::Edit(edit))
    }

    fn map_ctrl(code: KeyCode) -> Option<Command> {
        let KeyCode::Char(ch) = code else {
            return None;
        };
        match ch.to_ascii_lowercase() {
            'n' => Some(Command::NewCommand),
            'p' => Some(Command::RunPrevious),
            'k' => Some(Command::EndProcess),
            'd' => Some(Command::ChangeDirectory),
            'l' => Some(Command::Clear),
            't' => Some(Command::JumpToTop),
            'y' => Some(Command::Copy),
            'v' => Some(Command::Paste),
            'q' => Some(Command::Quit),
            _ => None,
        }
    }

    fn motion(motion: Motion, extend: bool) -> EditKey {
        EditKey::Move { motion, extend }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_char_keys() {
        let event = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(
            KeyMapper::map(&event),
            Some(KeyAction::Edit(EditKey::Char('a')))
        );

        // Shift only changes the character
        let event = key_event(KeyCode::Char('A'), KeyModifiers::SHIFT);
        assert_eq!(
            KeyMapper::map(&event),
            Some(KeyAction::Edit(EditKey::Char('A')))
        );
    }

    #[test]
    fn test_ctrl_commands() {
        let event = key_event(KeyCode::Char('k'), KeyModifiers::CONTROL);
        assert_eq!(
            KeyMapper::map(&event),
            Some(KeyAction::Command(Command::EndProcess))
        );

        let event = key_event(KeyCode::Char('z'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event), None);
    }

    #[test]
    fn test_shift_arrow_extends_selection() {
        let event = key_event(KeyCode::Left, KeyModifiers::SHIFT);
        assert_eq!(
            KeyMapper::map(&event),
            Some(KeyAction::Edit(EditKey::Move {
                motion: Motion::Left,
                extend: true
            }))
        );

        let event = key_event(KeyCode::Home, KeyModifiers::NONE);
        assert_eq!(
            KeyMapper::map(&event),
            Some(KeyAction::Edit(EditKey::Move {
                motion: Motion::LineStart,
                extend: false
            }))
        );
    }

    #[test]
    fn test_modifier_conversion() {
        let mods = Modifiers::from(KeyModifiers::CONTROL | KeyModifiers::SHIFT);
        assert!(mods.contains(Modifiers::CTRL));
        assert!(mods.contains(Modifiers::SHIFT));
        assert!(!mods.contains(Modifiers::ALT));
    }
}
