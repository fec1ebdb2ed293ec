//! Input relay
//!
//! Turns key presses into edits of the live region and sends finished
//! lines to the process. The locked region is guarded twice: edits are
//! clamped to the live region before they happen, and a key release that
//! finds the buffer shorter than its last snapshot restores the snapshot.

use std::io::{self, Write};

use thiserror::Error;
use tracing::{debug, warn};

use super::buffer::{BufferError, ConsoleBuffer};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to send input to process: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Caret motions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Left,
    Right,
    Up,
    Down,
    LineStart,
    LineEnd,
    Top,
    Bottom,
}

/// Editing keys understood by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditKey {
    Char(char),
    /// Text inserted as one edit (clipboard paste)
    Paste(String),
    Enter,
    Backspace,
    Delete,
    /// Move the caret, extending the selection when `extend` is set
    Move { motion: Motion, extend: bool },
}

#[derive(Debug, Default)]
pub struct InputRelay {
    /// Start of text typed since the last Enter
    input_mark: usize,
    /// Caret must be put back at the end after the current event
    caret_fix_pending: bool,
}

impl InputRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare for a new process
    pub fn reset(&mut self, buffer: &ConsoleBuffer) {
        self.input_mark = buffer.boundary();
        self.caret_fix_pending = false;
    }

    /// Offset where the next line to send begins
    pub fn line_start(&self, buffer: &ConsoleBuffer) -> usize {
        self.input_mark.max(buffer.boundary()).min(buffer.len())
    }

    /// Handle a key press while a process is running
    pub fn key_pressed<W: Write>(
        &mut self,
        buffer: &mut ConsoleBuffer,
        stdin: &mut W,
        key: EditKey,
    ) -> Result<(), RelayError> {
        match key {
            EditKey::Enter => self.send_line(buffer, stdin)?,
            EditKey::Char(ch) => {
                let mut tmp = [0u8; 4];
                self.insert_text(buffer, ch.encode_utf8(&mut tmp))?;
            }
            EditKey::Paste(text) => self.insert_text(buffer, &text)?,
            EditKey::Backspace => self.delete(buffer, true)?,
            EditKey::Delete => self.delete(buffer, false)?,
            EditKey::Move { motion, extend } => self.move_caret(buffer, motion, extend)?,
        }
        Ok(())
    }

    /// Revert the buffer if an edit cut into text written by the process.
    /// Returns true when the snapshot was restored.
    pub fn key_released(&mut self, buffer: &mut ConsoleBuffer) -> bool {
        if buffer.len() >= buffer.snapshot_len() {
            return false;
        }
        debug!(
            "Buffer shrank to {} below {}, restoring snapshot",
            buffer.len(),
            buffer.snapshot_len()
        );
        buffer.restore_snapshot();
        self.input_mark = self.input_mark.min(buffer.len());
        true
    }

    /// Check the caret after it moved; a caret or selection end inside the
    /// locked region is fixed once the current event is done.
    pub fn caret_moved(&mut self, buffer: &ConsoleBuffer) {
        let boundary = buffer.boundary();
        let anchor_locked = buffer.anchor().is_some_and(|a| a < boundary);
        if buffer.caret() < boundary || anchor_locked {
            self.caret_fix_pending = true;
        }
    }

    /// Run the deferred caret fix, if any. Returns true when it ran.
    pub fn run_deferred(&mut self, buffer: &mut ConsoleBuffer) -> bool {
        if !self.caret_fix_pending {
            return false;
        }
        self.caret_fix_pending = false;
        buffer.set_caret_ignoring_lock(buffer.len());
        true
    }

    fn send_line<W: Write>(
        &mut self,
        buffer: &mut ConsoleBuffer,
        stdin: &mut W,
    ) -> Result<(), RelayError> {
        let line = buffer.slice(self.line_start(buffer), buffer.len());
        buffer.insert(buffer.len(), "\n")?;
        self.input_mark = buffer.len();

        debug!("Sending line ({} chars) to process", line.chars().count());
        let result = stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush());
        if let Err(e) = result {
            warn!("Failed to send line to process: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    fn insert_text(&mut self, buffer: &mut ConsoleBuffer, text: &str) -> Result<(), RelayError> {
        let mut at = buffer.caret();
        if let Some(range) = buffer.selection().and_then(|(s, e)| live_range(buffer, s, e)) {
            buffer.remove(range.0, range.1)?;
            at = range.0;
        }
        if at < buffer.boundary() {
            at = buffer.len();
        }
        buffer.insert(at, text)?;
        Ok(())
    }

    fn delete(&mut self, buffer: &mut ConsoleBuffer, backwards: bool) -> Result<(), RelayError> {
        let caret = buffer.caret();
        let range = match buffer.selection() {
            Some((start, end)) => live_range(buffer, start, end),
            None if backwards => live_range(buffer, caret.saturating_sub(1), caret),
            None => live_range(buffer, caret, (caret + 1).min(buffer.len())),
        };
        if let Some((start, end)) = range {
            buffer.remove(start, end)?;
            self.input_mark = self.input_mark.min(buffer.len());
        }
        Ok(())
    }

    fn move_caret(
        &mut self,
        buffer: &mut ConsoleBuffer,
        motion: Motion,
        extend: bool,
    ) -> Result<(), RelayError> {
        let caret = buffer.caret();
        let target = motion_target(buffer, caret, motion);

        if extend {
            let anchor = buffer.anchor().unwrap_or(caret);
            buffer.set_selection(anchor, target)?;
        } else {
            buffer.set_caret(target)?;
        }
        self.caret_moved(buffer);
        Ok(())
    }
}

/// Where `motion` takes a caret currently at `caret`
pub fn motion_target(buffer: &ConsoleBuffer, caret: usize, motion: Motion) -> usize {
    let len = buffer.len();
    match motion {
        Motion::Left => caret.saturating_sub(1),
        Motion::Right => (caret + 1).min(len),
        Motion::LineStart => buffer.line_start(caret),
        Motion::LineEnd => buffer.line_end(caret),
        Motion::Top => 0,
        Motion::Bottom => len,
        Motion::Up => {
            let start = buffer.line_start(caret);
            if start == 0 {
                0
            } else {
                let prev_start = buffer.line_start(start - 1);
                prev_start + (caret - start).min(start - 1 - prev_start)
            }
        }
        Motion::Down => {
            let end = buffer.line_end(caret);
            if end == len {
                len
            } else {
                let column = caret - buffer.line_start(caret);
                let next_start = end + 1;
                let next_end = buffer.line_end(next_start);
                next_start + column.min(next_end - next_start)
            }
        }
    }
}

/// Part of `start..end` that lies in the live region, if any
fn live_range(buffer: &ConsoleBuffer, start: usize, end: usize) -> Option<(usize, usize)> {
    let start = start.max(buffer.boundary());
    let end = end.min(buffer.len());
    (start < end).then_some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_buffer(output: &str) -> (ConsoleBuffer, InputRelay) {
        let mut buffer = ConsoleBuffer::new();
        buffer.set_text(output);
        buffer.unlock();
        let mut relay = InputRelay::new();
        relay.reset(&buffer);
        (buffer, relay)
    }

    fn type_str(relay: &mut InputRelay, buffer: &mut ConsoleBuffer, text: &str) {
        let mut sink = Vec::new();
        for ch in text.chars() {
            relay.key_pressed(buffer, &mut sink, EditKey::Char(ch)).unwrap();
        }
    }

    fn move_key(motion: Motion) -> EditKey {
        EditKey::Move {
            motion,
            extend: false,
        }
    }

    #[test]
    fn test_enter_sends_live_text_and_keeps_transcript() {
        let (mut buffer, mut relay) = running_buffer("Name? ");
        type_str(&mut relay, &mut buffer, "Ada");

        let mut stdin = Vec::new();
        relay.key_pressed(&mut buffer, &mut stdin, EditKey::Enter).unwrap();

        assert_eq!(stdin, b"Ada\n");
        assert_eq!(buffer.text(), "Name? Ada\n");
        // Enter does not move the boundary
        assert_eq!(buffer.boundary(), 6);
    }

    #[test]
    fn test_second_enter_sends_only_new_text() {
        let (mut buffer, mut relay) = running_buffer("> ");
        let mut stdin = Vec::new();
        type_str(&mut relay, &mut buffer, "one");
        relay.key_pressed(&mut buffer, &mut stdin, EditKey::Enter).unwrap();
        type_str(&mut relay, &mut buffer, "two");
        relay.key_pressed(&mut buffer, &mut stdin, EditKey::Enter).unwrap();
        assert_eq!(stdin, b"one\ntwo\n");
    }

    #[test]
    fn test_backspace_stops_at_boundary() {
        let (mut buffer, mut relay) = running_buffer("out");
        type_str(&mut relay, &mut buffer, "x");
        let mut sink = Vec::new();
        relay.key_pressed(&mut buffer, &mut sink, EditKey::Backspace).unwrap();
        relay.key_pressed(&mut buffer, &mut sink, EditKey::Backspace).unwrap();
        assert_eq!(buffer.text(), "out");
    }

    #[test]
    fn test_key_release_reverts_shrunk_buffer() {
        let (mut buffer, mut relay) = running_buffer("locked output\n");
        // A widget-native edit deleting into the locked text
        buffer.remove(3, 14).unwrap();
        assert!(relay.key_released(&mut buffer));
        assert_eq!(buffer.text(), "locked output\n");
        assert!(!relay.key_released(&mut buffer));
    }

    #[test]
    fn test_key_release_keeps_live_edits() {
        let (mut buffer, mut relay) = running_buffer("> ");
        type_str(&mut relay, &mut buffer, "ab");
        let mut sink = Vec::new();
        relay.key_pressed(&mut buffer, &mut sink, EditKey::Backspace).unwrap();
        assert!(!relay.key_released(&mut buffer));
        assert_eq!(buffer.text(), "> a");
    }

    #[test]
    fn test_caret_into_locked_region_snaps_to_end_after_event() {
        let (mut buffer, mut relay) = running_buffer("line one\nline two\n");
        type_str(&mut relay, &mut buffer, "abc");
        let mut sink = Vec::new();

        relay.key_pressed(&mut buffer, &mut sink, move_key(Motion::Up)).unwrap();
        // The move happens, the fix is deferred
        assert!(buffer.caret() < buffer.boundary());
        assert!(relay.run_deferred(&mut buffer));
        assert_eq!(buffer.caret(), buffer.len());
        assert!(!relay.run_deferred(&mut buffer));
    }

    #[test]
    fn test_selection_reaching_locked_region_is_snapped() {
        let (mut buffer, mut relay) = running_buffer("out");
        type_str(&mut relay, &mut buffer, "ab");
        let mut sink = Vec::new();
        for _ in 0..3 {
            relay
                .key_pressed(
                    &mut buffer,
                    &mut sink,
                    EditKey::Move {
                        motion: Motion::Left,
                        extend: true,
                    },
                )
                .unwrap();
        }
        assert_eq!(buffer.selection(), Some((2, 5)));
        assert!(relay.run_deferred(&mut buffer));
        assert_eq!(buffer.selection(), None);
        assert_eq!(buffer.caret(), 5);
    }

    #[test]
    fn test_typing_over_selection_only_replaces_live_part() {
        let (mut buffer, mut relay) = running_buffer("out");
        type_str(&mut relay, &mut buffer, "abc");
        buffer.set_selection(1, 5).unwrap();
        let mut sink = Vec::new();
        relay.key_pressed(&mut buffer, &mut sink, EditKey::Char('Z')).unwrap();
        assert_eq!(buffer.text(), "outZc");
    }

    #[test]
    fn test_paste_inserts_without_sending() {
        let (mut buffer, mut relay) = running_buffer("$ ");
        let mut stdin = Vec::new();
        relay
            .key_pressed(&mut buffer, &mut stdin, EditKey::Paste("ls -l".to_string()))
            .unwrap();
        assert!(stdin.is_empty());
        assert_eq!(buffer.live_text(), "ls -l");
    }

    #[test]
    fn test_down_moves_by_column() {
        let (mut buffer, mut relay) = running_buffer("");
        type_str(&mut relay, &mut buffer, "abcd\nxy");
        buffer.set_caret(2).unwrap();
        let mut sink = Vec::new();
        relay.key_pressed(&mut buffer, &mut sink, move_key(Motion::Down)).unwrap();
        assert_eq!(buffer.caret(), 7);
    }
}
