//! Terminal host
//!
//! Implements [`ConsoleHost`] on the bottom line of the terminal: warnings
//! and prompts are modal and run their own small event loop until the user
//! answers.

use std::io::{self, Write};
use std::path::Path;

use crossterm::{
    cursor::{MoveTo, Show},
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    queue,
};
use tracing::{debug, error, info};
use unicode_width::UnicodeWidthStr;

use super::renderer::{draw_bottom_line, Renderer};
use crate::config::ColorScheme;
use crate::core::session::ConsoleHost;

/// Single-line text input state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineInput {
    text: Vec<char>,
    cursor: usize,
}

/// Outcome of one key in a line prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptStep {
    Continue,
    Submit(String),
    Cancel,
}

impl LineInput {
    pub fn new(initial: &str) -> Self {
        let text: Vec<char> = initial.chars().collect();
        let cursor = text.len();
        Self { text, cursor }
    }

    pub fn text(&self) -> String {
        self.text.iter().collect()
    }

    /// Text left of the cursor
    pub fn before_cursor(&self) -> String {
        self.text[..self.cursor].iter().collect()
    }

    pub fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> PromptStep {
        match code {
            KeyCode::Enter => return PromptStep::Submit(self.text()),
            KeyCode::Esc => return PromptStep::Cancel,
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                return PromptStep::Cancel
            }
            KeyCode::Char('u') if modifiers.contains(KeyModifiers::CONTROL) => {
                self.text.drain(..self.cursor);
                self.cursor = 0;
            }
            KeyCode::Char(ch) if !modifiers.contains(KeyModifiers::CONTROL) => {
                self.text.insert(self.cursor, ch);
                self.cursor += 1;
            }
            KeyCode::Backspace if self.cursor > 0 => {
                self.cursor -= 1;
                self.text.remove(self.cursor);
            }
            KeyCode::Delete if self.cursor < self.text.len() => {
                self.text.remove(self.cursor);
            }
            KeyCode::Left => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Right => self.cursor = (self.cursor + 1).min(self.text.len()),
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.cursor = self.text.len(),
            _ => {}
        }
        PromptStep::Continue
    }
}

/// Modal warning and prompt lines on the real terminal
pub struct TerminalHost {
    colors: ColorScheme,
}

impl TerminalHost {
    pub fn new(colors: ColorScheme) -> Self {
        Self { colors }
    }

    /// Ask for one line of text. `None` when cancelled.
    pub fn prompt_line(&mut self, label: &str, initial: &str) -> Option<String> {
        let mut input = LineInput::new(initial);
        loop {
            if let Err(e) = self.draw_prompt(label, &input) {
                error!("Failed to draw prompt: {}", e);
                return None;
            }
            let key = match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => key,
                Ok(_) => continue,
                Err(e) => {
                    error!("Failed to read prompt input: {}", e);
                    return None;
                }
            };
            match input.handle_key(key.code, key.modifiers) {
                PromptStep::Continue => {}
                PromptStep::Submit(text) => return Some(text),
                PromptStep::Cancel => {
                    debug!("Prompt {:?} cancelled", label);
                    return None;
                }
            }
        }
    }

    fn draw_prompt(&self, label: &str, input: &LineInput) -> io::Result<()> {
        let (_, rows) = Renderer::size()?;
        let mut out = io::stdout().lock();
        let line = format!(" {}{}", label, input.text());
        draw_bottom_line(
            &mut out,
            rows,
            &line,
            self.colors.prompt_fg,
            self.colors.prompt_bg,
        )?;
        let col = 1 + label.width() + input.before_cursor().width();
        queue!(out, MoveTo(col as u16, rows.saturating_sub(1)), Show)?;
        out.flush()
    }

    fn draw_warning(&self, message: &str) -> io::Result<()> {
        let (_, rows) = Renderer::size()?;
        let mut out = io::stdout().lock();
        let line = format!(" {}  [press any key]", message);
        draw_bottom_line(
            &mut out,
            rows,
            &line,
            self.colors.warning_fg,
            self.colors.warning_bg,
        )?;
        out.flush()
    }
}

impl ConsoleHost for TerminalHost {
    fn warn(&mut self, message: &str) {
        info!("Warning shown: {}", message);
        if let Err(e) = self.draw_warning(message) {
            error!("Failed to draw warning: {}", e);
            return;
        }
        loop {
            match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => break,
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to read key: {}", e);
                    break;
                }
            }
        }
    }

    fn prompt_command(&mut self, dir: &Path, initial: &str) -> Option<String> {
        let label = format!("Run in {}: ", dir.display());
        self.prompt_line(&label, initial)
    }

    fn refresh_file_tree(&mut self) {
        debug!("Process ended; files may have changed");
    }
}
