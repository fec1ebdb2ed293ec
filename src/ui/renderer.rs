//! Console renderer using crossterm
//!
//! Draws the console buffer (wrapped to the terminal width) and a status
//! bar. Locked text, live text and the selection get distinct colors.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute, queue,
    style::{Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use unicode_width::UnicodeWidthChar;

use crate::config::{Color, ColorScheme};
use crate::core::buffer::ConsoleBuffer;
use crate::core::session::SessionState;

const TAB_WIDTH: usize = 8;

/// One screen cell produced from a buffer character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    /// Buffer offset of the source character
    pub offset: usize,
    pub width: usize,
}

/// A visual row after wrapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    /// Buffer offset where the row starts
    pub start: usize,
    pub cells: Vec<Cell>,
}

impl Row {
    fn width(&self) -> usize {
        self.cells.iter().map(|c| c.width).sum()
    }
}

/// Wrap buffer text into rows of at most `width` columns
pub fn layout(chars: &[char], width: usize) -> Vec<Row> {
    let width = width.max(1);
    let mut rows = Vec::new();
    let mut row = Row::default();
    let mut col = 0;

    for (offset, &ch) in chars.iter().enumerate() {
        if ch == '\n' {
            rows.push(std::mem::take(&mut row));
            row.start = offset + 1;
            col = 0;
            continue;
        }

        let (display, cell_width) = match ch {
            '\t' => (' ', TAB_WIDTH - col % TAB_WIDTH),
            '\r' => continue,
            c if c.is_control() => ('?', 1),
            c => (c, UnicodeWidthChar::width(c).unwrap_or(1).max(1)),
        };
        let cell_width = cell_width.min(width);

        if col + cell_width > width {
            rows.push(std::mem::take(&mut row));
            row.start = offset;
            col = 0;
        }
        row.cells.push(Cell {
            ch: display,
            offset,
            width: cell_width,
        });
        col += cell_width;
    }

    rows.push(row);
    rows
}

/// Visual (row, column) of a buffer offset
pub fn caret_position(rows: &[Row], caret: usize) -> (usize, usize) {
    let row_idx = rows
        .iter()
        .rposition(|r| r.start <= caret)
        .unwrap_or(0);
    let col = rows
        .get(row_idx)
        .map(|r| {
            r.cells
                .iter()
                .take_while(|c| c.offset < caret)
                .map(|c| c.width)
                .sum()
        })
        .unwrap_or(0);
    (row_idx, col)
}

/// Status information shown at the bottom
#[derive(Debug, Clone)]
pub struct StatusLine {
    pub state: SessionState,
    pub working_dir: String,
    pub command: Option<String>,
    pub run_previous: bool,
    /// Pid of the running process
    pub pid: Option<u32>,
    /// Exit code of the last process, once idle
    pub exit_code: Option<i32>,
}

impl StatusLine {
    pub fn text(&self) -> String {
        let command = self.command.as_deref().unwrap_or("-");
        let previous = if self.run_previous { " ^P:previous" } else { "" };
        let detail = match (self.pid, self.exit_code) {
            (Some(pid), _) => format!(" pid {}", pid),
            (None, Some(code)) => format!(" exit {}", code),
            (None, None) => String::new(),
        };
        format!(
            " [{}{}] {} | {} | ^N:run ^K:end ^D:dir{} ^Q:quit",
            self.state.label(),
            detail,
            self.working_dir,
            command,
            previous
        )
    }
}

/// Console renderer
pub struct Renderer {
    /// Whether the terminal has been initialized
    initialized: bool,
    /// First visual row on screen
    scroll_top: usize,
    colors: ColorScheme,
    show_status: bool,
}

impl Renderer {
    pub fn new(colors: ColorScheme, show_status: bool) -> Self {
        Self {
            initialized: false,
            scroll_top: 0,
            colors,
            show_status,
        }
    }

    /// Initialize the terminal for rendering
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;
        stdout.flush()?;
        self.initialized = true;
        Ok(())
    }

    /// Cleanup the terminal
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(stdout, ResetColor, Show, EnableLineWrap, LeaveAlternateScreen);
        let _ = stdout.flush();

        // Disable raw mode - this is the most important part
        terminal::disable_raw_mode()?;
        Ok(())
    }

    /// Get terminal size
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }

    /// Render the console and status bar
    pub fn render(&mut self, buffer: &ConsoleBuffer, status: &StatusLine) -> io::Result<()> {
        let (cols, rows) = Self::size()?;
        let text_rows = usize::from(if self.show_status {
            rows.saturating_sub(1)
        } else {
            rows
        });
        let width = cols as usize;

        let layout = layout(buffer.chars(), width);
        let (caret_row, caret_col) = caret_position(&layout, buffer.caret());
        self.scroll_to(caret_row, text_rows);

        let stdout = io::stdout();
        let mut out = io::BufWriter::with_capacity(65536, stdout.lock());
        queue!(out, Hide)?;

        let boundary = buffer.boundary();
        let selection = buffer.selection();
        for screen_row in 0..text_rows {
            queue!(out, MoveTo(0, screen_row as u16))?;
            if let Some(row) = layout.get(self.scroll_top + screen_row) {
                for cell in &row.cells {
                    let selected = selection
                        .is_some_and(|(start, end)| cell.offset >= start && cell.offset < end);
                    let (fg, bg) = if selected {
                        (self.colors.selection_fg, self.colors.selection_bg)
                    } else if cell.offset < boundary {
                        (self.colors.locked_fg, self.colors.background)
                    } else {
                        (self.colors.live_fg, self.colors.background)
                    };
                    queue!(
                        out,
                        SetForegroundColor(fg.to_crossterm()),
                        SetBackgroundColor(bg.to_crossterm())
                    )?;
                    if cell.ch == ' ' && cell.width > 1 {
                        queue!(out, Print(" ".repeat(cell.width)))?;
                    } else {
                        queue!(out, Print(cell.ch))?;
                    }
                }
                if row.width() < width {
                    queue!(
                        out,
                        SetBackgroundColor(self.colors.background.to_crossterm())
                    )?;
                }
            } else {
                queue!(
                    out,
                    SetBackgroundColor(self.colors.background.to_crossterm())
                )?;
            }
            queue!(out, Clear(ClearType::UntilNewLine))?;
        }

        if self.show_status {
            let bg = if status.state == SessionState::Idle {
                self.colors.status_bar_bg
            } else {
                self.colors.status_running_bg
            };
            draw_bottom_line(&mut out, rows, &status.text(), self.colors.status_bar_fg, bg)?;
        }

        queue!(out, ResetColor)?;
        if caret_row >= self.scroll_top {
            let row = (caret_row - self.scroll_top) as u16;
            queue!(out, MoveTo(caret_col.min(width.saturating_sub(1)) as u16, row), Show)?;
        }
        out.flush()
    }

    fn scroll_to(&mut self, caret_row: usize, height: usize) {
        let height = height.max(1);
        if caret_row < self.scroll_top {
            self.scroll_top = caret_row;
        } else if caret_row >= self.scroll_top + height {
            self.scroll_top = caret_row + 1 - height;
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Paint `text` across the last terminal row
pub fn draw_bottom_line<W: Write>(
    out: &mut W,
    rows: u16,
    text: &str,
    fg: Color,
    bg: Color,
) -> io::Result<()> {
    queue!(
        out,
        MoveTo(0, rows.saturating_sub(1)),
        SetForegroundColor(fg.to_crossterm()),
        SetBackgroundColor(bg.to_crossterm()),
        Print(text),
        Clear(ClearType::UntilNewLine),
        ResetColor
    )
}
