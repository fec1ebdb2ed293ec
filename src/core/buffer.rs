//! Console text buffer
//!
//! Holds the displayed transcript and the boundary between locked
//! (process-written) text and the live tail the user may edit.
//!
//! Offsets are character offsets, not byte offsets.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Console is not editable")]
    NotEditable,

    #[error("Offset {offset} is out of range (length {len})")]
    OutOfRange { offset: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, BufferError>;

/// Last known-good content, taken whenever locked text is written
#[derive(Clone, Debug, Default)]
struct Snapshot {
    text: Vec<char>,
    boundary: usize,
}

/// Displayed text plus the locked/live split
#[derive(Debug, Default)]
pub struct ConsoleBuffer {
    /// Full transcript
    text: Vec<char>,
    /// Everything before this offset is locked
    boundary: usize,
    /// Whether user edits are accepted at all
    editable: bool,
    /// Caret offset
    caret: usize,
    /// Selection anchor; the selection spans anchor..caret
    anchor: Option<usize>,
    snapshot: Snapshot,
}

impl ConsoleBuffer {
    /// Create an empty, locked buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole content. Everything becomes locked text.
    pub fn set_text(&mut self, text: &str) {
        self.text = text.chars().collect();
        self.boundary = self.text.len();
        self.caret = self.text.len();
        self.anchor = None;
        self.take_snapshot();
    }

    /// Append locked text at the end and move the boundary past it.
    ///
    /// Any live text typed since the last append is absorbed into the
    /// locked region.
    pub fn append_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.text.extend(text.chars());
        self.boundary = self.text.len();
        self.caret = self.text.len();
        self.anchor = None;
        self.take_snapshot();
    }

    /// Full content as a string
    #[cfg(test)]
    pub fn text(&self) -> String {
        self.text.iter().collect()
    }

    /// Content between two offsets (clamped)
    pub fn slice(&self, start: usize, end: usize) -> String {
        let end = end.min(self.text.len());
        let start = start.min(end);
        self.text[start..end].iter().collect()
    }

    /// Text from the boundary to the end
    #[cfg(test)]
    pub fn live_text(&self) -> String {
        self.slice(self.boundary, self.text.len())
    }

    pub fn chars(&self) -> &[char] {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn ends_with_newline(&self) -> bool {
        self.text.last() == Some(&'\n')
    }

    pub fn boundary(&self) -> usize {
        self.boundary
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    /// Lock the whole buffer: nothing is live until the next unlock
    pub fn lock(&mut self) {
        self.editable = false;
        self.boundary = self.text.len();
        self.anchor = None;
        self.take_snapshot();
    }

    pub fn unlock(&mut self) {
        self.editable = true;
    }

    pub fn caret(&self) -> usize {
        self.caret
    }

    pub fn anchor(&self) -> Option<usize> {
        self.anchor
    }

    /// Ordered selection range, if a non-empty selection exists
    pub fn selection(&self) -> Option<(usize, usize)> {
        let anchor = self.anchor?;
        if anchor == self.caret {
            return None;
        }
        Some((anchor.min(self.caret), anchor.max(self.caret)))
    }

    pub fn selected_text(&self) -> Option<String> {
        self.selection().map(|(start, end)| self.slice(start, end))
    }

    /// Move the caret; rejected while the buffer is locked
    pub fn set_caret(&mut self, offset: usize) -> Result<()> {
        if !self.editable {
            return Err(BufferError::NotEditable);
        }
        self.check_offset(offset)?;
        self.caret = offset;
        self.anchor = None;
        Ok(())
    }

    /// Select `anchor..caret`; rejected while the buffer is locked
    pub fn set_selection(&mut self, anchor: usize, caret: usize) -> Result<()> {
        if !self.editable {
            return Err(BufferError::NotEditable);
        }
        self.check_offset(anchor)?;
        self.check_offset(caret)?;
        self.anchor = Some(anchor);
        self.caret = caret;
        Ok(())
    }

    /// Move the caret regardless of the lock state (programmatic scrolling)
    pub fn set_caret_ignoring_lock(&mut self, offset: usize) {
        self.caret = offset.min(self.text.len());
        self.anchor = None;
    }

    /// Select `anchor..caret` regardless of the lock state (offsets clamped)
    pub fn select_ignoring_lock(&mut self, anchor: usize, caret: usize) {
        let len = self.text.len();
        self.anchor = Some(anchor.min(len));
        self.caret = caret.min(len);
    }

    /// Insert text at `offset` the way the display widget would.
    ///
    /// No boundary check happens here; guarding the locked region is the
    /// input relay's job.
    pub fn insert(&mut self, offset: usize, text: &str) -> Result<()> {
        if !self.editable {
            return Err(BufferError::NotEditable);
        }
        self.check_offset(offset)?;
        let chars: Vec<char> = text.chars().collect();
        let count = chars.len();
        self.text.splice(offset..offset, chars);
        self.caret = offset + count;
        self.anchor = None;
        Ok(())
    }

    /// Remove `start..end` the way the display widget would
    pub fn remove(&mut self, start: usize, end: usize) -> Result<()> {
        if !self.editable {
            return Err(BufferError::NotEditable);
        }
        self.check_offset(end)?;
        let start = start.min(end);
        self.text.drain(start..end);
        self.boundary = self.boundary.min(self.text.len());
        self.caret = start;
        self.anchor = None;
        Ok(())
    }

    /// Length recorded at the last locked write
    pub fn snapshot_len(&self) -> usize {
        self.snapshot.text.len()
    }

    /// Put back the content recorded at the last locked write
    pub fn restore_snapshot(&mut self) {
        self.text = self.snapshot.text.clone();
        self.boundary = self.snapshot.boundary;
        self.caret = self.text.len();
        self.anchor = None;
    }

    /// Offset where the line containing `offset` starts
    pub fn line_start(&self, offset: usize) -> usize {
        let offset = offset.min(self.text.len());
        self.text[..offset]
            .iter()
            .rposition(|&c| c == '\n')
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    /// Offset of the newline ending the line containing `offset` (or the end)
    pub fn line_end(&self, offset: usize) -> usize {
        let offset = offset.min(self.text.len());
        self.text[offset..]
            .iter()
            .position(|&c| c == '\n')
            .map(|i| offset + i)
            .unwrap_or(self.text.len())
    }

    fn check_offset(&self, offset: usize) -> Result<()> {
        if offset > self.text.len() {
            return Err(BufferError::OutOfRange {
                offset,
                len: self.text.len(),
            });
        }
        Ok(())
    }

    fn take_snapshot(&mut self) {
        self.snapshot = Snapshot {
            text: self.text.clone(),
            boundary: self.boundary,
        };
    }
}
