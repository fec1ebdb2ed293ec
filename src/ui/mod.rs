//! User interface rendering and input handling.
//!
//! - **renderer**: Console buffer and status bar drawing
//! - **keymapper**: Keyboard input to console commands and edits
//! - **host**: Modal prompts and warnings for the session

pub mod host;
pub mod keymapper;
pub mod renderer;

pub use host::TerminalHost;
pub use keymapper::*;
pub use renderer::{Renderer, StatusLine};
