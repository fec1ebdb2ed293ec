//! Core console components.
//!
//! This module contains the process-facing half of the console:
//!
//! - **buffer**: Transcript text with the locked/live boundary
//! - **process**: Spawning with merged output, kill and wait, stdin writer
//! - **pump**: Background reader posting output to the UI thread
//! - **relay**: Key handling for the live region and stdin delivery
//! - **session**: High-level session tying the pieces together
//!
//! # Architecture
//!
//! ```text
//! ProcessSession (UI thread)
//! ├── ConsoleBuffer (transcript + boundary)
//! ├── InputRelay ──> StdinSink ──> writer thread ──> child stdin
//! └── mpsc::Receiver<SessionEvent>
//!         ^
//!         └── OutputPump thread <── merged stdout/stderr pipe
//! ```

pub mod buffer;
pub mod process;
pub mod pump;
pub mod relay;
pub mod session;
