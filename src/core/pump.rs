//! Output pump
//!
//! Drains a child's merged output on a background thread and posts every
//! decoded chunk to the UI thread as a [`SessionEvent`]. Nothing here
//! touches the console buffer directly.

use std::io::{ErrorKind, Read};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use super::process::{exit_code, ProcessHandle, UNKNOWN_EXIT_CODE};

/// Messages from the pump thread to the session owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Text produced by the process, in production order
    Output(String),
    /// The output stream reached its end (or failed)
    StreamClosed,
    /// The process has been reaped
    Exited { code: i32 },
}

/// Incremental UTF-8 decoder that keeps split sequences across reads
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `bytes` as possible; an incomplete trailing
    /// sequence is held back for the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        let mut start = 0;

        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(s) => {
                    out.push_str(s);
                    start = self.pending.len();
                }
                Err(e) => {
                    let valid = start + e.valid_up_to();
                    if let Ok(s) = std::str::from_utf8(&self.pending[start..valid]) {
                        out.push_str(s);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid + len;
                        }
                        None => {
                            // Incomplete sequence at the end
                            start = valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        out
    }

    /// Flush whatever is left at end-of-stream
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}

/// Background reader for one process
pub struct OutputPump;

impl OutputPump {
    /// Start pumping `output` into `tx`. After end-of-stream the thread
    /// waits for the process and posts its exit code as the final event.
    pub fn spawn<R>(
        output: R,
        process: ProcessHandle,
        tx: Sender<SessionEvent>,
        poll: Duration,
    ) -> JoinHandle<()>
    where
        R: Read + Send + 'static,
    {
        thread::spawn(move || {
            Self::drain(output, &tx);

            let code = match process.wait_for_exit(poll) {
                Ok(status) => exit_code(status),
                Err(e) => {
                    warn!("Wait for pid {} was interrupted: {}", process.pid(), e);
                    UNKNOWN_EXIT_CODE
                }
            };
            debug!("Process {} exited with {}", process.pid(), code);
            let _ = tx.send(SessionEvent::Exited { code });
        })
    }

    /// Read until end-of-stream, forwarding text in order
    fn drain<R: Read>(mut output: R, tx: &Sender<SessionEvent>) {
        let mut buffer = vec![0u8; 4096];
        let mut decoder = Utf8Decoder::new();

        loop {
            match output.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    let text = decoder.decode(&buffer[..n]);
                    if !text.is_empty() && tx.send(SessionEvent::Output(text)).is_err() {
                        // Receiver is gone; keep draining so the child never
                        // blocks on a full pipe
                        continue;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Failed to read process output: {}", e);
                    break;
                }
            }
        }

        let tail = decoder.finish();
        if !tail.is_empty() {
            let _ = tx.send(SessionEvent::Output(tail));
        }
        let _ = tx.send(SessionEvent::StreamClosed);
    }
}
