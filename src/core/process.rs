//! Child process plumbing
//!
//! Spawns a command with stdout and stderr merged into one pipe, keeps the
//! child behind a shared handle so it can be killed from a worker thread
//! while another thread waits on it, and feeds stdin from a writer thread.

use std::io::{self, PipeReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("No command given")]
    EmptyCommand,

    #[error("Working directory {} does not exist", .0.display())]
    InvalidDirectory(PathBuf),

    #[error("Failed to create output pipe: {0}")]
    PipeCreation(#[source] io::Error),

    #[error("{0}")]
    Spawn(#[source] io::Error),

    #[error("Process input is closed")]
    InputClosed,
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// Exit code reported when the real one cannot be determined
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Split a command line on whitespace. Quoting is not supported.
pub fn tokenize(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Numeric exit code; on Unix a signal death maps to 128 + signal
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    UNKNOWN_EXIT_CODE
}

/// Shared handle to a spawned child
#[derive(Clone)]
pub struct ProcessHandle {
    child: Arc<Mutex<Child>>,
    pid: u32,
}

impl ProcessHandle {
    fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Arc::new(Mutex::new(child)),
            pid,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn lock(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until the child exits, polling so the lock is never held
    /// across the wait and a kill request can get through.
    pub fn wait_for_exit(&self, poll: Duration) -> io::Result<ExitStatus> {
        loop {
            if let Some(status) = self.lock().try_wait()? {
                return Ok(status);
            }
            thread::sleep(poll);
        }
    }

    /// Ask the OS to terminate the child on a worker thread
    pub fn request_kill(&self) -> JoinHandle<()> {
        let handle = self.clone();
        thread::spawn(move || {
            let result = handle.lock().kill();
            match result {
                Ok(()) => info!("Kill requested for pid {}", handle.pid),
                // Already exited and reaped
                Err(e) => debug!("Kill for pid {} had no effect: {}", handle.pid, e),
            }
        })
    }
}

/// `Write` end for the child's stdin.
///
/// Writes are queued to a dedicated thread so the caller never blocks on
/// a full pipe. Dropping the sink closes the child's stdin.
pub struct StdinSink {
    tx: Option<Sender<Vec<u8>>>,
    writer_thread: Option<JoinHandle<()>>,
}

impl StdinSink {
    fn spawn(mut stdin: ChildStdin) -> Self {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let writer_thread = thread::spawn(move || {
            for chunk in rx {
                if let Err(e) = stdin.write_all(&chunk).and_then(|_| stdin.flush()) {
                    warn!("Failed to write to process stdin: {}", e);
                    break;
                }
            }
        });
        Self {
            tx: Some(tx),
            writer_thread: Some(writer_thread),
        }
    }
}

impl Write for StdinSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        tx.send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for StdinSink {
    fn drop(&mut self) {
        // Closing the channel ends the writer loop
        self.tx.take();
        if let Some(handle) = self.writer_thread.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

/// A freshly spawned child and its I/O ends
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub stdin: StdinSink,
    /// Merged stdout + stderr
    pub output: PipeReader,
}

/// Spawn `command` in `dir` with stdout and stderr sharing one pipe
pub fn spawn(command: &str, dir: &Path) -> Result<SpawnedProcess> {
    let args = tokenize(command);
    let (program, rest) = args.split_first().ok_or(ProcessError::EmptyCommand)?;

    if !dir.is_dir() {
        return Err(ProcessError::InvalidDirectory(dir.to_path_buf()));
    }

    let (output, writer) = io::pipe().map_err(ProcessError::PipeCreation)?;
    let stdout_writer = writer.try_clone().map_err(ProcessError::PipeCreation)?;

    // The Command owns our copies of the write end; it must be dropped
    // right after spawning or the reader never sees end-of-stream.
    let mut child = {
        let mut cmd = Command::new(program);
        cmd.args(rest)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(stdout_writer)
            .stderr(writer);
        cmd.spawn().map_err(ProcessError::Spawn)?
    };

    let stdin = match child.stdin.take() {
        Some(stdin) => stdin,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::InputClosed);
        }
    };

    info!("Spawned {:?} (pid {}) in {}", args, child.id(), dir.display());

    Ok(SpawnedProcess {
        handle: ProcessHandle::new(child),
        stdin: StdinSink::spawn(stdin),
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_tokenize_splits_on_whitespace() {
        assert_eq!(tokenize("javac  Main.java\t-g"), vec!["javac", "Main.java", "-g"]);
        assert!(tokenize("   ").is_empty());
        // No quoting support
        assert_eq!(tokenize("echo \"a b\""), vec!["echo", "\"a", "b\""]);
    }

    #[test]
    fn test_spawn_rejects_empty_command() {
        let dir = std::env::temp_dir();
        assert!(matches!(spawn("  ", &dir), Err(ProcessError::EmptyCommand)));
    }

    #[test]
    fn test_spawn_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            spawn("echo hi", &missing),
            Err(ProcessError::InvalidDirectory(_))
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_spawn_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            spawn("nosuchprogram-runcon", dir.path()),
            Err(ProcessError::Spawn(_))
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_stderr_is_merged_into_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = spawn("ls /definitely-missing-runcon", dir.path()).unwrap();
        let mut out = String::new();
        p.output.read_to_string(&mut out).unwrap();
        let status = p.handle.wait_for_exit(Duration::from_millis(5)).unwrap();
        assert!(out.contains("definitely-missing-runcon"));
        assert_ne!(exit_code(status), 0);
    }

    #[test]
    #[cfg(unix)]
    fn test_stdin_sink_reaches_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = spawn("cat", dir.path()).unwrap();
        p.stdin.write_all(b"ping\n").unwrap();
        drop(p.stdin);

        let mut out = String::new();
        p.output.read_to_string(&mut out).unwrap();
        assert_eq!(out, "ping\n");
        let status = p.handle.wait_for_exit(Duration::from_millis(5)).unwrap();
        assert_eq!(exit_code(status), 0);
    }

    #[test]
    #[cfg(unix)]
    fn test_kill_reports_signal_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let p = spawn("sleep 5", dir.path()).unwrap();
        p.handle.request_kill().join().unwrap();
        let status = p.handle.wait_for_exit(Duration::from_millis(5)).unwrap();
        // SIGKILL
        assert_eq!(exit_code(status), 137);
    }
}
