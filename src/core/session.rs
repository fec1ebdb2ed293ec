//! Session management
//!
//! A `ProcessSession` drives one external process at a time through the
//! console: admission, spawning, the output pump, input relay,
//! termination and the final status banner. All of its methods run on the
//! UI thread; the pump talks back through a channel drained by
//! [`ProcessSession::process_events`].

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use super::buffer::ConsoleBuffer;
use super::process::{self, ProcessHandle, StdinSink};
use super::pump::{OutputPump, SessionEvent};
use super::relay::{motion_target, EditKey, InputRelay, Motion};
use crate::history::CommandHistory;

/// Default interval for the wait-for-exit poll loop
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("A process currently owns the console")]
    ProcessRunning,
}

/// Lifecycle of the console's process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Ending,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Ending => "ending",
        }
    }
}

/// Services the session needs from the surrounding application
pub trait ConsoleHost {
    /// Show a modal warning
    fn warn(&mut self, message: &str);

    /// Ask for a command to run in `dir`, pre-filled with `initial`.
    /// `None` when the user cancels.
    fn prompt_command(&mut self, dir: &Path, initial: &str) -> Option<String>;

    /// A process ended and may have changed files on disk
    fn refresh_file_tree(&mut self) {}

    /// Whether "run previous" is currently available
    fn run_previous_changed(&mut self, _enabled: bool) {}
}

/// Banner appended once the process has been reaped
pub fn exit_banner(code: i32, aborted: bool) -> String {
    if code == 0 {
        format!("Process ended normally (exit value = {})", code)
    } else if aborted {
        format!("Process aborted (exit value = {})", code)
    } else {
        format!("Process ended with error (exit value = {})", code)
    }
}

struct ActiveProcess {
    handle: ProcessHandle,
    stdin: StdinSink,
    pump: Option<JoinHandle<()>>,
}

/// Console process session
pub struct ProcessSession<H: ConsoleHost> {
    host: H,
    buffer: ConsoleBuffer,
    relay: InputRelay,
    history: CommandHistory,
    state: SessionState,
    working_dir: PathBuf,
    command: Option<String>,
    process: Option<ActiveProcess>,
    /// Termination was requested by the user
    aborted: bool,
    exit_code: Option<i32>,
    run_previous: bool,
    poll_interval: Duration,
    event_tx: Sender<SessionEvent>,
    event_rx: Receiver<SessionEvent>,
}

impl<H: ConsoleHost> ProcessSession<H> {
    pub fn new(host: H, working_dir: PathBuf) -> Self {
        let (event_tx, event_rx) = mpsc::channel();
        Self {
            host,
            buffer: ConsoleBuffer::new(),
            relay: InputRelay::new(),
            history: CommandHistory::new(),
            state: SessionState::Idle,
            working_dir,
            command: None,
            process: None,
            aborted: false,
            exit_code: None,
            run_previous: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_tx,
            event_rx,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[cfg(test)]
    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn buffer(&self) -> &ConsoleBuffer {
        &self.buffer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Command of the current or most recent process
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    #[cfg(test)]
    pub fn aborted(&self) -> bool {
        self.aborted
    }

    /// Exit code of the last process, once the session is idle again
    pub fn exit_code(&self) -> Option<i32> {
        match self.state {
            SessionState::Idle => self.exit_code,
            _ => None,
        }
    }

    pub fn run_previous_enabled(&self) -> bool {
        self.run_previous
    }

    /// Pid of the live process, if any
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.handle.pid())
    }

    /// True when no process holds the console
    pub fn is_process_ended(&self) -> bool {
        self.state == SessionState::Idle
    }

    /// Change directory. Only valid while idle; returns whether "run
    /// previous" is available for the new directory.
    pub fn set_working_dir(&mut self, dir: PathBuf) -> Result<bool, ConsoleError> {
        self.ensure_idle()?;
        info!("Working directory set to {}", dir.display());
        self.working_dir = dir;
        self.update_run_previous();
        Ok(self.run_previous)
    }

    /// Prompt for a command, remember it for this directory and run it
    pub fn start_new_cmd(&mut self) -> bool {
        if !self.admit() {
            return false;
        }
        let initial = self
            .history
            .last_command(&self.working_dir)
            .unwrap_or_default()
            .to_string();
        let Some(command) = self.host.prompt_command(&self.working_dir, &initial) else {
            return false;
        };
        let command = command.trim().to_string();
        if command.is_empty() {
            return false;
        }
        self.history.record(&self.working_dir, &command);
        self.start_process(&command)
    }

    /// Re-run the last command confirmed for the current directory
    pub fn start_previous_cmd(&mut self) -> bool {
        if !self.admit() {
            return false;
        }
        let Some(command) = self
            .history
            .last_command(&self.working_dir)
            .map(str::to_string)
        else {
            self.host.warn(&format!(
                "No previous command for {}",
                self.working_dir.display()
            ));
            return false;
        };
        self.start_process(&command)
    }

    /// Launch `command` in the working directory. Rejected with a warning
    /// if a process is already active.
    pub fn start_process(&mut self, command: &str) -> bool {
        if !self.admit() {
            return false;
        }

        let command = command.trim().to_string();
        self.state = SessionState::Starting;
        self.aborted = false;
        self.exit_code = None;
        self.command = Some(command.clone());
        self.buffer.set_text(&format!("Run {}\n", command));
        self.set_run_previous(false);

        info!("Starting {:?} in {}", command, self.working_dir.display());

        match process::spawn(&command, &self.working_dir) {
            Ok(spawned) => {
                let pump = OutputPump::spawn(
                    spawned.output,
                    spawned.handle.clone(),
                    self.event_tx.clone(),
                    self.poll_interval,
                );
                self.process = Some(ActiveProcess {
                    handle: spawned.handle,
                    stdin: spawned.stdin,
                    pump: Some(pump),
                });
                self.buffer.unlock();
                self.buffer.set_caret_ignoring_lock(self.buffer.len());
                self.relay.reset(&self.buffer);
                self.state = SessionState::Running;
                true
            }
            Err(e) => {
                error!("Failed to start {:?}: {}", command, e);
                let message = format!(
                    "Failed to run \"{}\" in {}: {}",
                    command,
                    self.working_dir.display(),
                    e
                );
                self.append_banner(&message);
                self.buffer.lock();
                self.state = SessionState::Idle;
                self.update_run_previous();
                self.host.warn(&message);
                false
            }
        }
    }

    /// Request termination of the running process. Does nothing when no
    /// process is active or termination was already requested.
    pub fn end_process(&mut self) {
        if !matches!(self.state, SessionState::Running | SessionState::Ending) || self.aborted {
            return;
        }
        let Some(process) = &self.process else {
            return;
        };
        self.aborted = true;
        self.state = SessionState::Ending;
        info!("Ending process {}", process.handle.pid());
        // Detached; the pump reports the exit
        let _ = process.handle.request_kill();
    }

    /// Apply everything the pump has posted. Returns true if anything
    /// changed.
    pub fn process_events(&mut self) -> bool {
        let mut changed = false;
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => {
                    changed = true;
                    self.apply_event(event);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        changed
    }

    fn apply_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Output(text) => {
                self.buffer.append_text(&text);
            }
            SessionEvent::StreamClosed => {
                if self.state == SessionState::Running {
                    self.state = SessionState::Ending;
                }
            }
            SessionEvent::Exited { code } => self.finish(code),
        }
    }

    fn finish(&mut self, code: i32) {
        self.exit_code = Some(code);
        let banner = exit_banner(code, self.aborted);
        self.append_banner(&banner);

        if let Some(mut process) = self.process.take() {
            // Exited is the pump's last message, so this returns promptly
            if let Some(pump) = process.pump.take() {
                let _ = pump.join();
            }
            info!("Process {} finished: {}", process.handle.pid(), banner);
        }

        self.buffer.lock();
        self.state = SessionState::Idle;
        self.update_run_previous();
        self.host.refresh_file_tree();
    }

    /// Route a key press to the input relay while a process runs. While
    /// idle only caret motions apply, for browsing the transcript.
    pub fn key_pressed(&mut self, key: EditKey) -> bool {
        if self.state == SessionState::Idle {
            return match key {
                EditKey::Move { motion, extend } => {
                    self.browse(motion, extend);
                    true
                }
                _ => false,
            };
        }
        if self.state != SessionState::Running {
            return false;
        }
        let Some(process) = self.process.as_mut() else {
            return false;
        };
        if let Err(e) = self.relay.key_pressed(&mut self.buffer, &mut process.stdin, key) {
            warn!("Input not delivered: {}", e);
        }
        true
    }

    fn browse(&mut self, motion: Motion, extend: bool) {
        let caret = self.buffer.caret();
        let target = motion_target(&self.buffer, caret, motion);
        if extend {
            let anchor = self.buffer.anchor().unwrap_or(caret);
            self.buffer.select_ignoring_lock(anchor, target);
        } else {
            self.buffer.set_caret_ignoring_lock(target);
        }
    }

    /// Key release: revert edits that cut into process output
    pub fn key_released(&mut self) -> bool {
        if self.state != SessionState::Running {
            return false;
        }
        self.relay.key_released(&mut self.buffer)
    }

    /// Deferred work queued during the last UI event
    pub fn after_event(&mut self) -> bool {
        if self.state != SessionState::Running {
            return false;
        }
        self.relay.run_deferred(&mut self.buffer)
    }

    /// Append text to the console
    pub fn print(&mut self, text: &str) -> Result<(), ConsoleError> {
        self.ensure_idle()?;
        self.buffer.append_text(text);
        Ok(())
    }

    /// Append `text` on a line of its own
    pub fn print_banner(&mut self, text: &str) -> Result<(), ConsoleError> {
        self.ensure_idle()?;
        self.append_banner(text);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), ConsoleError> {
        self.ensure_idle()?;
        self.buffer.set_text("");
        Ok(())
    }

    pub fn jump_to_top(&mut self) -> Result<(), ConsoleError> {
        self.ensure_idle()?;
        self.buffer.set_caret_ignoring_lock(0);
        Ok(())
    }

    /// Text selected in the console, for copying
    pub fn selected_text(&self) -> Option<String> {
        self.buffer.selected_text()
    }

    fn append_banner(&mut self, text: &str) {
        if !self.buffer.is_empty() && !self.buffer.ends_with_newline() {
            self.buffer.append_text("\n");
        }
        self.buffer.append_text(&format!("{}\n", text));
    }

    /// Admission check for starting a process
    fn admit(&mut self) -> bool {
        if self.state == SessionState::Idle {
            return true;
        }
        warn!("Start rejected: process already running");
        self.host.warn("A process is already running");
        false
    }

    fn ensure_idle(&self) -> Result<(), ConsoleError> {
        if self.state == SessionState::Idle {
            Ok(())
        } else {
            error!("Console accessed while a process owns it");
            Err(ConsoleError::ProcessRunning)
        }
    }

    fn update_run_previous(&mut self) {
        let enabled = self.history.contains(&self.working_dir);
        self.set_run_previous(enabled);
    }

    fn set_run_previous(&mut self, enabled: bool) {
        if self.run_previous != enabled {
            self.run_previous = enabled;
            self.host.run_previous_changed(enabled);
        }
    }
}

impl<H: ConsoleHost> Drop for ProcessSession<H> {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.handle.request_kill().join();
            drop(process.stdin);
            // A grandchild may still hold the output pipe; leave the
            // reader detached rather than block on it
            if let Some(pump) = process.pump.take() {
                if pump.is_finished() {
                    let _ = pump.join();
                } else {
                    warn!("Output pump still busy at shutdown; detaching");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::relay::Motion;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingHost {
        warnings: Vec<String>,
        reply: Option<String>,
        prompts: Vec<String>,
        refreshes: usize,
    }

    impl ConsoleHost for RecordingHost {
        fn warn(&mut self, message: &str) {
            self.warnings.push(message.to_string());
        }

        fn prompt_command(&mut self, _dir: &Path, initial: &str) -> Option<String> {
            self.prompts.push(initial.to_string());
            self.reply.clone()
        }

        fn refresh_file_tree(&mut self) {
            self.refreshes += 1;
        }
    }

    fn session(dir: &Path) -> ProcessSession<RecordingHost> {
        ProcessSession::new(RecordingHost::default(), dir.to_path_buf())
            .with_poll_interval(Duration::from_millis(5))
    }

    fn run_until(
        session: &mut ProcessSession<RecordingHost>,
        done: impl Fn(&ProcessSession<RecordingHost>) -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done(&*session) {
            assert!(Instant::now() < deadline, "timed out waiting for session");
            session.process_events();
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn run_until_idle(session: &mut ProcessSession<RecordingHost>) {
        run_until(session, |s| s.is_process_ended());
    }

    #[test]
    fn test_exit_banner_policy() {
        assert_eq!(exit_banner(0, false), "Process ended normally (exit value = 0)");
        assert_eq!(exit_banner(137, true), "Process aborted (exit value = 137)");
        assert_eq!(exit_banner(2, false), "Process ended with error (exit value = 2)");
    }

    #[test]
    fn test_end_process_when_idle_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session.end_process();
        assert!(session.is_process_ended());
        assert!(!session.aborted());
    }

    #[test]
    fn test_programmatic_output_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session.print("abc").unwrap();
        session.print_banner("Build finished").unwrap();
        assert_eq!(session.buffer().text(), "abc\nBuild finished\n");
        session.jump_to_top().unwrap();
        assert_eq!(session.buffer().caret(), 0);
        session.clear().unwrap();
        assert!(session.buffer().is_empty());
    }

    #[test]
    fn test_missing_directory_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let mut session = session(&missing);
        assert!(!session.start_process("echo hi"));
        assert!(session.is_process_ended());
        assert!(session.buffer().text().contains("does not exist"));
        assert_eq!(session.host().warnings.len(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_echo_ends_normally() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        assert!(session.start_process("echo hi"));
        assert_eq!(session.state(), SessionState::Running);
        run_until_idle(&mut session);

        let text = session.buffer().text();
        assert_eq!(
            text,
            "Run echo hi\nhi\nProcess ended normally (exit value = 0)\n"
        );
        assert_eq!(session.exit_code(), Some(0));
        assert!(!session.buffer().is_editable());
        assert_eq!(session.buffer().boundary(), session.buffer().len());
        assert_eq!(session.pid(), None);
        assert_eq!(session.host().refreshes, 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_nonzero_exit_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        assert!(session.start_process("false"));
        run_until_idle(&mut session);
        assert!(session
            .buffer()
            .text()
            .ends_with("Process ended with error (exit value = 1)\n"));
        assert!(!session.aborted());
    }

    #[test]
    #[cfg(unix)]
    fn test_end_process_reports_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        assert!(session.start_process("sleep 5"));
        session.end_process();
        session.end_process();
        assert_eq!(session.state(), SessionState::Ending);
        run_until_idle(&mut session);

        assert!(session.aborted());
        let text = session.buffer().text();
        assert!(text.contains("Process aborted"), "{}", text);
    }

    #[test]
    #[cfg(unix)]
    fn test_missing_program_never_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        assert!(!session.start_process("nosuchprogram"));
        assert_eq!(session.state(), SessionState::Idle);

        let text = session.buffer().text();
        assert!(text.starts_with("Run nosuchprogram\n"));
        assert!(text.contains("\"nosuchprogram\""));
        assert!(text.contains(&dir.path().display().to_string()));
        assert_eq!(session.host().warnings.len(), 1);
        assert_eq!(session.exit_code(), None);
    }

    #[test]
    #[cfg(unix)]
    fn test_start_while_running_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        assert!(session.start_process("sleep 5"));
        let pid = session.pid();
        let before = session.buffer().text();

        assert!(!session.start_process("echo other"));
        assert_eq!(session.pid(), pid);
        assert_eq!(session.buffer().text(), before);
        assert_eq!(session.host().warnings, vec!["A process is already running"]);

        session.end_process();
        run_until_idle(&mut session);
    }

    #[test]
    #[cfg(unix)]
    fn test_console_is_busy_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        assert!(session.start_process("sleep 5"));
        assert_eq!(session.print("x"), Err(ConsoleError::ProcessRunning));
        assert_eq!(session.clear(), Err(ConsoleError::ProcessRunning));
        assert_eq!(
            session.set_working_dir(dir.path().to_path_buf()),
            Err(ConsoleError::ProcessRunning)
        );
        session.end_process();
        run_until_idle(&mut session);
        assert!(session.print("x").is_ok());
    }

    #[test]
    #[cfg(unix)]
    fn test_history_round_trip() {
        let proj = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let mut session = session(proj.path());
        session.host_mut().reply = Some("echo Main.java".to_string());

        assert!(session.start_new_cmd());
        run_until_idle(&mut session);
        assert!(session.run_previous_enabled());

        assert_eq!(session.set_working_dir(other.path().to_path_buf()), Ok(false));
        assert!(!session.start_previous_cmd());
        assert_eq!(session.set_working_dir(proj.path().to_path_buf()), Ok(true));

        assert!(session.start_previous_cmd());
        assert_eq!(session.command(), Some("echo Main.java"));
        assert_eq!(session.working_dir(), proj.path());
        run_until_idle(&mut session);
        assert!(session.buffer().text().contains("Main.java\n"));

        // The prompt is pre-filled with the remembered command
        session.host_mut().reply = None;
        assert!(!session.start_new_cmd());
        assert_eq!(session.host().prompts, vec!["", "echo Main.java"]);
    }

    #[test]
    #[cfg(unix)]
    fn test_typed_line_reaches_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        assert!(session.start_process("cat"));
        for ch in "hello".chars() {
            assert!(session.key_pressed(EditKey::Char(ch)));
        }
        session.key_pressed(EditKey::Enter);

        run_until(&mut session, |s| s.buffer().text().ends_with("hello\nhello\n"));
        assert_eq!(session.buffer().boundary(), session.buffer().len());

        session.end_process();
        run_until_idle(&mut session);
        assert!(session.buffer().text().contains("Process aborted"));
    }

    #[test]
    #[cfg(unix)]
    fn test_locked_region_is_protected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        assert!(session.start_process("sleep 5"));
        let locked = session.buffer().text();

        // Widget-native deletion into the banner, undone on key release
        session.buffer.remove(0, 4).unwrap();
        assert!(session.key_released());
        assert_eq!(session.buffer().text(), locked);

        session.key_pressed(EditKey::Move {
            motion: Motion::Top,
            extend: false,
        });
        assert_eq!(session.buffer().caret(), 0);
        assert!(session.after_event());
        assert_eq!(session.buffer().caret(), session.buffer().len());
        assert!(session.buffer().boundary() <= session.buffer().len());

        session.end_process();
        run_until_idle(&mut session);
    }

    #[test]
    fn test_idle_motions_browse_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session.print("line one\nline two\nline three\n").unwrap();
        session.jump_to_top().unwrap();

        let down = EditKey::Move {
            motion: Motion::Down,
            extend: false,
        };
        assert!(session.key_pressed(down));
        assert_eq!(session.buffer().caret(), 9);

        assert!(session.key_pressed(EditKey::Move {
            motion: Motion::LineEnd,
            extend: true,
        }));
        assert_eq!(session.selected_text().as_deref(), Some("line two"));

        assert!(session.key_pressed(EditKey::Move {
            motion: Motion::Bottom,
            extend: false,
        }));
        assert_eq!(session.buffer().caret(), session.buffer().len());

        // Editing keys stay inert while idle
        assert!(!session.key_pressed(EditKey::Char('x')));
        assert!(!session.buffer().is_editable());
        assert_eq!(session.buffer().text(), "line one\nline two\nline three\n");
    }

    #[test]
    #[cfg(unix)]
    fn test_prompt_without_newline_shows_immediately() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ask.sh"),
            "printf 'Name? '\nread x\necho \"hi $x\"\n",
        )
        .unwrap();
        let mut session = session(dir.path());
        assert!(session.start_process("sh ask.sh"));

        run_until(&mut session, |s| s.buffer().text().ends_with("Name? "));
        assert_eq!(session.state(), SessionState::Running);

        for ch in "Ada".chars() {
            session.key_pressed(EditKey::Char(ch));
        }
        session.key_pressed(EditKey::Enter);
        run_until_idle(&mut session);

        let text = session.buffer().text();
        let banner = text.find("Process ended normally").unwrap();
        let reply = text.find("Name? Ada\nhi Ada\n").unwrap();
        assert!(reply < banner, "{}", text);
    }

    #[test]
    #[cfg(unix)]
    fn test_drop_does_not_wait_for_grandchild() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run.sh"), "sleep 6\n").unwrap();
        let mut session = session(dir.path());
        assert!(session.start_process("sh run.sh"));
        run_until(&mut session, |s| s.pid().is_some());

        let started = Instant::now();
        drop(session);
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "drop took {:?}",
            started.elapsed()
        );
    }
}
