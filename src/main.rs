//! runcon - an interactive console for external processes
//!
//! runcon launches one command at a time in a working directory, shows its
//! merged stdout/stderr in a scrolling console, and relays what you type
//! after the output to the process's stdin.
//!
//! # Quick Start
//!
//! ```text
//! runcon                      # Start idle in the current directory
//! runcon -d ~/proj -c "make"  # Run make in ~/proj right away
//! ```
//!
//! # Keybindings
//!
//! | Key | Action |
//! |-----|--------|
//! | Ctrl+N | Run a new command |
//! | Ctrl+P | Run the previous command for this directory |
//! | Ctrl+K | End the running process |
//! | Ctrl+D | Change working directory |
//! | Ctrl+L | Clear the console |
//! | Ctrl+T | Jump to top |
//! | Ctrl+Y / Ctrl+V | Copy selection / paste |
//! | Ctrl+Q | Quit |

mod config;
mod core;
mod history;
mod ui;

use std::env;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyEventKind};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{data_dir, Config};
use crate::core::relay::EditKey;
use crate::core::session::{ConsoleHost, ProcessSession};
use crate::ui::{Command, KeyAction, KeyMapper, Renderer, StatusLine, TerminalHost};

/// Command line options
#[derive(Debug, Default)]
struct Args {
    /// Starting directory
    dir: Option<PathBuf>,
    /// Command to run at startup
    command: Option<String>,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long Ctrl+Q waits for a killed process before giving up
const QUIT_GRACE: Duration = Duration::from_secs(2);

fn print_version() {
    eprintln!("runcon {}", VERSION);
}

fn print_help() {
    eprintln!("runcon {} - interactive console for external processes", VERSION);
    eprintln!();
    eprintln!("Usage: runcon [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -d, --dir <DIR>       Working directory (default: config or current)");
    eprintln!("  -c, --command <CMD>   Command to run at startup");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keybindings:");
    eprintln!("  Ctrl+N                Run a new command");
    eprintln!("  Ctrl+P                Run the previous command for this directory");
    eprintln!("  Ctrl+K                End the running process");
    eprintln!("  Ctrl+D                Change working directory (when idle)");
    eprintln!("  Ctrl+L                Clear the console (when idle)");
    eprintln!("  Ctrl+T                Jump to top (when idle)");
    eprintln!("  Ctrl+Y                Copy selection");
    eprintln!("  Ctrl+V                Paste");
    eprintln!("  Ctrl+Q                Quit");
    eprintln!();
    eprintln!("Configuration: ~/.runcon/config.toml");
    eprintln!("Log file:      ~/.runcon/runcon.log (RUST_LOG overrides log_level)");
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-d" | "--dir" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing directory argument".to_string());
                }
                parsed.dir = Some(PathBuf::from(&args[i]));
            }
            "-c" | "--command" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing command argument".to_string());
                }
                parsed.command = Some(args[i].clone());
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

/// Log to ~/.runcon/runcon.log; RUST_LOG wins over the configured level
fn init_logging(level: &str) {
    let log_path = data_dir()
        .map(|dir| dir.join("runcon.log"))
        .unwrap_or_else(|| PathBuf::from("runcon.log"));

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let config = Config::load();
    init_logging(&config.log_level);
    info!("runcon {} starting...", VERSION);

    let working_dir = match args.dir.or_else(|| config.working_dir.clone()) {
        Some(dir) => dir,
        None => env::current_dir()?,
    };
    let command = args.command.or_else(|| config.command.clone());

    let colors = config.get_color_scheme();
    let host = TerminalHost::new(colors.clone());
    let mut session =
        ProcessSession::new(host, working_dir).with_poll_interval(config.poll_interval());

    let mut renderer = Renderer::new(colors, config.status_bar.visible);
    renderer.init()?;

    match command {
        Some(command) => {
            session.start_process(&command);
        }
        None => {
            let _ = session.print("runcon: Ctrl+N runs a command, Ctrl+Q quits\n");
        }
    }

    let result = run_main_loop(&mut session, &mut renderer);
    if let Err(e) = &result {
        error!("Main loop failed: {}", e);
    }

    let _ = renderer.cleanup();
    info!("runcon exiting");
    result
}

fn status_line<H: ConsoleHost>(session: &ProcessSession<H>) -> StatusLine {
    StatusLine {
        state: session.state(),
        working_dir: session.working_dir().display().to_string(),
        command: session.command().map(str::to_string),
        run_previous: session.run_previous_enabled(),
        pid: session.pid(),
        exit_code: session.exit_code(),
    }
}

fn run_main_loop(
    session: &mut ProcessSession<TerminalHost>,
    renderer: &mut Renderer,
) -> anyhow::Result<()> {
    let poll_timeout = Duration::from_millis(10);
    let mut clipboard = match arboard::Clipboard::new() {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("Clipboard unavailable: {}", e);
            None
        }
    };

    renderer.render(session.buffer(), &status_line(session))?;

    loop {
        let event = if event::poll(poll_timeout)? {
            Some(event::read()?)
        } else {
            None
        };
        match loop_step(session, event, clipboard.as_mut()) {
            Step::Quit => break,
            Step::Continue { redraw: true } => {
                renderer.render(session.buffer(), &status_line(session))?;
            }
            Step::Continue { redraw: false } => {}
        }
    }

    Ok(())
}

/// Outcome of one pass through the UI loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue { redraw: bool },
    Quit,
}

/// Apply pump output, then the input event (if any)
fn loop_step(
    session: &mut ProcessSession<TerminalHost>,
    event: Option<Event>,
    clipboard: Option<&mut arboard::Clipboard>,
) -> Step {
    let mut redraw = session.process_events();

    match event {
        // Only process key press events
        Some(Event::Key(key_event)) if key_event.kind == KeyEventKind::Press => {
            match KeyMapper::map(&key_event) {
                Some(KeyAction::Edit(key)) => {
                    session.key_pressed(key);
                    session.key_released();
                    session.after_event();
                }
                Some(KeyAction::Command(Command::Quit)) => {
                    quit(session);
                    return Step::Quit;
                }
                Some(KeyAction::Command(command)) => run_command(session, command, clipboard),
                None => {}
            }
            redraw = true;
        }
        Some(Event::Resize(_, _)) => redraw = true,
        _ => {}
    }

    Step::Continue { redraw }
}

fn run_command(
    session: &mut ProcessSession<TerminalHost>,
    command: Command,
    clipboard: Option<&mut arboard::Clipboard>,
) {
    match command {
        Command::NewCommand => {
            session.start_new_cmd();
        }
        Command::RunPrevious => {
            session.start_previous_cmd();
        }
        Command::EndProcess => session.end_process(),
        Command::ChangeDirectory => change_directory(session),
        Command::Clear => {
            if session.clear().is_err() {
                session.host_mut().warn("Cannot clear while a process is running");
            }
        }
        Command::JumpToTop => {
            if session.jump_to_top().is_err() {
                session.host_mut().warn("Cannot jump while a process is running");
            }
        }
        Command::Copy => {
            let (Some(clipboard), Some(text)) = (clipboard, session.selected_text()) else {
                return;
            };
            if let Err(e) = clipboard.set_text(text) {
                warn!("Copy failed: {}", e);
            }
        }
        Command::Paste => {
            let Some(clipboard) = clipboard else {
                return;
            };
            match clipboard.get_text() {
                Ok(text) if !text.is_empty() => {
                    session.key_pressed(EditKey::Paste(text));
                    session.key_released();
                    session.after_event();
                }
                Ok(_) => {}
                Err(e) => warn!("Paste failed: {}", e),
            }
        }
        Command::Quit => {}
    }
}

fn change_directory(session: &mut ProcessSession<TerminalHost>) {
    if !session.is_process_ended() {
        session
            .host_mut()
            .warn("Cannot change directory while a process is running");
        return;
    }
    let current = session.working_dir().display().to_string();
    let Some(answer) = session.host_mut().prompt_line("Directory: ", &current) else {
        return;
    };
    let dir = PathBuf::from(answer.trim());
    if !dir.is_dir() {
        session
            .host_mut()
            .warn(&format!("Not a directory: {}", dir.display()));
        return;
    }
    let banner = format!("Working directory: {}", dir.display());
    if let Err(e) = session
        .set_working_dir(dir)
        .and_then(|_| session.print_banner(&banner))
    {
        error!("Directory change failed: {}", e);
    }
}

/// End any running process and wait briefly for its banner
fn quit(session: &mut ProcessSession<TerminalHost>) {
    session.end_process();
    let deadline = Instant::now() + QUIT_GRACE;
    while !session.is_process_ended() && Instant::now() < deadline {
        session.process_events();
        std::thread::sleep(Duration::from_millis(10));
    }
    if !session.is_process_ended() {
        warn!("Process did not end within {:?}; dropping session", QUIT_GRACE);
    }
}
