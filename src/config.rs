//! Configuration and color scheme management for runcon.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.runcon/config.toml`
//! - Built-in color schemes (default, solarized-dark, monokai)
//!
//! # Configuration File
//!
//! ```toml
//! # Directory to start in (defaults to the current directory)
//! working_dir = "/home/me/project"
//!
//! # Command to launch on startup (optional)
//! command = "make test"
//!
//! # Log level for ~/.runcon/runcon.log
//! log_level = "info"
//!
//! # Color scheme: default, solarized-dark, monokai
//! color_scheme = "monokai"
//!
//! # Poll interval (ms) while waiting for a process to exit
//! kill_poll_ms = 10
//!
//! [status_bar]
//! visible = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Starting working directory
    pub working_dir: Option<PathBuf>,
    /// Command launched at startup
    pub command: Option<String>,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Color scheme name
    pub color_scheme: String,
    /// Wait-loop poll interval in milliseconds
    pub kill_poll_ms: u64,
    /// Status bar settings
    pub status_bar: StatusBarConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            working_dir: None,
            command: None,
            log_level: "info".to_string(),
            color_scheme: "default".to_string(),
            kill_poll_ms: 10,
            status_bar: StatusBarConfig::default(),
        }
    }
}

/// Status bar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusBarConfig {
    pub visible: bool,
}

impl Default for StatusBarConfig {
    fn default() -> Self {
        Self { visible: true }
    }
}

impl Config {
    /// Load configuration from `~/.runcon/config.toml`
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from a file; missing or malformed files give defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Ignoring malformed config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Could not read config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        data_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.kill_poll_ms.max(1))
    }

    /// Get the color scheme
    pub fn get_color_scheme(&self) -> ColorScheme {
        ColorScheme::by_name(&self.color_scheme)
    }
}

/// Color definition (RGB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert to crossterm Color
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        crossterm::style::Color::Rgb {
            r: self.r,
            g: self.g,
            b: self.b,
        }
    }
}

/// Color scheme definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorScheme {
    pub name: String,

    // Console text
    pub background: Color,
    pub locked_fg: Color,
    pub live_fg: Color,

    // Selection
    pub selection_bg: Color,
    pub selection_fg: Color,

    // Status bar
    pub status_bar_bg: Color,
    pub status_bar_fg: Color,
    pub status_running_bg: Color,

    // Prompt and warning line
    pub prompt_bg: Color,
    pub prompt_fg: Color,
    pub warning_bg: Color,
    pub warning_fg: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self::default_scheme()
    }
}

impl ColorScheme {
    /// Default color scheme
    pub fn default_scheme() -> Self {
        Self {
            name: "default".to_string(),

            background: Color::new(0, 0, 0),
            locked_fg: Color::new(190, 190, 190),
            live_fg: Color::new(255, 255, 255),

            selection_bg: Color::new(255, 255, 255),
            selection_fg: Color::new(0, 0, 0),

            status_bar_bg: Color::new(40, 40, 40),
            status_bar_fg: Color::new(180, 180, 180),
            status_running_bg: Color::new(0, 100, 0),

            prompt_bg: Color::new(0, 0, 139),
            prompt_fg: Color::new(255, 255, 255),
            warning_bg: Color::new(200, 200, 0),
            warning_fg: Color::new(0, 0, 0),
        }
    }

    /// Solarized Dark scheme
    pub fn solarized_dark() -> Self {
        Self {
            name: "solarized-dark".to_string(),

            background: Color::new(0, 43, 54),
            locked_fg: Color::new(131, 148, 150),
            live_fg: Color::new(253, 246, 227),

            selection_bg: Color::new(38, 139, 210),
            selection_fg: Color::new(253, 246, 227),

            status_bar_bg: Color::new(7, 54, 66),
            status_bar_fg: Color::new(147, 161, 161),
            status_running_bg: Color::new(133, 153, 0),

            prompt_bg: Color::new(38, 139, 210),
            prompt_fg: Color::new(253, 246, 227),
            warning_bg: Color::new(181, 137, 0),
            warning_fg: Color::new(0, 43, 54),
        }
    }

    /// Monokai scheme
    pub fn monokai() -> Self {
        Self {
            name: "monokai".to_string(),

            background: Color::new(39, 40, 34),
            locked_fg: Color::new(200, 200, 190),
            live_fg: Color::new(248, 248, 242),

            selection_bg: Color::new(73, 72, 62),
            selection_fg: Color::new(248, 248, 242),

            status_bar_bg: Color::new(60, 60, 54),
            status_bar_fg: Color::new(248, 248, 242),
            status_running_bg: Color::new(166, 226, 46),

            prompt_bg: Color::new(102, 217, 239),
            prompt_fg: Color::new(39, 40, 34),
            warning_bg: Color::new(249, 38, 114),
            warning_fg: Color::new(248, 248, 242),
        }
    }

    /// Get scheme by name
    pub fn by_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "solarized-dark" | "solarized_dark" | "solarized" => Self::solarized_dark(),
            "monokai" => Self::monokai(),
            _ => Self::default_scheme(),
        }
    }
}

/// `~/.runcon`, created on first use
pub fn data_dir() -> Option<PathBuf> {
    let dir = home_dir()?.join(".runcon");
    if !dir.exists() {
        let _ = fs::create_dir_all(&dir);
    }
    Some(dir)
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
