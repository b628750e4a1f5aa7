//! # Platform-specific utilities
//!
//! Centralizes how external tools (ffmpeg, ffprobe) are named and found on
//! each platform. An explicit path from the configuration always wins over
//! the `PATH` lookup.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Platform-specific command manager
pub struct PlatformCommands {
    commands: HashMap<&'static str, &'static str>,
}

impl PlatformCommands {
    /// Get the singleton instance
    pub fn instance() -> &'static Self {
        static INSTANCE: OnceLock<PlatformCommands> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    fn new() -> Self {
        let mut commands = HashMap::new();
        if cfg!(windows) {
            commands.insert("ffmpeg", "ffmpeg.exe");
            commands.insert("ffprobe", "ffprobe.exe");
        } else {
            commands.insert("ffmpeg", "ffmpeg");
            commands.insert("ffprobe", "ffprobe");
        }
        Self { commands }
    }

    /// Get the platform-specific command name
    pub fn get_command<'a>(&self, base_name: &'a str) -> &'a str {
        self.commands.get(base_name).copied().unwrap_or(base_name)
    }

    /// Resolve a tool, preferring `explicit` when it is given
    pub fn resolve_tool(&self, base_name: &str, explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            debug!("Using configured path for {}: {}", base_name, path.display());
            return path.is_file().then(|| path.to_path_buf());
        }
        let resolved = self.find_in_system_path(self.get_command(base_name));
        debug!("Resolved {} -> {:?}", base_name, resolved);
        resolved
    }

    /// Check if a command is available on the system
    pub fn is_command_available(&self, base_name: &str) -> bool {
        self.resolve_tool(base_name, None).is_some()
    }

    fn find_in_system_path(&self, command: &str) -> Option<PathBuf> {
        let path_var = env::var_os("PATH")?;
        env::split_paths(&path_var)
            .map(|dir| dir.join(command))
            .find(|candidate| candidate.is_file())
    }
}
