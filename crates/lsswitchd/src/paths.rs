//! Executable path helpers.
//!
//! The daemon runs relative to its own binary by default (so the default
//! log directory lands next to it), and autostart entries must point at
//! the real binary, not a symlink.

use std::io;
use std::path::PathBuf;

/// Real absolute path of the running executable, symlinks resolved.
pub fn executable_path() -> io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    std::fs::canonicalize(exe)
}

/// Directory containing the running executable.
pub fn executable_dir() -> io::Result<PathBuf> {
    let exe = executable_path()?;
    exe.parent()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "executable has no parent directory"))
}
