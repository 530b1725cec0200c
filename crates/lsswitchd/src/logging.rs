//! Rotating log file writer, used as a tracing sink alongside stdout.
//!
//! Rotation scheme: when a write would push the live file over the size
//! limit, the live file becomes `<base>_rotated.1.log`, existing rotations
//! shift to `n + 1`, and the oldest beyond the historical limit are
//! deleted. `n = 1` is therefore always the most recent rotation.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::writer::MakeWriter;

/// Cloneable handle over the shared rotating file; implements
/// [`MakeWriter`] so it plugs straight into `tracing_subscriber::fmt`.
#[derive(Clone)]
pub struct RotatingWriter(Arc<Mutex<RotatingFile>>);

impl RotatingWriter {
    /// Open (creating directories as needed) the log file at `path`.
    pub fn new(path: &Path, max_size: u64, max_historical: usize) -> io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(RotatingFile::open(
            path,
            max_size,
            max_historical,
        )?))))
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log writer mutex poisoned").write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().expect("log writer mutex poisoned").flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

struct RotatingFile {
    path: PathBuf,
    dir: PathBuf,
    stem: String,
    max_size: u64,
    max_historical: usize,
    file: File,
}

impl RotatingFile {
    fn open(path: &Path, max_size: u64, max_historical: usize) -> io::Result<Self> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("latest")
            .to_string();
        let file = open_append(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            dir,
            stem,
            max_size,
            max_historical,
            file,
        })
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let current = self.file.metadata()?.len();
        if current + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }

    fn rotate(&mut self) -> io::Result<()> {
        // Collect existing rotations, most recent (lowest id) first.
        let mut rotated: Vec<(String, u32)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((base, id)) = parse_rotated_name(name) {
                rotated.push((base.to_string(), id));
            }
        }
        rotated.sort_by_key(|(_, id)| *id);

        // Make room: the live file is about to become rotation 1.
        if rotated.len() + 1 > self.max_historical {
            let overflow = rotated.len() + 1 - self.max_historical;
            let keep = rotated.len().saturating_sub(overflow);
            for (base, id) in rotated.drain(keep..) {
                fs::remove_file(self.dir.join(rotated_name(&base, id)))?;
            }
        }

        // Shift survivors upward, highest id first so renames never collide.
        for (base, id) in rotated.iter().rev() {
            fs::rename(
                self.dir.join(rotated_name(base, *id)),
                self.dir.join(rotated_name(base, id + 1)),
            )?;
        }

        self.file.flush()?;
        fs::rename(&self.path, self.dir.join(rotated_name(&self.stem, 1)))?;
        self.file = open_append(&self.path)?;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn rotated_name(base: &str, id: u32) -> String {
    format!("{base}_rotated.{id}.log")
}

/// Parse `<base>_rotated.<n>.log`; anything else is not a rotation of ours.
fn parse_rotated_name(name: &str) -> Option<(&str, u32)> {
    let rest = name.strip_suffix(".log")?;
    let (base, id) = rest.rsplit_once("_rotated.")?;
    if base.is_empty() {
        return None;
    }
    Some((base, id.parse().ok()?))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
