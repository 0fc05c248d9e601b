//! Local storage for retrieved configuration files.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

/// Extension of every stored artifact.
pub const ARTIFACT_EXTENSION: &str = "cfg";

/// Give up after this many same-second collisions for one address.
const MAX_COLLISION_SUFFIX: u32 = 1000;

/// `<address>_<YYYYMMDD>_<HHMMSS>.cfg` for the given local time.
///
/// Path separators in the address are replaced so the name always stays
/// inside the backup directory.
pub fn artifact_name(address: &str, at: &NaiveDateTime) -> String {
    format!("{}.{ARTIFACT_EXTENSION}", artifact_stem(address, at))
}

fn artifact_stem(address: &str, at: &NaiveDateTime) -> String {
    let safe: String = address
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    format!("{safe}_{}", at.format("%Y%m%d_%H%M%S"))
}

/// Directory that receives one file per successful backup.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Use `dir`, creating it (and parents) if needed.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Create a new, empty artifact file for `address` at time `at`.
    ///
    /// Files are created exclusively. When the plain name is taken (two
    /// backups of one address within a second) a `_1`, `_2`, ... suffix is
    /// added before the extension; existing files are never overwritten.
    pub fn create(&self, address: &str, at: &NaiveDateTime) -> io::Result<(String, File)> {
        let stem = artifact_stem(address, at);

        for n in 0..=MAX_COLLISION_SUFFIX {
            let name = if n == 0 {
                artifact_name(address, at)
            } else {
                format!("{stem}_{n}.{ARTIFACT_EXTENSION}")
            };
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.path_of(&name))
            {
                Ok(file) => return Ok((name, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("too many artifacts named {stem}_*.{ARTIFACT_EXTENSION}"),
        ))
    }

    /// Delete an artifact, e.g. a partial file left by a failed transfer.
    pub fn remove(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.path_of(name))
    }
}
