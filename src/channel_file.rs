/// Channel file I/O: existence, change snapshots, stable reads, truncation,
/// and the writer side (atomic whole-batch replace).
///
/// The file is shared with an external writer without locking. Writers are
/// expected to replace the whole file once per batch (see `write_batch`);
/// readers defend against torn reads by re-reading when the size moves.
use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Modification time and size observed at one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSnapshot {
    pub modified: SystemTime,
    pub len: u64,
}

/// Errors from channel file operations.
#[derive(Debug)]
pub enum ChannelFileError {
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Truncate {
        path: PathBuf,
        source: std::io::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ChannelFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (action, path, source) = match self {
            ChannelFileError::Create { path, source } => ("create", path, source),
            ChannelFileError::Stat { path, source } => ("stat", path, source),
            ChannelFileError::Read { path, source } => ("read", path, source),
            ChannelFileError::Truncate { path, source } => ("truncate", path, source),
            ChannelFileError::Write { path, source } => ("write", path, source),
        };
        write!(
            f,
            "failed to {action} command file {}: {source}",
            path.display()
        )
    }
}

impl std::error::Error for ChannelFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelFileError::Create { source, .. }
            | ChannelFileError::Stat { source, .. }
            | ChannelFileError::Read { source, .. }
            | ChannelFileError::Truncate { source, .. }
            | ChannelFileError::Write { source, .. } => Some(source),
        }
    }
}

/// Create the parent directory and an empty file if either is missing.
/// Returns `true` if the file was created.
pub fn ensure_exists(path: &Path) -> Result<bool, ChannelFileError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| ChannelFileError::Create {
                path: dir.to_path_buf(),
                source: e,
            })?;
            tracing::info!(dir = %dir.display(), "created command directory");
        }
    }

    if path.exists() {
        return Ok(false);
    }
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| ChannelFileError::Create {
            path: path.to_path_buf(),
            source: e,
        })?;
    tracing::info!(path = %path.display(), "created empty command file");
    Ok(true)
}

/// Stat the file. `Ok(None)` when it does not exist.
pub fn snapshot(path: &Path) -> Result<Option<FileSnapshot>, ChannelFileError> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ChannelFileError::Stat {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    let modified = meta.modified().map_err(|e| ChannelFileError::Stat {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(Some(FileSnapshot {
        modified,
        len: meta.len(),
    }))
}

/// Lines read from the file, with the stat of the version they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableRead {
    pub lines: Vec<String>,
    /// Matches `lines` when the read was stable. If the file never settled,
    /// this is the stat taken before the last read, so it is never newer
    /// than the content.
    pub snapshot: FileSnapshot,
}

/// Read the file as lines, re-reading while it changes underneath us.
///
/// A read is stable when the stat before and after it agree and the size
/// matches the bytes read. At most `attempts` reads are made; the last read
/// wins even if the file still moved, and a warning is logged. Bytes that
/// are not valid UTF-8 are replaced, so a bad line fails parsing instead of
/// failing the whole read.
pub fn read_lines_stable(path: &Path, attempts: u32) -> Result<StableRead, ChannelFileError> {
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let before = stat_for_read(path)?;
        let bytes = std::fs::read(path).map_err(|e| ChannelFileError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let after = stat_for_read(path)?;

        if before == after && after.len == bytes.len() as u64 {
            return Ok(StableRead {
                lines: decode_lines(path, &bytes),
                snapshot: after,
            });
        }
        if attempt >= attempts {
            tracing::warn!(
                path = %path.display(),
                read_bytes = bytes.len(),
                len_after = after.len,
                "command file still changing after {attempts} reads, using last read"
            );
            return Ok(StableRead {
                lines: decode_lines(path, &bytes),
                snapshot: before,
            });
        }
        tracing::debug!(attempt, len_after = after.len, "command file changed during read, re-reading");
    }
}

fn stat_for_read(path: &Path) -> Result<FileSnapshot, ChannelFileError> {
    let read_err = |e| ChannelFileError::Read {
        path: path.to_path_buf(),
        source: e,
    };
    let meta = std::fs::metadata(path).map_err(read_err)?;
    Ok(FileSnapshot {
        modified: meta.modified().map_err(read_err)?,
        len: meta.len(),
    })
}

fn decode_lines(path: &Path, bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    if let Cow::Owned(_) = text {
        tracing::warn!(path = %path.display(), "command file is not valid UTF-8, replacing bad bytes");
    }
    text.lines().map(str::to_string).collect()
}

/// Truncate the file to zero length.
pub fn truncate(path: &Path) -> Result<(), ChannelFileError> {
    std::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map(|_| ())
        .map_err(|e| ChannelFileError::Truncate {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Atomically replace the file with `lines`, one per line.
///
/// Writes to a temporary file in the same directory, then renames over the
/// target so the watcher never observes a half-written batch.
pub fn write_batch<S: AsRef<str>>(path: &Path, lines: &[S]) -> Result<(), ChannelFileError> {
    let write_err = |e| ChannelFileError::Write {
        path: path.to_path_buf(),
        source: e,
    };
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };

    let mut body = String::new();
    for line in lines {
        body.push_str(line.as_ref());
        body.push('\n');
    }

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(body.as_bytes()).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    tracing::debug!(path = %path.display(), lines = lines.len(), "wrote command batch");
    Ok(())
}
