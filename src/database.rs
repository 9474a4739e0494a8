use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::state::{Peer, Server, State, StateError};

pub const STATE_FILE: &str = "state.json";
const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("no state stored at {0}")]
    NotFound(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed state file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported state version {0}")]
    UnsupportedVersion(u32),
    #[error("stored state is invalid: {0}")]
    State(#[from] StateError),
}

type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Serialize)]
struct StoredRef<'a> {
    version: u32,
    server: &'a Server,
    peers: Vec<&'a Peer>,
}

#[derive(Deserialize)]
struct Stored {
    version: u32,
    server: Server,
    #[serde(default)]
    peers: Vec<Peer>,
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    std::fs::File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Replaces `path` with `contents` so that readers see either the old or
/// the new file, never a prefix of the new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    write_atomic_with(path, contents, sync_dir)
}

fn write_atomic_with(
    path: &Path,
    contents: &[u8],
    sync: impl FnOnce(&Path) -> io::Result<()>,
) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    // the new file is already visible, so a failed directory sync can't undo it
    if let Err(e) = sync(dir) {
        warn!("{} written but directory sync failed: {e}", path.display());
    }
    Ok(())
}

/// State of one interface, kept as a single json document inside the
/// interface directory.
#[derive(Debug, Clone)]
pub struct Database {
    dir: PathBuf,
}

impl Database {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub fn load(&self) -> Result<State> {
        let path = self.path();
        let data = std::fs::read(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => DatabaseError::NotFound(path.clone()),
            _ => DatabaseError::Io {
                path: path.clone(),
                source,
            },
        })?;

        let stored: Stored = serde_json::from_slice(&data)?;
        if stored.version != VERSION {
            return Err(DatabaseError::UnsupportedVersion(stored.version));
        }

        let state = State::from_parts(stored.server, stored.peers)?;
        debug!("loaded {} peers", state.len());
        Ok(state)
    }

    #[instrument(skip(self, state), fields(dir = %self.dir.display()))]
    pub fn save(&self, state: &State) -> Result<()> {
        let stored = StoredRef {
            version: VERSION,
            server: state.server(),
            peers: state.peers().collect(),
        };
        let mut data = serde_json::to_vec_pretty(&stored)?;
        data.push(b'\n');

        let path = self.path();
        write_atomic(&path, &data).map_err(|source| DatabaseError::Io { path, source })?;
        debug!("saved {} peers", state.len());
        Ok(())
    }
}
