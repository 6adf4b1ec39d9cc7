//! On-disk cache snapshot.
//!
//! A snapshot is a bincode-encoded map of key -> (value bytes, version) with
//! a leading format version, written atomically (temp file + rename) so a
//! reader never observes a partial write. It is only read once, at store
//! construction, before any writer exists.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

pub(crate) const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct SnapshotEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub version: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub format: u32,
    pub entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub(crate) fn new(entries: Vec<SnapshotEntry>) -> Self {
        Self {
            format: SNAPSHOT_FORMAT_VERSION,
            entries,
        }
    }
}

/// Load a snapshot from `path`. `Ok(None)` when no snapshot exists;
/// `Err(Fatal)` when one exists but cannot be decoded.
pub(crate) fn load(path: &Path) -> Result<Option<Snapshot>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::fatal(format!("cannot read cache snapshot {path:?}: {e}"))),
    };

    let snapshot: Snapshot = bincode::deserialize(&raw)
        .map_err(|e| Error::fatal(format!("corrupt cache snapshot {path:?}: {e}")))?;

    if snapshot.format != SNAPSHOT_FORMAT_VERSION {
        return Err(Error::fatal(format!(
            "unsupported cache snapshot format {} in {path:?}",
            snapshot.format
        )));
    }

    Ok(Some(snapshot))
}

/// Serialize and atomically replace the snapshot at `path`.
pub(crate) fn store(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let encoded = bincode::serialize(snapshot)
        .map_err(|e| Error::fatal(format!("cannot encode cache snapshot: {e}")))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::fatal(format!("cannot create snapshot dir {parent:?}: {e}")))?;
        }
    }

    let tmp = tmp_path(path);
    let mut file =
        fs::File::create(&tmp).map_err(|e| Error::fatal(format!("cannot create {tmp:?}: {e}")))?;
    file.write_all(&encoded)
        .and_then(|_| file.sync_all())
        .map_err(|e| Error::fatal(format!("cannot write {tmp:?}: {e}")))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| Error::fatal(format!("cannot rename {tmp:?} into place: {e}")))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}
