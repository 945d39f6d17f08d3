use std::fs::{self, File, OpenOptions};
use std::io::*;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::*;

const TEMP_SUFFIX: &str = ".tmp";

/// Staged writes untouched for this long are assumed to belong to a writer that died.
pub const DEFAULT_STALE_WRITE_AFTER: Duration = Duration::from_secs(10 * 60);

/// A [ByteStore] which is backed by a given root directory, one file per key.
///
/// Writers stage into `<key>.tmp`, which is created exclusively so that a second writer for the same key sees a
/// conflict.  Committing renames the staged file into place, so readers only ever see complete entries.  Reads refresh
/// an entry's modification time, and [ByteStore::flush_async] prunes the least recently used entries until the
/// directory fits in `max_bytes`, also deleting staged files older than the stale-write threshold.
#[derive(Debug)]
pub struct FsByteStore {
    root_path: PathBuf,
    max_bytes: u64,
    stale_write_after: Duration,
}

fn conv_path(path: impl AsRef<Path>) -> Result<relative_path::RelativePathBuf> {
    relative_path::RelativePathBuf::from_path(path)
        .map_err(|_| Error::new(ErrorKind::Other, "Invalid path"))
}

impl FsByteStore {
    pub fn new(root_path: &Path, max_bytes: u64) -> std::io::Result<FsByteStore> {
        fs::create_dir_all(root_path)?;
        Ok(FsByteStore {
            root_path: root_path.to_path_buf(),
            max_bytes,
            stale_write_after: DEFAULT_STALE_WRITE_AFTER,
        })
    }

    /// How old a staged write must be before [ByteStore::flush_async] reclaims it.
    pub fn with_stale_write_after(mut self, stale_write_after: Duration) -> FsByteStore {
        self.stale_write_after = stale_write_after;
        self
    }

    /// Map a key to its file, refusing anything which would land outside the root or collide with staging files.
    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.ends_with(TEMP_SUFFIX) {
            return Err(Error::new(ErrorKind::InvalidInput, "invalid cache key"));
        }
        // Go via `RelativePathBuf` so that `..` segments are resolved the same way on every platform.
        let absolute = conv_path(key)?.to_logical_path(&self.root_path);
        if !absolute.starts_with(&self.root_path) || absolute == self.root_path {
            return Err(Error::new(
                ErrorKind::Other,
                "path is outside the store root directory",
            ));
        }
        Ok(absolute)
    }

    /// Total size of committed entries.
    pub fn size(&self) -> Result<u64> {
        Ok(scan(&self.root_path)?
            .committed
            .iter()
            .map(|e| e.len)
            .sum())
    }
}

impl ByteStore for FsByteStore {
    type Reader = File;
    type Writer = FsEntryWriter;

    fn read(&self, key: &str) -> Result<Option<File>> {
        let path = self.entry_path(key)?;
        match File::open(&path) {
            Ok(f) => {
                // Recency only feeds pruning; a read is still good if this fails.
                if let Err(e) = f.set_modified(SystemTime::now()) {
                    tracing::debug!(path = %path.display(), error = %e, "could not refresh entry recency");
                }
                Ok(Some(f))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn open(&self, key: &str) -> Result<Option<FsEntryWriter>> {
        let final_path = self.entry_path(key)?;
        let mut temp_path = final_path.clone().into_os_string();
        temp_path.push(TEMP_SUFFIX);
        let temp_path = PathBuf::from(temp_path);

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
        {
            Ok(file) => Ok(Some(FsEntryWriter {
                file: Some(file),
                temp_path,
                final_path,
            })),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn flush_async(&self) -> MaintenanceHandle {
        let root = self.root_path.clone();
        let max_bytes = self.max_bytes;
        let stale_write_after = self.stale_write_after;
        MaintenanceHandle::spawned(std::thread::spawn(move || {
            let removed = prune(&root, max_bytes, stale_write_after)?;
            tracing::debug!(root = %root.display(), removed, "disk cache pruned");
            Ok(())
        }))
    }
}

/// A staged write for one [FsByteStore] entry.
///
/// Dropping the writer without committing removes the staged file.
#[derive(Debug)]
pub struct FsEntryWriter {
    file: Option<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl FsEntryWriter {
    fn file(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::Other, "writer already finished"))
    }
}

impl Write for FsEntryWriter {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.file()?.flush()
    }
}

impl EntryWriter for FsEntryWriter {
    fn commit(mut self) -> Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| Error::new(ErrorKind::Other, "writer already finished"))?;
        let staged = file.flush().and_then(|_| file.sync_all());
        drop(file);
        let committed = staged.and_then(|_| fs::rename(&self.temp_path, &self.final_path));
        // A staged file left behind would read as a live writer forever.
        if committed.is_err() {
            if let Err(e) = fs::remove_file(&self.temp_path) {
                tracing::warn!(path = %self.temp_path.display(), error = %e, "could not remove staged entry");
            }
        }
        committed
    }

    fn abort(mut self) -> Result<()> {
        drop(self.file.take());
        match fs::remove_file(&self.temp_path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for FsEntryWriter {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

struct EntryInfo {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}

#[derive(Default)]
struct Scan {
    committed: Vec<EntryInfo>,
    staged: Vec<EntryInfo>,
}

fn scan(root: &Path) -> Result<Scan> {
    let mut out = Scan::default();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            let path = entry.path();
            if meta.is_dir() {
                dirs.push(path);
                continue;
            }
            let info = EntryInfo {
                len: meta.len(),
                modified: meta.modified()?,
                path,
            };
            if info.path.to_string_lossy().ends_with(TEMP_SUFFIX) {
                out.staged.push(info);
            } else {
                out.committed.push(info);
            }
        }
    }
    Ok(out)
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        // Someone else got there first.
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Delete staged files older than `stale_write_after`, then least recently used entries until the total is within
/// `max_bytes`.  Returns how many files were removed.
fn prune(root: &Path, max_bytes: u64, stale_write_after: Duration) -> Result<usize> {
    let Scan {
        mut committed,
        staged,
    } = scan(root)?;
    let now = SystemTime::now();

    let mut removed = 0;
    for e in staged {
        let age = now.duration_since(e.modified).unwrap_or_default();
        if age >= stale_write_after {
            remove_if_present(&e.path)?;
            removed += 1;
        }
    }

    let mut total: u64 = committed.iter().map(|e| e.len).sum();
    committed.sort_by_key(|e| e.modified);
    for e in committed {
        if total <= max_bytes {
            break;
        }
        remove_if_present(&e.path)?;
        total -= e.len;
        removed += 1;
    }
    Ok(removed)
}
