use std::{
    fs::{self, File},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use nftvault_core::{
    records::{Collection, RecordId},
    storage::{BackendError, RecordBackend},
};
use tempfile::NamedTempFile;
use tracing::{instrument, warn};

const EXTENSION: &str = "json";

/// Longest file name common filesystems accept, in bytes.
const MAX_FILE_NAME: usize = 255;

/// Durable backend: one file per record under `<root>/<collection>/`.
///
/// Files are written to a temp file, synced, then moved into place without clobbering,
/// so a record is visible only once complete and an existing id is never overwritten.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir_for(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.as_str())
    }

    /// `None` when the encoded id cannot be a file name, so no such record can exist.
    fn path_for(&self, collection: Collection, id: &RecordId) -> Option<PathBuf> {
        let name = format!("{}.{EXTENSION}", sanitize_id(id));
        (name.len() <= MAX_FILE_NAME).then(|| self.dir_for(collection).join(name))
    }

    /// Record files of a collection with their decoded ids, sorted by id.
    fn entries(&self, collection: Collection) -> Result<Vec<(RecordId, PathBuf)>, BackendError> {
        let dir = self.dir_for(collection);
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(storage_err(err)),
        };

        let mut entries = Vec::new();
        for entry in listing {
            let path = entry.map_err(storage_err)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(restore_id)
            else {
                warn!(path = %path.display(), "skipping file with undecodable name");
                continue;
            };
            entries.push((id, path));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

#[async_trait]
impl RecordBackend for FileBackend {
    #[instrument(skip_all, fields(collection = %collection, id = %id))]
    async fn insert_new(
        &self,
        collection: Collection,
        id: &RecordId,
        value: &[u8],
    ) -> Result<(), BackendError> {
        let path = self.path_for(collection, id).ok_or_else(|| BackendError::Storage {
            reason: format!("record id too long for a file name: {id}"),
        })?;
        write_new(&path, value).map_err(|err| {
            if err.kind() == ErrorKind::AlreadyExists {
                BackendError::Conflict {
                    collection,
                    id: id.clone(),
                }
            } else {
                storage_err(err)
            }
        })
    }

    #[instrument(skip_all, fields(collection = %collection, id = %id))]
    async fn get(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        match self.path_for(collection, id) {
            Some(path) => read_file(&path),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(collection = %collection))]
    async fn ids(&self, collection: Collection) -> Result<Vec<RecordId>, BackendError> {
        Ok(self
            .entries(collection)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    #[instrument(skip_all, fields(collection = %collection))]
    async fn scan(&self, collection: Collection) -> Result<Vec<(RecordId, Vec<u8>)>, BackendError> {
        let mut records = Vec::new();
        for (id, path) in self.entries(collection)? {
            // Removed between listing and reading; treat as gone.
            if let Some(bytes) = read_file(&path)? {
                records.push((id, bytes));
            }
        }
        Ok(records)
    }

    #[instrument(skip_all, fields(collection = %collection, id = %id))]
    async fn remove(&self, collection: Collection, id: &RecordId) -> Result<bool, BackendError> {
        let Some(path) = self.path_for(collection, id) else {
            return Ok(false);
        };
        match fs::remove_file(path) {
            Ok(_) => Ok(true),
            Err(err) if is_absent(&err) => Ok(false),
            Err(err) => Err(storage_err(err)),
        }
    }
}

fn write_new(path: &Path, value: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "invalid storage path"))?;
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(value)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    sync_dir(parent)
}

/// Flush the directory entry so the new file survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn read_file(path: &Path) -> Result<Option<Vec<u8>>, BackendError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if is_absent(&err) => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    Ok(Some(buf))
}

/// No record can live at a path the filesystem refuses to name.
fn is_absent(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::InvalidFilename)
}

/// Ids come from callers on lookups, so never use them as raw path components.
fn sanitize_id(id: &RecordId) -> String {
    URL_SAFE_NO_PAD.encode(id.as_str())
}

fn restore_id(stem: &str) -> Option<RecordId> {
    let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(bytes).ok().map(RecordId::from)
}

fn storage_err<E: ToString>(err: E) -> BackendError {
    BackendError::Storage {
        reason: err.to_string(),
    }
}
