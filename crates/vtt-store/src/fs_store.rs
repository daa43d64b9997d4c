use crate::{
    DocumentStore, EntityRecord, SessionRecord, StoreError, StoreResult, decode_verified,
    io_error,
};
use std::{
    fmt,
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use vtt_cbor::{from_canonical_cbor, to_canonical_cbor};
use vtt_types::SessionId;

const SESSION_FILE: &str = "session.cbor";
const ENTITIES_FILE: &str = "entities.cbor";

/// Filesystem-backed store rooted at `<root>/.vtt/sessions`.
///
/// Each session lives in its own directory named by the hex encoding of its
/// id, so arbitrary ids stay path-safe.
#[derive(Clone)]
pub struct FsStore {
    sessions_dir: PathBuf,
}

impl fmt::Debug for FsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsStore")
            .field("sessions_dir", &self.sessions_dir)
            .finish()
    }
}

impl FsStore {
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let sessions_dir = root.as_ref().join(".vtt").join("sessions");
        fs::create_dir_all(&sessions_dir).map_err(|e| io_error(&sessions_dir, e))?;
        Ok(Self { sessions_dir })
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.sessions_dir.join(hex::encode(id.as_str()))
    }

    /// Write via a sibling temp file and rename, so readers never see a torn file.
    fn write_replace(path: &Path, bytes: &[u8]) -> StoreResult<()> {
        let tmp = path.with_extension("cbor.tmp");
        let mut file = File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
        file.write_all(bytes).map_err(|e| io_error(&tmp, e))?;
        file.sync_all().map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| io_error(path, e))
    }

    fn read_optional(path: &Path) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(path, err)),
        }
    }
}

impl DocumentStore for FsStore {
    fn put_session(&self, record: &SessionRecord) -> StoreResult<()> {
        let dir = self.session_dir(&record.session_id);
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        // Entities first; the session record is the commit point.
        Self::write_replace(&dir.join(ENTITIES_FILE), &to_canonical_cbor(&record.entities())?)?;
        Self::write_replace(&dir.join(SESSION_FILE), &to_canonical_cbor(record)?)
    }

    fn get_session(&self, id: &SessionId) -> StoreResult<Option<SessionRecord>> {
        let path = self.session_dir(id).join(SESSION_FILE);
        Self::read_optional(&path)?
            .map(|bytes| decode_verified(&bytes))
            .transpose()
    }

    fn list_sessions(&self) -> StoreResult<Vec<SessionId>> {
        let entries = fs::read_dir(&self.sessions_dir).map_err(|e| io_error(&self.sessions_dir, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.sessions_dir, e))?;
            if !entry.path().join(SESSION_FILE).is_file() {
                continue;
            }
            let name = entry.file_name();
            let decoded = name
                .to_str()
                .and_then(|name| hex::decode(name).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok());
            if let Some(id) = decoded {
                ids.push(SessionId::new(id));
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn delete_session(&self, id: &SessionId) -> StoreResult<bool> {
        let dir = self.session_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&dir, err)),
        }
    }

    fn get_entities(&self, id: &SessionId) -> StoreResult<Vec<EntityRecord>> {
        let path = self.session_dir(id).join(ENTITIES_FILE);
        match Self::read_optional(&path)? {
            Some(bytes) => from_canonical_cbor(&bytes).map_err(StoreError::from),
            None => Ok(Vec::new()),
        }
    }
}
