use super::{StagedImage, StoreImage};
use crate::domain::errors::StoreError;
use crate::ports::outbound::{RecordLayout, RecordStore, StorageProvider};
use ledger_types::Checkpoint;
use parking_lot::RwLock;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const MAGIC: &[u8; 4] = b"LDGS";
const FORMAT_VERSION: u8 = 1;
/// magic + version + crc32 + payload length
const HEADER_LEN: usize = 4 + 1 + 4 + 8;

/// Removes its temp file when dropped, unless it was persisted.
///
/// Every early return between creating the temp file and the final rename
/// leaves no stray file behind.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn create(path: PathBuf) -> Result<(Self, File), StoreError> {
        let file = File::create(&path)?;
        Ok((Self { path, armed: true }, file))
    }

    fn persist(mut self, target: &Path) -> Result<(), StoreError> {
        fs::rename(&self.path, target)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Record store persisted as one image file.
///
/// ## File Format
///
/// `[magic "LDGS"][version u8][crc32 u32 LE][len u64 LE][bincode(image)]`
///
/// A commit writes the whole merged image to `<file>.tmp`, syncs it and
/// renames it over the store file, so the file always holds either the old or
/// the new checkpoint together with its records.
#[derive(Debug)]
pub struct FileRecordStore {
    name: String,
    path: PathBuf,
    image: RwLock<StagedImage>,
}

impl FileRecordStore {
    pub fn open(path: impl AsRef<Path>, name: &str, layout: RecordLayout) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let committed = match fs::read(&path) {
            Ok(bytes) => decode_image(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("[store] creating '{}' at {}", name, path.display());
                StoreImage::empty(layout)
            }
            Err(e) => return Err(e.into()),
        };

        let image = StagedImage::open(name, layout, committed)?;
        debug!(
            "[store] opened '{}' with {} records at {}",
            name,
            image.committed_len(),
            image.checkpoint()
        );

        Ok(Self {
            name: name.to_string(),
            path,
            image: RwLock::new(image),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_image(&self, image: &StoreImage) -> Result<(), StoreError> {
        let bytes = encode_image(image)?;
        let (guard, mut file) = TempFileGuard::create(self.path.with_extension("tmp"))?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        guard.persist(&self.path)
    }
}

fn encode_image(image: &StoreImage) -> Result<Vec<u8>, StoreError> {
    let payload = bincode::serialize(image).map_err(|e| StoreError::Io(e.to_string()))?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn decode_image(bytes: &[u8]) -> Result<StoreImage, StoreError> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(StoreError::Corrupted("missing store header".into()));
    }
    if bytes[4] != FORMAT_VERSION {
        return Err(StoreError::Corrupted(format!(
            "unsupported format version {}",
            bytes[4]
        )));
    }

    let mut crc = [0u8; 4];
    crc.copy_from_slice(&bytes[5..9]);
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[9..HEADER_LEN]);

    let payload = &bytes[HEADER_LEN..];
    if payload.len() as u64 != u64::from_le_bytes(len) {
        return Err(StoreError::Corrupted("truncated store image".into()));
    }
    if crc32fast::hash(payload) != u32::from_le_bytes(crc) {
        return Err(StoreError::Corrupted("checksum mismatch".into()));
    }
    bincode::deserialize(payload).map_err(|e| StoreError::Corrupted(e.to_string()))
}

impl RecordStore for FileRecordStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn layout(&self) -> RecordLayout {
        self.image.read().layout()
    }

    fn get_by_index(&self, index: u64) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.image.read().get(index))
    }

    fn add_entry(&self, index: u64, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.image.write().stage_add(index, bytes)
    }

    fn update_entry(&self, index: u64, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.image.write().stage_update(index, bytes)
    }

    fn contains_index(&self, index: u64) -> Result<bool, StoreError> {
        Ok(self.image.read().contains(index))
    }

    fn start_index(&self) -> Option<u64> {
        self.image.read().start_index()
    }

    fn end_index(&self) -> Option<u64> {
        self.image.read().end_index()
    }

    fn checkpoint(&self) -> Checkpoint {
        self.image.read().checkpoint()
    }

    fn commit(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let mut image = self.image.write();
        let merged = image.merged(checkpoint);
        self.write_image(&merged)?;
        image.publish(merged);
        Ok(())
    }

    fn discard(&self) {
        self.image.write().discard();
    }
}

/// Opens `FileRecordStore`s under one directory, one file per store.
#[derive(Debug, Clone)]
pub struct FileStorageProvider {
    dir: PathBuf,
}

impl FileStorageProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn store_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.store", name))
    }
}

impl StorageProvider for FileStorageProvider {
    fn open_store(&self, name: &str, layout: RecordLayout) -> Result<Arc<dyn RecordStore>, StoreError> {
        fs::create_dir_all(&self.dir)?;
        let store = FileRecordStore::open(self.store_path(name), name, layout)?;
        Ok(Arc::new(store) as Arc<dyn RecordStore>)
    }
}
