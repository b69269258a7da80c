use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::canvas::{CanvasSnapshot, ImageLoadError, LineArt};
use crate::project::{PageId, StorySession};

// ============================================================================
// LINE-ART SOURCE
// ============================================================================

/// Turn a line-art locator into a filesystem path. Accepts plain paths and
/// `file://` URLs.
pub fn resolve_locator(locator: &str) -> Result<PathBuf, ImageLoadError> {
    let trimmed = locator.trim();
    if let Some(rest) = trimmed.strip_prefix("file://") {
        return Ok(PathBuf::from(rest));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Err(ImageLoadError::Fetch(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("remote line art must be downloaded first: {}", trimmed),
        )));
    }
    Ok(PathBuf::from(trimmed))
}

/// Fetch and decode a line-art image into RGBA.
pub fn fetch_line_art(locator: &str) -> Result<LineArt, ImageLoadError> {
    let path = resolve_locator(locator)?;
    let bytes = fs::read(&path)?;
    decode_line_art(&bytes)
}

/// Decode line art already held in memory (any format the `image` crate knows).
pub fn decode_line_art(bytes: &[u8]) -> Result<LineArt, ImageLoadError> {
    let img = image::load_from_memory(bytes)?.to_rgba8();
    if img.width() == 0 || img.height() == 0 {
        return Err(ImageLoadError::EmptySource);
    }
    Ok(LineArt::new(img))
}

// ============================================================================
// KEY-VALUE STORE
// ============================================================================

/// Error type for persistence operations.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    QuotaExceeded { needed: usize, available: usize },
    Serialize(String),
    InvalidFormat(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "I/O error: {}", e),
            StoreError::QuotaExceeded { needed, available } => write!(
                f,
                "storage quota exceeded: need {} bytes, {} available",
                needed, available
            ),
            StoreError::Serialize(e) => write!(f, "Serialization error: {}", e),
            StoreError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for StoreError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        StoreError::Serialize(e.to_string())
    }
}

/// Durable string-keyed byte store. Both operations may fail; callers
/// contain the failure.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn set(&mut self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
}

/// In-process store with an optional byte quota over all values.
#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            quota: Some(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn used_excluding(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(_, v)| v.len())
            .sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        if let Some(quota) = self.quota {
            let available = quota.saturating_sub(self.used_excluding(key));
            if value.len() > available {
                return Err(StoreError::QuotaExceeded {
                    needed: value.len(),
                    available,
                });
            }
        }
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// One file per key inside a directory.
///
/// Writes go to a `.tmp` sibling first and are renamed into place, so an
/// interrupted write never replaces a good entry.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.bin", name))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("bin.tmp");
        let written = fs::write(&tmp, &value).and_then(|()| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Default directory of the file-backed store.
///
/// `~/.local/share/Colorbook/coloring/` (Linux), `%APPDATA%\Colorbook\coloring\`
/// (Windows), `~/Library/Application Support/Colorbook/coloring/` (macOS).
pub fn default_store_dir() -> PathBuf {
    crate::logger::data_dir().join("Colorbook").join("coloring")
}

// ============================================================================
// SAVED COLORING STATE
// ============================================================================

/// Magic tag of the persisted format.
const SAVE_MAGIC_V1: &str = "CBS1";

/// Colouring progress of one (story, theme) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedColoringState {
    pub story_hash: String,
    pub images: BTreeMap<PageId, CanvasSnapshot>,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
}

#[derive(Serialize, Deserialize)]
struct SavedFileV1 {
    magic: String,
    state: SavedColoringState,
}

pub fn encode_saved_state(state: &SavedColoringState) -> Result<Vec<u8>, StoreError> {
    let file = SavedFileV1 {
        magic: SAVE_MAGIC_V1.to_string(),
        state: state.clone(),
    };
    Ok(bincode::serialize(&file)?)
}

pub fn decode_saved_state(raw: &[u8]) -> Result<SavedColoringState, StoreError> {
    let file: SavedFileV1 = bincode::deserialize(raw)?;
    if file.magic != SAVE_MAGIC_V1 {
        return Err(StoreError::InvalidFormat(format!(
            "Unknown magic '{}'",
            file.magic
        )));
    }
    Ok(file.state)
}

/// Deterministic, order-sensitive 32-bit polynomial hash (×31, wrapping) over
/// the UTF-16 code units of `story_text + "|" + theme_key`, as 8 hex digits.
///
/// Not collision-resistant; it only needs to spread realistic stories apart.
pub fn story_hash(story_text: &str, theme_key: &str) -> String {
    let units = story_text
        .encode_utf16()
        .chain("|".encode_utf16())
        .chain(theme_key.encode_utf16());

    let mut hash: i32 = 0;
    for unit in units {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(unit as i32);
    }
    format!("{:08x}", hash as u32)
}

/// Persistence adapter: saves and loads [`SavedColoringState`] by story hash.
///
/// Never propagates failures. A failed save is logged and reported as
/// `false`; a missing or unreadable entry loads as `None`.
pub struct ColoringStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> ColoringStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    pub fn key(story_hash: &str) -> String {
        format!("coloring_{}", story_hash)
    }

    /// Serialise `images` as they are now and write them in one value.
    pub fn save(&mut self, story_hash: &str, images: &BTreeMap<PageId, CanvasSnapshot>) -> bool {
        let state = SavedColoringState {
            story_hash: story_hash.to_string(),
            images: images.clone(),
            updated_at: crate::logger::unix_millis(),
        };

        let result = encode_saved_state(&state)
            .and_then(|bytes| self.store.set(&Self::key(story_hash), bytes));

        match result {
            Ok(()) => {
                log_info!("Saved {} page(s) for story {}", images.len(), story_hash);
                true
            }
            Err(e) => {
                log_err!("Failed to save coloring for story {}: {}", story_hash, e);
                false
            }
        }
    }

    /// Save every coloured page of `session` under its story hash.
    pub fn save_session(&mut self, session: &StorySession) -> bool {
        log_info!("{}: saving story {}", session.log_tag(), session.story_hash());
        self.save(&session.story_hash(), &session.snapshots())
    }

    /// Merge saved colouring into `session`. Returns how many pages were
    /// restored; a missing or unreadable entry restores none.
    pub fn restore_session(&self, session: &mut StorySession) -> usize {
        match self.load(&session.story_hash()) {
            Some(saved) => session.merge_saved(&saved),
            None => {
                log_info!(
                    "{}: nothing saved for story {}",
                    session.log_tag(),
                    session.story_hash()
                );
                0
            }
        }
    }

    pub fn load(&self, story_hash: &str) -> Option<SavedColoringState> {
        let raw = match self.store.get(&Self::key(story_hash)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log_warn!("Failed to read coloring for story {}: {}", story_hash, e);
                return None;
            }
        };

        match decode_saved_state(&raw) {
            Ok(state) if state.story_hash == story_hash => Some(state),
            Ok(state) => {
                log_warn!(
                    "Stored coloring under {} belongs to story {}; ignoring",
                    story_hash,
                    state.story_hash
                );
                None
            }
            Err(e) => {
                log_warn!("Discarding unreadable coloring for story {}: {}", story_hash, e);
                None
            }
        }
    }
}
