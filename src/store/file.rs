use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::memory::{MemoryStore, StoreState};
use super::{SongId, SongRecord, Store};
use crate::audio::{ContentHash, RawMatch};
use crate::fingerprint::HashToken;
use crate::Result;

/// A [MemoryStore] that is persisted to a single bincode file.
///
/// The file is rewritten whenever a song is marked as fingerprinted or the store is emptied.
/// Writes go to a temporary file that is then renamed over the original, so a crash leaves
/// either the previous or the new snapshot on disk. Songs that were inserted but never
/// completed are dropped by [Store::setup].
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Opens the store at `path`, loading any existing snapshot.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let state = if path.exists() {
            let f = std::fs::File::open(&path)?;
            let state: StoreState = bincode::deserialize_from(std::io::BufReader::new(f))?;
            tracing::debug!("loaded store from {}", path.display());
            state
        } else {
            StoreState::default()
        };
        Ok(Self {
            path,
            inner: MemoryStore::from_state(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        let state = self.inner.snapshot()?;
        let tmp_path = self.path.with_extension("tmp");
        {
            let f = std::fs::File::create(&tmp_path)?;
            let mut writer = std::io::BufWriter::new(f);
            bincode::serialize_into(&mut writer, &state)?;
            let f = writer.into_inner().map_err(|e| e.into_error())?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl Store for FileStore {
    fn setup(&self) -> Result<()> {
        self.inner.setup()?;
        self.persist()
    }

    fn empty(&self) -> Result<()> {
        self.inner.empty()?;
        self.persist()
    }

    fn get_all_songs(&self) -> Result<Vec<SongRecord>> {
        self.inner.get_all_songs()
    }

    fn get_known_content_hashes(&self) -> Result<HashSet<ContentHash>> {
        self.inner.get_known_content_hashes()
    }

    fn insert_song(
        &self,
        name: &str,
        content_hash: &ContentHash,
        duration_seconds: f64,
    ) -> Result<SongId> {
        self.inner.insert_song(name, content_hash, duration_seconds)
    }

    fn insert_hashes(&self, song_id: SongId, hashes: &[HashToken]) -> Result<()> {
        self.inner.insert_hashes(song_id, hashes)
    }

    fn mark_fingerprinted(&self, song_id: SongId) -> Result<()> {
        self.inner.mark_fingerprinted(song_id)?;
        self.persist()
    }

    fn get_song_by_id(&self, song_id: SongId) -> Result<SongRecord> {
        self.inner.get_song_by_id(song_id)
    }

    fn return_matches(&self, hashes: &[HashToken]) -> Result<Vec<RawMatch>> {
        self.inner.return_matches(hashes)
    }
}
