use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use super::{SongId, SongRecord, Store};
use crate::audio::{ContentHash, RawMatch};
use crate::fingerprint::HashToken;
use crate::{Error, Result};

/// Full contents of a store. This is also the on-disk format used by [super::FileStore].
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct StoreState {
    next_id: SongId,
    songs: BTreeMap<SongId, SongRecord>,
    // hash -> (song, offset within song)
    index: HashMap<u32, Vec<(SongId, u32)>>,
}

impl StoreState {
    fn purge_unfingerprinted(&mut self) -> usize {
        let stale: Vec<SongId> = self
            .songs
            .values()
            .filter(|s| !s.fingerprinted)
            .map(|s| s.id)
            .collect();
        if stale.is_empty() {
            return 0;
        }
        for id in &stale {
            self.songs.remove(id);
        }
        self.index.retain(|_, entries| {
            entries.retain(|(sid, _)| !stale.contains(sid));
            !entries.is_empty()
        });
        stale.len()
    }
}

/// In-memory [Store] guarded by a single lock. Every operation takes the lock once, so a
/// reader never observes a half-applied write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub(crate) fn snapshot(&self) -> Result<StoreState> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| Error::Store("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| Error::Store("store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn setup(&self) -> Result<()> {
        let purged = self.write()?.purge_unfingerprinted();
        if purged > 0 {
            tracing::info!(purged, "removed songs without a completed fingerprint");
        }
        Ok(())
    }

    fn empty(&self) -> Result<()> {
        *self.write()? = StoreState::default();
        Ok(())
    }

    fn get_all_songs(&self) -> Result<Vec<SongRecord>> {
        Ok(self
            .read()?
            .songs
            .values()
            .filter(|s| s.fingerprinted)
            .cloned()
            .collect())
    }

    fn insert_song(
        &self,
        name: &str,
        content_hash: &ContentHash,
        duration_seconds: f64,
    ) -> Result<SongId> {
        let mut state = self.write()?;
        let id = state.next_id;
        state.next_id += 1;
        state.songs.insert(
            id,
            SongRecord {
                id,
                name: name.to_string(),
                content_hash: content_hash.clone(),
                duration_seconds,
                total_hashes: 0,
                fingerprinted: false,
            },
        );
        Ok(id)
    }

    fn insert_hashes(&self, song_id: SongId, hashes: &[HashToken]) -> Result<()> {
        let mut state = self.write()?;
        let song = state
            .songs
            .get_mut(&song_id)
            .ok_or(Error::SongNotFound(song_id))?;
        song.total_hashes += hashes.len();
        for token in hashes {
            state
                .index
                .entry(token.hash)
                .or_default()
                .push((song_id, token.offset));
        }
        Ok(())
    }

    fn mark_fingerprinted(&self, song_id: SongId) -> Result<()> {
        let mut state = self.write()?;
        let song = state
            .songs
            .get_mut(&song_id)
            .ok_or(Error::SongNotFound(song_id))?;
        song.fingerprinted = true;
        Ok(())
    }

    fn get_song_by_id(&self, song_id: SongId) -> Result<SongRecord> {
        self.read()?
            .songs
            .get(&song_id)
            .cloned()
            .ok_or(Error::SongNotFound(song_id))
    }

    fn return_matches(&self, hashes: &[HashToken]) -> Result<Vec<RawMatch>> {
        let state = self.read()?;
        let mut matches = Vec::new();
        for token in hashes {
            let entries = match state.index.get(&token.hash) {
                Some(entries) => entries,
                None => continue,
            };
            for (song_id, offset) in entries {
                let visible = state
                    .songs
                    .get(song_id)
                    .map(|s| s.fingerprinted)
                    .unwrap_or(false);
                if visible {
                    matches.push(RawMatch::new(
                        *song_id,
                        i64::from(*offset) - i64::from(token.offset),
                    ));
                }
            }
        }
        Ok(matches)
    }
}
