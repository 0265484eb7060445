//! Persistence for registered ads and their hash tokens.
//!
//! Backends implement [Store] and are handed to the scanner and registrar explicitly.
//! A song only becomes visible to [Store::get_known_content_hashes], [Store::get_all_songs]
//! and [Store::return_matches] once [Store::mark_fingerprinted] has been called for it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::audio::{ContentHash, RawMatch};
use crate::fingerprint::HashToken;
use crate::Result;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

pub type SongId = u32;

/// Metadata stored for a registered ad.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SongRecord {
    pub id: SongId,
    pub name: String,
    pub content_hash: ContentHash,
    pub duration_seconds: f64,
    pub total_hashes: usize,
    pub fingerprinted: bool,
}

pub trait Store {
    /// Prepares the backend for use. Songs left without a completed fingerprint are removed.
    fn setup(&self) -> Result<()>;

    /// Removes every song and hash.
    fn empty(&self) -> Result<()>;

    /// Returns all fully registered songs, ordered by id.
    fn get_all_songs(&self) -> Result<Vec<SongRecord>>;

    /// Returns the content hashes of all fully registered songs.
    fn get_known_content_hashes(&self) -> Result<HashSet<ContentHash>> {
        Ok(self
            .get_all_songs()?
            .into_iter()
            .map(|s| s.content_hash)
            .collect())
    }

    fn insert_song(
        &self,
        name: &str,
        content_hash: &ContentHash,
        duration_seconds: f64,
    ) -> Result<SongId>;

    fn insert_hashes(&self, song_id: SongId, hashes: &[HashToken]) -> Result<()>;

    fn mark_fingerprinted(&self, song_id: SongId) -> Result<()>;

    fn get_song_by_id(&self, song_id: SongId) -> Result<SongRecord>;

    /// Looks up every query token and returns one [RawMatch] per hit.
    ///
    /// The match offset is the stored token offset minus the query token offset, i.e. the
    /// position of the query start within the registered song's own timeline.
    fn return_matches(&self, hashes: &[HashToken]) -> Result<Vec<RawMatch>>;
}
