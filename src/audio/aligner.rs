use std::cmp::Reverse;

use crate::fingerprint::FingerprintParams;
use crate::store::{SongId, Store};
use crate::util;
use crate::Result;

use super::{Candidate, RawMatch};

/// Best alignment found for a single song.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Alignment {
    pub song_id: SongId,
    pub offset: i64,
    pub count: usize,
}

/// Turns raw hash hits into ranked ad candidates by offset consensus.
///
/// For every song, the offset with the most hits is taken as the alignment hypothesis. Songs
/// are then ranked by the number of hits at that offset.
///
/// Ties are broken deterministically: within a song the smallest offset wins, and between
/// songs with the same count the smallest song id ranks first.
#[derive(Copy, Clone, Debug)]
pub struct ConsensusAligner {
    params: FingerprintParams,
    top_n: Option<usize>,
    min_matches: Option<usize>,
}

impl ConsensusAligner {
    /// Constructs an aligner that keeps the best two candidates and applies no cutoff.
    pub fn new(params: FingerprintParams) -> Self {
        Self {
            params,
            top_n: Some(2),
            min_matches: None,
        }
    }

    /// Returns a new [ConsensusAligner] that keeps at most `top_n` candidates, or all of them
    /// if `None`.
    pub fn with_top_n(mut self, top_n: Option<usize>) -> Self {
        self.top_n = top_n;
        self
    }

    /// Returns a new [ConsensusAligner] that drops songs with fewer aligned hits than
    /// `min_matches`.
    pub fn with_min_matches(mut self, min_matches: Option<usize>) -> Self {
        self.min_matches = min_matches;
        self
    }

    pub fn top_n(&self) -> Option<usize> {
        self.top_n
    }

    /// Ranks songs by their best offset count, best first, after applying the cutoff and
    /// `top_n`.
    pub fn rank(&self, mut matches: Vec<RawMatch>) -> Vec<Alignment> {
        matches.sort_unstable();

        let mut best: Vec<Alignment> = Vec::new();
        let mut i = 0;
        while i < matches.len() {
            let m = matches[i];
            let run = matches[i..]
                .iter()
                .take_while(|other| **other == m)
                .count();
            i += run;

            match best.last_mut() {
                // Offsets are visited in ascending order, so only a strictly larger count
                // replaces the current best.
                Some(a) if a.song_id == m.song_id => {
                    if run > a.count {
                        a.offset = m.offset;
                        a.count = run;
                    }
                }
                _ => best.push(Alignment {
                    song_id: m.song_id,
                    offset: m.offset,
                    count: run,
                }),
            }
        }

        // Stable sort keeps ascending song id order among equal counts.
        best.sort_by_key(|a| Reverse(a.count));

        if let Some(min_matches) = self.min_matches {
            best.retain(|a| a.count >= min_matches);
        }
        if let Some(top_n) = self.top_n {
            best.truncate(top_n);
        }

        best
    }

    /// Scores an alignment against the stored song metadata.
    ///
    /// `input_confidence` is rounded to 2 decimals for display. `fingerprinted_confidence` is
    /// kept exact since it is compared against the scan threshold.
    pub fn score(
        &self,
        alignment: &Alignment,
        song_name: String,
        total_hashes: usize,
        duration: f64,
        queried_hashes: usize,
    ) -> Candidate {
        let ratio = |n: usize, d: usize| {
            if d == 0 {
                0.0
            } else {
                n as f64 / d as f64
            }
        };

        Candidate {
            song_id: alignment.song_id,
            song_name,
            total_hashes,
            duration,
            best_offset: alignment.offset,
            matched_count: alignment.count,
            input_confidence: util::round_to(ratio(alignment.count, queried_hashes), 2),
            fingerprinted_confidence: ratio(alignment.count, total_hashes),
            offset_seconds: self.params.offset_to_seconds(alignment.offset),
        }
    }

    /// Aligns `matches` and returns scored candidates, best first.
    ///
    /// An empty result means no ad was found; it is not an error.
    pub fn align<S: Store>(
        &self,
        store: &S,
        matches: Vec<RawMatch>,
        queried_hashes: usize,
    ) -> Result<Vec<Candidate>> {
        let span = tracing::span!(tracing::Level::TRACE, "align");
        let _enter = span.enter();

        let num_matches = matches.len();
        let ranked = self.rank(matches);

        tracing::trace!(
            num_matches,
            num_candidates = ranked.len(),
            "finished offset consensus"
        );

        ranked
            .iter()
            .map(|a| {
                let song = store.get_song_by_id(a.song_id)?;
                Ok(self.score(
                    a,
                    song.name,
                    song.total_hashes,
                    song.duration_seconds,
                    queried_hashes,
                ))
            })
            .collect()
    }
}
