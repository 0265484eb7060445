use std::time::Instant;

use crate::fingerprint::FingerprintEngine;
use crate::store::Store;
use crate::Result;

use super::{Candidate, ConsensusAligner, RawMatch, Timings};

/// Result of recognizing a single piece of audio.
#[derive(Clone, Debug, Default)]
pub struct Recognition {
    pub candidates: Vec<Candidate>,
    pub queried_hashes: usize,
    pub timings: Timings,
}

/// Fingerprints audio, looks the hashes up in a [Store] and aligns the hits.
pub struct Recognizer<'a, E: FingerprintEngine, S: Store> {
    engine: &'a E,
    store: &'a S,
    aligner: ConsensusAligner,
}

impl<'a, E: FingerprintEngine, S: Store> Recognizer<'a, E, S> {
    pub fn new(engine: &'a E, store: &'a S, aligner: ConsensusAligner) -> Self {
        Self {
            engine,
            store,
            aligner,
        }
    }

    pub fn aligner(&self) -> &ConsensusAligner {
        &self.aligner
    }

    /// Fingerprints `samples` and returns the raw hits along with the number of hashes queried.
    pub fn find_matches(
        &self,
        samples: &[i16],
        sample_rate: u32,
        timings: &mut Timings,
    ) -> Result<(Vec<RawMatch>, usize)> {
        let t = Instant::now();
        let hashes = self.engine.fingerprint(samples, sample_rate)?;
        timings.fingerprint_time += t.elapsed();

        let t = Instant::now();
        let matches = self.store.return_matches(&hashes)?;
        timings.query_time += t.elapsed();

        Ok((matches, hashes.len()))
    }

    /// Runs the full recognition pipeline over `samples`.
    pub fn recognize(&self, samples: &[i16], sample_rate: u32) -> Result<Recognition> {
        let span = tracing::span!(tracing::Level::TRACE, "recognize");
        let _enter = span.enter();

        let mut timings = Timings::default();
        let (matches, queried_hashes) = self.find_matches(samples, sample_rate, &mut timings)?;

        let t = Instant::now();
        let candidates = self.aligner.align(self.store, matches, queried_hashes)?;
        timings.align_time += t.elapsed();

        tracing::debug!(
            queried_hashes,
            num_candidates = candidates.len(),
            fingerprint_ms = timings.fingerprint_time.as_millis() as u64,
            query_ms = timings.query_time.as_millis() as u64,
            align_ms = timings.align_time.as_millis() as u64,
            "recognition finished"
        );

        Ok(Recognition {
            candidates,
            queried_hashes,
            timings,
        })
    }
}
