//! Audio fingerprinting.
//!
//! A [FingerprintEngine] turns mono PCM into a set of [HashToken]s. Each token carries the
//! index of the fingerprint window it was computed from, which is what the aligner uses to
//! line a query window up against a registered ad.

extern crate chromaprint_rust;

use std::collections::HashSet;

use chromaprint_rust as chromaprint;
use serde::{Deserialize, Serialize};

use crate::{util, Error, Result};

/// A single matchable hash, tagged with the index of the window it was generated from.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
pub struct HashToken {
    pub hash: u32,
    pub offset: u32,
}

impl HashToken {
    pub fn new(hash: u32, offset: u32) -> Self {
        Self { hash, offset }
    }
}

/// Describes how window offsets map onto time for a given engine.
///
/// One offset step corresponds to `window_size * overlap_ratio` samples at `sample_rate`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FingerprintParams {
    pub sample_rate: u32,
    pub window_size: u32,
    pub overlap_ratio: f64,
}

impl FingerprintParams {
    /// Converts a window offset into seconds, rounded to 5 decimal places.
    pub fn offset_to_seconds(&self, offset: i64) -> f64 {
        util::round_to(
            offset as f64 * self.window_size as f64 * self.overlap_ratio
                / self.sample_rate as f64,
            5,
        )
    }
}

/// Generates hash tokens from audio.
///
/// Implementations must be deterministic: identical samples always yield identical tokens.
pub trait FingerprintEngine: Send + Sync {
    /// Returns the timing parameters used to interpret token offsets.
    fn params(&self) -> FingerprintParams;

    /// Fingerprints mono `samples` recorded at `sample_rate`. The returned tokens are distinct.
    fn fingerprint(&self, samples: &[i16], sample_rate: u32) -> Result<Vec<HashToken>>;
}

/// Chromaprint-backed engine.
///
/// Every raw Chromaprint item becomes one token, with the item index as its offset. Chromaprint
/// works on 11025 Hz audio with 4096-sample frames and a hop of a third of a frame.
#[derive(Copy, Clone, Debug, Default)]
pub struct ChromaprintEngine;

impl ChromaprintEngine {
    pub const SAMPLE_RATE: u32 = 11025;
    pub const FRAME_SIZE: u32 = 4096;
    pub const OVERLAP_RATIO: f64 = 1.0 / 3.0;

    pub fn new() -> Self {
        Self
    }
}

fn chromaprint_error(e: impl std::fmt::Debug) -> Error {
    Error::Fingerprint(format!("chromaprint: {:?}", e))
}

impl FingerprintEngine for ChromaprintEngine {
    fn params(&self) -> FingerprintParams {
        FingerprintParams {
            sample_rate: Self::SAMPLE_RATE,
            window_size: Self::FRAME_SIZE,
            overlap_ratio: Self::OVERLAP_RATIO,
        }
    }

    fn fingerprint(&self, samples: &[i16], sample_rate: u32) -> Result<Vec<HashToken>> {
        let span = tracing::span!(tracing::Level::TRACE, "fingerprint");
        let _enter = span.enter();

        if samples.is_empty() {
            return Err(Error::Fingerprint("no samples to fingerprint".to_string()));
        }

        let mut ctx = chromaprint::Context::default();
        ctx.start(sample_rate, 1).map_err(chromaprint_error)?;
        ctx.feed(samples).map_err(chromaprint_error)?;
        ctx.finish().map_err(chromaprint_error)?;
        let raw = ctx.get_fingerprint_raw().map_err(chromaprint_error)?;

        let mut seen = HashSet::new();
        let tokens: Vec<HashToken> = raw
            .get()
            .iter()
            .enumerate()
            .map(|(i, hash)| HashToken::new(*hash, i as u32))
            .filter(|t| seen.insert(*t))
            .collect();

        tracing::trace!(
            samples = samples.len(),
            tokens = tokens.len(),
            "generated fingerprint"
        );

        Ok(tokens)
    }
}
