//! Scan and registration settings.
//!
//! A [Config] is built once (defaults, optionally a JSON file, then command-line overrides),
//! validated, and then handed to each component by reference.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default window width (seconds).
pub const DEFAULT_ANALYZE_SPAN: f64 = 3.0;

/// Default step taken when a window has no match (seconds).
pub const DEFAULT_ANALYZE_SKIP: f64 = 1.0;

/// Default minimum fingerprinted confidence for a detection to be reported.
///
/// This is the ratio of aligned hash matches to the total number of hashes stored for the ad.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.2;

/// Default number of ads listed by whole-clip recognition.
pub const DEFAULT_TOP_N: usize = 2;

/// Default aligned match count required when recognizing a whole clip.
pub const DEFAULT_RECOGNIZE_MIN_MATCHES: usize = 10;

/// Default number of fingerprint workers used during registration.
pub const DEFAULT_WORKER_COUNT: usize = 1;

/// Default interval between polls of the worker completion queue (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Width of each scan window, in seconds.
    pub analyze_span: f64,
    /// Step taken when a window has no candidate, in seconds.
    pub analyze_skip: f64,
    /// Minimum fingerprinted confidence (0.0 - 1.0) for a candidate to become a label.
    pub confidence_threshold: f64,
    /// Number of ads listed by whole-clip recognition. Scanning always keeps only the best.
    pub top_n: usize,
    /// Optional aligned match count cutoff applied while scanning.
    pub min_matches: Option<usize>,
    /// Aligned match count cutoff applied by whole-clip recognition.
    pub recognize_min_matches: usize,
    /// Number of fingerprint workers used during registration.
    pub worker_count: usize,
    /// Hold back clips whose content is already being fingerprinted by another worker.
    pub in_flight_dedup: bool,
    pub poll_interval_ms: u64,
    /// Give up waiting on a worker result after this many seconds. Waits forever if unset.
    pub worker_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analyze_span: DEFAULT_ANALYZE_SPAN,
            analyze_skip: DEFAULT_ANALYZE_SKIP,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            top_n: DEFAULT_TOP_N,
            min_matches: None,
            recognize_min_matches: DEFAULT_RECOGNIZE_MIN_MATCHES,
            worker_count: DEFAULT_WORKER_COUNT,
            in_flight_dedup: false,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            worker_timeout_secs: None,
        }
    }
}

impl Config {
    /// Loads a configuration from a JSON file. Missing fields take their default values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let f = std::fs::File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(f)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that all values are usable by the scanner and registrar.
    pub fn validate(&self) -> Result<()> {
        if !(self.analyze_span.is_finite() && self.analyze_span > 0.0) {
            return Err(Error::InvalidConfig(
                "analyze_span must be a positive number".to_string(),
            ));
        }
        if !(self.analyze_skip.is_finite() && self.analyze_skip > 0.0) {
            return Err(Error::InvalidConfig(
                "analyze_skip must be a positive number".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::InvalidConfig(
                "confidence_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.top_n == 0 {
            return Err(Error::InvalidConfig("top_n must be at least 1".to_string()));
        }
        if self.worker_count == 0 {
            return Err(Error::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout_secs.map(Duration::from_secs)
    }
}
