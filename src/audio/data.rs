use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::SongId;
use crate::util;

/// One hit of a queried hash inside a registered ad.
///
/// `offset` is the position of the query start within the ad's own timeline, in fingerprint
/// windows. Repeated entries are expected; their counts form the alignment histogram.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct RawMatch {
    pub song_id: SongId,
    pub offset: i64,
}

impl RawMatch {
    pub fn new(song_id: SongId, offset: i64) -> Self {
        Self { song_id, offset }
    }
}

/// A scored ad hypothesis for a single query.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub song_id: SongId,
    pub song_name: String,
    pub total_hashes: usize,
    /// Duration of the registered ad, in seconds.
    pub duration: f64,
    pub best_offset: i64,
    pub matched_count: usize,
    /// Aligned matches relative to the number of queried hashes.
    pub input_confidence: f64,
    /// Aligned matches relative to the number of hashes stored for the ad.
    pub fingerprinted_confidence: f64,
    pub offset_seconds: f64,
}

/// A detected ad occurrence, in seconds from the start of the scanned file.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Label {
    pub start_time: f64,
    pub end_time: f64,
    pub ad_name: String,
}

impl Label {
    pub fn new(start_time: f64, end_time: f64, ad_name: impl Into<String>) -> Self {
        Self {
            start_time,
            end_time,
            ad_name: ad_name.into(),
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{} {}",
            util::format_seconds(self.start_time),
            util::format_seconds(self.end_time),
            self.ad_name
        )
    }
}

/// Reads a JSON array of labels, e.g. a list of clips to register.
pub fn read_labels(path: impl AsRef<Path>) -> crate::Result<Vec<Label>> {
    let f = std::fs::File::open(path.as_ref())?;
    Ok(serde_json::from_reader(std::io::BufReader::new(f))?)
}

/// Writes `labels` as JSON alongside `media` and returns the path of the label file.
pub fn write_labels(media: impl AsRef<Path>, labels: &[Label]) -> crate::Result<PathBuf> {
    let path = media.as_ref().with_extension(super::LABEL_FILE_EXT);
    let mut f = std::fs::File::create(&path)?;
    serde_json::to_writer_pretty(&mut f, labels)?;
    Ok(path)
}

/// MD5 digest over the decoded mono samples of a clip.
///
/// Two clips with identical sample sequences always have the same content hash, regardless
/// of the name they are registered under.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn from_samples(samples: &[i16]) -> Self {
        let mut ctx = md5::Context::new();
        for chunk in samples.chunks(4096) {
            let bytes: Vec<u8> = chunk.iter().flat_map(|s| s.to_le_bytes()).collect();
            ctx.consume(&bytes);
        }
        Self(format!("{:x}", ctx.compute()))
    }

    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of the scan window within a file. All values are in seconds.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ScanState {
    pub position: f64,
    pub duration: f64,
    pub span: f64,
    pub skip: f64,
}

impl ScanState {
    pub fn new(duration: f64, span: f64, skip: f64) -> Self {
        Self {
            position: 0.0,
            duration,
            span,
            skip,
        }
    }

    /// Returns true while a full window still fits before the end of the file. Any trailing
    /// remainder shorter than `span` is never scanned.
    pub fn is_scanning(&self) -> bool {
        self.position < self.duration - self.span
    }

    /// Moves the window to `next`. If `next` would not move the window forward, the window
    /// steps by `skip` instead. Fails if the position still cannot increase.
    pub(crate) fn advance_to(&mut self, next: f64) -> crate::Result<()> {
        let next = if next > self.position {
            next
        } else {
            self.position + self.skip
        };
        if !(next > self.position) {
            return Err(crate::Error::ScanStalled(self.position));
        }
        self.position = next;
        Ok(())
    }
}

/// Time spent in each stage of recognition.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Timings {
    pub fingerprint_time: Duration,
    pub query_time: Duration,
    pub align_time: Duration,
}

impl Timings {
    pub fn total(&self) -> Duration {
        self.fingerprint_time + self.query_time + self.align_time
    }

    pub(crate) fn add(&mut self, other: &Timings) {
        self.fingerprint_time += other.fingerprint_time;
        self.query_time += other.query_time;
        self.align_time += other.align_time;
    }
}
