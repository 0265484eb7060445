use std::path::PathBuf;

pub mod audio;
pub mod config;
pub mod fingerprint;
pub mod pool;
pub mod store;
pub mod util;

pub use config::Config;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no audio stream found in: {0:?}")]
    NoAudioStream(PathBuf),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("fingerprint error: {0}")]
    Fingerprint(String),
    #[error("song {0} not found in store")]
    SongNotFound(store::SongId),
    #[error("store error: {0}")]
    Store(String),
    #[error("scan position did not advance past {0:.3}s")]
    ScanStalled(f64),
    #[error("worker pool error: {0}")]
    WorkerPool(String),
    #[error("timed out waiting on {0} fingerprint worker(s)")]
    WorkerTimeout(usize),
    #[error("FFmpeg error: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),
    #[error("bincode error: {0}")]
    BincodeError(#[from] bincode::Error),
    #[error("serde_json error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
