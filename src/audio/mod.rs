mod aligner;
mod data;
mod decoder;
mod recognizer;
mod registrar;
mod scanner;
mod util;

pub use aligner::{Alignment, ConsensusAligner};
pub use data::{
    read_labels, write_labels, Candidate, ContentHash, Label, RawMatch, ScanState, Timings,
};
pub use decoder::{AudioSource, FfmpegSource, PcmAudio};
pub use recognizer::{Recognition, Recognizer};
pub use registrar::{Registered, Registrar, RegistrationReport};
pub use scanner::{ScanController, ScanReport};

/// File extension used for label files written next to a scanned file.
pub static LABEL_FILE_EXT: &str = "adspot.json";
