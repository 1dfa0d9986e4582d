use thiserror::Error;

/// Errors surfaced by the disk image library.
#[derive(Debug, Error)]
pub enum DskError {
    #[error("unrecognized disk geometry ({0} bytes)")]
    UnrecognizedGeometry(usize),

    #[error("volume information block signature is not \"DSK\"")]
    InvalidVibSignature,

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file name already exists: {0}")]
    NameExists(String),

    #[error("invalid name {name:?}: {reason}")]
    NameInvalid { name: String, reason: &'static str },

    #[error("not enough free space on the volume")]
    OutOfSpace,

    #[error("file is spread over more runs than a descriptor can hold")]
    FragmentationExceeded,

    #[error("data chain of {0} is corrupt, run a volume check")]
    CorruptChain(String),

    #[error("volume directory is corrupt, run a volume check")]
    CorruptDirectory,

    #[error("record of {length} bytes does not fit record length {max}")]
    RecordTooLong { length: usize, max: usize },

    #[error("invalid record length {0}")]
    InvalidRecordLength(u16),

    #[error("image was not loaded from a path, use save_as")]
    NoSourcePath,

    #[error("TIFILES/FIAD wrapping is handled outside this library")]
    UnsupportedInCore,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
