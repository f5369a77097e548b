use thiserror::Error;

/// Failures while decoding a wire value into a typed record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("invalid source fingerprint")]
    InvalidFingerprint,

    #[error("invalid depth")]
    InvalidDepth,

    #[error("invalid child index spec")]
    InvalidIndexSpec,

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("invalid field {0}")]
    InvalidField(&'static str),
}

impl DecodeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DecodeError::MalformedEnvelope(reason.into())
    }
}

/// A frame disagreed with frames already accumulated for the same message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("frame count conflict: accumulating {expected} frames, frame claims {found}")]
    FrameCountConflict { expected: u32, found: u32 },

    #[error("message length conflict: accumulating {expected} bytes, frame claims {found}")]
    MessageLengthConflict { expected: u32, found: u32 },

    #[error("fragment length conflict: accumulating {expected} bytes, frame carries {found}")]
    FragmentLengthConflict { expected: usize, found: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("message of {0} bytes exceeds the 4 GiB frame limit")]
    MessageTooLarge(usize),

    #[error("message needs {frames} frames, more than the {max} a receiver accepts")]
    TooManyFrames { frames: usize, max: u32 },
}

/// Contract violations when building a path by hand.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("source fingerprint must be non-zero")]
    ZeroFingerprint,

    #[error("child index {0} exceeds 2^31-1")]
    IndexOutOfRange(u32),

    #[error("range {low}-{high} is empty or inverted")]
    InvalidRange { low: u32, high: u32 },

    #[error("cannot parse path: {0}")]
    Parse(String),
}

/// Contract violations when building a seed, key or request by hand.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("fingerprint must be non-zero")]
    ZeroFingerprint,

    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

/// Protocol-level outcomes that end an exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("response id {found} does not match request id {expected}")]
    IdMismatch { expected: uuid::Uuid, found: uuid::Uuid },

    #[error("scanned data is not a {0}")]
    UnexpectedRecord(&'static str),

    #[error("operation not valid in state {0}")]
    InvalidState(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

pub type Result<T> = std::result::Result<T, Error>;
