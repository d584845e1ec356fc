// BPS patch format: varint codec, opcode model, stream reader/writer,
// and the textual assembly form.
//
// # Modules
//
// - `varint` — BPS variable-length integer encoding
// - `ops`    — in-memory opcode model + wire-encoding helpers
// - `reader` — byte stream -> lazy opcode iterator
// - `writer` — opcode iterator -> byte stream, rolling CRC32
// - `asm`    — line-oriented textual patch form

pub mod asm;
pub mod ops;
pub mod reader;
pub mod writer;
pub mod varint;

pub use ops::{Opcode, MAGIC};
pub use reader::{read_patch, PatchReader};
pub use writer::{write_patch, PatchWriter};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while producing or consuming BPS patches.
#[derive(Debug)]
pub enum Error {
    /// Underlying transport failure (file read/write).
    Io(std::io::Error),
    /// The patch data violates the format or one of its invariants.
    /// Carries a human-readable reason.
    Corrupt(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Corrupt(msg) => write!(f, "corrupt patch: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Corrupt(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Shorthand for building a `Corrupt` error.
pub(crate) fn corrupt(msg: impl Into<String>) -> Error {
    Error::Corrupt(msg.into())
}
