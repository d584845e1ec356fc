// Patch stream reader: parses wire bytes into a lazy opcode iterator.
//
// State progression:
//   magic -> source header -> target header -> operations (until the
//   declared target size is covered) -> source CRC -> target CRC ->
//   patch CRC -> EOF probe -> done.
//
// The reader does *not* verify the trailing patch CRC against the bytes it
// consumed; that is the validator's job.  It does reject trailing bytes
// after the CRC trailer.

use std::io::{self, Read};

use super::ops::{
    unpack_offset, Opcode, MAGIC, OPCODE_MASK, OPCODE_SHIFT, OP_SOURCE_COPY, OP_SOURCE_READ,
    OP_TARGET_COPY, OP_TARGET_READ,
};
use super::{corrupt, varint, Error, Result};

/// Wrap a byte source in a [`PatchReader`].
pub fn read_patch<R: Read>(input: R) -> PatchReader<R> {
    PatchReader::new(input)
}

// ---------------------------------------------------------------------------
// PatchReader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Magic,
    TargetHeader,
    Operations,
    SourceCrc,
    TargetCrc,
    PatchCrc,
    Probe,
    Done,
}

/// Lazy iterator over the opcodes of a BPS patch byte stream.
///
/// Yields `Err` once on the first malformed element and then fuses.
pub struct PatchReader<R> {
    inner: R,
    stage: Stage,
    target_size: u64,
    output_offset: u64,
}

impl<R: Read> PatchReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            stage: Stage::Magic,
            target_size: 0,
            output_offset: 0,
        }
    }

    /// Unwrap the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_exact(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                corrupt(format!("truncated patch: {what} ends early"))
            } else {
                Error::Io(e)
            }
        })
    }

    /// Read exactly `len` bytes into a fresh buffer.  Bounded via `take` so
    /// a hostile length field cannot force a huge up-front allocation.
    fn read_vec(&mut self, len: u64, what: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let got = (&mut self.inner).take(len).read_to_end(&mut buf)?;
        if (got as u64) < len {
            return Err(corrupt(format!("truncated patch: {what} ends early")));
        }
        Ok(buf)
    }

    fn read_u32_le(&mut self, what: &str) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf, what)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn step(&mut self) -> Result<Option<Opcode>> {
        match self.stage {
            Stage::Magic => {
                let mut magic = [0u8; 4];
                self.read_exact(&mut magic, "magic")?;
                if &magic != MAGIC {
                    return Err(corrupt(format!(
                        "bad magic: expected {MAGIC:?}, got {magic:?}"
                    )));
                }
                let size = varint::read(&mut self.inner)?;
                self.stage = Stage::TargetHeader;
                Ok(Some(Opcode::SourceHeader { size }))
            }
            Stage::TargetHeader => {
                let size = varint::read(&mut self.inner)?;
                let metadata_len = varint::read(&mut self.inner)?;
                let metadata = self.read_vec(metadata_len, "metadata")?;
                self.target_size = size;
                self.stage = Stage::Operations;
                Ok(Some(Opcode::TargetHeader { size, metadata }))
            }
            Stage::Operations => {
                if self.output_offset >= self.target_size {
                    self.stage = Stage::SourceCrc;
                    return self.step();
                }
                let value = varint::read(&mut self.inner)?;
                let bytespan = (value >> OPCODE_SHIFT) + 1;
                let op = match value & OPCODE_MASK {
                    OP_SOURCE_READ => Opcode::SourceRead { bytespan },
                    OP_TARGET_READ => {
                        let payload = self.read_vec(bytespan, "TargetRead payload")?;
                        Opcode::TargetRead { payload }
                    }
                    OP_SOURCE_COPY => {
                        let offset = unpack_offset(varint::read(&mut self.inner)?);
                        Opcode::SourceCopy { bytespan, offset }
                    }
                    OP_TARGET_COPY => {
                        let offset = unpack_offset(varint::read(&mut self.inner)?);
                        Opcode::TargetCopy { bytespan, offset }
                    }
                    _ => unreachable!("two-bit opcode"),
                };
                // Saturate: hostile spans must not wrap the loop bound.
                self.output_offset = self.output_offset.saturating_add(bytespan);
                Ok(Some(op))
            }
            Stage::SourceCrc => {
                let crc = self.read_u32_le("source CRC32")?;
                self.stage = Stage::TargetCrc;
                Ok(Some(Opcode::SourceCrc32 { crc }))
            }
            Stage::TargetCrc => {
                let crc = self.read_u32_le("target CRC32")?;
                self.stage = Stage::PatchCrc;
                Ok(Some(Opcode::TargetCrc32 { crc }))
            }
            Stage::PatchCrc => {
                let crc = self.read_u32_le("patch CRC32")?;
                self.stage = Stage::Probe;
                Ok(Some(Opcode::PatchCrc32 { crc: Some(crc) }))
            }
            Stage::Probe => {
                let mut buf = [0u8; 1];
                match self.inner.read(&mut buf) {
                    Ok(0) => {
                        self.stage = Stage::Done;
                        Ok(None)
                    }
                    Ok(_) => Err(corrupt("trailing garbage after patch CRC32")),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => self.step(),
                    Err(e) => Err(Error::Io(e)),
                }
            }
            Stage::Done => Ok(None),
        }
    }
}

impl<R: Read> Iterator for PatchReader<R> {
    type Item = Result<Opcode>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stage == Stage::Done {
            return None;
        }
        match self.step() {
            Ok(Some(op)) => Some(Ok(op)),
            Ok(None) => None,
            Err(e) => {
                self.stage = Stage::Done;
                Some(Err(e))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
