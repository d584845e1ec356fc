// In-memory opcode model for BPS patch streams.
//
// A patch stream is: SourceHeader, TargetHeader, one operation per run of
// target bytes, then the three CRC32 trailer fields.  Copy offsets are the
// signed deltas exactly as serialized on the wire; producers convert
// absolute match positions into deltas before emitting.

use super::varint;

/// File magic, first four bytes of every patch.
pub const MAGIC: &[u8; 4] = b"BPS1";

/// Wire operation codes (low two bits of the operation varint).
pub const OP_SOURCE_READ: u64 = 0b00;
pub const OP_TARGET_READ: u64 = 0b01;
pub const OP_SOURCE_COPY: u64 = 0b10;
pub const OP_TARGET_COPY: u64 = 0b11;

pub const OPCODE_MASK: u64 = 0b11;
pub const OPCODE_SHIFT: u32 = 2;

// ---------------------------------------------------------------------------
// Opcode
// ---------------------------------------------------------------------------

/// One element of a BPS patch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    /// Declares the source length. First element of every stream.
    SourceHeader { size: u64 },
    /// Declares the target length and carries the opaque metadata blob.
    TargetHeader { size: u64, metadata: Vec<u8> },
    /// Copy `bytespan` source bytes at the current output offset.
    SourceRead { bytespan: u64 },
    /// Emit literal bytes.
    TargetRead { payload: Vec<u8> },
    /// Copy from the source at the source cursor, moved by `offset`.
    SourceCopy { bytespan: u64, offset: i64 },
    /// Copy from the written target prefix at the target cursor, moved by
    /// `offset`. The copied region may overlap the bytes this operation
    /// itself writes (RLE).
    TargetCopy { bytespan: u64, offset: i64 },
    /// CRC32 of the entire source.
    SourceCrc32 { crc: u32 },
    /// CRC32 of the entire target.
    TargetCrc32 { crc: u32 },
    /// CRC32 of every patch byte preceding this field. `None` is the
    /// placeholder form; the writer computes the real value either way.
    PatchCrc32 { crc: Option<u32> },
}

impl Opcode {
    /// Number of target bytes this element produces (0 for headers and
    /// CRC fields).
    pub fn bytespan(&self) -> u64 {
        match self {
            Opcode::SourceRead { bytespan }
            | Opcode::SourceCopy { bytespan, .. }
            | Opcode::TargetCopy { bytespan, .. } => *bytespan,
            Opcode::TargetRead { payload } => payload.len() as u64,
            _ => 0,
        }
    }

    /// True for the four target-producing operations.
    pub fn is_operation(&self) -> bool {
        matches!(
            self,
            Opcode::SourceRead { .. }
                | Opcode::TargetRead { .. }
                | Opcode::SourceCopy { .. }
                | Opcode::TargetCopy { .. }
        )
    }

    /// Short name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::SourceHeader { .. } => "source header",
            Opcode::TargetHeader { .. } => "target header",
            Opcode::SourceRead { .. } => "SourceRead",
            Opcode::TargetRead { .. } => "TargetRead",
            Opcode::SourceCopy { .. } => "SourceCopy",
            Opcode::TargetCopy { .. } => "TargetCopy",
            Opcode::SourceCrc32 { .. } => "source CRC32",
            Opcode::TargetCrc32 { .. } => "target CRC32",
            Opcode::PatchCrc32 { .. } => "patch CRC32",
        }
    }

    /// Serialize this element's wire bytes into `out`.
    ///
    /// `SourceHeader` includes the file magic. The carried `PatchCrc32`
    /// value (or zero for the placeholder) is written verbatim; the writer
    /// substitutes its running CRC instead of calling this for the trailer
    /// field.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Opcode::SourceHeader { size } => {
                out.extend_from_slice(MAGIC);
                varint::encode(*size, out);
            }
            Opcode::TargetHeader { size, metadata } => {
                varint::encode(*size, out);
                varint::encode(metadata.len() as u64, out);
                out.extend_from_slice(metadata);
            }
            Opcode::SourceRead { bytespan } => {
                varint::encode(pack_operation(OP_SOURCE_READ, *bytespan), out);
            }
            Opcode::TargetRead { payload } => {
                varint::encode(pack_operation(OP_TARGET_READ, payload.len() as u64), out);
                out.extend_from_slice(payload);
            }
            Opcode::SourceCopy { bytespan, offset } => {
                varint::encode(pack_operation(OP_SOURCE_COPY, *bytespan), out);
                varint::encode(pack_offset(*offset), out);
            }
            Opcode::TargetCopy { bytespan, offset } => {
                varint::encode(pack_operation(OP_TARGET_COPY, *bytespan), out);
                varint::encode(pack_offset(*offset), out);
            }
            Opcode::SourceCrc32 { crc } | Opcode::TargetCrc32 { crc } => {
                out.extend_from_slice(&crc.to_le_bytes());
            }
            Opcode::PatchCrc32 { crc } => {
                out.extend_from_slice(&crc.unwrap_or(0).to_le_bytes());
            }
        }
    }

    /// Serialized size in bytes, without producing them.
    pub fn encoded_len(&self) -> usize {
        match self {
            Opcode::SourceHeader { size } => MAGIC.len() + varint::encoded_len(*size),
            Opcode::TargetHeader { size, metadata } => {
                varint::encoded_len(*size)
                    + varint::encoded_len(metadata.len() as u64)
                    + metadata.len()
            }
            Opcode::SourceRead { bytespan } => {
                varint::encoded_len(pack_operation(OP_SOURCE_READ, *bytespan))
            }
            Opcode::TargetRead { payload } => {
                varint::encoded_len(pack_operation(OP_TARGET_READ, payload.len() as u64))
                    + payload.len()
            }
            Opcode::SourceCopy { bytespan, offset } => {
                varint::encoded_len(pack_operation(OP_SOURCE_COPY, *bytespan))
                    + varint::encoded_len(pack_offset(*offset))
            }
            Opcode::TargetCopy { bytespan, offset } => {
                varint::encoded_len(pack_operation(OP_TARGET_COPY, *bytespan))
                    + varint::encoded_len(pack_offset(*offset))
            }
            Opcode::SourceCrc32 { .. }
            | Opcode::TargetCrc32 { .. }
            | Opcode::PatchCrc32 { .. } => 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire packing helpers
// ---------------------------------------------------------------------------

/// Pack an operation code and bytespan into the operation varint value.
#[inline]
pub fn pack_operation(tag: u64, bytespan: u64) -> u64 {
    debug_assert!(bytespan > 0, "operations must span at least one byte");
    ((bytespan - 1) << OPCODE_SHIFT) | tag
}

/// Pack a signed copy offset: low bit is the sign, remaining bits `|offset|`.
#[inline]
pub fn pack_offset(offset: i64) -> u64 {
    (offset.unsigned_abs() << 1) | u64::from(offset < 0)
}

/// Inverse of [`pack_offset`].
#[inline]
pub fn unpack_offset(raw: u64) -> i64 {
    let magnitude = (raw >> 1) as i64;
    if raw & 1 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
