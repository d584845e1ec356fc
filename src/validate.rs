// Stream validator: a pass-through opcode iterator that enforces every
// structural and semantic invariant of the patch format.
//
// Tracked state: output offset, source cursor, target cursor, and a
// rolling CRC32 of the re-serialized patch bytes.  The trailing patch CRC
// is checked against the rolling value when the stream carries one; the
// placeholder form produced by the diff engine is passed through
// unchecked (the writer fills it in).

use crate::bps::ops::Opcode;
use crate::bps::{corrupt, Result};

/// Wrap `stream` in a [`Validate`] adapter with no source/target bytes.
pub fn validate<I>(stream: I) -> Validate<'static, I>
where
    I: Iterator<Item = Result<Opcode>>,
{
    Validate::new(stream)
}

/// Wrap `stream` in a [`Validate`] adapter that additionally checks the
/// declared source/target CRC32s against the supplied buffers.
pub fn validate_with<'a, I>(
    stream: I,
    source: Option<&'a [u8]>,
    target: Option<&'a [u8]>,
) -> Validate<'a, I>
where
    I: Iterator<Item = Result<Opcode>>,
{
    let mut v = Validate::new(stream);
    v.source = source;
    v.target = target;
    v
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    SourceHeader,
    TargetHeader,
    Body,
    TargetCrc,
    PatchCrc,
    Trailing,
    Done,
}

/// Pass-through opcode iterator; yields each opcode unchanged, or fails
/// terminally on the first violated invariant.
pub struct Validate<'a, I> {
    inner: I,
    stage: Stage,
    source_size: u64,
    target_size: u64,
    output_offset: u64,
    source_cursor: u64,
    target_cursor: u64,
    hasher: crc32fast::Hasher,
    enc_buf: Vec<u8>,
    source: Option<&'a [u8]>,
    target: Option<&'a [u8]>,
}

impl<'a, I> Validate<'a, I>
where
    I: Iterator<Item = Result<Opcode>>,
{
    pub fn new(inner: I) -> Self {
        Validate {
            inner,
            stage: Stage::SourceHeader,
            source_size: 0,
            target_size: 0,
            output_offset: 0,
            source_cursor: 0,
            target_cursor: 0,
            hasher: crc32fast::Hasher::new(),
            enc_buf: Vec::new(),
            source: None,
            target: None,
        }
    }

    fn pull(&mut self) -> Result<Opcode> {
        match self.inner.next() {
            Some(Ok(op)) => Ok(op),
            Some(Err(e)) => Err(e),
            None => Err(corrupt("truncated patch: expected more opcodes")),
        }
    }

    /// Fold the opcode's wire bytes into the rolling patch CRC.
    fn absorb(&mut self, op: &Opcode) {
        self.enc_buf.clear();
        op.encode_into(&mut self.enc_buf);
        self.hasher.update(&self.enc_buf);
    }

    fn check_operation(&mut self, op: &Opcode) -> Result<()> {
        let bytespan = op.bytespan();
        if bytespan == 0 {
            return Err(corrupt(format!(
                "bad operation: {} bytespan must be greater than zero",
                op.name()
            )));
        }

        // All checked arithmetic: hostile spans must not wrap the cursors.
        let end_offset = self
            .output_offset
            .checked_add(bytespan)
            .filter(|&end| end <= self.target_size)
            .ok_or_else(|| {
                corrupt(format!(
                    "bad operation: {} writes past the end of the target \
                     ({} + {bytespan} of {} bytes)",
                    op.name(),
                    self.output_offset,
                    self.target_size
                ))
            })?;

        match *op {
            Opcode::SourceRead { .. } => {
                // Reads the source at the current output offset, so that
                // byte range must exist in the source as well.
                if end_offset > self.source_size {
                    return Err(corrupt(format!(
                        "bad operation: SourceRead of {bytespan} at offset {} \
                         reads past the end of the source file",
                        self.output_offset
                    )));
                }
            }
            Opcode::TargetRead { .. } => {}
            Opcode::SourceCopy { offset, .. } => {
                let cursor = self.source_cursor.checked_add_signed(offset).ok_or_else(|| {
                    corrupt(format!(
                        "bad operation: SourceCopy offset {offset} reads from before \
                         the beginning of the source file"
                    ))
                })?;
                let cursor_end = cursor
                    .checked_add(bytespan)
                    .filter(|&end| end <= self.source_size)
                    .ok_or_else(|| {
                        corrupt(format!(
                            "bad operation: SourceCopy of {bytespan} at {cursor} reads \
                             past the end of the source file"
                        ))
                    })?;
                self.source_cursor = cursor_end;
            }
            Opcode::TargetCopy { offset, .. } => {
                let cursor = self.target_cursor.checked_add_signed(offset).ok_or_else(|| {
                    corrupt(format!(
                        "bad operation: TargetCopy offset {offset} reads from before \
                         the beginning of the target file"
                    ))
                })?;
                if cursor >= self.output_offset {
                    return Err(corrupt(format!(
                        "bad operation: TargetCopy at {cursor} reads past the written \
                         part of the target file (offset {})",
                        self.output_offset
                    )));
                }
                self.target_cursor = cursor + bytespan;
            }
            _ => unreachable!("only operations reach check_operation"),
        }

        self.output_offset = end_offset;
        Ok(())
    }

    fn step(&mut self) -> Result<Option<Opcode>> {
        match self.stage {
            Stage::SourceHeader => {
                let op = self.pull()?;
                match op {
                    Opcode::SourceHeader { size } => {
                        self.source_size = size;
                        self.absorb(&op);
                        self.stage = Stage::TargetHeader;
                        Ok(Some(op))
                    }
                    other => Err(corrupt(format!(
                        "expected source header, got {}",
                        other.name()
                    ))),
                }
            }
            Stage::TargetHeader => {
                let op = self.pull()?;
                match op {
                    Opcode::TargetHeader { size, .. } => {
                        self.target_size = size;
                        self.absorb(&op);
                        self.stage = Stage::Body;
                        Ok(Some(op))
                    }
                    other => Err(corrupt(format!(
                        "expected target header, got {}",
                        other.name()
                    ))),
                }
            }
            Stage::Body => {
                let op = self.pull()?;
                if self.output_offset < self.target_size {
                    if !op.is_operation() {
                        return Err(corrupt(format!(
                            "patch covers only {} of {} target bytes before {}",
                            self.output_offset,
                            self.target_size,
                            op.name()
                        )));
                    }
                    self.check_operation(&op)?;
                    self.absorb(&op);
                    Ok(Some(op))
                } else {
                    match op {
                        Opcode::SourceCrc32 { crc } => {
                            if let Some(source) = self.source {
                                let actual = crc32fast::hash(source);
                                if actual != crc {
                                    return Err(corrupt(format!(
                                        "source CRC32 mismatch: patch declares \
                                         {crc:08X}, file has {actual:08X}"
                                    )));
                                }
                            }
                            self.absorb(&op);
                            self.stage = Stage::TargetCrc;
                            Ok(Some(op))
                        }
                        other => Err(corrupt(format!(
                            "expected source CRC32, got {}",
                            other.name()
                        ))),
                    }
                }
            }
            Stage::TargetCrc => {
                let op = self.pull()?;
                match op {
                    Opcode::TargetCrc32 { crc } => {
                        if let Some(target) = self.target {
                            let actual = crc32fast::hash(target);
                            if actual != crc {
                                return Err(corrupt(format!(
                                    "target CRC32 mismatch: patch declares \
                                     {crc:08X}, file has {actual:08X}"
                                )));
                            }
                        }
                        self.absorb(&op);
                        self.stage = Stage::PatchCrc;
                        Ok(Some(op))
                    }
                    other => Err(corrupt(format!(
                        "expected target CRC32, got {}",
                        other.name()
                    ))),
                }
            }
            Stage::PatchCrc => {
                let op = self.pull()?;
                match op {
                    Opcode::PatchCrc32 { crc } => {
                        if let Some(declared) = crc {
                            let rolling = self.hasher.clone().finalize();
                            if declared != rolling {
                                return Err(corrupt(format!(
                                    "patch CRC mismatch: declared {declared:08X}, \
                                     actual {rolling:08X}"
                                )));
                            }
                        }
                        self.stage = Stage::Trailing;
                        Ok(Some(op))
                    }
                    other => Err(corrupt(format!(
                        "expected patch CRC32, got {}",
                        other.name()
                    ))),
                }
            }
            Stage::Trailing => match self.inner.next() {
                None => {
                    self.stage = Stage::Done;
                    Ok(None)
                }
                Some(Err(e)) => Err(e),
                Some(Ok(op)) => Err(corrupt(format!(
                    "trailing garbage in stream: {}",
                    op.name()
                ))),
            },
            Stage::Done => Ok(None),
        }
    }
}

impl<'a, I> Iterator for Validate<'a, I>
where
    I: Iterator<Item = Result<Opcode>>,
{
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
