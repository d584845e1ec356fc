// Patch stream writer: serializes an opcode iterator into wire bytes.
//
// Maintains a rolling CRC32 over everything written; when the patch CRC
// field arrives, the carried value is ignored and the running CRC is
// written in its place, so placeholder streams from the diff engine and
// fully-populated streams from the reader serialize identically.

use std::io::Write;

use super::ops::Opcode;
use super::{corrupt, Result};

/// Serialize a whole opcode stream into `sink`. Returns bytes written.
pub fn write_patch<I, W>(stream: I, sink: W) -> Result<u64>
where
    I: IntoIterator<Item = Result<Opcode>>,
    W: Write,
{
    let mut writer = PatchWriter::new(sink);
    for op in stream {
        writer.write(&op?)?;
    }
    writer.finish()
}

// ---------------------------------------------------------------------------
// PatchWriter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    SourceHeader,
    TargetHeader,
    Body,
    TargetCrc,
    PatchCrc,
    Done,
}

impl Expect {
    fn describe(self) -> &'static str {
        match self {
            Expect::SourceHeader => "source header",
            Expect::TargetHeader => "target header",
            Expect::Body => "an operation or source CRC32",
            Expect::TargetCrc => "target CRC32",
            Expect::PatchCrc => "patch CRC32",
            Expect::Done => "end of stream",
        }
    }
}

/// Incremental patch serializer.
///
/// Opcodes must arrive in stream order; anything else is reported as a
/// corrupt event stream.
pub struct PatchWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
    expect: Expect,
    written: u64,
    buf: Vec<u8>,
}

impl<W: Write> PatchWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            expect: Expect::SourceHeader,
            written: 0,
            buf: Vec::new(),
        }
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Serialize one opcode.
    pub fn write(&mut self, op: &Opcode) -> Result<()> {
        let ok = match (self.expect, op) {
            (Expect::SourceHeader, Opcode::SourceHeader { .. }) => {
                self.expect = Expect::TargetHeader;
                true
            }
            (Expect::TargetHeader, Opcode::TargetHeader { .. }) => {
                self.expect = Expect::Body;
                true
            }
            (Expect::Body, op) if op.is_operation() => true,
            (Expect::Body, Opcode::SourceCrc32 { .. }) => {
                self.expect = Expect::TargetCrc;
                true
            }
            (Expect::TargetCrc, Opcode::TargetCrc32 { .. }) => {
                self.expect = Expect::PatchCrc;
                true
            }
            (Expect::PatchCrc, Opcode::PatchCrc32 { .. }) => {
                // Ignore the carried value; the running CRC covers every
                // byte before this field.
                let crc = self.hasher.clone().finalize();
                self.inner.write_all(&crc.to_le_bytes())?;
                self.written += 4;
                self.expect = Expect::Done;
                return Ok(());
            }
            _ => false,
        };

        if !ok {
            return Err(corrupt(format!(
                "expected {}, got {}",
                self.expect.describe(),
                op.name()
            )));
        }

        self.buf.clear();
        op.encode_into(&mut self.buf);
        self.hasher.update(&self.buf);
        self.inner.write_all(&self.buf)?;
        self.written += self.buf.len() as u64;
        Ok(())
    }

    /// Flush the sink and check the stream was complete.
    pub fn finish(mut self) -> Result<u64> {
        if self.expect != Expect::Done {
            return Err(corrupt(format!(
                "event stream was truncated: expected {} next",
                self.expect.describe()
            )));
        }
        self.inner.flush()?;
        Ok(self.written)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
