// Textual patch assembly: a line-oriented rendering of an opcode stream,
// for inspecting and hand-editing patches.
//
//   bpsasm
//   sourcesize: 6
//   targetsize: 6
//   metadata:
//   .
//   sourcecopy: 3 +3
//   sourcecopy: 3 -6
//   sourcecrc32: 38E6D884
//   targetcrc32: 2E5B0AFB
//
// Binary payloads (metadata, targetread) appear as hex lines of up to 40
// bytes each, closed by a line holding a single dot.  The patch CRC is not
// part of the assembly; it is recomputed when the text is assembled back
// into a patch.

use std::io::{BufRead, Write};

use super::ops::Opcode;
use super::{corrupt, Result};

/// Assembly magic, the first line of every document.
pub const ASM_MAGIC: &str = "bpsasm";

const HEX_BYTES_PER_LINE: usize = 40;

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Render an opcode stream as patch assembly.
pub fn write_asm<I, W>(stream: I, out: &mut W) -> Result<()>
where
    I: IntoIterator<Item = Result<Opcode>>,
    W: Write,
{
    writeln!(out, "{ASM_MAGIC}")?;
    for op in stream {
        match op? {
            Opcode::SourceHeader { size } => {
                writeln!(out, "sourcesize: {size}")?;
            }
            Opcode::TargetHeader { size, metadata } => {
                writeln!(out, "targetsize: {size}")?;
                writeln!(out, "metadata:")?;
                write_hex_block(out, &metadata)?;
            }
            Opcode::SourceRead { bytespan } => {
                writeln!(out, "sourceread: {bytespan}")?;
            }
            Opcode::TargetRead { payload } => {
                writeln!(out, "targetread:")?;
                write_hex_block(out, &payload)?;
            }
            Opcode::SourceCopy { bytespan, offset } => {
                writeln!(out, "sourcecopy: {bytespan} {offset:+}")?;
            }
            Opcode::TargetCopy { bytespan, offset } => {
                writeln!(out, "targetcopy: {bytespan} {offset:+}")?;
            }
            Opcode::SourceCrc32 { crc } => {
                writeln!(out, "sourcecrc32: {crc:08X}")?;
            }
            Opcode::TargetCrc32 { crc } => {
                writeln!(out, "targetcrc32: {crc:08X}")?;
            }
            // Recomputed on assembly; not represented in text.
            Opcode::PatchCrc32 { .. } => {}
        }
    }
    Ok(())
}

fn write_hex_block<W: Write>(out: &mut W, data: &[u8]) -> Result<()> {
    for chunk in data.chunks(HEX_BYTES_PER_LINE) {
        let mut line = String::with_capacity(chunk.len() * 2);
        for byte in chunk {
            line.push_str(&format!("{byte:02x}"));
        }
        writeln!(out, "{line}")?;
    }
    writeln!(out, ".")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Parse patch assembly back into an opcode stream.
///
/// Ends with a `PatchCrc32` placeholder, so the output feeds straight
/// into the patch writer.
pub struct AsmReader<R> {
    inner: R,
    stage: Stage,
    target_size: u64,
    output_offset: u64,
    line: String,
}

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

impl<R: BufRead> AsmReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            stage: Stage::Magic,
            target_size: 0,
            output_offset: 0,
            line: String::new(),
        }
    }

    /// Read one line, without its terminator. `None` at end of input.
    fn read_line(&mut self) -> Result<Option<&str>> {
        self.line.clear();
        let n = self.inner.read_line(&mut self.line)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.line.trim_end_matches(['\n', '\r'])))
    }

    fn expect_line(&mut self, what: &str) -> Result<String> {
        match self.read_line()? {
            Some(line) => Ok(line.to_string()),
            None => Err(corrupt(format!("truncated assembly: expected {what}"))),
        }
    }

    /// Parse a `label: value` line, checking the label.
    fn labeled(&mut self, label: &str) -> Result<String> {
        let line = self.expect_line(label)?;
        let (actual, value) = line
            .split_once(':')
            .ok_or_else(|| corrupt(format!("bad assembly line: {line:?}")))?;
        if actual != label {
            return Err(corrupt(format!(
                "expected {label:?} field, not {actual:?}"
            )));
        }
        Ok(value.trim().to_string())
    }

    /// Read hex lines up to the closing dot.
    fn hex_block(&mut self) -> Result<Vec<u8>> {
        let mut digits = String::new();
        loop {
            let line = self.expect_line("hex data")?;
            if line == "." {
                break;
            }
            digits.extend(line.chars().filter(|c| !c.is_whitespace()));
        }
        hex_to_bytes(&digits)
    }

    fn step(&mut self) -> Result<Option<Opcode>> {
        match self.stage {
            Stage::Magic => {
                let magic = self.expect_line("magic")?;
                if magic != ASM_MAGIC {
                    return Err(corrupt(format!(
                        "bad assembly magic: expected {ASM_MAGIC:?}, got {magic:?}"
                    )));
                }
                let size = parse_int(&self.labeled("sourcesize")?)?;
                self.stage = Stage::TargetHeader;
                Ok(Some(Opcode::SourceHeader { size }))
            }
            Stage::TargetHeader => {
                let size = parse_int(&self.labeled("targetsize")?)?;
                let meta_value = self.labeled("metadata")?;
                if !meta_value.is_empty() {
                    return Err(corrupt("metadata field carries its data on hex lines"));
                }
                let metadata = self.hex_block()?;
                self.target_size = size;
                self.stage = Stage::Operations;
                Ok(Some(Opcode::TargetHeader { size, metadata }))
            }
            Stage::Operations => {
                if self.output_offset >= self.target_size {
                    self.stage = Stage::SourceCrc;
                    return self.step();
                }
                let line = self.expect_line("an operation")?;
                let (label, value) = line
                    .split_once(':')
                    .ok_or_else(|| corrupt(format!("bad assembly line: {line:?}")))?;
                let value = value.trim().to_string();
                let op = match label {
                    "sourceread" => Opcode::SourceRead {
                        bytespan: parse_int(&value)?,
                    },
                    "targetread" => {
                        if !value.is_empty() {
                            return Err(corrupt(
                                "targetread carries its payload on hex lines",
                            ));
                        }
                        Opcode::TargetRead {
                            payload: self.hex_block()?,
                        }
                    }
                    "sourcecopy" => {
                        let (bytespan, offset) = parse_copy(&value)?;
                        Opcode::SourceCopy { bytespan, offset }
                    }
                    "targetcopy" => {
                        let (bytespan, offset) = parse_copy(&value)?;
                        Opcode::TargetCopy { bytespan, offset }
                    }
                    other => {
                        return Err(corrupt(format!("unknown assembly label: {other:?}")))
                    }
                };
                self.output_offset = self.output_offset.saturating_add(op.bytespan());
                Ok(Some(op))
            }
            Stage::SourceCrc => {
                let crc = parse_crc(&self.labeled("sourcecrc32")?)?;
                self.stage = Stage::TargetCrc;
                Ok(Some(Opcode::SourceCrc32 { crc }))
            }
            Stage::TargetCrc => {
                let crc = parse_crc(&self.labeled("targetcrc32")?)?;
                self.stage = Stage::PatchCrc;
                Ok(Some(Opcode::TargetCrc32 { crc }))
            }
            Stage::PatchCrc => {
                self.stage = Stage::Probe;
                Ok(Some(Opcode::PatchCrc32 { crc: None }))
            }
            Stage::Probe => loop {
                match self.read_line()? {
                    None => {
                        self.stage = Stage::Done;
                        return Ok(None);
                    }
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => {
                        return Err(corrupt(format!(
                            "trailing garbage in assembly: {line:?}"
                        )))
                    }
                }
            },
            Stage::Done => Ok(None),
        }
    }
}

impl<R: BufRead> Iterator for AsmReader<R> {
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
// Field parsing
// ---------------------------------------------------------------------------

fn parse_int(value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| corrupt(format!("bad integer in assembly: {value:?}")))
}

fn parse_copy(value: &str) -> Result<(u64, i64)> {
    let mut parts = value.split_whitespace();
    let bytespan = parse_int(parts.next().unwrap_or(""))?;
    let offset: i64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| corrupt(format!("bad copy offset in assembly: {value:?}")))?;
    if parts.next().is_some() {
        return Err(corrupt(format!("bad copy fields in assembly: {value:?}")));
    }
    Ok((bytespan, offset))
}

fn parse_crc(value: &str) -> Result<u32> {
    u32::from_str_radix(value, 16)
        .map_err(|_| corrupt(format!("bad CRC32 in assembly: {value:?}")))
}

fn hex_to_bytes(digits: &str) -> Result<Vec<u8>> {
    if digits.len() % 2 != 0 {
        return Err(corrupt("hex data has an odd number of digits"));
    }
    let bytes = digits.as_bytes();
    let mut out = Vec::with_capacity(digits.len() / 2);
    for pair in bytes.chunks(2) {
        let s = std::str::from_utf8(pair).map_err(|_| corrupt("hex data is not ASCII"))?;
        let byte = u8::from_str_radix(s, 16)
            .map_err(|_| corrupt(format!("bad hex digits: {s:?}")))?;
        out.push(byte);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ops() -> Vec<Opcode> {
        vec![
            Opcode::SourceHeader { size: 6 },
            Opcode::TargetHeader {
                size: 106,
                metadata: b"notes".to_vec(),
            },
            Opcode::SourceCopy {
                bytespan: 3,
                offset: 3,
            },
            Opcode::SourceCopy {
                bytespan: 3,
                offset: -6,
            },
            Opcode::TargetRead {
                payload: vec![0xAB; 60],
            },
            Opcode::TargetCopy {
                bytespan: 40,
                offset: 0,
            },
            Opcode::SourceCrc32 { crc: 0x38E6_D884 },
            Opcode::TargetCrc32 { crc: 0x2E5B_0AFB },
            Opcode::PatchCrc32 { crc: None },
        ]
    }

    #[test]
    fn roundtrip() {
        let ops = sample_ops();
        let mut text = Vec::new();
        write_asm(ops.clone().into_iter().map(Ok), &mut text).unwrap();

        let parsed: Vec<Opcode> = AsmReader::new(&text[..]).map(|r| r.unwrap()).collect();
        assert_eq!(parsed, ops);
    }

    #[test]
    fn long_payloads_wrap_at_forty_bytes() {
        let ops = sample_ops();
        let mut text = Vec::new();
        write_asm(ops.into_iter().map(Ok), &mut text).unwrap();
        let text = String::from_utf8(text).unwrap();
        // The 60-byte payload wraps onto two lines of 80 and 40 digits.
        assert!(text.contains(&"ab".repeat(40)));
        assert!(text.lines().all(|l| l.len() <= 80));
    }

    #[test]
    fn rejects_unknown_label() {
        let text = "bpsasm\nsourcesize: 0\ntargetsize: 1\nmetadata:\n.\nfrobnicate: 1\n";
        let result: Result<Vec<Opcode>> = AsmReader::new(text.as_bytes()).collect();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("unknown assembly label"), "got: {err}");
    }

    #[test]
    fn rejects_bad_magic() {
        let result: Result<Vec<Opcode>> = AsmReader::new(&b"nope\n"[..]).collect();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_trailing_garbage() {
        let ops = vec![
            Opcode::SourceHeader { size: 0 },
            Opcode::TargetHeader {
                size: 0,
                metadata: Vec::new(),
            },
            Opcode::SourceCrc32 { crc: 0 },
            Opcode::TargetCrc32 { crc: 0 },
        ];
        let mut text = Vec::new();
        write_asm(ops.into_iter().map(Ok), &mut text).unwrap();
        text.extend_from_slice(b"junk\n");
        let result: Result<Vec<Opcode>> = AsmReader::new(&text[..]).collect();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("trailing garbage"), "got: {err}");
    }
}
