// Apply engine: executes an opcode stream against a source buffer to
// reconstruct the target.
//
// TargetCopy is performed one byte at a time: a copy may overlap the bytes
// it is itself writing, which is how the format expresses run-length
// repetition, so a bulk memmove would produce the wrong result.

use crate::bps::ops::Opcode;
use crate::bps::{corrupt, Result};

const MAX_PREALLOC: usize = 64 << 20;

/// Reconstruct the target from a patch opcode stream and the source bytes.
///
/// Verifies the declared source and target CRC32s as they stream past.
/// The patch CRC, if any, is not checked here; only the validator keeps
/// the rolling CRC of the wire bytes.
pub fn apply<I>(stream: I, source: &[u8]) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = Result<Opcode>>,
{
    let mut target_size: u64 = 0;
    let mut output: Vec<u8> = Vec::new();
    let mut source_cursor: u64 = 0;
    let mut target_cursor: u64 = 0;
    let mut seen_header = false;

    for op in stream {
        let op = op?;
        match op {
            Opcode::SourceHeader { size } => {
                if size != source.len() as u64 {
                    return Err(corrupt(format!(
                        "source size mismatch: patch expects {size} bytes, \
                         file has {}",
                        source.len()
                    )));
                }
            }
            Opcode::TargetHeader { size, .. } => {
                target_size = size;
                let capacity = usize::try_from(size)
                    .map_err(|_| corrupt("target size does not fit in memory"))?;
                // Pre-size for the declared target, but cap the upfront
                // allocation so a hostile header cannot demand gigabytes
                // before a single operation has been decoded.
                output = Vec::with_capacity(capacity.min(MAX_PREALLOC));
                seen_header = true;
            }
            Opcode::SourceRead { bytespan } => {
                check_room(&output, bytespan, target_size)?;
                let start = output.len();
                let end = span_to_usize(bytespan)?
                    .checked_add(start)
                    .filter(|&e| e <= source.len())
                    .ok_or_else(|| {
                        corrupt(format!(
                            "SourceRead of {bytespan} at offset {start} reads past \
                             the end of the source file"
                        ))
                    })?;
                output.extend_from_slice(&source[start..end]);
            }
            Opcode::TargetRead { payload } => {
                check_room(&output, payload.len() as u64, target_size)?;
                output.extend_from_slice(&payload);
            }
            Opcode::SourceCopy { bytespan, offset } => {
                check_room(&output, bytespan, target_size)?;
                let cursor = source_cursor.checked_add_signed(offset).ok_or_else(|| {
                    corrupt("SourceCopy reads from before the beginning of the source file")
                })?;
                let start = usize::try_from(cursor)
                    .map_err(|_| corrupt("SourceCopy cursor does not fit in memory"))?;
                let end = start
                    .checked_add(span_to_usize(bytespan)?)
                    .filter(|&e| e <= source.len())
                    .ok_or_else(|| {
                        corrupt(format!(
                            "SourceCopy of {bytespan} at {start} reads past the \
                             end of the source file"
                        ))
                    })?;
                output.extend_from_slice(&source[start..end]);
                source_cursor = cursor + bytespan;
            }
            Opcode::TargetCopy { bytespan, offset } => {
                check_room(&output, bytespan, target_size)?;
                let cursor = target_cursor.checked_add_signed(offset).ok_or_else(|| {
                    corrupt("TargetCopy reads from before the beginning of the target file")
                })?;
                let mut pos = usize::try_from(cursor)
                    .map_err(|_| corrupt("TargetCopy cursor does not fit in memory"))?;
                if pos >= output.len() {
                    return Err(corrupt(format!(
                        "TargetCopy at {pos} reads past the written part of the \
                         target file (offset {})",
                        output.len()
                    )));
                }
                // Byte at a time: the copied region may overlap the bytes
                // this very operation appends.
                for _ in 0..bytespan {
                    let byte = output[pos];
                    output.push(byte);
                    pos += 1;
                }
                target_cursor = cursor + bytespan;
            }
            Opcode::SourceCrc32 { crc } => {
                let actual = crc32fast::hash(source);
                if actual != crc {
                    return Err(corrupt(format!(
                        "source file should have CRC32 {crc:08X}, got {actual:08X}"
                    )));
                }
            }
            Opcode::TargetCrc32 { crc } => {
                let actual = crc32fast::hash(&output);
                if actual != crc {
                    return Err(corrupt(format!(
                        "target file should have CRC32 {crc:08X}, got {actual:08X}"
                    )));
                }
            }
            Opcode::PatchCrc32 { .. } => {}
        }
    }

    if !seen_header {
        return Err(corrupt("truncated patch: no header"));
    }
    if output.len() as u64 != target_size {
        return Err(corrupt(format!(
            "patch produced {} bytes, target header declares {target_size}",
            output.len()
        )));
    }
    Ok(output)
}

fn span_to_usize(bytespan: u64) -> Result<usize> {
    usize::try_from(bytespan).map_err(|_| corrupt("operation span does not fit in memory"))
}

fn check_room(output: &[u8], bytespan: u64, target_size: u64) -> Result<()> {
    if output.len() as u64 + bytespan > target_size {
        return Err(corrupt(format!(
            "operation writes past the end of the target \
             ({} + {bytespan} of {target_size} bytes)",
            output.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(ops: Vec<Opcode>) -> impl Iterator<Item = Result<Opcode>> {
        ops.into_iter().map(Ok)
    }

    fn headers(source: &[u8], target_size: u64) -> Vec<Opcode> {
        vec![
            Opcode::SourceHeader {
                size: source.len() as u64,
            },
            Opcode::TargetHeader {
                size: target_size,
                metadata: Vec::new(),
            },
        ]
    }

    fn trailer(source: &[u8], target: &[u8]) -> Vec<Opcode> {
        vec![
            Opcode::SourceCrc32 {
                crc: crc32fast::hash(source),
            },
            Opcode::TargetCrc32 {
                crc: crc32fast::hash(target),
            },
            Opcode::PatchCrc32 { crc: None },
        ]
    }

    #[test]
    fn source_read_is_identity() {
        let source = b"abcd";
        let mut ops = headers(source, 4);
        ops.push(Opcode::SourceRead { bytespan: 4 });
        ops.extend(trailer(source, source));
        assert_eq!(apply(stream(ops), source).unwrap(), source);
    }

    #[test]
    fn literal_only() {
        let mut ops = headers(b"", 2);
        ops.push(Opcode::TargetRead {
            payload: b"hi".to_vec(),
        });
        ops.extend(trailer(b"", b"hi"));
        assert_eq!(apply(stream(ops), b"").unwrap(), b"hi");
    }

    #[test]
    fn rle_target_copy_repeats_one_byte() {
        let target = vec![b'A'; 100];
        let mut ops = headers(b"", 100);
        ops.push(Opcode::TargetRead {
            payload: vec![b'A'],
        });
        ops.push(Opcode::TargetCopy {
            bytespan: 99,
            offset: 0,
        });
        ops.extend(trailer(b"", &target));
        assert_eq!(apply(stream(ops), b"").unwrap(), target);
    }

    #[test]
    fn mirror_with_source_copies() {
        let source = b"abcdef";
        let target = b"defabc";
        let mut ops = headers(source, 6);
        ops.push(Opcode::SourceCopy {
            bytespan: 3,
            offset: 3,
        });
        ops.push(Opcode::SourceCopy {
            bytespan: 3,
            offset: -6,
        });
        ops.extend(trailer(source, target));
        assert_eq!(apply(stream(ops), source).unwrap(), target);
    }

    #[test]
    fn rejects_wrong_source() {
        let source = b"abcd";
        let mut ops = headers(source, 4);
        ops.push(Opcode::SourceRead { bytespan: 4 });
        ops.extend(trailer(source, source));
        let err = apply(stream(ops), b"abcX").unwrap_err();
        assert!(err.to_string().contains("CRC32"), "got: {err}");
    }

    #[test]
    fn rejects_source_size_mismatch() {
        let ops = headers(b"abcd", 0);
        let err = apply(stream(ops), b"ab").unwrap_err();
        assert!(err.to_string().contains("source size"), "got: {err}");
    }

    #[test]
    fn rejects_short_output() {
        let mut ops = headers(b"", 5);
        ops.push(Opcode::TargetRead {
            payload: b"hi".to_vec(),
        });
        let err = apply(stream(ops), b"").unwrap_err();
        assert!(err.to_string().contains("produced"), "got: {err}");
    }

    #[test]
    fn rejects_overlong_output() {
        let mut ops = headers(b"", 1);
        ops.push(Opcode::TargetRead {
            payload: b"hi".to_vec(),
        });
        let err = apply(stream(ops), b"").unwrap_err();
        assert!(
            err.to_string().contains("past the end of the target"),
            "got: {err}"
        );
    }

    #[test]
    fn rejects_target_copy_from_unwritten() {
        let mut ops = headers(b"", 2);
        ops.push(Opcode::TargetRead {
            payload: vec![b'x'],
        });
        ops.push(Opcode::TargetCopy {
            bytespan: 1,
            offset: 1,
        });
        let err = apply(stream(ops), b"").unwrap_err();
        assert!(err.to_string().contains("written part"), "got: {err}");
    }
}
