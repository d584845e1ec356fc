// Stream optimizer: rewrites an opcode stream into an equivalent one that
// never serializes larger.
//
// The input is validated as it is consumed.  Copies are tracked with
// absolute origin positions internally; offsets are re-derived against
// the rewritten stream's own copy cursors on emission, so merges and
// absorptions cannot skew later deltas.
//
// Rewrites:
//   1. zero-span operations are dropped (cannot occur in validated input)
//   2. adjacent same-kind operations merge where contiguous
//   3. copy offsets are re-emitted relative to the new stream
//   4. a one-byte SourceRead adjacent to an aligned SourceCopy is folded
//      into the copy when that does not grow the encoding
//   5. headers and CRC fields pass through untouched

use std::collections::VecDeque;

use crate::bps::ops::Opcode;
use crate::bps::Result;
use crate::validate::{validate, Validate};

/// Wrap `stream` in an [`Optimize`] adapter.
pub fn optimize<I>(stream: I) -> Optimize<I>
where
    I: Iterator<Item = Result<Opcode>>,
{
    Optimize::new(stream)
}

// ---------------------------------------------------------------------------
// Internal absolute-offset operation form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum AbsOp {
    SourceRead { span: u64 },
    TargetRead { payload: Vec<u8> },
    SourceCopy { span: u64, start: u64 },
    TargetCopy { span: u64, start: u64 },
}

impl AbsOp {
    fn span(&self) -> u64 {
        match self {
            AbsOp::SourceRead { span }
            | AbsOp::SourceCopy { span, .. }
            | AbsOp::TargetCopy { span, .. } => *span,
            AbsOp::TargetRead { payload } => payload.len() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Optimize
// ---------------------------------------------------------------------------

/// Pass-through opcode iterator that yields the rewritten stream.
pub struct Optimize<I> {
    inner: Validate<'static, I>,
    /// Absolute source/target cursors reconstructed from the input deltas.
    in_source_cursor: u64,
    in_target_cursor: u64,
    /// Copy cursors of the rewritten stream, for re-derived deltas.
    out_source_cursor: u64,
    out_target_cursor: u64,
    /// Output offset where `held` starts.
    held_offset: u64,
    /// Output offset where the next accepted operation will start.
    next_offset: u64,
    /// The operation still eligible for merging with its successor.
    held: Option<AbsOp>,
    queued: VecDeque<Opcode>,
    done: bool,
}

impl<I> Optimize<I>
where
    I: Iterator<Item = Result<Opcode>>,
{
    pub fn new(inner: I) -> Self {
        Self {
            inner: validate(inner),
            in_source_cursor: 0,
            in_target_cursor: 0,
            out_source_cursor: 0,
            out_target_cursor: 0,
            held_offset: 0,
            next_offset: 0,
            held: None,
            queued: VecDeque::new(),
            done: false,
        }
    }

    /// Convert a validated operation into absolute form, advancing the
    /// input cursors.
    fn to_absolute(&mut self, op: Opcode) -> AbsOp {
        match op {
            Opcode::SourceRead { bytespan } => AbsOp::SourceRead { span: bytespan },
            Opcode::TargetRead { payload } => AbsOp::TargetRead { payload },
            Opcode::SourceCopy { bytespan, offset } => {
                // Validation guarantees the cursor stays in range.
                let start = self.in_source_cursor.wrapping_add_signed(offset);
                self.in_source_cursor = start + bytespan;
                AbsOp::SourceCopy {
                    span: bytespan,
                    start,
                }
            }
            Opcode::TargetCopy { bytespan, offset } => {
                let start = self.in_target_cursor.wrapping_add_signed(offset);
                self.in_target_cursor = start + bytespan;
                AbsOp::TargetCopy {
                    span: bytespan,
                    start,
                }
            }
            _ => unreachable!("only operations are converted"),
        }
    }

    /// Re-derive the wire opcode for `op`, updating the output cursors.
    fn to_relative(&mut self, op: AbsOp) -> Opcode {
        match op {
            AbsOp::SourceRead { span } => Opcode::SourceRead { bytespan: span },
            AbsOp::TargetRead { payload } => Opcode::TargetRead { payload },
            AbsOp::SourceCopy { span, start } => {
                let offset = start as i64 - self.out_source_cursor as i64;
                self.out_source_cursor = start + span;
                Opcode::SourceCopy {
                    bytespan: span,
                    offset,
                }
            }
            AbsOp::TargetCopy { span, start } => {
                let offset = start as i64 - self.out_target_cursor as i64;
                self.out_target_cursor = start + span;
                Opcode::TargetCopy {
                    bytespan: span,
                    offset,
                }
            }
        }
    }

    fn flush_held(&mut self) {
        if let Some(op) = self.held.take() {
            let wire = self.to_relative(op);
            self.queued.push_back(wire);
        }
    }

    /// Encoded size of a SourceCopy with the given absolute start, were it
    /// emitted right now.
    fn source_copy_cost(&self, span: u64, start: u64) -> usize {
        Opcode::SourceCopy {
            bytespan: span,
            offset: start as i64 - self.out_source_cursor as i64,
        }
        .encoded_len()
    }

    /// Fold `op` into the held operation, or flush and hold `op`.
    fn accept(&mut self, op: AbsOp) {
        let span = op.span();
        if span == 0 {
            // Nothing to produce; validated input never contains these.
            return;
        }

        match (self.held.take(), op) {
            // Adjacent same-kind merges.
            (Some(AbsOp::SourceRead { span: a }), AbsOp::SourceRead { span: b }) => {
                self.held = Some(AbsOp::SourceRead { span: a + b });
            }
            (Some(AbsOp::TargetRead { mut payload }), AbsOp::TargetRead { payload: more }) => {
                payload.extend_from_slice(&more);
                self.held = Some(AbsOp::TargetRead { payload });
            }
            (
                Some(AbsOp::SourceCopy { span: a, start: s }),
                AbsOp::SourceCopy { span: b, start: t },
            ) if s + a == t => {
                self.held = Some(AbsOp::SourceCopy {
                    span: a + b,
                    start: s,
                });
            }
            (
                Some(AbsOp::TargetCopy { span: a, start: s }),
                AbsOp::TargetCopy { span: b, start: t },
            ) if s + a == t => {
                self.held = Some(AbsOp::TargetCopy {
                    span: a + b,
                    start: s,
                });
            }

            // A one-byte SourceRead reads the source at its own output
            // offset; an adjacent SourceCopy lined up with that position
            // can cover the byte itself.
            (Some(AbsOp::SourceRead { span: 1 }), AbsOp::SourceCopy { span: b, start })
                if start == self.held_offset + 1
                    && self.source_copy_cost(b + 1, start - 1)
                        <= 1 + self.source_copy_cost(b, start) =>
            {
                self.held = Some(AbsOp::SourceCopy {
                    span: b + 1,
                    start: start - 1,
                });
            }
            (Some(AbsOp::SourceCopy { span: a, start }), AbsOp::SourceRead { span: 1 })
                if start == self.held_offset
                    && self.source_copy_cost(a + 1, start)
                        <= self.source_copy_cost(a, start) + 1 =>
            {
                self.held = Some(AbsOp::SourceCopy {
                    span: a + 1,
                    start,
                });
            }

            (prev, op) => {
                if let Some(prev) = prev {
                    let wire = self.to_relative(prev);
                    self.queued.push_back(wire);
                }
                self.held_offset = self.next_offset;
                self.held = Some(op);
            }
        }

        self.next_offset += span;
    }

    fn pump(&mut self) -> Result<Option<Opcode>> {
        loop {
            if let Some(op) = self.queued.pop_front() {
                return Ok(Some(op));
            }
            match self.inner.next() {
                None => {
                    self.flush_held();
                    if let Some(op) = self.queued.pop_front() {
                        return Ok(Some(op));
                    }
                    return Ok(None);
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(op)) => {
                    if op.is_operation() {
                        let abs = self.to_absolute(op);
                        self.accept(abs);
                    } else {
                        // Headers and CRC fields pass through unchanged,
                        // after any pending operation.
                        self.flush_held();
                        self.queued.push_back(op);
                    }
                }
            }
        }
    }
}

impl<I> Iterator for Optimize<I>
where
    I: Iterator<Item = Result<Opcode>>,
{
    type Item = Result<Opcode>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.pump() {
            Ok(Some(op)) => Some(Ok(op)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
