// Diff engine: computes an opcode stream from source and target bytes.
//
// The scan walks a write cursor over the target.  At each position every
// block-map hit (in the source, and in the already-covered prefix of the
// target) is grown greedily in both directions; the widest match wins,
// with ties going to the cheapest encoding.  A chosen match may absorb
// pending literal bytes to its left, shortening the TargetRead that would
// otherwise precede it.  If nothing matches, one literal byte is buffered
// and the cursor moves on.
//
// Copy operations carry their offset as a delta from the previous copy of
// the same kind, which is what keeps offset varints short on files with
// scattered edits.

pub mod blockmap;

use std::collections::VecDeque;

use crate::bps::ops::Opcode;
use crate::bps::{corrupt, Result};
use self::blockmap::BlockMap;

/// Heuristic block size: roughly 64-byte blocks on a 32 MiB input pair,
/// clamped to at least one byte.
pub fn default_block_size(source_len: usize, target_len: usize) -> usize {
    (source_len + target_len) / 1_000_000 + 1
}

/// Start a diff with an explicit block size (must be non-zero).
pub fn diff<'a>(block_size: usize, source: &'a [u8], target: &'a [u8]) -> Result<Diff<'a>> {
    Diff::new(block_size, source, target)
}

// ---------------------------------------------------------------------------
// Candidate matches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Source,
    Target,
}

/// One extended block match under consideration at the current cursor.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    origin: Origin,
    /// Absolute origin position of the first copied byte (`p - left`).
    start: usize,
    /// Pending literal bytes this match absorbs to its left.
    left: usize,
    /// Total bytes covered (`left + right`).
    span: usize,
    /// Serialized size of the operation this candidate would emit.
    cost: usize,
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    SourceHeader,
    TargetHeader,
    Scan,
    Trailer,
    Done,
}

/// Lazy diff iterator.  Borrows both buffers; the only byte copies it
/// makes are freshly allocated TargetRead payloads.
pub struct Diff<'a> {
    source: &'a [u8],
    target: &'a [u8],
    metadata: Vec<u8>,
    block_size: usize,
    source_map: BlockMap<'a>,
    target_map: BlockMap<'a>,
    /// Target position the next operation will write at.
    write_offset: usize,
    /// First target block not yet indexed in `target_map`.
    next_block_offset: usize,
    /// Source cursor after the most recent SourceCopy.
    last_source_copy: usize,
    /// Target cursor after the most recent TargetCopy.
    last_target_copy: usize,
    /// Buffered literal bytes awaiting a flush.
    pending: Vec<u8>,
    queued: VecDeque<Opcode>,
    stage: Stage,
}

impl<'a> Diff<'a> {
    /// Build a diff engine. Fails only on a zero block size.
    pub fn new(block_size: usize, source: &'a [u8], target: &'a [u8]) -> Result<Self> {
        if block_size == 0 {
            return Err(corrupt("block size must be greater than zero"));
        }
        let source_map = BlockMap::build(source, block_size);
        log::debug!(
            "diff: block size {block_size}, {} source windows indexed",
            source_map.len()
        );
        Ok(Self {
            source,
            target,
            metadata: Vec::new(),
            block_size,
            source_map,
            target_map: BlockMap::new(block_size),
            write_offset: 0,
            next_block_offset: 0,
            last_source_copy: 0,
            last_target_copy: 0,
            pending: Vec::new(),
            queued: VecDeque::new(),
            stage: Stage::SourceHeader,
        })
    }

    /// Attach a metadata blob to the target header.
    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Grow a source block hit at `p` in both directions.
    fn source_candidate(&self, p: usize) -> Candidate {
        let w = self.write_offset;
        let left = self.left_extension(self.source, p);
        let right = self.right_extension(self.source, p);
        let start = p - left;
        let span = left + right;
        let cost = if start == w - left {
            // Aligned with the output: encodes as a SourceRead.
            Opcode::SourceRead {
                bytespan: span as u64,
            }
            .encoded_len()
        } else {
            Opcode::SourceCopy {
                bytespan: span as u64,
                offset: start as i64 - self.last_source_copy as i64,
            }
            .encoded_len()
        };
        Candidate {
            origin: Origin::Source,
            start,
            left,
            span,
            cost,
        }
    }

    /// Grow a target block hit at `p` (a block strictly before the write
    /// cursor) in both directions.  The rightward growth may run past the
    /// cursor, which is what turns a one-byte seed into run-length
    /// repetition.
    fn target_candidate(&self, p: usize) -> Candidate {
        let left = self.left_extension(self.target, p);
        let right = self.right_extension(self.target, p);
        let start = p - left;
        let span = left + right;
        let cost = Opcode::TargetCopy {
            bytespan: span as u64,
            offset: start as i64 - self.last_target_copy as i64,
        }
        .encoded_len();
        Candidate {
            origin: Origin::Target,
            start,
            left,
            span,
            cost,
        }
    }

    /// Longest backwards match, bounded by the pending literal buffer:
    /// only bytes that are still literals can be re-covered by a copy.
    fn left_extension(&self, origin: &[u8], p: usize) -> usize {
        let w = self.write_offset;
        let cap = self.pending.len().min(p);
        let mut left = 0;
        while left < cap && origin[p - left - 1] == self.target[w - left - 1] {
            left += 1;
        }
        left
    }

    /// Longest forwards match from the cursor.
    fn right_extension(&self, origin: &[u8], p: usize) -> usize {
        let w = self.write_offset;
        let mut right = 0;
        while w + right < self.target.len()
            && p + right < origin.len()
            && origin[p + right] == self.target[w + right]
        {
            right += 1;
        }
        right
    }

    fn consider(best: &mut Option<Candidate>, cand: Candidate) {
        let better = match best {
            None => true,
            Some(b) => cand.span > b.span || (cand.span == b.span && cand.cost < b.cost),
        };
        if better {
            *best = Some(cand);
        }
    }

    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            self.queued.push_back(Opcode::TargetRead {
                payload: std::mem::take(&mut self.pending),
            });
        }
    }

    /// Emit the chosen candidate, absorbing its left extension out of the
    /// pending literal buffer.
    fn emit_candidate(&mut self, c: Candidate) {
        let keep = self.pending.len() - c.left;
        self.pending.truncate(keep);
        self.flush_pending();

        let start_in_target = self.write_offset - c.left;
        let op = match c.origin {
            Origin::Source if c.start == start_in_target => Opcode::SourceRead {
                bytespan: c.span as u64,
            },
            Origin::Source => {
                let offset = c.start as i64 - self.last_source_copy as i64;
                self.last_source_copy = c.start + c.span;
                Opcode::SourceCopy {
                    bytespan: c.span as u64,
                    offset,
                }
            }
            Origin::Target => {
                let offset = c.start as i64 - self.last_target_copy as i64;
                self.last_target_copy = c.start + c.span;
                Opcode::TargetCopy {
                    bytespan: c.span as u64,
                    offset,
                }
            }
        };
        self.queued.push_back(op);
        self.write_offset = start_in_target + c.span;
    }

    /// One step of the main loop: pick the best candidate at the cursor,
    /// or buffer a literal byte, then index any target blocks the cursor
    /// has fully passed.
    fn scan_step(&mut self) {
        let w = self.write_offset;
        let mut best: Option<Candidate> = None;

        if w + self.block_size <= self.target.len() {
            let key = &self.target[w..w + self.block_size];
            for &p in self.source_map.get(key) {
                Self::consider(&mut best, self.source_candidate(p));
            }
            for &p in self.target_map.get(key) {
                Self::consider(&mut best, self.target_candidate(p));
            }
        }

        // A fresh one-byte TargetRead serializes in two bytes, so a
        // single-byte copy has to beat that to be worth emitting.
        const LITERAL_COST: usize = 2;

        match best {
            Some(c) if c.span > 1 || c.cost < LITERAL_COST => self.emit_candidate(c),
            _ => {
                self.pending.push(self.target[w]);
                self.write_offset += 1;
            }
        }

        while self.write_offset - self.next_block_offset >= self.block_size
            && self.next_block_offset + self.block_size <= self.target.len()
        {
            let block = &self.target[self.next_block_offset..self.next_block_offset + self.block_size];
            self.target_map.insert(block, self.next_block_offset);
            self.next_block_offset += self.block_size;
        }
    }
}

impl<'a> Iterator for Diff<'a> {
    type Item = Result<Opcode>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(op) = self.queued.pop_front() {
                return Some(Ok(op));
            }
            match self.stage {
                Stage::SourceHeader => {
                    self.stage = Stage::TargetHeader;
                    return Some(Ok(Opcode::SourceHeader {
                        size: self.source.len() as u64,
                    }));
                }
                Stage::TargetHeader => {
                    self.stage = Stage::Scan;
                    return Some(Ok(Opcode::TargetHeader {
                        size: self.target.len() as u64,
                        metadata: std::mem::take(&mut self.metadata),
                    }));
                }
                Stage::Scan => {
                    if self.write_offset < self.target.len() {
                        self.scan_step();
                    } else {
                        self.flush_pending();
                        self.stage = Stage::Trailer;
                    }
                }
                Stage::Trailer => {
                    self.queued.push_back(Opcode::SourceCrc32 {
                        crc: crc32fast::hash(self.source),
                    });
                    self.queued.push_back(Opcode::TargetCrc32 {
                        crc: crc32fast::hash(self.target),
                    });
                    // Placeholder: the writer fills in the real value.
                    self.queued.push_back(Opcode::PatchCrc32 { crc: None });
                    self.stage = Stage::Done;
                }
                Stage::Done => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
