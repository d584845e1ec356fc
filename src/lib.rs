//! BPS binary patches in pure Rust: create, apply, validate and optimize.
//!
//! The crate provides:
//! - The patch format itself (`bps`): varint codec, opcode model, stream
//!   reader/writer, textual assembly
//! - A block-hash diff engine (`diff`)
//! - An apply interpreter (`apply`), a stream validator (`validate`) and a
//!   stream optimizer (`optimize`)
//! - File-oriented helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! Every pipeline stage is a pull-driven iterator over
//! [`Result`]`<`[`Opcode`]`>`, so a whole patch passes through memory one
//! opcode at a time.
//!
//! # Quick start
//!
//! ```
//! let source = b"hello old world";
//! let target = b"hello new world";
//!
//! let patch = bpsdelta::create_patch(source, target, None).unwrap();
//! let restored = bpsdelta::apply_patch(&patch, source).unwrap();
//! assert_eq!(restored, target);
//! ```

pub mod apply;
pub mod bps;
pub mod diff;
pub mod io;
pub mod optimize;
pub mod validate;

#[cfg(feature = "cli")]
pub mod cli;

pub use apply::apply;
pub use bps::reader::{read_patch, PatchReader};
pub use bps::writer::{write_patch, PatchWriter};
pub use bps::{Error, Opcode, Result};
pub use diff::{default_block_size, diff, Diff};
pub use optimize::{optimize, Optimize};
pub use validate::{validate, validate_with, Validate};

// ---------------------------------------------------------------------------
// One-shot conveniences
// ---------------------------------------------------------------------------

/// Diff two in-memory buffers into serialized patch bytes.
///
/// `block_size: None` selects the size heuristic.
pub fn create_patch(source: &[u8], target: &[u8], block_size: Option<usize>) -> Result<Vec<u8>> {
    let block_size =
        block_size.unwrap_or_else(|| default_block_size(source.len(), target.len()));
    let mut patch = Vec::new();
    write_patch(diff(block_size, source, target)?, &mut patch)?;
    Ok(patch)
}

/// Apply serialized patch bytes to a source buffer.
pub fn apply_patch(patch: &[u8], source: &[u8]) -> Result<Vec<u8>> {
    apply(read_patch(patch), source)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(source: &[u8], target: &[u8]) {
        let patch = create_patch(source, target, None).expect("diff failed");
        let restored = apply_patch(&patch, source).expect("apply failed");
        assert_eq!(
            restored,
            target,
            "roundtrip mismatch (source={}, target={}, patch={})",
            source.len(),
            target.len(),
            patch.len()
        );
    }

    #[test]
    fn roundtrip_identical() {
        let data = b"The quick brown fox jumps over the lazy dog.";
        roundtrip(data, data);
    }

    #[test]
    fn roundtrip_small_edit() {
        roundtrip(
            b"Hello, world! This is a test of the diff engine.",
            b"Hello, earth! This is a test of the diff engine.",
        );
    }

    #[test]
    fn roundtrip_no_source() {
        roundtrip(b"", b"ABCDEFGHIJKLMNOPQRSTUVWXYZ");
    }

    #[test]
    fn roundtrip_empty_target() {
        roundtrip(b"some source", b"");
    }

    #[test]
    fn roundtrip_both_empty() {
        roundtrip(b"", b"");
    }

    #[test]
    fn roundtrip_repeating_data() {
        roundtrip(
            b"AAAA BBBB CCCC DDDD EEEE FFFF GGGG HHHH",
            b"AAAA CCCC DDDD EEEE xxxx GGGG HHHH IIII",
        );
    }

    #[test]
    fn roundtrip_binary_data() {
        let source: Vec<u8> = (0..=255).cycle().take(4096).collect();
        let mut target = source.clone();
        target[100] = 0xFF;
        target[200] = 0x00;
        target[1000] = 0x42;
        roundtrip(&source, &target);
    }

    #[test]
    fn patch_is_smaller_for_similar_data() {
        let source: Vec<u8> = (0..=255).cycle().take(8192).collect();
        let mut target = source.clone();
        target[4096] ^= 0xFF;
        let patch = create_patch(&source, &target, None).unwrap();
        assert!(
            patch.len() < target.len() / 2,
            "patch ({}) should be much smaller than target ({})",
            patch.len(),
            target.len()
        );
    }
}
