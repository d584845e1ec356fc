// File-level helpers wrapping the opcode pipelines with buffered I/O.
//
// Each helper streams opcodes straight from producer to consumer with one
// opcode in flight, and returns a small stats struct the CLI renders as
// text or JSON.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::apply::apply;
use crate::bps::reader::read_patch;
use crate::bps::writer::write_patch;
use crate::bps::{asm, Result};
use crate::diff::{default_block_size, Diff};
use crate::optimize::optimize;
use crate::validate::validate_with;

const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by [`diff_file`].
#[derive(Debug, Clone)]
pub struct DiffStats {
    pub source_size: u64,
    pub target_size: u64,
    pub patch_size: u64,
    pub block_size: usize,
}

/// Statistics returned by [`apply_file`].
#[derive(Debug, Clone)]
pub struct ApplyStats {
    pub source_size: u64,
    pub patch_size: u64,
    pub output_size: u64,
}

/// Statistics returned by [`optimize_file`].
#[derive(Debug, Clone)]
pub struct OptimizeStats {
    pub input_size: u64,
    pub output_size: u64,
}

/// Statistics returned by [`validate_file`].
#[derive(Debug, Clone)]
pub struct ValidateStats {
    pub patch_size: u64,
    pub operations: u64,
}

// ---------------------------------------------------------------------------
// diff_file
// ---------------------------------------------------------------------------

/// Diff two files into a patch file.
///
/// Both inputs are read fully into memory (the diff engine needs random
/// access to both).  `block_size: None` selects the size heuristic.
pub fn diff_file(
    source_path: &Path,
    target_path: &Path,
    patch_path: &Path,
    block_size: Option<usize>,
    metadata: &[u8],
) -> Result<DiffStats> {
    let source = std::fs::read(source_path)?;
    let target = std::fs::read(target_path)?;
    let block_size = block_size.unwrap_or_else(|| default_block_size(source.len(), target.len()));
    log::debug!(
        "diffing {} ({} bytes) -> {} ({} bytes), block size {block_size}",
        source_path.display(),
        source.len(),
        target_path.display(),
        target.len()
    );

    let engine = Diff::new(block_size, &source, &target)?.with_metadata(metadata.to_vec());
    let sink = BufWriter::with_capacity(BUF_SIZE, File::create(patch_path)?);
    let patch_size = write_patch(engine, sink)?;

    Ok(DiffStats {
        source_size: source.len() as u64,
        target_size: target.len() as u64,
        patch_size,
        block_size,
    })
}

// ---------------------------------------------------------------------------
// apply_file
// ---------------------------------------------------------------------------

/// Apply a patch file to a source file, writing the target.
pub fn apply_file(patch_path: &Path, source_path: &Path, output_path: &Path) -> Result<ApplyStats> {
    let source = std::fs::read(source_path)?;
    let patch_file = File::open(patch_path)?;
    let patch_size = patch_file.metadata()?.len();
    let reader = read_patch(BufReader::with_capacity(BUF_SIZE, patch_file));

    let output = apply(reader, &source)?;
    std::fs::write(output_path, &output)?;

    Ok(ApplyStats {
        source_size: source.len() as u64,
        patch_size,
        output_size: output.len() as u64,
    })
}

// ---------------------------------------------------------------------------
// optimize_file
// ---------------------------------------------------------------------------

/// Rewrite a patch file into an equivalent, no-larger one.
pub fn optimize_file(input_path: &Path, output_path: &Path) -> Result<OptimizeStats> {
    let input_file = File::open(input_path)?;
    let input_size = input_file.metadata()?.len();
    let reader = read_patch(BufReader::with_capacity(BUF_SIZE, input_file));

    let sink = BufWriter::with_capacity(BUF_SIZE, File::create(output_path)?);
    let output_size = write_patch(optimize(reader), sink)?;

    Ok(OptimizeStats {
        input_size,
        output_size,
    })
}

// ---------------------------------------------------------------------------
// validate_file
// ---------------------------------------------------------------------------

/// Check a patch file's structure and CRCs.  When source/target paths are
/// given, their CRC32s are checked against the patch's declarations.
pub fn validate_file(
    patch_path: &Path,
    source_path: Option<&Path>,
    target_path: Option<&Path>,
) -> Result<ValidateStats> {
    let source = source_path.map(std::fs::read).transpose()?;
    let target = target_path.map(std::fs::read).transpose()?;

    let patch_file = File::open(patch_path)?;
    let patch_size = patch_file.metadata()?.len();
    let reader = read_patch(BufReader::with_capacity(BUF_SIZE, patch_file));

    let mut operations = 0u64;
    for op in validate_with(reader, source.as_deref(), target.as_deref()) {
        if op?.is_operation() {
            operations += 1;
        }
    }

    Ok(ValidateStats {
        patch_size,
        operations,
    })
}

// ---------------------------------------------------------------------------
// disassemble_file / assemble_file
// ---------------------------------------------------------------------------

/// Render a patch file as patch assembly.
pub fn disassemble_file(patch_path: &Path, output_path: &Path) -> Result<()> {
    let reader = read_patch(BufReader::with_capacity(BUF_SIZE, File::open(patch_path)?));
    let mut sink = BufWriter::with_capacity(BUF_SIZE, File::create(output_path)?);
    asm::write_asm(reader, &mut sink)?;
    sink.flush()?;
    Ok(())
}

/// Assemble patch assembly back into a patch file.
pub fn assemble_file(input_path: &Path, patch_path: &Path) -> Result<u64> {
    let reader = asm::AsmReader::new(BufReader::with_capacity(BUF_SIZE, File::open(input_path)?));
    let sink = BufWriter::with_capacity(BUF_SIZE, File::create(patch_path)?);
    write_patch(reader, sink)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
