// Command-line interface for the patch tool.
//
// Subcommands map one-to-one onto the file helpers in `io`: diff, apply,
// optimize, validate, disassemble, assemble.  Exit code 0 on success,
// 1 on any failure; diagnostics go to stderr.

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::io::{
    apply_file, assemble_file, diff_file, disassemble_file, optimize_file, validate_file,
};

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// BPS binary patch tool.
#[derive(Parser, Debug)]
#[command(
    name = "bpsdelta",
    version,
    about = "Create, apply, optimize and validate BPS binary patches",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Create a patch from a source and a target file.
    Diff(DiffArgs),
    /// Apply a patch to a source file.
    Apply(ApplyArgs),
    /// Rewrite a patch into an equivalent, no-larger one.
    Optimize(OptimizeArgs),
    /// Check a patch's structure and checksums.
    Validate(ValidateArgs),
    /// Render a patch as editable patch assembly.
    Disassemble(DisassembleArgs),
    /// Build a patch from patch assembly.
    Assemble(AssembleArgs),
}

#[derive(Args, Debug)]
struct DiffArgs {
    /// Original file.
    #[arg(value_hint = ValueHint::FilePath)]
    source: PathBuf,

    /// Modified file.
    #[arg(value_hint = ValueHint::FilePath)]
    target: PathBuf,

    /// Patch file to create.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Matching block size in bytes (default: derived from input sizes).
    #[arg(long, short = 'b', value_parser = parse_block_size)]
    blocksize: Option<usize>,

    /// Metadata string to embed in the patch header.
    #[arg(long, short = 'm')]
    metadata: Option<String>,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Original file the patch was made against.
    #[arg(value_hint = ValueHint::FilePath)]
    source: PathBuf,

    /// Output file to create.
    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct OptimizeArgs {
    /// Patch file to optimize.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Optimized patch file to create.
    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Patch file to check.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Also check the source file's CRC32.
    #[arg(long, short = 's', value_hint = ValueHint::FilePath)]
    source: Option<PathBuf>,

    /// Also check the target file's CRC32.
    #[arg(long, short = 't', value_hint = ValueHint::FilePath)]
    target: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DisassembleArgs {
    /// Patch file to render.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Assembly file to create.
    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct AssembleArgs {
    /// Assembly file to read.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Patch file to create.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,
}

fn parse_block_size(s: &str) -> Result<usize, String> {
    let size: usize = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid block size '{s}': {e}"))?;
    if size == 0 {
        return Err("block size must be at least 1".into());
    }
    Ok(size)
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

/// Refuse to clobber an existing output file unless --force was given.
fn check_overwrite(path: &std::path::Path, force: bool) -> bool {
    if path.exists() && !force {
        eprintln!(
            "bpsdelta: output file exists, use -f to overwrite: {}",
            path.display()
        );
        return false;
    }
    true
}

fn report_error(e: impl std::fmt::Display) -> i32 {
    eprintln!("bpsdelta: {e}");
    1
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_diff(cli: &Cli, args: &DiffArgs) -> i32 {
    if !check_overwrite(&args.patch, cli.force) {
        return 1;
    }
    let metadata = args.metadata.as_deref().unwrap_or("").as_bytes();
    let stats = match diff_file(
        &args.source,
        &args.target,
        &args.patch,
        args.blocksize,
        metadata,
    ) {
        Ok(stats) => stats,
        Err(e) => return report_error(e),
    };

    if cli.verbose > 0 && !cli.quiet {
        eprintln!(
            "bpsdelta: diff: source {} bytes, target {} bytes, patch {} bytes \
             (block size {})",
            stats.source_size, stats.target_size, stats.patch_size, stats.block_size
        );
    }
    if cli.json_output {
        let json = serde_json::json!({
            "command": "diff",
            "source_size": stats.source_size,
            "target_size": stats.target_size,
            "patch_size": stats.patch_size,
            "block_size": stats.block_size,
        });
        eprintln!("{}", serde_json::to_string_pretty(&json).unwrap());
    }
    0
}

fn cmd_apply(cli: &Cli, args: &ApplyArgs) -> i32 {
    if !check_overwrite(&args.output, cli.force) {
        return 1;
    }
    let stats = match apply_file(&args.patch, &args.source, &args.output) {
        Ok(stats) => stats,
        Err(e) => return report_error(e),
    };

    if cli.verbose > 0 && !cli.quiet {
        eprintln!(
            "bpsdelta: apply: patch {} bytes, output {} bytes",
            stats.patch_size, stats.output_size
        );
    }
    if cli.json_output {
        let json = serde_json::json!({
            "command": "apply",
            "source_size": stats.source_size,
            "patch_size": stats.patch_size,
            "output_size": stats.output_size,
        });
        eprintln!("{}", serde_json::to_string_pretty(&json).unwrap());
    }
    0
}

fn cmd_optimize(cli: &Cli, args: &OptimizeArgs) -> i32 {
    if !check_overwrite(&args.output, cli.force) {
        return 1;
    }
    let stats = match optimize_file(&args.input, &args.output) {
        Ok(stats) => stats,
        Err(e) => return report_error(e),
    };

    if cli.verbose > 0 && !cli.quiet {
        eprintln!(
            "bpsdelta: optimize: {} -> {} bytes",
            stats.input_size, stats.output_size
        );
    }
    if cli.json_output {
        let json = serde_json::json!({
            "command": "optimize",
            "input_size": stats.input_size,
            "output_size": stats.output_size,
        });
        eprintln!("{}", serde_json::to_string_pretty(&json).unwrap());
    }
    0
}

fn cmd_validate(cli: &Cli, args: &ValidateArgs) -> i32 {
    let stats = match validate_file(&args.patch, args.source.as_deref(), args.target.as_deref()) {
        Ok(stats) => stats,
        Err(e) => return report_error(e),
    };

    if !cli.quiet {
        eprintln!(
            "bpsdelta: {} is a valid patch ({} operations, {} bytes)",
            args.patch.display(),
            stats.operations,
            stats.patch_size
        );
    }
    if cli.json_output {
        let json = serde_json::json!({
            "command": "validate",
            "patch_size": stats.patch_size,
            "operations": stats.operations,
        });
        eprintln!("{}", serde_json::to_string_pretty(&json).unwrap());
    }
    0
}

fn cmd_disassemble(cli: &Cli, args: &DisassembleArgs) -> i32 {
    if !check_overwrite(&args.output, cli.force) {
        return 1;
    }
    match disassemble_file(&args.patch, &args.output) {
        Ok(()) => 0,
        Err(e) => report_error(e),
    }
}

fn cmd_assemble(cli: &Cli, args: &AssembleArgs) -> i32 {
    if !check_overwrite(&args.patch, cli.force) {
        return 1;
    }
    match assemble_file(&args.input, &args.patch) {
        Ok(written) => {
            if cli.verbose > 0 && !cli.quiet {
                eprintln!("bpsdelta: assemble: wrote {written} bytes");
            }
            0
        }
        Err(e) => report_error(e),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();

    let exit_code = match &cli.command {
        Cmd::Diff(args) => cmd_diff(&cli, args),
        Cmd::Apply(args) => cmd_apply(&cli, args),
        Cmd::Optimize(args) => cmd_optimize(&cli, args),
        Cmd::Validate(args) => cmd_validate(&cli, args),
        Cmd::Disassemble(args) => cmd_disassemble(&cli, args),
        Cmd::Assemble(args) => cmd_assemble(&cli, args),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
