// End-to-end roundtrip tests across the full pipeline:
// diff -> write -> read -> validate -> apply, plus the optimizer in the
// middle, for a range of data shapes and block sizes.

use bpsdelta::bps::Opcode;
use bpsdelta::{
    apply, apply_patch, create_patch, diff, optimize, read_patch, validate, write_patch,
};

/// Deterministic pseudo-random bytes (LCG).
fn noise(len: usize, mut state: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(len);
    for _ in 0..len {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

fn cases() -> Vec<(Vec<u8>, Vec<u8>)> {
    let base = noise(4096, 0xDEADBEEF);
    let mut shuffled = base.clone();
    shuffled.rotate_left(1500);
    let mut edited = base.clone();
    for i in (0..edited.len()).step_by(97) {
        edited[i] = edited[i].wrapping_add(1);
    }

    vec![
        (Vec::new(), Vec::new()),
        (Vec::new(), b"hi".to_vec()),
        (b"abcd".to_vec(), Vec::new()),
        (b"abcd".to_vec(), b"abcd".to_vec()),
        (b"abcdef".to_vec(), b"defabc".to_vec()),
        (Vec::new(), vec![b'A'; 100]),
        (base.clone(), base.clone()),
        (base.clone(), shuffled),
        (base.clone(), edited),
        (base.clone(), base.iter().rev().copied().collect()),
        (noise(333, 7), noise(4000, 8)),
    ]
}

#[test]
fn diff_apply_reproduces_target() {
    for (i, (source, target)) in cases().into_iter().enumerate() {
        for block_size in [1usize, 2, 3, 7, 16, 64] {
            let mut patch = Vec::new();
            write_patch(diff(block_size, &source, &target).unwrap(), &mut patch)
                .unwrap_or_else(|e| panic!("case {i}, block {block_size}: write: {e}"));
            let restored = apply_patch(&patch, &source)
                .unwrap_or_else(|e| panic!("case {i}, block {block_size}: apply: {e}"));
            assert_eq!(restored, target, "case {i}, block {block_size}");
        }
    }
}

#[test]
fn validator_accepts_all_diff_outputs() {
    for (i, (source, target)) in cases().into_iter().enumerate() {
        for block_size in [1usize, 4, 32] {
            let result: bpsdelta::Result<Vec<Opcode>> =
                validate(diff(block_size, &source, &target).unwrap()).collect();
            result.unwrap_or_else(|e| panic!("case {i}, block {block_size}: {e}"));
        }
    }
}

#[test]
fn validator_accepts_serialized_diff_outputs() {
    // Same property, but through the wire format: the serialized patch
    // carries a real trailing CRC which the validator must agree with.
    for (source, target) in cases() {
        let patch = create_patch(&source, &target, Some(4)).unwrap();
        let result: bpsdelta::Result<Vec<Opcode>> = validate(read_patch(&patch[..])).collect();
        result.unwrap();
    }
}

#[test]
fn optimizer_preserves_apply_semantics() {
    for (i, (source, target)) in cases().into_iter().enumerate() {
        let patch = create_patch(&source, &target, Some(2)).unwrap();
        let restored = apply(optimize(read_patch(&patch[..])), &source)
            .unwrap_or_else(|e| panic!("case {i}: {e}"));
        assert_eq!(restored, target, "case {i}");
    }
}

#[test]
fn optimizer_never_grows_the_patch() {
    for (i, (source, target)) in cases().into_iter().enumerate() {
        let patch = create_patch(&source, &target, Some(3)).unwrap();
        let mut optimized = Vec::new();
        write_patch(optimize(read_patch(&patch[..])), &mut optimized).unwrap();
        assert!(
            optimized.len() <= patch.len(),
            "case {i}: {} > {}",
            optimized.len(),
            patch.len()
        );
    }
}

#[test]
fn optimizer_is_idempotent_on_serialized_patches() {
    for (source, target) in cases() {
        let patch = create_patch(&source, &target, Some(2)).unwrap();
        let mut once = Vec::new();
        write_patch(optimize(read_patch(&patch[..])), &mut once).unwrap();
        let mut twice = Vec::new();
        write_patch(optimize(read_patch(&once[..])), &mut twice).unwrap();
        assert_eq!(once, twice);
    }
}

#[test]
fn read_write_is_byte_identity() {
    for (source, target) in cases() {
        let patch = create_patch(&source, &target, Some(5)).unwrap();
        let mut copy = Vec::new();
        write_patch(read_patch(&patch[..]), &mut copy).unwrap();
        assert_eq!(patch, copy);
    }
}

#[test]
fn bytespans_sum_to_declared_target_size() {
    for (source, target) in cases() {
        let patch = create_patch(&source, &target, Some(2)).unwrap();
        let ops: Vec<Opcode> = read_patch(&patch[..]).map(|r| r.unwrap()).collect();
        let declared = ops
            .iter()
            .find_map(|op| match op {
                Opcode::TargetHeader { size, .. } => Some(*size),
                _ => None,
            })
            .unwrap();
        let total: u64 = ops.iter().map(Opcode::bytespan).sum();
        assert_eq!(total, declared);
        assert_eq!(declared, target.len() as u64);
    }
}

#[test]
fn metadata_survives_the_wire() {
    let source = b"old contents";
    let target = b"new contents";
    let mut patch = Vec::new();
    write_patch(
        diff(1, source, target)
            .unwrap()
            .with_metadata(b"patch notes: rewrote everything".to_vec()),
        &mut patch,
    )
    .unwrap();

    let header = read_patch(&patch[..]).nth(1).unwrap().unwrap();
    assert_eq!(
        header,
        Opcode::TargetHeader {
            size: target.len() as u64,
            metadata: b"patch notes: rewrote everything".to_vec()
        }
    );

    // Metadata participates in the patch CRC but not in the output.
    assert_eq!(apply_patch(&patch, source).unwrap(), target);
}
