// Byte-level format checks: exact wire layouts for small inputs, and the
// failure modes a corrupted file must produce.

use bpsdelta::bps::ops::{pack_operation, Opcode, MAGIC, OP_SOURCE_READ};
use bpsdelta::bps::varint;
use bpsdelta::{apply, create_patch, optimize, read_patch, validate, write_patch};

#[test]
fn identity_patch_is_twenty_bytes() {
    // magic(4) + sourcesize(1) + targetsize(1) + metadatasize(1)
    // + SourceRead(1) + three CRCs(12).
    let patch = create_patch(b"abcd", b"abcd", Some(1)).unwrap();
    assert_eq!(patch.len(), 20);

    assert_eq!(&patch[..4], MAGIC);
    // Both sizes and the empty metadata length fit one varint byte each.
    assert_eq!(patch[4], 0x84);
    assert_eq!(patch[5], 0x84);
    assert_eq!(patch[6], 0x80);
    // One SourceRead spanning the whole file.
    let mut op = Vec::new();
    varint::encode(pack_operation(OP_SOURCE_READ, 4), &mut op);
    assert_eq!(&patch[7..8], &op[..]);

    // Source and target are the same bytes, so their CRCs agree.
    let crc = crc32fast::hash(b"abcd").to_le_bytes();
    assert_eq!(&patch[8..12], &crc);
    assert_eq!(&patch[12..16], &crc);
    assert_eq!(&patch[16..20], &crc32fast::hash(&patch[..16]).to_le_bytes());
}

#[test]
fn pure_literal_patch_shape() {
    let patch = create_patch(b"", b"hi", Some(1)).unwrap();
    let ops: Vec<Opcode> = read_patch(&patch[..]).map(|r| r.unwrap()).collect();
    assert_eq!(ops[0], Opcode::SourceHeader { size: 0 });
    assert_eq!(
        ops[1],
        Opcode::TargetHeader {
            size: 2,
            metadata: Vec::new()
        }
    );
    assert_eq!(
        ops[2],
        Opcode::TargetRead {
            payload: b"hi".to_vec()
        }
    );
}

#[test]
fn run_length_target_copy() {
    let target = vec![b'A'; 100];
    let patch = create_patch(b"", &target, Some(1)).unwrap();
    let ops: Vec<Opcode> = read_patch(&patch[..]).map(|r| r.unwrap()).collect();
    assert_eq!(
        ops[2],
        Opcode::TargetRead {
            payload: vec![b'A']
        }
    );
    assert_eq!(
        ops[3],
        Opcode::TargetCopy {
            bytespan: 99,
            offset: 0
        }
    );
    // And the self-overlapping copy reconstructs the run.
    assert_eq!(apply(read_patch(&patch[..]), b"").unwrap(), target);
}

#[test]
fn mirror_uses_forward_then_backward_copies() {
    let patch = create_patch(b"abcdef", b"defabc", Some(1)).unwrap();
    let ops: Vec<Opcode> = read_patch(&patch[..]).map(|r| r.unwrap()).collect();
    assert_eq!(
        ops[2],
        Opcode::SourceCopy {
            bytespan: 3,
            offset: 3
        }
    );
    assert_eq!(
        ops[3],
        Opcode::SourceCopy {
            bytespan: 3,
            offset: -6
        }
    );
}

#[test]
fn single_bit_flip_in_patch_crc_is_detected() {
    let mut patch = create_patch(b"abcdef", b"abcxef", Some(1)).unwrap();
    let last = patch.len() - 1;
    patch[last] ^= 0x01;

    let result: bpsdelta::Result<Vec<Opcode>> = validate(read_patch(&patch[..])).collect();
    let err = result.unwrap_err();
    assert!(
        err.to_string().contains("patch CRC mismatch"),
        "got: {err}"
    );
}

#[test]
fn single_bit_flip_in_body_is_detected() {
    let mut patch = create_patch(b"abcdef", b"abcxef", Some(1)).unwrap();
    // Flip a bit in the middle of the operation stream.
    patch[8] ^= 0x40;
    let result: bpsdelta::Result<Vec<Opcode>> = validate(read_patch(&patch[..])).collect();
    assert!(result.is_err());
}

#[test]
fn optimizer_merges_adjacent_literals_and_reseals_the_crc() {
    let ops = vec![
        Ok(Opcode::SourceHeader { size: 0 }),
        Ok(Opcode::TargetHeader {
            size: 2,
            metadata: Vec::new(),
        }),
        Ok(Opcode::TargetRead {
            payload: b"a".to_vec(),
        }),
        Ok(Opcode::TargetRead {
            payload: b"b".to_vec(),
        }),
        Ok(Opcode::SourceCrc32 {
            crc: crc32fast::hash(b""),
        }),
        Ok(Opcode::TargetCrc32 {
            crc: crc32fast::hash(b"ab"),
        }),
        Ok(Opcode::PatchCrc32 { crc: None }),
    ];

    let mut patch = Vec::new();
    write_patch(optimize(ops.into_iter()), &mut patch).unwrap();

    let parsed: Vec<Opcode> = read_patch(&patch[..]).map(|r| r.unwrap()).collect();
    assert_eq!(
        parsed[2],
        Opcode::TargetRead {
            payload: b"ab".to_vec()
        }
    );
    // The serialized file carries a correct patch CRC over its own bytes.
    let expected = crc32fast::hash(&patch[..patch.len() - 4]);
    assert_eq!(&patch[patch.len() - 4..], &expected.to_le_bytes());
    // And it validates end to end.
    let revalidated: bpsdelta::Result<Vec<Opcode>> = validate(read_patch(&patch[..])).collect();
    revalidated.unwrap();
}

#[test]
fn wrong_source_is_rejected_by_apply() {
    let patch = create_patch(b"abcd", b"abXd", Some(1)).unwrap();
    let err = apply(read_patch(&patch[..]), b"aXcd").unwrap_err();
    assert!(err.to_string().contains("CRC32"), "got: {err}");
}
