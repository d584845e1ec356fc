#![no_main]
use libfuzzer_sys::fuzz_target;

use bpsdelta::{apply, apply_patch, create_patch, optimize, read_patch};

// Split arbitrary input into (block_size, source, target) and check the
// full produce/consume pipeline reproduces the target bit-exactly.
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    let block_size = (data[0] as usize & 0x0F) + 1;
    let split = (data[1] as usize).min(data.len() - 2);
    let payload = &data[2..];
    let (source, target) = payload.split_at(split.min(payload.len()));

    let patch = create_patch(source, target, Some(block_size)).expect("diff failed");

    let restored = apply_patch(&patch, source).expect("apply failed");
    assert_eq!(restored, target);

    let optimized = apply(optimize(read_patch(&patch[..])), source).expect("optimized apply");
    assert_eq!(optimized, target);
});
