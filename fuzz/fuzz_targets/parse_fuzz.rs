#![no_main]
use libfuzzer_sys::fuzz_target;

use bpsdelta::{read_patch, validate};

// Arbitrary bytes must never panic the reader or validator; clean errors
// are the only acceptable failure mode.
fuzz_target!(|data: &[u8]| {
    for item in validate(read_patch(data)) {
        if item.is_err() {
            break;
        }
    }
});
