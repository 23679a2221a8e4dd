#![no_main]

//! Fuzz target for DataReader
//!
//! Reads counts, data fields and strings from arbitrary bytes until the input
//! is exhausted. Every read must return `None` on short input, never panic.
//!
//! Run with: cargo +nightly fuzz run fuzz_data_reader

use keyward_core::DataReader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut reader = DataReader::new(data);
    while reader.remaining_size() > 0 {
        let before = reader.current_offset();
        let _ = reader.read_count();
        let _ = reader.read_data(0);
        let _ = reader.read_string();
        if reader.current_offset() == before && !reader.skip_bytes(1) {
            break;
        }
    }
});
