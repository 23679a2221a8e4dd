#![no_main]

//! Fuzz target for SdkConfiguration::deserialize()
//!
//! Run with: cargo +nightly fuzz run fuzz_sdk_config

use keyward_core::SdkConfiguration;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(config) = SdkConfiguration::deserialize(text) {
            // Anything that parses must serialize again
            let _ = config.serialize();
        }
    }
});
