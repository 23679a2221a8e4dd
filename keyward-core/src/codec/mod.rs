//! Compact binary codec shared with client SDKs
//!
//! Offline signature payloads and SDK configuration blobs are built from three
//! primitives:
//!
//! - **count**: a variable-width unsigned integer (1, 2 or 4 bytes, up to `0x3FFFFFFF`)
//! - **data**: a count-prefixed byte string
//! - **raw**: fixed-size bytes without a prefix
//!
//! Width is selected by the two most significant bits of the first byte:
//!
//! | Prefix | Width | Value bits |
//! |--------|-------|------------|
//! | `00`, `01` | 1 byte | 7 |
//! | `10` | 2 bytes | 14 |
//! | `11` | 4 bytes | 30 (big-endian) |

mod reader;
pub mod sdk_config;
mod writer;

pub use reader::DataReader;
pub use sdk_config::SdkConfiguration;
pub use writer::DataWriter;

/// Largest value representable by a count field.
pub const MAX_COUNT: usize = 0x3FFF_FFFF;

/// Number of bytes [`DataWriter::write_count`] emits for `count`, or `None` when
/// the value cannot be encoded.
pub fn count_width(count: usize) -> Option<usize> {
    match count {
        0..=0x7F => Some(1),
        0x80..=0x3FFF => Some(2),
        0x4000..=MAX_COUNT => Some(4),
        _ => None,
    }
}
