use crate::error::{KeywardError, Result};

use super::MAX_COUNT;

/// Append-only writer for the compact binary format.
#[derive(Debug, Default, Clone)]
pub struct DataWriter {
    buf: Vec<u8>,
}

impl DataWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Discard everything written so far.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    /// Write bytes without a length prefix. The reader must know the size.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a variable-width count.
    ///
    /// Fails for values above [`MAX_COUNT`](super::MAX_COUNT).
    pub fn write_count(&mut self, count: usize) -> Result<()> {
        if count <= 0x7F {
            self.buf.push(count as u8);
        } else if count <= 0x3FFF {
            self.buf.push((((count >> 8) & 0x3F) | 0x80) as u8);
            self.buf.push((count & 0xFF) as u8);
        } else if count <= MAX_COUNT {
            self.buf.push((((count >> 24) & 0x3F) | 0xC0) as u8);
            self.buf.push(((count >> 16) & 0xFF) as u8);
            self.buf.push(((count >> 8) & 0xFF) as u8);
            self.buf.push((count & 0xFF) as u8);
        } else {
            return Err(KeywardError::Encoding(format!(
                "count {} exceeds maximum {}",
                count, MAX_COUNT
            )));
        }
        Ok(())
    }

    /// Write a count-prefixed byte string.
    pub fn write_data(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_count(bytes.len())?;
        self.write_raw(bytes);
        Ok(())
    }

    /// Write a count-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_data(value.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::count_width;

    fn encode_count(count: usize) -> Vec<u8> {
        let mut writer = DataWriter::new();
        writer.write_count(count).expect("count should encode");
        writer.into_bytes()
    }

    #[test]
    fn test_count_widths_follow_bands() {
        for (count, width) in [
            (0usize, 1usize),
            (127, 1),
            (128, 2),
            (16383, 2),
            (16384, 4),
            (0x3FFF_FFFF, 4),
        ] {
            let encoded = encode_count(count);
            assert_eq!(encoded.len(), width, "width for {}", count);
            assert_eq!(count_width(count), Some(width));
        }
    }

    #[test]
    fn test_count_exact_bytes() {
        assert_eq!(encode_count(0x7F), vec![0x7F]);
        assert_eq!(encode_count(0x80), vec![0x80, 0x80]);
        assert_eq!(encode_count(0x3FFF), vec![0xBF, 0xFF]);
        assert_eq!(encode_count(0x4000), vec![0xC0, 0x00, 0x40, 0x00]);
        assert_eq!(encode_count(0x3FFF_FFFF), vec![0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_count_above_maximum_fails() {
        let mut writer = DataWriter::new();
        let result = writer.write_count(0x4000_0000);
        assert!(matches!(result, Err(KeywardError::Encoding(_))));
        assert!(writer.is_empty(), "failed write must not emit bytes");
        assert_eq!(count_width(0x4000_0000), None);
    }

    #[test]
    fn test_write_data_prefixes_length() {
        let mut writer = DataWriter::new();
        writer.write_data(b"abc").unwrap();
        writer.write_string("\u{e9}").unwrap();
        assert_eq!(writer.as_bytes(), &[3, b'a', b'b', b'c', 2, 0xC3, 0xA9]);
    }

    #[test]
    fn test_reset_clears_buffer() {
        let mut writer = DataWriter::with_capacity(8);
        writer.write_byte(1);
        writer.reset();
        assert_eq!(writer.len(), 0);
    }
}
