/// Cursor over a compact binary payload.
///
/// Every read returns `None` when the remaining input is too short, leaving the
/// caller to report a data error. Reads never panic on malformed input.
#[derive(Debug, Clone)]
pub struct DataReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> DataReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Rewind to the beginning of the payload.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    pub fn remaining_size(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn current_offset(&self) -> usize {
        self.offset
    }

    pub fn can_read_size(&self, size: usize) -> bool {
        self.remaining_size() >= size
    }

    /// Advance the cursor. Returns `false` (without moving) if not enough bytes remain.
    pub fn skip_bytes(&mut self, size: usize) -> bool {
        if !self.can_read_size(size) {
            return false;
        }
        self.offset += size;
        true
    }

    pub fn read_byte(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.offset)?;
        self.offset += 1;
        Some(byte)
    }

    /// Read `size` bytes with no length prefix.
    pub fn read_raw(&mut self, size: usize) -> Option<&'a [u8]> {
        if !self.can_read_size(size) {
            return None;
        }
        let slice = &self.data[self.offset..self.offset + size];
        self.offset += size;
        Some(slice)
    }

    /// Read a variable-width count.
    pub fn read_count(&mut self) -> Option<usize> {
        let first = self.read_byte()?;
        match first & 0xC0 {
            0x00 | 0x40 => Some((first & 0x7F) as usize),
            0x80 => {
                let second = self.read_byte()?;
                Some((((first & 0x3F) as usize) << 8) | second as usize)
            }
            _ => {
                let rest = self.read_raw(3)?;
                Some(
                    (((first & 0x3F) as usize) << 24)
                        | ((rest[0] as usize) << 16)
                        | ((rest[1] as usize) << 8)
                        | rest[2] as usize,
                )
            }
        }
    }

    /// Read a count-prefixed byte string.
    ///
    /// When `expected_size` is non-zero the encoded length must match it exactly.
    pub fn read_data(&mut self, expected_size: usize) -> Option<&'a [u8]> {
        let size = self.read_count()?;
        if expected_size > 0 && size != expected_size {
            return None;
        }
        self.read_raw(size)
    }

    /// Read a count-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Option<&'a str> {
        let bytes = self.read_data(0)?;
        std::str::from_utf8(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DataWriter;

    #[test]
    fn test_count_bands_decode() {
        for count in [0usize, 127, 128, 16383, 16384, 0x3FFF_FFFF] {
            let mut writer = DataWriter::new();
            writer.write_count(count).unwrap();
            let bytes = writer.into_bytes();
            let mut reader = DataReader::new(&bytes);
            assert_eq!(reader.read_count(), Some(count));
            assert_eq!(reader.remaining_size(), 0);
        }
    }

    #[test]
    fn test_single_byte_prefix_01_is_literal() {
        let mut reader = DataReader::new(&[0x5A]);
        assert_eq!(reader.read_count(), Some(0x5A));
    }

    #[test]
    fn test_truncated_counts_return_none() {
        assert_eq!(DataReader::new(&[]).read_count(), None);
        assert_eq!(DataReader::new(&[0x81]).read_count(), None);
        assert_eq!(DataReader::new(&[0xC0, 0x01, 0x02]).read_count(), None);
    }

    #[test]
    fn test_read_data_checks_expected_size() {
        let bytes = [3u8, 1, 2, 3];
        assert_eq!(DataReader::new(&bytes).read_data(3), Some(&[1u8, 2, 3][..]));
        assert_eq!(DataReader::new(&bytes).read_data(0), Some(&[1u8, 2, 3][..]));
        assert_eq!(DataReader::new(&bytes).read_data(4), None);
    }

    #[test]
    fn test_read_data_truncated_payload() {
        let bytes = [5u8, 1, 2];
        let mut reader = DataReader::new(&bytes);
        assert_eq!(reader.read_data(0), None);
    }

    #[test]
    fn test_read_string_rejects_invalid_utf8() {
        let bytes = [2u8, 0xFF, 0xFE];
        assert_eq!(DataReader::new(&bytes).read_string(), None);

        let bytes = [2u8, b'o', b'k'];
        assert_eq!(DataReader::new(&bytes).read_string(), Some("ok"));
    }

    #[test]
    fn test_cursor_operations() {
        let bytes = [1u8, 2, 3, 4];
        let mut reader = DataReader::new(&bytes);
        assert!(reader.can_read_size(4));
        assert!(!reader.can_read_size(5));
        assert!(reader.skip_bytes(2));
        assert_eq!(reader.current_offset(), 2);
        assert!(!reader.skip_bytes(3));
        assert_eq!(reader.current_offset(), 2);
        assert_eq!(reader.read_raw(2), Some(&[3u8, 4][..]));
        assert_eq!(reader.read_byte(), None);
        reader.reset();
        assert_eq!(reader.read_byte(), Some(1));
    }
}
