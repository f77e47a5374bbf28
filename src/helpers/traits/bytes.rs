pub trait SplitBytes {
    /// Position of the first occurrence of `needle`.
    fn find_bytes(&self, needle: &[u8]) -> Option<usize>;
    /// Position of the first occurrence of `needle` at or after `start`.
    fn find_bytes_from(&self, needle: &[u8], start: usize) -> Option<usize>;
    /// Splits at the first `\r\n\r\n`, dropping the terminator itself.
    fn split_header_body(&self) -> Option<(&[u8], &[u8])>;
}

impl SplitBytes for [u8] {
    fn find_bytes(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        if needle.len() > self.len() {
            return None;
        }

        let first = needle[0];
        let last_start = self.len() - needle.len();
        let mut i = 0;
        while i <= last_start {
            // jump to the next candidate first byte
            match self[i..=last_start].iter().position(|&b| b == first) {
                Some(offset) => i += offset,
                None => return None,
            }
            if &self[i..i + needle.len()] == needle {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    fn find_bytes_from(&self, needle: &[u8], start: usize) -> Option<usize> {
        if start > self.len() {
            return None;
        }
        self[start..].find_bytes(needle).map(|pos| pos + start)
    }

    fn split_header_body(&self) -> Option<(&[u8], &[u8])> {
        self.find_bytes(b"\r\n\r\n")
            .map(|pos| (&self[..pos], &self[pos + 4..]))
    }
}
