//! UTF-8-safe chunking of backend output.
//!
//! Backend reads land on arbitrary byte boundaries; chunks forwarded to
//! `out_chan` must never split a rune. The carry buffers an incomplete
//! trailing sequence until its continuation arrives and silently skips
//! bytes that can never form a valid rune.

/// Streaming UTF-8 re-chunker.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every complete, valid rune seen so far in
    /// input order. Invalid bytes are dropped, an incomplete tail is held.
    pub fn push(&mut self, input: &[u8]) -> Vec<u8> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(input);

        let mut out = Vec::with_capacity(buf.len());
        let mut offset = 0;
        while offset < buf.len() {
            match std::str::from_utf8(&buf[offset..]) {
                Ok(valid) => {
                    out.extend_from_slice(valid.as_bytes());
                    offset = buf.len();
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    out.extend_from_slice(&buf[offset..offset + valid_up_to]);
                    match err.error_len() {
                        Some(skip) => offset += valid_up_to + skip,
                        None => {
                            // Incomplete trailing sequence: keep for the next feed.
                            self.pending = buf[offset + valid_up_to..].to_vec();
                            return out;
                        }
                    }
                }
            }
        }
        out
    }

    /// Bytes currently held back waiting for a continuation.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.push(b"$ ls -la\r\n"), b"$ ls -la\r\n");
        assert!(carry.pending().is_empty());
    }

    #[test]
    fn multibyte_rune_split_across_reads() {
        let mut carry = Utf8Carry::new();
        let bytes = "终端".as_bytes(); // 6 bytes, 2 runes
        assert_eq!(carry.push(&bytes[..4]), "终".as_bytes());
        assert_eq!(carry.pending(), &bytes[3..4]);
        assert_eq!(carry.push(&bytes[4..]), "端".as_bytes());
        assert!(carry.pending().is_empty());
    }

    #[test]
    fn invalid_bytes_are_skipped() {
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.push(b"ok\xffmore"), b"okmore");
        // A lone continuation byte can never start a rune.
        assert_eq!(carry.push(b"\x80\x80x"), b"x");
    }

    #[test]
    fn truncated_tail_is_dropped_when_followed_by_ascii() {
        let mut carry = Utf8Carry::new();
        // 0xE7 opens a three-byte sequence; 'a' proves it will never finish.
        assert_eq!(carry.push(b"\xe7\xbb"), b"");
        assert_eq!(carry.push(b"a"), b"a");
        assert!(carry.pending().is_empty());
    }

    #[test]
    fn concatenation_is_loss_free_for_valid_input() {
        let mut carry = Utf8Carry::new();
        let text = "mixed ascii 终端 and ünïcode";
        let bytes = text.as_bytes();
        let mut collected = Vec::new();
        for chunk in bytes.chunks(3) {
            collected.extend_from_slice(&carry.push(chunk));
        }
        assert_eq!(collected, bytes);
    }
}
