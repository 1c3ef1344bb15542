//! Newline framing for the sticker protocol.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Initial receive buffer capacity.
const BUFFER_SIZE: usize = 1024;

/// Longest line accepted unless configured otherwise.
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

/// Received bytes that cannot be framed into text messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// The input is not valid UTF-8.
    InvalidUtf8 {
        /// Raw bytes of the line holding the bad sequence, without the newline.
        line: Vec<u8>,
        source: std::str::Utf8Error,
    },
    /// A line (complete or still buffered) exceeds the limit.
    LineTooLong { len: usize, max: usize },
}

impl std::fmt::Display for FramingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramingError::InvalidUtf8 { line, source } => {
                write!(f, "Invalid UTF-8 in {}-byte line: {}", line.len(), source)
            }
            FramingError::LineTooLong { len, max } => {
                write!(f, "Line of {} bytes exceeds limit of {}", len, max)
            }
        }
    }
}

impl std::error::Error for FramingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FramingError::InvalidUtf8 { source, .. } => Some(source),
            FramingError::LineTooLong { .. } => None,
        }
    }
}

/// Splits a byte stream into trimmed, newline-terminated text messages.
///
/// Every read is checked with [`LineFramer::check`] before any of its lines
/// is handed out, so undecodable input fails the whole read. An incomplete
/// multi-byte character at the end of a read is not an error; it is checked
/// again once the rest arrives. Whatever follows the last `\n` stays buffered
/// until a later read terminates it.
#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
    /// Length of the buffer prefix already known to be valid UTF-8.
    validated: usize,
    max_line: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            validated: 0,
            max_line,
        }
    }

    /// Read once from `reader` into the receive buffer.
    ///
    /// Returns the number of bytes read; `0` means the peer closed the
    /// stream. Call [`LineFramer::check`] before draining messages.
    pub async fn fill<R>(&mut self, reader: &mut R) -> std::io::Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        self.buffer.reserve(BUFFER_SIZE);
        reader.read_buf(&mut self.buffer).await
    }

    /// Validate bytes appended since the last check.
    pub fn check(&mut self) -> Result<(), FramingError> {
        match std::str::from_utf8(&self.buffer[self.validated..]) {
            Ok(_) => self.validated = self.buffer.len(),
            Err(e) => match e.error_len() {
                // Truncated character at the end of the buffer.
                None => self.validated += e.valid_up_to(),
                Some(_) => {
                    let at = self.validated + e.valid_up_to();
                    return Err(FramingError::InvalidUtf8 {
                        line: self.line_around(at),
                        source: e,
                    });
                }
            },
        }

        let longest = self.buffer[..]
            .split(|&b| b == b'\n')
            .map(<[u8]>::len)
            .max()
            .unwrap_or(0);
        if longest > self.max_line {
            return Err(FramingError::LineTooLong {
                len: longest,
                max: self.max_line,
            });
        }
        Ok(())
    }

    /// Bytes of the unterminated trailing fragment (if any).
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Remove and decode the first complete line, if there is one.
    pub fn next_message(&mut self) -> Option<Result<String, FramingError>> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let line = self.buffer.split_to(pos);
        self.buffer.advance(1);
        self.validated = self.validated.saturating_sub(pos + 1);

        Some(match std::str::from_utf8(&line) {
            Ok(text) => Ok(text.trim().to_string()),
            Err(source) => Err(FramingError::InvalidUtf8 {
                line: line.to_vec(),
                source,
            }),
        })
    }

    fn line_around(&self, at: usize) -> Vec<u8> {
        let start = self.buffer[..at]
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |p| p + 1);
        let end = self.buffer[at..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(self.buffer.len(), |p| at + p);
        self.buffer[start..end].to_vec()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl LineFramer {
    /// Append raw bytes as if they had been read, then check them.
    pub fn extend(&mut self, chunk: &[u8]) -> Result<(), FramingError> {
        self.buffer.extend_from_slice(chunk);
        self.check()
    }

    /// Iterate over the complete lines currently buffered.
    pub fn messages(&mut self) -> impl Iterator<Item = Result<String, FramingError>> + '_ {
        std::iter::from_fn(move || self.next_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(framer: &mut LineFramer) -> Vec<String> {
        framer.messages().map(|m| m.unwrap()).collect()
    }

    #[test]
    fn test_single_chunk() {
        let mut framer = LineFramer::new();
        framer.extend(b"A\nB\nC\n").unwrap();
        assert_eq!(drain(&mut framer), ["A", "B", "C"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_any_chunking_yields_same_lines() {
        let input = b"A\nB\nC\n";

        // Every way of cutting the input into two or three pieces.
        for i in 0..=input.len() {
            for j in i..=input.len() {
                let mut framer = LineFramer::new();
                let mut lines = Vec::new();
                for chunk in [&input[..i], &input[i..j], &input[j..]] {
                    framer.extend(chunk).unwrap();
                    lines.extend(drain(&mut framer));
                }
                assert_eq!(lines, ["A", "B", "C"], "split at {i}/{j}");
            }
        }

        let mut framer = LineFramer::new();
        let mut lines = Vec::new();
        for byte in input {
            framer.extend(std::slice::from_ref(byte)).unwrap();
            lines.extend(drain(&mut framer));
        }
        assert_eq!(lines, ["A", "B", "C"]);
    }

    #[test]
    fn test_trailing_fragment_retained() {
        let mut framer = LineFramer::new();
        framer.extend(b"foo\nbar").unwrap();
        assert_eq!(drain(&mut framer), ["foo"]);
        assert_eq!(framer.pending(), 3);

        framer.extend(b"\n").unwrap();
        assert_eq!(drain(&mut framer), ["bar"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_no_newline_yields_nothing() {
        let mut framer = LineFramer::new();
        framer.extend(b"deliver a new").unwrap();
        assert!(framer.next_message().is_none());
        assert_eq!(framer.pending(), 13);
    }

    #[test]
    fn test_whitespace_trimmed() {
        let mut framer = LineFramer::new();
        framer
            .extend(b"  deliver a new sticker  \n\twait until next sticker\r\n\n")
            .unwrap();
        assert_eq!(
            drain(&mut framer),
            ["deliver a new sticker", "wait until next sticker", ""]
        );
    }

    #[test]
    fn test_split_multibyte_character() {
        let mut framer = LineFramer::new();
        let text = "sticker \u{1F600}\n".as_bytes();
        framer.extend(&text[..10]).unwrap();
        assert!(framer.next_message().is_none());
        framer.extend(&text[10..]).unwrap();
        assert_eq!(drain(&mut framer), ["sticker \u{1F600}"]);
    }

    #[test]
    fn test_invalid_utf8_rejects_whole_chunk() {
        let mut framer = LineFramer::new();
        match framer.extend(b"ok\n\xff\xfe\nlater\n") {
            Err(FramingError::InvalidUtf8 { line, .. }) => assert_eq!(line, b"\xff\xfe"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8_in_fragment() {
        let mut framer = LineFramer::new();
        framer.extend(b"ok\n").unwrap();
        match framer.extend(b"ab\xffcd") {
            Err(FramingError::InvalidUtf8 { line, .. }) => assert_eq!(line, b"ab\xffcd"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_validation_tracks_drained_lines() {
        let mut framer = LineFramer::new();
        let snowman = "\u{2603}".as_bytes();
        framer.extend(b"one\n").unwrap();
        framer.extend(&snowman[..1]).unwrap();
        assert_eq!(drain(&mut framer), ["one"]);
        framer.extend(&snowman[1..]).unwrap();
        framer.extend(b"\n").unwrap();
        assert_eq!(drain(&mut framer), ["\u{2603}"]);
    }

    #[test]
    fn test_line_too_long() {
        let mut framer = LineFramer::with_max_line(8);
        framer.extend(b"12345678\n1234").unwrap();
        assert_eq!(
            framer.extend(b"56789"),
            Err(FramingError::LineTooLong { len: 9, max: 8 })
        );

        let mut framer = LineFramer::with_max_line(4);
        assert_eq!(
            framer.extend(b"ok\ntoo long\n"),
            Err(FramingError::LineTooLong { len: 8, max: 4 })
        );
    }

    #[test]
    fn test_lazy_iteration_keeps_remaining_lines() {
        let mut framer = LineFramer::new();
        framer.extend(b"one\ntwo\n").unwrap();
        assert_eq!(framer.messages().next().unwrap().unwrap(), "one");
        assert_eq!(framer.pending(), 4);
        assert_eq!(drain(&mut framer), ["two"]);
    }

    #[tokio::test]
    async fn test_fill_reads_and_detects_eof() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"foo\nba")
            .read(b"r\n")
            .build();
        let mut framer = LineFramer::new();

        assert_eq!(framer.fill(&mut reader).await.unwrap(), 6);
        framer.check().unwrap();
        assert_eq!(drain(&mut framer), ["foo"]);
        assert_eq!(framer.fill(&mut reader).await.unwrap(), 2);
        framer.check().unwrap();
        assert_eq!(drain(&mut framer), ["bar"]);
        assert_eq!(framer.fill(&mut reader).await.unwrap(), 0);
    }
}
