//! Line scanning helpers for a byte stream that arrives in arbitrary chunks.
//!
//! Every reply starts with a line terminated by CRLF, and bulk payloads are followed by one. Either
//! may be split by a chunk boundary anywhere, including between the CR and the LF, so both helpers
//! keep the "seen CR" flag as explicit state and resume from it on the next call.

use bytes::BytesMut;

use crate::decoder::DecodeError;

pub(crate) const CR: u8 = b'\r';
pub(crate) const LF: u8 = b'\n';
pub(crate) static CRLF: &[u8; 2] = b"\r\n";

/// Longest first line accepted, terminator excluded. Status and error lines are the only ones of
/// any size.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Accumulates the content of a single line across calls.
///
/// The buffer is owned by the decoder of one connection and reused for every line it reads.
#[derive(Debug, Default)]
pub struct Line {
    buffer: BytesMut,
    seen_cr: bool,
}

impl Line {
    pub fn with_capacity(capacity: usize) -> Line {
        Line {
            buffer: BytesMut::with_capacity(capacity),
            seen_cr: false,
        }
    }

    /// Consumes bytes of `src` starting at `pos` until the line terminator has been seen.
    ///
    /// Returns the position of the first unconsumed byte and whether the line is complete. When it
    /// is, the content (without the terminator) is available through [`Line::contents`] until the
    /// next [`Line::reset`].
    pub fn advance(&mut self, src: &[u8], pos: usize) -> Result<(usize, bool), DecodeError> {
        let mut pos = pos;

        if !self.seen_cr {
            match src[pos..].iter().position(|&byte| byte == CR) {
                Some(offset) => {
                    self.append(&src[pos..pos + offset])?;
                    self.seen_cr = true;
                    pos += offset + 1;
                }
                None => {
                    self.append(&src[pos..])?;
                    return Ok((src.len(), false));
                }
            }
        }

        match src.get(pos) {
            None => Ok((pos, false)),
            Some(&LF) => Ok((pos + 1, true)),
            Some(&byte) => Err(DecodeError::MissingTerminator(byte)),
        }
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let length = self.buffer.len() + bytes.len();
        if length > MAX_LINE_LENGTH {
            return Err(DecodeError::LineTooLong(length));
        }

        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.seen_cr = false;
    }
}

/// Matches the CRLF that closes a bulk payload.
///
/// Unlike [`Line`] nothing may precede the terminator: the payload length is known up front.
#[derive(Debug, Default)]
pub struct Terminator {
    seen_cr: bool,
}

impl Terminator {
    pub fn advance(&mut self, src: &[u8], pos: usize) -> Result<(usize, bool), DecodeError> {
        let mut pos = pos;

        if !self.seen_cr {
            match src.get(pos) {
                None => return Ok((pos, false)),
                Some(&CR) => {
                    self.seen_cr = true;
                    pos += 1;
                }
                Some(&byte) => return Err(DecodeError::MissingTerminator(byte)),
            }
        }

        match src.get(pos) {
            None => Ok((pos, false)),
            Some(&LF) => {
                self.seen_cr = false;
                Ok((pos + 1, true))
            }
            Some(&byte) => Err(DecodeError::MissingTerminator(byte)),
        }
    }

    pub fn reset(&mut self) {
        self.seen_cr = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_in_a_single_chunk() {
        let mut line = Line::default();

        let (pos, done) = line.advance(b"OK\r\n:1\r\n", 0).unwrap();

        assert!(done);
        assert_eq!(pos, 4);
        assert_eq!(line.contents(), b"OK");
    }

    #[test]
    fn line_split_between_cr_and_lf() {
        let mut line = Line::default();

        let (pos, done) = line.advance(b"hel", 0).unwrap();
        assert_eq!((pos, done), (3, false));

        let (pos, done) = line.advance(b"lo\r", 0).unwrap();
        assert_eq!((pos, done), (3, false));

        let (pos, done) = line.advance(b"\nrest", 0).unwrap();
        assert_eq!((pos, done), (1, true));
        assert_eq!(line.contents(), b"hello");
    }

    #[test]
    fn line_reset_reuses_the_buffer() {
        let mut line = Line::with_capacity(16);

        line.advance(b"first\r\n", 0).unwrap();
        line.reset();
        let (_, done) = line.advance(b"second\r\n", 0).unwrap();

        assert!(done);
        assert_eq!(line.contents(), b"second");
    }

    #[test]
    fn line_rejects_cr_without_lf() {
        let mut line = Line::default();

        let result = line.advance(b"bad\rx", 0);

        assert!(matches!(result, Err(DecodeError::MissingTerminator(b'x'))));
    }

    #[test]
    fn line_without_terminator_is_bounded() {
        let mut line = Line::default();
        let chunk = vec![b'x'; 64 * 1024];

        let mut result = Ok((0, false));
        for _ in 0..MAX_LINE_LENGTH / chunk.len() {
            result = line.advance(&chunk, 0);
        }
        assert_eq!(result, Ok((chunk.len(), false)));

        let result = line.advance(b"x", 0);

        assert_eq!(result, Err(DecodeError::LineTooLong(MAX_LINE_LENGTH + 1)));
    }

    #[test]
    fn terminator_across_chunks() {
        let mut terminator = Terminator::default();

        assert_eq!(terminator.advance(b"\r", 0).unwrap(), (1, false));
        assert_eq!(terminator.advance(b"\n+OK", 0).unwrap(), (1, true));
    }

    #[test]
    fn terminator_rejects_payload_overrun() {
        let mut terminator = Terminator::default();

        let result = terminator.advance(b"xy\r\n", 0);

        assert!(matches!(result, Err(DecodeError::MissingTerminator(b'x'))));
    }
}
