use std::str::{self, Utf8Error};

use bytes::{Bytes, BytesMut};
use thiserror::Error as ThisError;

use crate::line::{Line, Terminator};
use crate::reply::{Reply, ReplyKind};

/// Bulk payloads larger than this are rejected, same as the server's default `proto-max-bulk-len`.
pub const MAX_BULK_LENGTH: i64 = 512 * 1024 * 1024;

// Upper bound for up-front allocations driven by length prefixes read off the wire.
const MAX_PREALLOCATION: usize = 64 * 1024;

#[derive(Debug, ThisError, PartialEq)]
pub enum DecodeError {
    #[error("protocol error; invalid reply type byte {0:#04x}")]
    InvalidDataType(u8),
    #[error("protocol error; expected CRLF, got byte {0:#04x}")]
    MissingTerminator(u8),
    #[error("protocol error; invalid integer {0:?}")]
    InvalidInteger(String),
    #[error("protocol error; bulk length {0} exceeds the limit")]
    BulkTooLarge(i64),
    #[error("protocol error; line of {0} bytes exceeds the limit")]
    LineTooLong(usize),
    #[error("protocol error; invalid UTF-8 in status line")]
    InvalidUtf8(#[from] Utf8Error),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    /// Waiting for the type byte of the next reply.
    Tag,
    /// Reading the first line of a reply.
    FirstLine(ReplyKind),
    /// Reading the payload of a bulk reply.
    Payload { remaining: usize },
    /// The payload is complete, its trailing CRLF is not.
    PayloadEnd,
}

/// An array whose elements are still being decoded.
#[derive(Debug)]
struct PartialArray {
    expected: usize,
    items: Vec<Reply>,
}

/// Incremental reply decoder.
///
/// Chunks are fed as they come off the transport; a chunk boundary may fall anywhere, including in
/// the middle of a type byte's line, a length prefix, a CRLF or a bulk payload. Whatever has been
/// read of the reply in progress is kept here until the next chunk completes it. Array elements
/// are decoded strictly in order; the stack holds one entry per level of nesting.
#[derive(Debug)]
pub struct ReplyDecoder {
    state: State,
    line: Line,
    payload: BytesMut,
    terminator: Terminator,
    arrays: Vec<PartialArray>,
}

impl ReplyDecoder {
    pub fn new() -> ReplyDecoder {
        ReplyDecoder {
            state: State::Tag,
            line: Line::with_capacity(64),
            payload: BytesMut::new(),
            terminator: Terminator::default(),
            arrays: Vec::new(),
        }
    }

    /// Decodes as many replies as `chunk` completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Reply>, DecodeError> {
        let mut completed = Vec::new();
        self.feed_into(chunk, &mut completed)?;
        Ok(completed)
    }

    /// Like [`ReplyDecoder::feed`], appending completed replies to `completed`.
    ///
    /// After an error the decoder is out of sync with the stream and must be [`reset`] before it
    /// is used for another connection.
    ///
    /// [`reset`]: ReplyDecoder::reset
    pub fn feed_into(
        &mut self,
        chunk: &[u8],
        completed: &mut Vec<Reply>,
    ) -> Result<(), DecodeError> {
        let mut pos = 0;

        while pos < chunk.len() {
            match self.state {
                State::Tag => {
                    let kind = ReplyKind::try_from(chunk[pos])?;
                    pos += 1;
                    self.state = State::FirstLine(kind);
                }
                State::FirstLine(kind) => {
                    let (next, done) = self.line.advance(chunk, pos)?;
                    pos = next;
                    if done {
                        self.interpret_first_line(kind, completed)?;
                    }
                }
                State::Payload { remaining } => {
                    let available = remaining.min(chunk.len() - pos);
                    self.payload.extend_from_slice(&chunk[pos..pos + available]);
                    pos += available;
                    self.state = match remaining - available {
                        0 => State::PayloadEnd,
                        remaining => State::Payload { remaining },
                    };
                }
                State::PayloadEnd => {
                    let (next, done) = self.terminator.advance(chunk, pos)?;
                    pos = next;
                    if done {
                        let data = self.payload.split().freeze();
                        self.state = State::Tag;
                        self.complete(Reply::Bulk(Some(data)), completed);
                    }
                }
            }
        }

        Ok(())
    }

    /// Whether no reply is partially decoded.
    pub fn is_idle(&self) -> bool {
        self.state == State::Tag && self.arrays.is_empty()
    }

    /// Drops any partially decoded reply.
    pub fn reset(&mut self) {
        self.state = State::Tag;
        self.line.reset();
        self.payload.clear();
        self.terminator.reset();
        self.arrays.clear();
    }

    fn interpret_first_line(
        &mut self,
        kind: ReplyKind,
        completed: &mut Vec<Reply>,
    ) -> Result<(), DecodeError> {
        let content = self.line.contents();

        let reply = match kind {
            ReplyKind::Error => Some(Reply::Error(Bytes::copy_from_slice(content))),
            ReplyKind::Status => Some(Reply::Status(str::from_utf8(content)?.to_string())),
            ReplyKind::Integer => Some(Reply::Integer(parse_integer(content)?)),
            // $<length>\r\n<data>\r\n
            ReplyKind::Bulk => match parse_integer(content)? {
                length if length < 0 => Some(Reply::Bulk(None)),
                length if length > MAX_BULK_LENGTH => {
                    return Err(DecodeError::BulkTooLarge(length));
                }
                // An empty payload still carries its own CRLF.
                0 => {
                    self.state = State::PayloadEnd;
                    None
                }
                length => {
                    let length = length as usize;
                    self.payload.reserve(length.min(MAX_PREALLOCATION));
                    self.state = State::Payload { remaining: length };
                    None
                }
            },
            // *<number-of-elements>\r\n<element-1>...<element-n>
            ReplyKind::Array => match parse_integer(content)? {
                count if count < 0 => Some(Reply::Array(None)),
                0 => Some(Reply::Array(Some(Vec::new()))),
                count => {
                    let expected = count as usize;
                    self.arrays.push(PartialArray {
                        expected,
                        items: Vec::with_capacity(expected.min(MAX_PREALLOCATION)),
                    });
                    self.state = State::Tag;
                    None
                }
            },
        };

        self.line.reset();

        if let Some(reply) = reply {
            self.state = State::Tag;
            self.complete(reply, completed);
        }

        Ok(())
    }

    /// Hands a finished reply to the innermost open array, closing every array it completes.
    fn complete(&mut self, mut reply: Reply, completed: &mut Vec<Reply>) {
        while let Some(array) = self.arrays.last_mut() {
            array.items.push(reply);
            if array.items.len() < array.expected {
                return;
            }

            let Some(array) = self.arrays.pop() else {
                return;
            };
            reply = Reply::Array(Some(array.items));
        }

        completed.push(reply);
    }
}

impl Default for ReplyDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_integer(content: &[u8]) -> Result<i64, DecodeError> {
    str::from_utf8(content)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| DecodeError::InvalidInteger(String::from_utf8_lossy(content).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::MAX_LINE_LENGTH;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn decode_one(data: &[u8]) -> Reply {
        let mut decoder = ReplyDecoder::new();
        let mut replies = decoder.feed(data).unwrap();
        assert_eq!(replies.len(), 1, "expected exactly one reply");
        assert!(decoder.is_idle());
        replies.remove(0)
    }

    fn decode_in_chunks(data: &[u8], splits: &[usize]) -> Vec<Reply> {
        let mut decoder = ReplyDecoder::new();
        let mut replies = Vec::new();
        let mut start = 0;
        for &end in splits.iter().chain(std::iter::once(&data.len())) {
            decoder.feed_into(&data[start..end], &mut replies).unwrap();
            start = end;
        }
        replies
    }

    #[test]
    fn parse_status_reply() {
        assert_eq!(decode_one(b"+OK\r\n"), Reply::Status("OK".to_string()));
    }

    #[test]
    fn parse_error_reply() {
        assert_eq!(
            decode_one(b"-ERR unknown command\r\n"),
            Reply::Error(Bytes::from("ERR unknown command"))
        );
    }

    #[test]
    fn parse_integer_replies() {
        assert_eq!(decode_one(b":1000\r\n"), Reply::Integer(1000));
        assert_eq!(decode_one(b":-1000\r\n"), Reply::Integer(-1000));
        assert_eq!(decode_one(b":0\r\n"), Reply::Integer(0));
        assert_eq!(decode_one(b":+1000\r\n"), Reply::Integer(1000));
    }

    #[test]
    fn parse_bulk_reply() {
        assert_eq!(
            decode_one(b"$6\r\nfoobar\r\n"),
            Reply::Bulk(Some(Bytes::from("foobar")))
        );
    }

    #[test]
    fn parse_bulk_reply_with_crlf_in_payload() {
        assert_eq!(
            decode_one(b"$4\r\na\r\nb\r\n"),
            Reply::Bulk(Some(Bytes::from("a\r\nb")))
        );
    }

    #[test]
    fn parse_null_bulk_is_not_empty() {
        assert_eq!(decode_one(b"$-1\r\n"), Reply::Bulk(None));
        assert_eq!(decode_one(b"$0\r\n\r\n"), Reply::Bulk(Some(Bytes::new())));
    }

    #[test]
    fn parse_null_array_is_not_empty() {
        assert_eq!(decode_one(b"*-1\r\n"), Reply::Array(None));
        assert_eq!(decode_one(b"*0\r\n"), Reply::Array(Some(vec![])));
    }

    #[test]
    fn parse_array_with_null_in_the_middle() {
        assert_eq!(
            decode_one(b"*3\r\n$5\r\nhello\r\n$-1\r\n$5\r\nworld\r\n"),
            Reply::Array(Some(vec![
                Reply::Bulk(Some(Bytes::from("hello"))),
                Reply::Bulk(None),
                Reply::Bulk(Some(Bytes::from("world"))),
            ]))
        );
    }

    #[test]
    fn parse_nested_arrays() {
        assert_eq!(
            decode_one(b"*2\r\n*3\r\n:1\r\n:2\r\n:3\r\n*2\r\n+Hello\r\n-World\r\n"),
            Reply::Array(Some(vec![
                Reply::Array(Some(vec![
                    Reply::Integer(1),
                    Reply::Integer(2),
                    Reply::Integer(3),
                ])),
                Reply::Array(Some(vec![
                    Reply::Status("Hello".to_string()),
                    Reply::Error(Bytes::from("World")),
                ])),
            ]))
        );
    }

    #[test]
    fn parse_deeply_nested_array_closing_several_levels_at_once() {
        assert_eq!(
            decode_one(b"*1\r\n*1\r\n*1\r\n:7\r\n"),
            Reply::Array(Some(vec![Reply::Array(Some(vec![Reply::Array(Some(
                vec![Reply::Integer(7)]
            ))]))]))
        );
    }

    #[test]
    fn several_replies_in_one_chunk() {
        let mut decoder = ReplyDecoder::new();

        let replies = decoder
            .feed(b"+OK\r\n:5\r\n$3\r\nabc\r\n*1\r\n:1\r\n-ERR x\r\n")
            .unwrap();

        assert_eq!(
            replies,
            vec![
                Reply::Status("OK".to_string()),
                Reply::Integer(5),
                Reply::Bulk(Some(Bytes::from("abc"))),
                Reply::Array(Some(vec![Reply::Integer(1)])),
                Reply::Error(Bytes::from("ERR x")),
            ]
        );
    }

    #[test]
    fn chunk_ending_mid_reply_keeps_partial_state() {
        let mut decoder = ReplyDecoder::new();

        let first = decoder.feed(b"+OK\r\n*2\r\n$3\r\nfo").unwrap();
        assert_eq!(first, vec![Reply::Status("OK".to_string())]);
        assert!(!decoder.is_idle());

        let second = decoder.feed(b"o\r\n:9\r").unwrap();
        assert!(second.is_empty());

        let third = decoder.feed(b"\n").unwrap();
        assert_eq!(
            third,
            vec![Reply::Array(Some(vec![
                Reply::Bulk(Some(Bytes::from("foo"))),
                Reply::Integer(9),
            ]))]
        );
        assert!(decoder.is_idle());
    }

    const FRAGMENTATION_SAMPLE: &[u8] = b"*4\r\n$5\r\nhello\r\n*2\r\n:-12\r\n$0\r\n\r\n$-1\r\n*-1\r\n+QUEUED\r\n-ERR wrong number of arguments\r\n$3\r\n\r\n\r\r\n";

    #[test]
    fn every_two_way_split_decodes_the_same() {
        let whole = decode_in_chunks(FRAGMENTATION_SAMPLE, &[]);
        assert_eq!(whole.len(), 4);

        for split in 1..FRAGMENTATION_SAMPLE.len() {
            assert_eq!(
                decode_in_chunks(FRAGMENTATION_SAMPLE, &[split]),
                whole,
                "split at byte {}",
                split
            );
        }
    }

    #[test]
    fn one_byte_at_a_time_decodes_the_same() {
        let whole = decode_in_chunks(FRAGMENTATION_SAMPLE, &[]);
        let splits: Vec<usize> = (1..FRAGMENTATION_SAMPLE.len()).collect();

        assert_eq!(decode_in_chunks(FRAGMENTATION_SAMPLE, &splits), whole);
    }

    #[test]
    fn random_splits_decode_the_same() {
        let whole = decode_in_chunks(FRAGMENTATION_SAMPLE, &[]);
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..500 {
            let cuts = rng.gen_range(1..8);
            let mut splits: Vec<usize> = (0..cuts)
                .map(|_| rng.gen_range(1..FRAGMENTATION_SAMPLE.len()))
                .collect();
            splits.sort_unstable();
            splits.dedup();

            assert_eq!(
                decode_in_chunks(FRAGMENTATION_SAMPLE, &splits),
                whole,
                "splits {:?}",
                splits
            );
        }
    }

    #[test]
    fn large_bulk_spanning_many_chunks() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut data = format!("${}\r\n", payload.len()).into_bytes();
        data.extend_from_slice(&payload);
        data.extend_from_slice(b"\r\n");

        let mut decoder = ReplyDecoder::new();
        let mut replies = Vec::new();
        for chunk in data.chunks(333) {
            decoder.feed_into(chunk, &mut replies).unwrap();
        }

        assert_eq!(replies, vec![Reply::Bulk(Some(Bytes::from(payload)))]);
    }

    #[test]
    fn invalid_type_byte_is_an_error() {
        let mut decoder = ReplyDecoder::new();

        let result = decoder.feed(b"?what\r\n");

        assert!(matches!(result, Err(DecodeError::InvalidDataType(b'?'))));
    }

    #[test]
    fn invalid_length_is_an_error() {
        let mut decoder = ReplyDecoder::new();

        let result = decoder.feed(b"$abc\r\n");

        assert!(matches!(result, Err(DecodeError::InvalidInteger(ref s)) if s == "abc"));
    }

    #[test]
    fn oversized_bulk_is_rejected() {
        let mut decoder = ReplyDecoder::new();

        let result = decoder.feed(b"$9999999999\r\n");

        assert!(matches!(result, Err(DecodeError::BulkTooLarge(9_999_999_999))));
    }

    #[test]
    fn unterminated_status_line_is_rejected() {
        let mut decoder = ReplyDecoder::new();
        let mut data = vec![b'+'];
        data.resize(MAX_LINE_LENGTH + 2, b'a');

        let result = decoder.feed(&data);

        assert!(matches!(result, Err(DecodeError::LineTooLong(_))));
    }

    #[test]
    fn payload_longer_than_declared_is_an_error() {
        let mut decoder = ReplyDecoder::new();

        let result = decoder.feed(b"$2\r\nabc\r\n");

        assert!(matches!(result, Err(DecodeError::MissingTerminator(b'c'))));
    }

    #[test]
    fn reset_discards_partial_reply() {
        let mut decoder = ReplyDecoder::new();
        decoder.feed(b"*2\r\n:1\r\n$5\r\nhel").unwrap();

        decoder.reset();

        assert!(decoder.is_idle());
        assert_eq!(decoder.feed(b":2\r\n").unwrap(), vec![Reply::Integer(2)]);
    }
}
