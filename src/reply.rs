// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::Bytes;

use crate::decoder::DecodeError;
use crate::line::CRLF;

/// A decoded server reply.
///
/// The decoder only ever produces these five generic shapes. Interpreting a reply for a particular
/// command (booleans, maps, score pairs) happens later, in [`crate::typecast`].
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// `-<message>`, kept as raw bytes.
    Error(Bytes),
    /// `+<line>`
    Status(String),
    /// `:<integer>`
    Integer(i64),
    /// `$<length>\r\n<payload>\r\n`, `None` for length `-1`.
    Bulk(Option<Bytes>),
    /// `*<count>\r\n<element-1>...<element-n>`, `None` for count `-1`.
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn kind(&self) -> ReplyKind {
        match self {
            Reply::Error(_) => ReplyKind::Error,
            Reply::Status(_) => ReplyKind::Status,
            Reply::Integer(_) => ReplyKind::Integer,
            Reply::Bulk(_) => ReplyKind::Bulk,
            Reply::Array(_) => ReplyKind::Array,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// The textual payload of a status or non-null bulk reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Status(s) => Some(s.as_bytes()),
            Reply::Bulk(Some(bytes)) => Some(bytes),
            _ => None,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.serialize_into(&mut bytes);
        bytes
    }

    fn serialize_into(&self, bytes: &mut Vec<u8>) {
        match self {
            Reply::Error(message) => {
                bytes.push(u8::from(ReplyKind::Error));
                bytes.extend_from_slice(message);
                bytes.extend_from_slice(CRLF);
            }
            Reply::Status(s) => {
                bytes.push(u8::from(ReplyKind::Status));
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
            }
            Reply::Integer(i) => {
                bytes.push(u8::from(ReplyKind::Integer));
                bytes.extend_from_slice(i.to_string().as_bytes());
                bytes.extend_from_slice(CRLF);
            }
            Reply::Bulk(None) => {
                bytes.push(u8::from(ReplyKind::Bulk));
                bytes.extend_from_slice(b"-1");
                bytes.extend_from_slice(CRLF);
            }
            Reply::Bulk(Some(data)) => {
                bytes.push(u8::from(ReplyKind::Bulk));
                bytes.extend_from_slice(data.len().to_string().as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes.extend_from_slice(data);
                bytes.extend_from_slice(CRLF);
            }
            Reply::Array(None) => {
                bytes.push(u8::from(ReplyKind::Array));
                bytes.extend_from_slice(b"-1");
                bytes.extend_from_slice(CRLF);
            }
            Reply::Array(Some(items)) => {
                bytes.push(u8::from(ReplyKind::Array));
                bytes.extend_from_slice(items.len().to_string().as_bytes());
                bytes.extend_from_slice(CRLF);
                for item in items {
                    item.serialize_into(bytes);
                }
            }
        }
    }
}

impl From<Reply> for Vec<u8> {
    fn from(reply: Reply) -> Self {
        reply.serialize()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Error(message) => write!(f, "-{}", String::from_utf8_lossy(message)),
            Reply::Status(s) => write!(f, "+{}", s),
            Reply::Integer(i) => write!(f, ":{}", i),
            Reply::Bulk(Some(bytes)) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Reply::Bulk(None) => write!(f, "$-1"),
            Reply::Array(None) => write!(f, "*-1"),
            Reply::Array(Some(items)) => {
                write!(f, "*{}", items.len())?;
                for item in items {
                    write!(f, " {}", item)?;
                }
                Ok(())
            }
        }
    }
}

/// The first byte of every reply identifies its type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ReplyKind {
    Error,   // '-'
    Status,  // '+'
    Integer, // ':'
    Bulk,    // '$'
    Array,   // '*'
}

impl TryFrom<u8> for ReplyKind {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            b'-' => Ok(ReplyKind::Error),
            b'+' => Ok(ReplyKind::Status),
            b':' => Ok(ReplyKind::Integer),
            b'$' => Ok(ReplyKind::Bulk),
            b'*' => Ok(ReplyKind::Array),
            _ => Err(DecodeError::InvalidDataType(byte)),
        }
    }
}

impl From<ReplyKind> for u8 {
    fn from(kind: ReplyKind) -> Self {
        match kind {
            ReplyKind::Error => b'-',
            ReplyKind::Status => b'+',
            ReplyKind::Integer => b':',
            ReplyKind::Bulk => b'$',
            ReplyKind::Array => b'*',
        }
    }
}
