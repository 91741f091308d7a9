use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;

use crate::reply::Reply;

/// The typed result handed to a command's callback.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A null bulk or a null array.
    Nil,
    Bool(bool),
    Int(i64),
    Text(String),
    /// A bulk value that is not valid UTF-8, or any bulk value of a command sent with
    /// [`Cmd::expect_binary`](crate::command::Cmd::expect_binary).
    Data(Bytes),
    /// An error element nested in an array reply.
    Error(String),
    Array(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    /// Strips the wire structure off a reply.
    ///
    /// The `OK` status becomes `true`, other statuses become text. Arrays are unwrapped
    /// recursively.
    pub fn from_reply(reply: Reply, binary: bool) -> Value {
        match reply {
            Reply::Status(s) if s == "OK" => Value::Bool(true),
            Reply::Status(s) => Value::Text(s),
            Reply::Error(message) => Value::Error(String::from_utf8_lossy(&message).into_owned()),
            Reply::Integer(i) => Value::Int(i),
            Reply::Bulk(None) | Reply::Array(None) => Value::Nil,
            Reply::Bulk(Some(bytes)) if binary => Value::Data(bytes),
            Reply::Bulk(Some(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(s) => Value::Text(s),
                Err(_) => Value::Data(bytes),
            },
            Reply::Array(Some(items)) => Value::Array(
                items
                    .into_iter()
                    .map(|item| Value::from_reply(item, binary))
                    .collect(),
            ),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Text(s) => Some(s.as_bytes()),
            Value::Data(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// The value as a map key: text as is, anything else through its display form.
    pub(crate) fn into_key(self) -> String {
        match self {
            Value::Text(s) => s,
            Value::Data(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            value => value.to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "(nil)"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Text(s) => write!(f, "{}", s),
            Value::Data(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            Value::Error(message) => write!(f, "(error) {}", message),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                // Sorted so the output is stable.
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));

                write!(f, "{{")?;
                for (i, (key, value)) in entries.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_status_is_true() {
        assert_eq!(
            Value::from_reply(Reply::Status("OK".to_string()), false),
            Value::Bool(true)
        );
        assert_eq!(
            Value::from_reply(Reply::Status("PONG".to_string()), false),
            Value::Text("PONG".to_string())
        );
    }

    #[test]
    fn nulls_become_nil() {
        assert!(Value::from_reply(Reply::Bulk(None), false).is_nil());
        assert!(Value::from_reply(Reply::Array(None), false).is_nil());
        assert_eq!(
            Value::from_reply(Reply::Bulk(Some(Bytes::new())), false),
            Value::Text(String::new())
        );
    }

    #[test]
    fn bulk_is_text_unless_binary() {
        let bulk = Reply::Bulk(Some(Bytes::from("hello")));

        assert_eq!(
            Value::from_reply(bulk.clone(), false),
            Value::Text("hello".to_string())
        );
        assert_eq!(
            Value::from_reply(bulk, true),
            Value::Data(Bytes::from("hello"))
        );
    }

    #[test]
    fn invalid_utf8_bulk_stays_raw() {
        let raw = Bytes::from_static(&[0xff, 0xfe]);

        assert_eq!(
            Value::from_reply(Reply::Bulk(Some(raw.clone())), false),
            Value::Data(raw)
        );
    }

    #[test]
    fn arrays_are_unwrapped_recursively() {
        let reply = Reply::Array(Some(vec![
            Reply::Integer(1),
            Reply::Array(Some(vec![Reply::Bulk(Some(Bytes::from("a"))), Reply::Bulk(None)])),
            Reply::Error(Bytes::from("ERR nested")),
        ]));

        assert_eq!(
            Value::from_reply(reply, false),
            Value::Array(vec![
                Value::Int(1),
                Value::Array(vec![Value::from("a"), Value::Nil]),
                Value::Error("ERR nested".to_string()),
            ])
        );
    }

    #[test]
    fn display_map_sorted_by_key() {
        let map = Value::Map(HashMap::from([
            ("b".to_string(), Value::Int(2)),
            ("a".to_string(), Value::from("x")),
        ]));

        assert_eq!(map.to_string(), "{a: x, b: 2}");
    }
}
