// https://redis.io/docs/latest/develop/interact/pubsub/

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;

use crate::reply::Reply;

/// An asynchronous pub/sub delivery. It answers no command.
#[derive(Clone, Debug, PartialEq)]
pub enum PushMessage {
    /// `["message", channel, payload]`
    Message { channel: String, payload: Bytes },
    /// `["pmessage", pattern, channel, payload]`
    PMessage {
        pattern: String,
        channel: String,
        payload: Bytes,
    },
}

impl PushMessage {
    /// Classifies a completed reply.
    ///
    /// Must run before a reply is matched against the pending commands: a push message consumed
    /// as a command reply would shift every later pairing by one.
    pub fn classify(reply: &Reply) -> Option<PushMessage> {
        let items = match reply {
            Reply::Array(Some(items)) => items,
            _ => return None,
        };

        match (items.first()?.as_bytes()?, items.len()) {
            (b"message", 3) => Some(PushMessage::Message {
                channel: text(&items[1])?,
                payload: payload(&items[2])?,
            }),
            (b"pmessage", 4) => Some(PushMessage::PMessage {
                pattern: text(&items[1])?,
                channel: text(&items[2])?,
                payload: payload(&items[3])?,
            }),
            _ => None,
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            PushMessage::Message { channel, .. } => channel,
            PushMessage::PMessage { channel, .. } => channel,
        }
    }

    pub fn pattern(&self) -> Option<&str> {
        match self {
            PushMessage::Message { .. } => None,
            PushMessage::PMessage { pattern, .. } => Some(pattern),
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            PushMessage::Message { payload, .. } => payload,
            PushMessage::PMessage { payload, .. } => payload,
        }
    }

    /// The registry key of the subscription that produced this message.
    fn subscription(&self) -> &str {
        self.pattern().unwrap_or_else(|| self.channel())
    }
}

fn text(reply: &Reply) -> Option<String> {
    reply
        .as_bytes()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

fn payload(reply: &Reply) -> Option<Bytes> {
    match reply {
        Reply::Bulk(Some(bytes)) => Some(bytes.clone()),
        Reply::Status(s) => Some(Bytes::from(s.clone())),
        _ => None,
    }
}

pub type PushHandler = Box<dyn FnMut(&PushMessage) + Send>;

/// Whether a subscription name is a glob pattern.
pub fn is_pattern(name: &str) -> bool {
    name.contains(['*', '?', '['])
}

/// The subscription count carried by a subscribe or unsubscribe confirmation:
/// `["subscribe", channel, count]`.
pub(crate) fn remaining_subscriptions(reply: &Reply) -> Option<i64> {
    match reply {
        Reply::Array(Some(items)) if items.len() == 3 => match items[2] {
            Reply::Integer(count) => Some(count),
            _ => None,
        },
        _ => None,
    }
}

/// Handlers keyed by exact channel name or by pattern.
#[derive(Default)]
pub struct ChannelRegistry {
    handlers: HashMap<String, PushHandler>,
}

impl ChannelRegistry {
    pub fn new() -> ChannelRegistry {
        ChannelRegistry::default()
    }

    /// Registers `handler` for `name`. Returns `false`, leaving the current handler in place, if
    /// `name` is already registered.
    pub fn insert(&mut self, name: &str, handler: PushHandler) -> bool {
        if self.handlers.contains_key(name) {
            return false;
        }

        self.handlers.insert(name.to_string(), handler);
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Hands `message` to the handler of its subscription. Returns `false` if there is none.
    pub fn dispatch(&mut self, message: &PushMessage) -> bool {
        match self.handlers.get_mut(message.subscription()) {
            Some(handler) => {
                handler(message);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
