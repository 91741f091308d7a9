use std::collections::VecDeque;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::decoder::ReplyDecoder;
use crate::reply::Reply;
use crate::Error;

/// Adapts [`ReplyDecoder`] to `tokio_util`'s framing.
///
/// Every byte handed over by the framed reader is consumed right away: partial replies live in
/// the decoder's own state rather than in the read buffer, so a large bulk payload is never
/// rescanned from its first byte when more data arrives.
#[derive(Debug, Default)]
pub struct ReplyCodec {
    decoder: ReplyDecoder,
    // Replies completed by a previous read but not yet yielded.
    ready: VecDeque<Reply>,
}

impl ReplyCodec {
    pub fn new() -> ReplyCodec {
        ReplyCodec::default()
    }
}

impl Decoder for ReplyCodec {
    type Item = Reply;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !src.is_empty() {
            let chunk = src.split();
            let mut completed = Vec::new();
            self.decoder.feed_into(&chunk, &mut completed)?;
            self.ready.extend(completed);
        }

        Ok(self.ready.pop_front())
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(reply) => Ok(Some(reply)),
            None if self.decoder.is_idle() => Ok(None),
            None => Err("connection closed in the middle of a reply".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn yields_replies_one_at_a_time() {
        let mut codec = ReplyCodec::new();
        let mut src = BytesMut::from(&b"+OK\r\n:1\r\n"[..]);

        assert_eq!(
            codec.decode(&mut src).unwrap(),
            Some(Reply::Status("OK".to_string()))
        );
        assert!(src.is_empty());
        assert_eq!(codec.decode(&mut src).unwrap(), Some(Reply::Integer(1)));
        assert_eq!(codec.decode(&mut src).unwrap(), None);
    }

    #[test]
    fn partial_reply_is_completed_by_the_next_read() {
        let mut codec = ReplyCodec::new();
        let mut src = BytesMut::from(&b"$5\r\nhel"[..]);

        assert_eq!(codec.decode(&mut src).unwrap(), None);

        src.extend_from_slice(b"lo\r\n");
        assert_eq!(
            codec.decode(&mut src).unwrap(),
            Some(Reply::Bulk(Some(Bytes::from("hello"))))
        );
    }

    #[test]
    fn eof_inside_a_reply_is_an_error() {
        let mut codec = ReplyCodec::new();
        let mut src = BytesMut::from(&b"*2\r\n:1\r\n"[..]);

        assert!(codec.decode_eof(&mut src).is_err());
    }

    #[test]
    fn invalid_data_is_an_error() {
        let mut codec = ReplyCodec::new();
        let mut src = BytesMut::from(&b"!oops\r\n"[..]);

        assert!(codec.decode(&mut src).is_err());
    }
}
