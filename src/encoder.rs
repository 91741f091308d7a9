// https://redis.io/docs/reference/protocol-spec/#send-commands-to-a-redis-server

use crate::command::Arg;
use crate::line::CRLF;
use crate::reply::ReplyKind;

const INITIAL_CAPACITY: usize = 512;

// Enough for the decimal digits of any u64.
const MAX_DECIMAL_DIGITS: usize = 20;

/// Encodes commands as an array of bulk strings into a scratch buffer owned by one connection.
///
/// The buffer is reused for every command and only ever grows: by doubling, or straight to the
/// required size when doubling is not enough. Bytes already written for the command in progress
/// survive every growth step.
#[derive(Debug)]
pub struct CommandEncoder {
    buf: Vec<u8>,
    len: usize,
}

impl CommandEncoder {
    pub fn new() -> CommandEncoder {
        CommandEncoder::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> CommandEncoder {
        CommandEncoder {
            buf: vec![0; capacity.max(1)],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Encodes `name` followed by `args`.
    ///
    /// The returned slice borrows the scratch buffer and is only valid until the next call.
    pub fn encode(&mut self, name: &str, args: &[Arg]) -> &[u8] {
        self.len = 0;

        self.put_header(ReplyKind::Array, (args.len() + 1) as u64);
        self.put_bulk(name.as_bytes());
        for arg in args {
            self.put_bulk(arg.as_bytes());
        }

        &self.buf[..self.len]
    }

    fn put_bulk(&mut self, payload: &[u8]) {
        self.put_header(ReplyKind::Bulk, payload.len() as u64);
        self.put(payload);
        self.put(CRLF);
    }

    fn put_header(&mut self, kind: ReplyKind, n: u64) {
        let mut digits = [0u8; MAX_DECIMAL_DIGITS];
        let digits = decimal(n, &mut digits);

        self.reserve(1 + digits.len() + CRLF.len());
        self.buf[self.len] = u8::from(kind);
        self.len += 1;
        self.put(digits);
        self.put(CRLF);
    }

    fn put(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    fn reserve(&mut self, additional: usize) {
        let required = self.len + additional;
        if required <= self.buf.len() {
            return;
        }

        let capacity = (self.buf.len() * 2).max(required);
        // Resizing keeps the prefix already written for the current command.
        self.buf.resize(capacity, 0);
    }
}

impl Default for CommandEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn decimal(mut n: u64, tmp: &mut [u8; MAX_DECIMAL_DIGITS]) -> &[u8] {
    let mut i = tmp.len();

    loop {
        i -= 1;
        tmp[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }

    &tmp[i..]
}
