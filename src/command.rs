use std::fmt;

use bytes::Bytes;

/// A single command argument.
///
/// Text and binary arguments frame the same way on the wire, only the byte length matters. The
/// distinction is kept so commands can be logged readably.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Text(String),
    Binary(Bytes),
}

impl Arg {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Arg::Text(s) => s.as_bytes(),
            Arg::Binary(bytes) => bytes,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Text(s) => Some(s),
            Arg::Binary(_) => None,
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Text(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Text(s)
    }
}

impl From<&String> for Arg {
    fn from(s: &String) -> Self {
        Arg::Text(s.clone())
    }
}

impl From<Bytes> for Arg {
    fn from(bytes: Bytes) -> Self {
        Arg::Binary(bytes)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(bytes: Vec<u8>) -> Self {
        Arg::Binary(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Arg {
    fn from(bytes: &[u8]) -> Self {
        Arg::Binary(Bytes::copy_from_slice(bytes))
    }
}

macro_rules! arg_from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Arg {
                fn from(n: $t) -> Self {
                    Arg::Text(n.to_string())
                }
            }
        )*
    };
}

arg_from_number!(i32, i64, u32, u64, usize, f64);

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Text(s) => write!(f, "{}", s),
            Arg::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// A command ready to be sent.
///
/// The name is kept lowercase: it is the key for the typecasting table and for the pub/sub and
/// transaction bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub struct Cmd {
    name: String,
    args: Vec<Arg>,
    binary: bool,
}

impl Cmd {
    pub fn new(name: &str) -> Cmd {
        Cmd {
            name: name.to_lowercase(),
            args: Vec::new(),
            binary: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Cmd {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Cmd
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Keep bulk values of the reply as raw bytes instead of decoding them as UTF-8 text.
    pub fn expect_binary(mut self) -> Cmd {
        self.binary = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[Arg] {
        &self.args
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Whether the last argument is the `WITHSCORES` flag of a sorted set range query.
    pub fn with_scores(&self) -> bool {
        self.args
            .last()
            .and_then(Arg::as_str)
            .map_or(false, |arg| arg.eq_ignore_ascii_case("withscores"))
    }

    /// The database index of a `SELECT` command.
    pub fn selected_db(&self) -> Option<i64> {
        if self.name != "select" {
            return None;
        }

        self.args
            .first()
            .and_then(|arg| std::str::from_utf8(arg.as_bytes()).ok())
            .and_then(|db| db.parse().ok())
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_lowercased() {
        let cmd = Cmd::new("GET").arg("Foo");

        assert_eq!(cmd.name(), "get");
        assert_eq!(cmd.arguments(), &[Arg::Text("Foo".to_string())]);
    }

    #[test]
    fn numbers_become_text_arguments() {
        let cmd = Cmd::new("expire").arg("key").arg(10).arg(2.5);

        assert_eq!(cmd.to_string(), "expire key 10 2.5");
    }

    #[test]
    fn binary_arguments_are_kept_raw() {
        let cmd = Cmd::new("set").arg("key").arg(vec![0u8, 159, 146, 150]);

        assert_eq!(cmd.arguments()[1].as_bytes(), &[0u8, 159, 146, 150]);
        assert_eq!(cmd.to_string(), "set key <4 bytes>");
    }

    #[test]
    fn detect_withscores_flag() {
        assert!(Cmd::new("zrange")
            .args(["z", "0", "-1", "WITHSCORES"])
            .with_scores());
        assert!(!Cmd::new("zrange").args(["z", "0", "-1"]).with_scores());
        assert!(!Cmd::new("zrange").with_scores());
    }

    #[test]
    fn selected_db_only_for_select() {
        assert_eq!(Cmd::new("SELECT").arg(3).selected_db(), Some(3));
        assert_eq!(Cmd::new("select").arg("x").selected_db(), None);
        assert_eq!(Cmd::new("get").arg(3).selected_db(), None);
    }

    #[test]
    fn binary_hint() {
        assert!(!Cmd::new("get").arg("k").is_binary());
        assert!(Cmd::new("get").arg("k").expect_binary().is_binary());
    }
}
