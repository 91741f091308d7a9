use crate::command::{Arg, Cmd};

/// Sets the specified fields to their respective values in the hash stored at key.
///
/// Fields are sent in insertion order.
///
/// Ref: <https://redis.io/docs/latest/commands/hmset/>
#[derive(Clone, Debug, PartialEq)]
pub struct Hmset {
    pub key: String,
    pub fields: Vec<(String, Arg)>,
}

impl Hmset {
    pub fn new(key: impl Into<String>) -> Hmset {
        Hmset {
            key: key.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: impl Into<String>, value: impl Into<Arg>) -> Hmset {
        self.fields.push((field.into(), value.into()));
        self
    }
}

impl<F, V> FromIterator<(F, V)> for Hmset
where
    F: Into<String>,
    V: Into<Arg>,
{
    /// Collects field/value pairs; the key still has to be set.
    fn from_iter<I: IntoIterator<Item = (F, V)>>(iter: I) -> Self {
        Hmset {
            key: String::new(),
            fields: iter
                .into_iter()
                .map(|(field, value)| (field.into(), value.into()))
                .collect(),
        }
    }
}

impl From<Hmset> for Cmd {
    fn from(hmset: Hmset) -> Self {
        let mut cmd = Cmd::new("hmset").arg(hmset.key);

        for (field, value) in hmset.fields {
            cmd = cmd.arg(field).arg(value);
        }

        cmd
    }
}
