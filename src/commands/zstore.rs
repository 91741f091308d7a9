use crate::command::Cmd;

/// Computes the union or intersection of sorted sets and stores the result in a destination key.
///
/// Ref: <https://redis.io/docs/latest/commands/zunionstore/>
/// Ref: <https://redis.io/docs/latest/commands/zinterstore/>
#[derive(Clone, Debug, PartialEq)]
pub struct ZStore {
    pub operation: Operation,
    pub destination: String,
    pub keys: Keys,
    pub aggregate: Option<Aggregate>,
}

#[derive(Clone, Copy, Debug, PartialEq, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Zunionstore,
    Zinterstore,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Keys {
    Plain(Vec<String>),
    /// Keys with the multiplication factor applied to their scores.
    Weighted(Vec<(String, f64)>),
}

impl Keys {
    fn len(&self) -> usize {
        match self {
            Keys::Plain(keys) => keys.len(),
            Keys::Weighted(keys) => keys.len(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, strum::AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Aggregate {
    Sum,
    Min,
    Max,
}

impl ZStore {
    pub fn union(destination: impl Into<String>, keys: Keys) -> ZStore {
        ZStore {
            operation: Operation::Zunionstore,
            destination: destination.into(),
            keys,
            aggregate: None,
        }
    }

    pub fn inter(destination: impl Into<String>, keys: Keys) -> ZStore {
        ZStore {
            operation: Operation::Zinterstore,
            ..ZStore::union(destination, keys)
        }
    }

    pub fn aggregate(mut self, aggregate: Aggregate) -> ZStore {
        self.aggregate = Some(aggregate);
        self
    }
}

impl From<ZStore> for Cmd {
    fn from(zstore: ZStore) -> Self {
        let mut cmd = Cmd::new(zstore.operation.as_ref())
            .arg(zstore.destination)
            .arg(zstore.keys.len());

        match zstore.keys {
            Keys::Plain(keys) => cmd = cmd.args(keys),
            Keys::Weighted(keys) => {
                let (keys, weights): (Vec<_>, Vec<_>) = keys.into_iter().unzip();
                cmd = cmd.args(keys).arg("WEIGHTS").args(weights);
            }
        }

        if let Some(aggregate) = zstore.aggregate {
            let aggregate: &str = aggregate.as_ref();
            cmd = cmd.arg("AGGREGATE").arg(aggregate);
        }

        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_of_plain_keys() {
        let keys = Keys::Plain(vec!["key1".to_string(), "key2".to_string()]);

        let cmd = Cmd::from(ZStore::union("tokey", keys));

        assert_eq!(cmd.to_string(), "zunionstore tokey 2 key1 key2");
    }

    #[test]
    fn inter_with_weights_and_aggregate() {
        let keys = Keys::Weighted(vec![("key1".to_string(), 4.0), ("key2".to_string(), 7.5)]);

        let cmd = Cmd::from(ZStore::inter("tokey", keys).aggregate(Aggregate::Max));

        assert_eq!(
            cmd.to_string(),
            "zinterstore tokey 2 key1 key2 WEIGHTS 4 7.5 AGGREGATE MAX"
        );
    }
}
