use crate::command::Cmd;

/// Returns or stores the elements contained in the list, set or sorted set at key.
///
/// The reply is always a flat array, also when several `GET` patterns are given: one element per
/// pattern per sorted item, in that order.
///
/// Ref: <https://redis.io/docs/latest/commands/sort/>
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sort {
    pub key: String,
    pub by: Option<String>,
    pub limit: Option<(i64, i64)>,
    pub get: Vec<String>,
    pub order: Option<Order>,
    pub alpha: bool,
    pub store: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Order {
    Asc,
    Desc,
}

impl Sort {
    pub fn new(key: impl Into<String>) -> Sort {
        Sort {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn by(mut self, pattern: impl Into<String>) -> Sort {
        self.by = Some(pattern.into());
        self
    }

    pub fn limit(mut self, offset: i64, count: i64) -> Sort {
        self.limit = Some((offset, count));
        self
    }

    pub fn get(mut self, pattern: impl Into<String>) -> Sort {
        self.get.push(pattern.into());
        self
    }

    pub fn order(mut self, order: Order) -> Sort {
        self.order = Some(order);
        self
    }

    pub fn alpha(mut self) -> Sort {
        self.alpha = true;
        self
    }

    pub fn store(mut self, destination: impl Into<String>) -> Sort {
        self.store = Some(destination.into());
        self
    }
}

impl From<Sort> for Cmd {
    fn from(sort: Sort) -> Self {
        let mut cmd = Cmd::new("sort").arg(sort.key);

        if let Some(by) = sort.by {
            cmd = cmd.arg("by").arg(by);
        }
        if let Some((offset, count)) = sort.limit {
            cmd = cmd.arg("limit").arg(offset).arg(count);
        }
        for pattern in sort.get {
            cmd = cmd.arg("get").arg(pattern);
        }
        if let Some(order) = sort.order {
            let order: &str = order.as_ref();
            cmd = cmd.arg(order);
        }
        if sort.alpha {
            cmd = cmd.arg("alpha");
        }
        if let Some(destination) = sort.store {
            cmd = cmd.arg("store").arg(destination);
        }

        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_sort() {
        let cmd = Cmd::from(Sort::new("list"));

        assert_eq!(cmd.to_string(), "sort list");
    }

    #[test]
    fn sort_with_every_option() {
        let cmd = Cmd::from(
            Sort::new("ids")
                .by("weight_*")
                .limit(0, 10)
                .get("#")
                .get("object_*->name")
                .order(Order::Desc)
                .alpha()
                .store("sorted"),
        );

        assert_eq!(
            cmd.to_string(),
            "sort ids by weight_* limit 0 10 get # get object_*->name desc alpha store sorted"
        );
    }
}
