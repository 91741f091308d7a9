//! Builders for commands whose arguments need more than a positional list.
//!
//! Everything else is built directly with [`Cmd`](crate::command::Cmd).

pub mod hmset;
pub mod sort;
pub mod zstore;

pub use hmset::Hmset;
pub use sort::{Order, Sort};
pub use zstore::{Aggregate, Keys, ZStore};
