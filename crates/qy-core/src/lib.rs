//! # qy-core — The Model of QUARRY
//!
//! The shapes every other crate agrees on:
//!
//! - [`Value`] / [`Document`]: JSON plus a native date type.
//! - [`StructuredQuery`]: an aggregation pipeline produced from natural language.
//! - [`temporal`]: the rewrite that turns date-shaped strings into native dates.
//! - [`Error`]: the failure taxonomy of the translate / execute / repair loop.

pub mod error;
pub mod query;
pub mod temporal;
pub mod value;

pub use error::{Error, Result};
pub use query::{strip_code_fence, ParseFailure, StructuredQuery};
pub use temporal::{normalize, normalize_query};
pub use value::{Document, Value};
