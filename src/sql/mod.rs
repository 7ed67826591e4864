//! SQL text handling
//!
//! Statement splitting and syntax validation. Nothing in here talks to a
//! database.

pub mod splitter;
pub mod validator;

pub use splitter::{split_statements, strip_leading_comments, SqlStatement};
pub use validator::SchemaValidator;
