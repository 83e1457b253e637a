//! Integration tests against a served gateway.

pub mod end_to_end;
pub mod fanout;
pub mod routing;
