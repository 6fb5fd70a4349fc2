#![forbid(unsafe_code)]

pub mod ids;
pub mod lifecycle;
pub mod predicate;
pub mod program;
pub mod question;
