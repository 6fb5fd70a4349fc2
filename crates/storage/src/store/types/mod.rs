#![forbid(unsafe_code)]

mod programs;
mod publish;
mod questions;
mod versions;

pub use programs::*;
pub use publish::*;
pub use questions::*;
pub use versions::*;
