#![forbid(unsafe_code)]

pub use command::ParsedCommand;
pub use error::Error;

pub mod command;
pub mod error;
