//! Line protocol spoken with the host database.
//!
//! Each input line is a JSON array whose first element names the command.
//! Each command produces one output line, except list rendering which
//! streams several. Encodings of errors and log lines depend on the host
//! version, captured by [`Dialect`].

mod command;
mod dialect;
mod wire;

pub use command::{Arguments, Command};
pub use dialect::{CommandFamily, Dialect};
pub use ottoman_config::ProtocolVersion;
pub use wire::{decode_line, encode_error, log_line};
