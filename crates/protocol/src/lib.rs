//! Wire protocol for the chinwag chat relay.
//!
//! The protocol is a raw byte-stream conversation: no length prefixes,
//! no delimiters, meaning carried by in-band marker tokens. This crate
//! holds the tokens, the preview classifier and the share-command
//! parser. It does no I/O; the server crate owns the streams.
//!
//! # Wire format
//!
//! See [`tokens`] for the marker inventory and [`share`] for the shape
//! of a share-send command.

pub mod classify;
pub mod command;
pub mod share;
pub mod tokens;

pub use classify::{MessageKind, classify};
pub use share::{ShareHeader, ShareHeaderError, parse_share_header};
pub use tokens::{ShareKind, reserved_names};
