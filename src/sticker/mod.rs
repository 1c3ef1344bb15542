//! Sticker delivery protocol.
//!
//! A newline-delimited text protocol spoken with a single pump client:
//! - Client sends: `deliver a new sticker\n` or `wait until next sticker\n`
//! - Server answers a delivery with three status lines, two seconds apart
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  deliver a new sticker\n
//! Response: pickup reached\n
//!           (2s)
//!           drop reached\n
//!           (2s)
//!           one sticker finished\n
//!
//! Request:  wait until next sticker\n
//! Response: (none)
//! ```
//!
//! Lines are trimmed before matching and matched exactly. Anything else is
//! logged and otherwise ignored; the protocol has no error reply.

pub mod framer;
pub mod handler;
pub mod parser;

pub use handler::{Session, SessionEnd, SessionError};
