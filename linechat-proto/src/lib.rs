//! Shared building blocks for the linechat wire protocol.
//!
//! - [`line`]: newline-delimited framing rules and protocol defaults.
//! - [`connection`]: a TCP peer that reads and writes whole lines.
//! - [`surface`]: the input source / output sink seams used by both programs.

pub mod connection;
pub mod line;
pub mod surface;
