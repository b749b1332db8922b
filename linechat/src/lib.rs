//! linechat: line-based chat client library.
//!
//! Connects to a linechat relay, sends each input line, and reports every
//! line the relay broadcasts back.

pub mod config;
pub mod duplex;
pub mod net;
