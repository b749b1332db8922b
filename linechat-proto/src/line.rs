//! Newline-delimited text framing for the linechat wire protocol.
//!
//! A message is exactly one UTF-8 line. The sender appends `\n`; the reader
//! strips it (and an optional preceding `\r`). There is no length prefix and
//! no other framing, so outgoing text must never contain the delimiter.

use tokio_util::codec::LinesCodec;

/// Line delimiter on the wire.
pub const DELIMITER: char = '\n';

/// Default TCP port shared by the server and the client.
pub const DEFAULT_PORT: u16 = 14002;

/// Default host the client connects to.
pub const DEFAULT_HOST: &str = "localhost";

/// Default maximum line length in bytes (64 KB), delimiter excluded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Console line that stops the server.
pub const DEFAULT_SHUTDOWN_KEYWORD: &str = "EXIT";

/// Reasons an outgoing line cannot be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineError {
    /// The text contains the line delimiter and would split into two messages.
    #[error("line contains a newline delimiter at byte {0}")]
    EmbeddedDelimiter(usize),

    /// The text is longer than the peer is willing to accept.
    #[error("line is {len} bytes (max {max})")]
    TooLong {
        /// Length of the rejected text in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// Checks that `text` can be sent as a single line of at most `max_len` bytes.
///
/// # Errors
///
/// Returns [`LineError::EmbeddedDelimiter`] if `text` contains `\n`, or
/// [`LineError::TooLong`] if it exceeds `max_len` bytes.
pub fn validate(text: &str, max_len: usize) -> Result<(), LineError> {
    if let Some(pos) = text.find(DELIMITER) {
        return Err(LineError::EmbeddedDelimiter(pos));
    }
    if text.len() > max_len {
        return Err(LineError::TooLong {
            len: text.len(),
            max: max_len,
        });
    }
    Ok(())
}

/// Builds the line codec used on both halves of a connection.
#[must_use]
pub fn codec(max_len: usize) -> LinesCodec {
    LinesCodec::new_with_max_length(max_len)
}
