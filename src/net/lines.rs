use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Largest message either side accepts unless configured otherwise.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;

pub(crate) enum Line {
    /// The bytes of one message, without the line ending. Not necessarily UTF-8.
    Complete(Vec<u8>),
    /// A line longer than the limit; its bytes have been dropped.
    TooLong,
}

/// Splits a byte stream into newline-delimited messages without ever holding
/// more than `max_length` bytes of one message.
pub(crate) struct LineReader<R> {
    reader: BufReader<R>,
    max_length: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub(crate) fn new(read: R, max_length: usize) -> Self {
        Self {
            reader: BufReader::new(read),
            max_length,
        }
    }

    /// Returns `Ok(None)` at end of stream. An unterminated last line is
    /// still returned as a message.
    pub(crate) async fn next_line(&mut self) -> io::Result<Option<Line>> {
        let mut line = Vec::new();
        let mut too_long = false;
        loop {
            let (used, terminated) = {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    return Ok(match (too_long, line.is_empty()) {
                        (true, _) => Some(Line::TooLong),
                        (false, true) => None,
                        (false, false) => Some(Line::Complete(line)),
                    });
                }
                let newline = available.iter().position(|byte| *byte == b'\n');
                let chunk = &available[..newline.unwrap_or(available.len())];
                if !too_long {
                    if line.len() + chunk.len() > self.max_length {
                        too_long = true;
                        line = Vec::new();
                    } else {
                        line.extend_from_slice(chunk);
                    }
                }
                match newline {
                    Some(at) => (at + 1, true),
                    None => (available.len(), false),
                }
            };
            self.reader.consume(used);

            if terminated {
                if too_long {
                    return Ok(Some(Line::TooLong));
                }
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(Line::Complete(line)));
            }
        }
    }
}
