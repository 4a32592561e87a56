//! Record sources feeding the cache
//!
//! The relay does not care where packets come from: a station driver, a
//! replay of archived records, or a pipe from another process. Anything that
//! can yield [`Packet`]s implements [`RecordSource`].

use std::io::BufRead;

use thiserror_no_std::Error;

use crate::observation::Packet;

/// Errors while reading packets
#[derive(Error, Debug)]
pub enum SourceError {
    /// Underlying reader failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be decoded
    #[error("Malformed record on line {line}: {source}")]
    Malformed {
        /// 1-based line number
        line: usize,
        /// Decoder error
        source: serde_json::Error,
    },
}

/// Something that yields packets in observation order
pub trait RecordSource {
    /// Next packet, `Ok(None)` once the source is exhausted
    fn next_packet(&mut self) -> Result<Option<Packet>, SourceError>;
}

/// Reads one JSON packet per line, skipping blank lines
///
/// ```rust
/// use meteorelay_core::source::{JsonLinesSource, RecordSource};
///
/// let input = "{\"dateTime\": 1, \"usUnits\": 1, \"outTemp\": 50.0}\n\n";
/// let mut source = JsonLinesSource::new(input.as_bytes());
///
/// assert!(source.next_packet().unwrap().is_some());
/// assert!(source.next_packet().unwrap().is_none());
/// ```
pub struct JsonLinesSource<R: BufRead> {
    reader: R,
    line: usize,
    buf: String,
}

impl<R: BufRead> JsonLinesSource<R> {
    /// Read packets from `reader`
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: String::new(),
        }
    }

    /// Number of lines consumed so far
    pub fn lines_read(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> RecordSource for JsonLinesSource<R> {
    fn next_packet(&mut self) -> Result<Option<Packet>, SourceError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;

            let text = self.buf.trim();
            if text.is_empty() {
                continue;
            }
            return serde_json::from_str(text)
                .map(Some)
                .map_err(|source| SourceError::Malformed {
                    line: self.line,
                    source,
                });
        }
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn next_packet(&mut self) -> Result<Option<Packet>, SourceError> {
        (**self).next_packet()
    }
}
