//! Frame reader for `hcidump --raw` output.
//!
//! The dump is line oriented. An HCI LE advertising report starts with a
//! line beginning `> 04 3E` (incoming packet, HCI event, LE meta-event) and
//! continues over indented lines of byte tokens until the next marker.

use futures::stream::{self, Stream};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::trace;

use crate::error::{Error, Result};

/// Leading tokens of an HCI LE meta-event header line.
pub const FRAME_MARKER: [&str; 3] = [">", "04", "3E"];

/// The lines of one HCI event, as read from the dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    lines: Vec<String>,
}

impl RawFrame {
    /// Build a frame from already-split lines.
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// The lines making up the frame, trimmed.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// All lines joined with a single space.
    pub fn joined(&self) -> String {
        self.lines.join(" ")
    }

    /// Whitespace-separated tokens across all lines.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().flat_map(|l| l.split_whitespace())
    }
}

/// Check whether a line opens a new frame.
pub fn is_frame_start(line: &str) -> bool {
    let mut tokens = line.split_whitespace();
    FRAME_MARKER
        .iter()
        .all(|m| tokens.next().is_some_and(|t| t.eq_ignore_ascii_case(m)))
}

/// Groups dump lines into [`RawFrame`]s.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    pending: Vec<String>,
    line: String,
    finished: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a byte stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            line: String::new(),
            finished: false,
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Ok(None)` once the stream has ended and the last frame was
    /// flushed. A read error discards the partial frame and ends the reader.
    pub async fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            self.line.clear();
            let read = match self.reader.read_line(&mut self.line).await {
                Ok(n) => n,
                Err(e) => {
                    self.finished = true;
                    self.pending.clear();
                    return Err(Error::StreamRead(e));
                }
            };

            if read == 0 {
                self.finished = true;
                return Ok(self.flush());
            }

            let line = self.line.trim().to_string();
            if line.is_empty() {
                continue;
            }

            if is_frame_start(&line) {
                let previous = self.flush();
                self.pending.push(line);
                if previous.is_some() {
                    return Ok(previous);
                }
            } else if self.pending.is_empty() {
                trace!("Skipping line outside of a frame: {}", line);
            } else {
                self.pending.push(line);
            }
        }
    }

    /// Turn the reader into a stream of frames. The stream ends after the
    /// first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<RawFrame>>
    where
        R: Send,
    {
        stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_frame().await?.map(|frame| (frame, reader)))
        })
    }

    fn flush(&mut self) -> Option<RawFrame> {
        if self.pending.is_empty() {
            None
        } else {
            Some(RawFrame::new(std::mem::take(&mut self.pending)))
        }
    }
}
