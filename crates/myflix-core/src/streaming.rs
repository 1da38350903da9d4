//! Range streaming
//!
//! Maps an optional `Range` header onto a ranged fetch from the channel
//! client and shapes the resulting byte stream into a response plan.

use crate::source::{ByteStream, ChannelClient, SourceError};
use crate::utils::retry_telegram_operation;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, error, warn};

/// `200 OK`
pub const STATUS_OK: u16 = 200;
/// `206 Partial Content`
pub const STATUS_PARTIAL: u16 = 206;

/// Errors raised before the first byte is sent
#[derive(Error, Debug)]
pub enum StreamError {
    /// The header is not a byte range we understand
    #[error("malformed range header: {0}")]
    MalformedRange(String),
    /// The range lies outside the file
    #[error("range not satisfiable for {total} bytes")]
    Unsatisfiable {
        /// File size, echoed in `Content-Range: bytes */total`
        total: u64,
    },
    /// The client could not open the file
    #[error("streaming failure: {0}")]
    Upstream(#[from] SourceError),
}

/// An inclusive byte range inside a file of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Parse a `Range` header against a file of `total` bytes.
    ///
    /// Accepts `bytes=a-b`, `bytes=a-` and `bytes=-n`. The end is clamped to
    /// the last byte. Only the first range of a multi-range request is used.
    ///
    /// # Errors
    ///
    /// [`StreamError::MalformedRange`] when the header cannot be read,
    /// [`StreamError::Unsatisfiable`] when it selects no byte of the file.
    pub fn parse(header: &str, total: u64) -> Result<Self, StreamError> {
        let malformed = || StreamError::MalformedRange(header.to_string());

        let spec = header
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(malformed)?;
        let first = spec.split(',').next().unwrap_or_default().trim();
        let (start, end) = first.split_once('-').ok_or_else(malformed)?;
        let (start, end) = (start.trim(), end.trim());

        let parse = |raw: &str| raw.parse::<u64>().map_err(|_| malformed());
        let unsatisfiable = StreamError::Unsatisfiable { total };

        let (start, end) = match (start.is_empty(), end.is_empty()) {
            (true, true) => return Err(malformed()),
            // Suffix: the last n bytes
            (true, false) => {
                let suffix = parse(end)?;
                if suffix == 0 || total == 0 {
                    return Err(unsatisfiable);
                }
                (total.saturating_sub(suffix), total - 1)
            }
            (false, true) => (parse(start)?, total.saturating_sub(1)),
            (false, false) => {
                let (start, end) = (parse(start)?, parse(end)?);
                if end < start {
                    return Err(malformed());
                }
                (start, end.min(total.saturating_sub(1)))
            }
        };

        if total == 0 || start >= total {
            return Err(unsatisfiable);
        }
        Ok(Self { start, end })
    }

    /// Number of bytes selected; never zero.
    #[must_use]
    #[allow(clippy::len_without_is_empty)]
    pub const fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a file of `total` bytes.
    #[must_use]
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Everything the web layer needs to answer a stream request.
pub struct StreamPlan {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for StreamPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPlan")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .finish_non_exhaustive()
    }
}

/// Open `file_id` for streaming.
///
/// Without a range the whole file is sent with status 200. With a range the
/// client is asked to start at `range.start`; if it starts earlier the
/// leading bytes are discarded here. The body is cut at exactly the range
/// length and re-sliced into chunks of at most `chunk_size` bytes.
///
/// # Errors
///
/// Returns [`StreamError::Upstream`] when the file cannot be opened.
pub async fn open_stream(
    client: &dyn ChannelClient,
    file_id: &str,
    range: Option<ByteRange>,
    total: u64,
    chunk_size: usize,
) -> Result<StreamPlan, StreamError> {
    let start = range.map_or(0, |r| r.start);
    let file = retry_telegram_operation(|| client.open_file(file_id, start)).await?;

    if file.offset > start {
        return Err(StreamError::Upstream(SourceError::Api(format!(
            "upstream started at byte {} past requested offset {start}",
            file.offset
        ))));
    }
    let skip = start - file.offset;
    if skip > 0 {
        debug!("Upstream ignored offset for {file_id}, skipping {skip} bytes locally");
    }

    let plan = match range {
        None => StreamPlan {
            status: STATUS_OK,
            content_length: (total > 0).then_some(total),
            content_range: None,
            body: window(file_id, file.chunks, skip, None, chunk_size),
        },
        Some(range) => StreamPlan {
            status: STATUS_PARTIAL,
            content_length: Some(range.len()),
            content_range: Some(range.content_range(total)),
            body: window(file_id, file.chunks, skip, Some(range.len()), chunk_size),
        },
    };
    Ok(plan)
}

struct Window {
    file_id: String,
    inner: ByteStream,
    skip: u64,
    remaining: Option<u64>,
    pending: Bytes,
    chunk_size: usize,
    finished: bool,
}

impl Window {
    fn next_slice(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            return None;
        }
        let mut take = self.pending.len().min(self.chunk_size);
        if let Some(remaining) = self.remaining {
            take = take.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        }
        let chunk = self.pending.split_to(take);
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= chunk.len() as u64;
        }
        Some(chunk)
    }

    fn accept(&mut self, mut bytes: Bytes) {
        if self.skip > 0 {
            let n = usize::try_from(self.skip).map_or(bytes.len(), |s| s.min(bytes.len()));
            bytes = bytes.slice(n..);
            self.skip -= n as u64;
        }
        self.pending = bytes;
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Stream of {} dropped before completion (client disconnected)", self.file_id);
        }
    }
}

fn window(
    file_id: &str,
    inner: ByteStream,
    skip: u64,
    limit: Option<u64>,
    chunk_size: usize,
) -> ByteStream {
    let state = Window {
        file_id: file_id.to_string(),
        inner,
        skip,
        remaining: limit,
        pending: Bytes::new(),
        chunk_size: chunk_size.max(1),
        finished: false,
    };

    stream::unfold(state, |mut w| async move {
        loop {
            if w.finished || w.remaining == Some(0) {
                w.finished = true;
                return None;
            }
            if let Some(chunk) = w.next_slice() {
                return Some((Ok(chunk), w));
            }
            match w.inner.next().await {
                Some(Ok(bytes)) => w.accept(bytes),
                Some(Err(e)) => {
                    error!("Error streaming {}: {e}", w.file_id);
                    w.finished = true;
                    return Some((Err(e), w));
                }
                None => {
                    if let Some(remaining) = w.remaining {
                        warn!("Upstream ended {remaining} bytes early for {}", w.file_id);
                    }
                    w.finished = true;
                    return None;
                }
            }
        }
    })
    .boxed()
}
