//! Error types for the framecast sender.
//!
//! All fallible operations return `Result<T, FramecastError>`.
//! Real-time constraints make retry pointless, so the policy is binary:
//! an error is either silently tolerated at its source (stale acks,
//! deadline-missing encode jobs) or fatal and propagated to the caller.

use thiserror::Error;

/// The canonical error type for the sender pipeline.
#[derive(Debug, Error)]
pub enum FramecastError {
    // ── Input stream ─────────────────────────────────────────────
    /// The raw video input ran out. The sender defines success as
    /// continuous delivery, so exhaustion is always a failure.
    #[error("input stream ended")]
    EndOfStream,

    /// The YUV4MPEG stream header or a frame could not be parsed.
    #[error("malformed input stream: {0}")]
    InvalidStream(String),

    /// The stream uses a chroma layout the codec does not accept.
    #[error("unsupported colorspace: {0}")]
    UnsupportedColorspace(String),

    // ── Wire format ──────────────────────────────────────────────
    /// A datagram was shorter than its fixed header.
    #[error("datagram too short: {actual} bytes (need {expected})")]
    TruncatedPacket { expected: usize, actual: usize },

    /// A fragment header carried inconsistent index/count fields.
    #[error("invalid fragment header: {0}")]
    InvalidFragment(&'static str),

    // ── Encode ───────────────────────────────────────────────────
    /// The codec's entropy stage failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Transport ────────────────────────────────────────────────
    /// The socket or input file descriptor reported an error.
    /// The transport is assumed reachable, so this is fatal.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal channel closed while the loop still needed it.
    #[error("channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let e = FramecastError::EndOfStream;
        assert!(e.to_string().contains("ended"));

        let e = FramecastError::TruncatedPacket {
            expected: 14,
            actual: 3,
        };
        assert!(e.to_string().contains("14"));
        assert!(e.to_string().contains("3"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: FramecastError = io_err.into();
        assert!(matches!(e, FramecastError::Io(_)));
    }
}
