/// Errors that can occur during envelope encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The length prefix is not a valid varint (over-long or overflowing).
    #[error("malformed varint length prefix")]
    MalformedLength,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing envelopes.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended in the middle of an envelope.
    #[error("stream ended mid-frame ({buffered} bytes buffered)")]
    UnexpectedEof { buffered: usize },

    /// The stream stopped accepting bytes before a complete envelope was written.
    #[error("connection closed (incomplete write)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
