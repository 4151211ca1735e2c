use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Control-path errors. Data-path faults never surface here; they are
/// folded into [`crate::PacketOutcome`] and per-stream counters.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid RTP packet: {0}")]
    InvalidRtp(#[from] rtp::Error),
    #[error("too many streams (limit {0})")]
    TooManyStreams(usize),
    #[error("codec: {0}")]
    Codec(#[from] media::Error),
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
    #[error("unknown stream handle")]
    UnknownStream,
    #[error("session already closed")]
    SessionClosed,
    #[error("out of memory")]
    OutOfMemory,
}
