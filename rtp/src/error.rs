use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("RTP header size insufficient")]
    ErrHeaderSizeInsufficient,
    #[error("RTP header size insufficient for extension")]
    ErrHeaderSizeInsufficientForExtension,
    #[error("RTP version must be 2, got {0}")]
    ErrBadVersion(u8),
    #[error("packet is not large enough")]
    ErrShortPacket,
    #[error("buffer too small")]
    ErrBufferTooSmall,
}
