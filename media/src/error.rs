use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("codec is not ready (state {0})")]
    ErrCodecNotReady(&'static str),
    #[error("unsupported payload type {0}")]
    ErrUnsupportedPayloadType(u8),
    #[error("unsupported sample rate {0}")]
    ErrUnsupportedSampleRate(u32),
    #[error("only mono streams are monitored, got {0} channels")]
    ErrUnsupportedChannels(u8),
    #[error("output buffer holds {got} samples, frame needs {need}")]
    ErrBufferTooSmall { need: usize, got: usize },
    #[error("codec has no in-band FEC")]
    ErrFecUnsupported,
    #[error("opus: {0}")]
    Opus(#[from] audiopus::Error),
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::ErrCodecNotReady(a), Error::ErrCodecNotReady(b)) => a == b,
            (Error::ErrUnsupportedPayloadType(a), Error::ErrUnsupportedPayloadType(b)) => a == b,
            (Error::ErrUnsupportedSampleRate(a), Error::ErrUnsupportedSampleRate(b)) => a == b,
            (Error::ErrUnsupportedChannels(a), Error::ErrUnsupportedChannels(b)) => a == b,
            (
                Error::ErrBufferTooSmall { need, got },
                Error::ErrBufferTooSmall {
                    need: need2,
                    got: got2,
                },
            ) => need == need2 && got == got2,
            (Error::ErrFecUnsupported, Error::ErrFecUnsupported) => true,
            _ => false,
        }
    }
}
