use thiserror::Error;

/// Recoverable engine failures.
///
/// Configuration errors are detected before any allocation is attempted.
/// Resource failures leave the engine running at its previous configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("FFT size {0} is not a supported power of two")]
    InvalidFftSize(u16),
    #[error("overlap factor {0} is not a supported power of two")]
    InvalidOverlapFactor(u8),
    #[error("window size factor {0} is not a supported power of two")]
    InvalidWindowSizeFactor(u8),
    #[error("unsupported channel layout: {main} main, {side} side")]
    InvalidChannelCount { main: u8, side: u8 },
    #[error("unsupported sample rate {0} Hz")]
    InvalidSampleRate(u32),
    #[error("storage of {required} bytes exceeds the {available} byte budget")]
    OutOfMemory { required: usize, available: usize },
    #[error("module {index} rejected the new storage factors")]
    ModuleResizeRejected { index: usize },
    #[error("no effect registered with type id {0}")]
    UnknownEffect(u8),
    #[error("effect type {0} could not be created for the active configuration")]
    ModuleCreationFailed(u8),
    #[error("effect type id {0} is already registered")]
    DuplicateEffect(u8),
    #[error("module is already part of a chain or was removed from one")]
    ModuleAlreadyLinked,
    #[error("parameter index {0} out of range")]
    ParameterOutOfRange(usize),
    #[error("snapshot does not match effect type {0}")]
    InvalidSnapshot(u8),
}

pub type EngineResult<T> = Result<T, EngineError>;
