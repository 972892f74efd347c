use thiserror::Error;

/// Errors raised by the engine. Every variant maps to a stable numeric code
/// (see [`PxtnError::code`]) so callers can report the native status.
#[derive(Error, Debug)]
pub enum PxtnError {
    #[error("engine is not initialized")]
    Init,
    #[error("fatal engine state")]
    Fatal,
    #[error("project is protected against editing")]
    AntiOperation,
    #[error("beat clock {0} is not supported")]
    DenyBeatClock(i32),
    #[error("descriptor read failed")]
    DescRead(#[from] binrw::Error),
    #[error("descriptor is broken: {0}")]
    DescBroken(String),
    #[error("project was saved with an older format: {0:?}")]
    FmtNew(String),
    #[error("unknown project format: {0:?}")]
    FmtUnknown(String),
    #[error("invalid block code {0:?}")]
    InvCode(String),
    #[error("invalid data: {0}")]
    InvData(String),
    #[error("could not allocate {0} bytes")]
    Memory(usize),
    #[error("render was not prepared")]
    MooInit,
    #[error("invalid parameter: {0}")]
    Param(String),
    #[error("unsupported pcm layout: {channels} channels, {bits} bits")]
    PcmUnknown { channels: u16, bits: u16 },
    #[error("too many events: {0}")]
    TooMuchEvent(usize),
}

impl PxtnError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Init => 2,
            Self::Fatal => 3,
            Self::AntiOperation => 4,
            Self::DenyBeatClock(..) => 5,
            Self::DescRead(..) => 7,
            Self::DescBroken(..) => 8,
            Self::FmtNew(..) => 9,
            Self::FmtUnknown(..) => 10,
            Self::InvCode(..) => 11,
            Self::InvData(..) => 12,
            Self::Memory(..) => 13,
            Self::MooInit => 14,
            Self::Param(..) => 17,
            Self::PcmUnknown { .. } => 19,
            Self::TooMuchEvent(..) => 23,
        }
    }
}

pub type PxtnResult<T> = Result<T, PxtnError>;
