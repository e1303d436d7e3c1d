use std::{num::TryFromIntError, str::Utf8Error};

use crate::packet::Apid;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A granulator saw a packet its current state does not allow.
    #[error("protocol violation in {stream}: {msg}")]
    ProtocolViolation { stream: &'static str, msg: String },

    #[error("apid {0} is not in the packet catalog")]
    UnknownPacket(Apid),

    #[error("corrupt timestamp {0:#018x}")]
    CorruptTimestamp(u64),

    #[error("encoding invariant violated: {0}")]
    EncodingInvariant(String),

    #[error("store error at {path}: {msg}")]
    Store { path: String, msg: String },

    #[error("Not enough bytes creating {0}")]
    NotEnoughBytes(&'static str),

    #[error("invalid granule start {0}; before mission base time")]
    InvalidGranuleStart(i64),

    #[error(transparent)]
    Utf8Error(#[from] Utf8Error),

    #[error("integer overflow: {0}")]
    IntError(#[from] TryFromIntError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Config invalid: {0}")]
    ConfigInvalid(String),
    #[error("Failed to load config: {}", .source)]
    ConfigLoad {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("leap-seconds list: {0}")]
    LeapSeconds(String),
}

impl Error {
    pub(crate) fn store<P: ToString, M: ToString>(path: P, msg: M) -> Self {
        Error::Store {
            path: path.to_string(),
            msg: msg.to_string(),
        }
    }

    pub(crate) fn protocol<M: ToString>(stream: &'static str, msg: M) -> Self {
        Error::ProtocolViolation {
            stream,
            msg: msg.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
