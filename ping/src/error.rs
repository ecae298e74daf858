use std::{fmt, io, time::Duration};

use thiserror::Error;

/// Session set-up stage that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Resolve,
    Socket,
    BindDevice,
    Register,
    ReceiveTimeout,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Resolve => "resolve",
            Step::Socket => "socket",
            Step::BindDevice => "bind_device",
            Step::Register => "register",
            Step::ReceiveTimeout => "receive_timeout",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("host: {host}, step: {step}, error: {source}")]
pub struct ConstructionError {
    pub host: String,
    pub step: Step,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("send failed: {0}")]
    Transport(#[from] io::Error),
}

impl SendError {
    /// Raw OS error code, if the failure came from the OS.
    pub fn code(&self) -> Option<i32> {
        match self {
            SendError::Transport(err) => err.raw_os_error(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("datagram too short: {len} bytes, need at least {needed}")]
    Truncated { len: usize, needed: usize },
    #[error("invalid IPv4 header length: {0} words")]
    HeaderLength(u8),
}

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    /// Something arrived but it is not an echo reply for this session.
    #[error("not our reply: type {icmp_type}, identifier {identifier}")]
    Rejected { icmp_type: u8, identifier: u16 },
    #[error("malformed reply: {0}")]
    Decode(#[from] DecodeError),
    #[error("receive failed: {0}")]
    Transport(#[source] io::Error),
}

impl ReceiveError {
    pub fn code(&self) -> Option<i32> {
        match self {
            ReceiveError::Transport(err) => err.raw_os_error(),
            _ => None,
        }
    }
}
