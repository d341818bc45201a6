use std::{
    fmt,
    io::{Error, ErrorKind},
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use mole_proto::{
    crypto::{CryptoError, SharedKey, NONCE_SIZE},
    frame::FrameError,
    receive::with_idle_timeout,
    socks5::InvalidVersion,
    target::RequestError,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error};

/// Settings shared by every session, fixed at startup.
#[derive(Debug)]
pub struct SessionConfig {
    pub key: SharedKey,
    pub idle_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(key: SharedKey, idle_timeout: Option<Duration>) -> Self {
        Self { key, idle_timeout }
    }
}

#[derive(Debug)]
pub enum SessionError {
    IO(Error),
    InvalidVersion(u8),
    Frame(FrameError),
    Request(RequestError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IO(error) => error.fmt(f),
            Self::InvalidVersion(ver) => InvalidVersion(*ver).fmt(f),
            Self::Frame(error) => error.fmt(f),
            Self::Request(error) => error.fmt(f),
        }
    }
}

impl From<Error> for SessionError {
    fn from(value: Error) -> Self {
        Self::IO(value)
    }
}

impl From<InvalidVersion> for SessionError {
    fn from(value: InvalidVersion) -> Self {
        Self::InvalidVersion(value.0)
    }
}

impl From<FrameError> for SessionError {
    fn from(value: FrameError) -> Self {
        Self::Frame(value)
    }
}

impl From<CryptoError> for SessionError {
    fn from(value: CryptoError) -> Self {
        Self::Frame(FrameError::Crypto(value))
    }
}

impl From<RequestError> for SessionError {
    fn from(value: RequestError) -> Self {
        Self::Request(value)
    }
}

impl SessionError {
    pub fn is_crypto(&self) -> bool {
        matches!(self, Self::Frame(FrameError::Crypto(_)))
    }
}

/// Logs an error that ended a session or one of its directions. Cipher failures are loud, the
/// rest is ordinary connection churn.
pub fn log_session_error(context: &str, error: &SessionError) {
    match error {
        error if error.is_crypto() => error!("{context}: {error}"),
        SessionError::IO(io_error) if io_error.kind() == ErrorKind::TimedOut => debug!("{context}: idle timeout, {error}"),
        error => debug!("{context}: {error}"),
    }
}

pub fn encode_nonce(nonce: &[u8; NONCE_SIZE]) -> String {
    STANDARD.encode(nonce)
}

/// Reads and discards from `reader` until it closes, fails, or stays silent for `idle_timeout`.
/// Used after an error reply, where the peer is expected to hang up on its own.
pub async fn idle_until_closed<R>(reader: &mut R, idle_timeout: Option<Duration>)
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; 512];
    let mut discarded = 0usize;

    loop {
        match with_idle_timeout(idle_timeout, reader.read(&mut buf)).await {
            Ok(0) => break,
            Ok(read) => discarded += read,
            Err(error) => {
                debug!("idle wait ended: {error}");
                break;
            }
        }
    }

    debug!("idle session closed after discarding {discarded} bytes");
}
