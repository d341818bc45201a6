use std::{
    fmt,
    io::ErrorKind,
    net::{SocketAddr, ToSocketAddrs},
};

use super::DEFAULT_PORT;

#[derive(Debug, PartialEq, Eq)]
pub enum SocketErrorType {
    UnexpectedEnd(String),
    InvalidSocketAddress(String, String),
}

impl fmt::Display for SocketErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEnd(arg) => write!(f, "Expected socket address after {arg}"),
            Self::InvalidSocketAddress(arg, addr) => write!(f, "Invalid socket address after {arg}: {addr}"),
        }
    }
}

/// Parses a socket address argument, doing domain name resolution if necessary. A missing port
/// defaults to [`DEFAULT_PORT`]. When a domain name resolves to several addresses, the first one
/// is used.
pub(super) fn parse_socket_arg(arg: String, maybe_arg2: Option<String>) -> Result<SocketAddr, SocketErrorType> {
    let arg2 = match maybe_arg2 {
        Some(value) => value,
        None => return Err(SocketErrorType::UnexpectedEnd(arg)),
    };

    let mut iter = match arg2.to_socket_addrs() {
        Ok(iter) => iter,
        Err(err) if err.kind() == ErrorKind::InvalidInput => match (arg2.as_str(), DEFAULT_PORT).to_socket_addrs() {
            Ok(iter) => iter,
            Err(_) => return Err(SocketErrorType::InvalidSocketAddress(arg, arg2)),
        },
        Err(_) => return Err(SocketErrorType::InvalidSocketAddress(arg, arg2)),
    };

    iter.next().ok_or(SocketErrorType::InvalidSocketAddress(arg, arg2))
}
