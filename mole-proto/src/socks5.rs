//! SOCKS5 constants and the greeting stage.
//!
//! Only the "no authentication" method and the `CONNECT` command are served. The request layout
//! itself lives in [`target`](crate::target), since it is shared with the egress peer.

use std::fmt;

use crate::{Progress, U8ReprEnum};

pub const VERSION_BYTE: u8 = 5;

/// The reply sent to a client's greeting: version 5, no authentication required.
pub const GREETING_REPLY: [u8; 2] = [VERSION_BYTE, 0];

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Succeeded = 0,
    GeneralFailure = 1,
    NotAllowedByRuleset = 2,
    NetworkUnreachable = 3,
    HostUnreachable = 4,
    ConnectionRefused = 5,
    TTLExpired = 6,
    CommandNotSupported = 7,
    AtypNotSupported = 8,
}

impl U8ReprEnum for ReplyCode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Succeeded),
            1 => Some(Self::GeneralFailure),
            2 => Some(Self::NotAllowedByRuleset),
            3 => Some(Self::NetworkUnreachable),
            4 => Some(Self::HostUnreachable),
            5 => Some(Self::ConnectionRefused),
            6 => Some(Self::TTLExpired),
            7 => Some(Self::CommandNotSupported),
            8 => Some(Self::AtypNotSupported),
            _ => None,
        }
    }

    fn into_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::GeneralFailure => write!(f, "general failure"),
            Self::NotAllowedByRuleset => write!(f, "not allowed by ruleset"),
            Self::NetworkUnreachable => write!(f, "network unreachable"),
            Self::HostUnreachable => write!(f, "host unreachable"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::TTLExpired => write!(f, "TTL expired"),
            Self::CommandNotSupported => write!(f, "command not supported"),
            Self::AtypNotSupported => write!(f, "address type not supported"),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksAtyp {
    IPv4 = 1,
    Domainname = 3,
    IPv6 = 4,
}

impl U8ReprEnum for SocksAtyp {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::IPv4),
            3 => Some(Self::Domainname),
            4 => Some(Self::IPv6),
            _ => None,
        }
    }

    fn into_u8(self) -> u8 {
        self as u8
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksCommand {
    Connect = 1,
    Bind = 2,
    UdpAssociate = 3,
}

impl U8ReprEnum for SocksCommand {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Connect),
            2 => Some(Self::Bind),
            3 => Some(Self::UdpAssociate),
            _ => None,
        }
    }

    fn into_u8(self) -> u8 {
        self as u8
    }
}

/// The greeting was not a SOCKS5 greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidVersion(pub u8);

impl fmt::Display for InvalidVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Client requested invalid SOCKS version: {}", self.0)
    }
}

/// Checks whether a full greeting (`ver`, `nmethods`, `methods[nmethods]`) is buffered. On
/// completion, returns the greeting's length in bytes.
///
/// The offered methods are not inspected: the reply is always "no authentication".
pub fn greeting_progress(buf: &[u8]) -> Result<Progress<usize>, InvalidVersion> {
    if buf.len() < 2 {
        return Ok(Progress::Incomplete(2));
    }

    if buf[0] != VERSION_BYTE {
        return Err(InvalidVersion(buf[0]));
    }

    let len = 2 + buf[1] as usize;
    match buf.len() < len {
        true => Ok(Progress::Incomplete(len)),
        false => Ok(Progress::Complete(len)),
    }
}

/// Builds the reply sent when the ingress peer refuses a request on its own:
/// `05 rep 00 01 00.00.00.00 00 00`.
///
/// Replies relayed from the egress peer echo the request with only the reply code swapped in. This
/// one does not: the request is refused as soon as its command or address type is known, so the
/// rest of it may never have been received.
pub const fn error_reply(code: ReplyCode) -> [u8; 10] {
    [VERSION_BYTE, code as u8, 0, SocksAtyp::IPv4 as u8, 0, 0, 0, 0, 0, 0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_needs_method_count() {
        assert_eq!(greeting_progress(&[]), Ok(Progress::Incomplete(2)));
        assert_eq!(greeting_progress(&[5]), Ok(Progress::Incomplete(2)));
        assert_eq!(greeting_progress(&[5, 3, 0]), Ok(Progress::Incomplete(5)));
        assert_eq!(greeting_progress(&[5, 3, 0, 1, 2]), Ok(Progress::Complete(5)));
    }

    #[test]
    fn greeting_ignores_trailing_bytes() {
        assert_eq!(greeting_progress(&[5, 1, 0, 5, 1, 0]), Ok(Progress::Complete(3)));
    }

    #[test]
    fn greeting_without_methods() {
        assert_eq!(greeting_progress(&[5, 0]), Ok(Progress::Complete(2)));
    }

    #[test]
    fn greeting_rejects_socks4() {
        assert_eq!(greeting_progress(&[4, 1]), Err(InvalidVersion(4)));
    }

    #[test]
    fn error_reply_shape() {
        assert_eq!(error_reply(ReplyCode::AtypNotSupported), [5, 8, 0, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(error_reply(ReplyCode::CommandNotSupported)[1], 0x07);
    }

    #[test]
    fn reply_codes_round_trip_through_u8() {
        for value in 0..=8u8 {
            let code = ReplyCode::from_u8(value).unwrap();
            assert_eq!(code.into_u8(), value);
        }

        assert_eq!(ReplyCode::from_u8(9), None);
    }
}
