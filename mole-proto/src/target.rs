//! The SOCKS5 `CONNECT` request layout, and the [`TargetDescriptor`] that carries it verbatim
//! from the ingress peer to the egress peer.
//!
//! Layout: `ver(1) cmd(1) rsv(1) atyp(1) addr port(2)`, where `addr` is 4 bytes for IPv4 and
//! `len(1) name(len)` for a domain name. Both peers parse it with [`descriptor_progress`], so
//! they always agree on where the port is.

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddrV4},
};

use crate::{
    socks5::{ReplyCode, SocksAtyp, SocksCommand},
    Progress, U8ReprEnum,
};

const ATYP_OFFSET: usize = 3;
const ADDR_OFFSET: usize = 4;

/// Length of a request to an IPv4 target.
pub const IPV4_REQUEST_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    UnsupportedCommand(u8),
    UnsupportedAddressType(u8),
    Truncated,
}

impl RequestError {
    /// The SOCKS5 reply code that answers this error.
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            Self::UnsupportedCommand(_) => ReplyCode::CommandNotSupported,
            Self::UnsupportedAddressType(_) => ReplyCode::AtypNotSupported,
            Self::Truncated => ReplyCode::GeneralFailure,
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedCommand(cmd) => write!(f, "Unsupported SOCKS5 command: {cmd}"),
            Self::UnsupportedAddressType(atyp) => write!(f, "Unsupported SOCKS5 address type: {atyp}"),
            Self::Truncated => write!(f, "Target descriptor is shorter than its own length fields"),
        }
    }
}

/// Computes how long the descriptor at the start of `buf` is, without looking at the command.
pub fn descriptor_progress(buf: &[u8]) -> Result<Progress<usize>, RequestError> {
    if buf.len() <= ATYP_OFFSET {
        return Ok(Progress::Incomplete(ATYP_OFFSET + 1));
    }

    let len = match SocksAtyp::from_u8(buf[ATYP_OFFSET]) {
        Some(SocksAtyp::IPv4) => IPV4_REQUEST_LEN,
        Some(SocksAtyp::Domainname) => match buf.get(ADDR_OFFSET) {
            Some(&domain_len) => ADDR_OFFSET + 1 + domain_len as usize + 2,
            None => return Ok(Progress::Incomplete(ADDR_OFFSET + 1)),
        },
        _ => return Err(RequestError::UnsupportedAddressType(buf[ATYP_OFFSET])),
    };

    match buf.len() < len {
        true => Ok(Progress::Incomplete(len)),
        false => Ok(Progress::Complete(len)),
    }
}

/// Checks whether a full `CONNECT` request is buffered. On completion, returns the request's
/// length in bytes. Commands other than `CONNECT` are refused as soon as the command byte is
/// known.
pub fn request_progress(buf: &[u8]) -> Result<Progress<usize>, RequestError> {
    if let Some(&cmd) = buf.get(1) {
        if SocksCommand::from_u8(cmd) != Some(SocksCommand::Connect) {
            return Err(RequestError::UnsupportedCommand(cmd));
        }
    }

    descriptor_progress(buf)
}

/// A parsed destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Address(SocketAddrV4),
    Domainname(String, u16),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => address.fmt(f),
            Self::Domainname(domainname, port) => write!(f, "{domainname}:{port}"),
        }
    }
}

/// The raw bytes of a `CONNECT` request, from the version byte to the port. Never re-encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    bytes: Vec<u8>,
}

impl TargetDescriptor {
    /// Captures the request at the start of `buf`, which must already be complete.
    pub fn from_request(buf: &[u8]) -> Result<Self, RequestError> {
        match request_progress(buf)? {
            Progress::Complete(len) => Ok(Self { bytes: buf[..len].to_vec() }),
            Progress::Incomplete(_) => Err(RequestError::Truncated),
        }
    }

    /// Wraps descriptor bytes as received from a peer. Only the header is checked here, so that
    /// even a descriptor with an unsupported address type can be answered with a reply.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, RequestError> {
        match bytes.len() > ATYP_OFFSET {
            true => Ok(Self { bytes }),
            false => Err(RequestError::Truncated),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn address_type(&self) -> u8 {
        self.bytes[ATYP_OFFSET]
    }

    /// Parses the destination, with the same offsets used to delimit the request.
    pub fn target(&self) -> Result<Target, RequestError> {
        let len = match descriptor_progress(&self.bytes)? {
            Progress::Complete(len) => len,
            Progress::Incomplete(_) => return Err(RequestError::Truncated),
        };

        let port = u16::from_be_bytes([self.bytes[len - 2], self.bytes[len - 1]]);
        let addr = &self.bytes[ADDR_OFFSET..len - 2];

        match SocksAtyp::from_u8(self.address_type()) {
            Some(SocksAtyp::IPv4) => {
                let ip = Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]);
                Ok(Target::Address(SocketAddrV4::new(ip, port)))
            }
            _ => {
                let domainname = String::from_utf8_lossy(&addr[1..]).into_owned();
                Ok(Target::Domainname(domainname, port))
            }
        }
    }

    /// Builds a SOCKS5 reply by re-using these bytes with the second byte set to `code`.
    pub fn reply(&self, code: ReplyCode) -> Vec<u8> {
        let mut reply = self.bytes.clone();
        reply[1] = code.into_u8();
        reply
    }
}

impl fmt::Debug for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Ok(target) => write!(f, "TargetDescriptor({target})"),
            Err(_) => write!(f, "TargetDescriptor({:?})", self.bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain_request(domainname: &[u8], port: u16) -> Vec<u8> {
        let mut buf = vec![5, 1, 0, 3, domainname.len() as u8];
        buf.extend_from_slice(domainname);
        buf.extend_from_slice(&port.to_be_bytes());
        buf
    }

    #[test]
    fn ipv4_descriptor_keeps_request_bytes() {
        let request = [5, 1, 0, 1, 93, 184, 216, 34, 0, 80];
        let descriptor = TargetDescriptor::from_request(&request).unwrap();

        assert_eq!(descriptor.as_bytes(), &request);
        assert_eq!(
            descriptor.target(),
            Ok(Target::Address(SocketAddrV4::new(Ipv4Addr::new(93, 184, 216, 34), 80)))
        );
    }

    #[test]
    fn ipv4_descriptor_ignores_early_data() {
        let mut buf = vec![5, 1, 0, 1, 127, 0, 0, 1, 0x1f, 0x90];
        buf.extend_from_slice(b"GET / HTTP/1.1\r\n");

        assert_eq!(request_progress(&buf), Ok(Progress::Complete(IPV4_REQUEST_LEN)));
        let descriptor = TargetDescriptor::from_request(&buf).unwrap();
        assert_eq!(descriptor.len(), IPV4_REQUEST_LEN);
        assert_eq!(descriptor.target().unwrap().to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn domain_threshold_grows_with_length_byte() {
        let request = domain_request(b"example.com", 443);

        assert_eq!(request_progress(&request[..4]), Ok(Progress::Incomplete(5)));
        assert_eq!(request_progress(&request[..5]), Ok(Progress::Incomplete(18)));
        assert_eq!(request_progress(&request[..17]), Ok(Progress::Incomplete(18)));
        assert_eq!(request_progress(&request), Ok(Progress::Complete(18)));

        let descriptor = TargetDescriptor::from_request(&request).unwrap();
        assert_eq!(descriptor.target(), Ok(Target::Domainname("example.com".to_owned(), 443)));
    }

    #[test]
    fn short_domain_does_not_wait_for_ten_bytes() {
        let request = domain_request(b"a", 1);
        assert_eq!(request.len(), 8);
        assert_eq!(request_progress(&request), Ok(Progress::Complete(8)));
    }

    #[test]
    fn longest_domain_is_not_truncated() {
        let domainname = vec![b'x'; 255];
        let request = domain_request(&domainname, 8080);
        assert_eq!(request.len(), 262);

        let descriptor = TargetDescriptor::from_request(&request).unwrap();
        match descriptor.target().unwrap() {
            Target::Domainname(name, port) => {
                assert_eq!(name.len(), 255);
                assert!(name.bytes().all(|b| b == b'x'));
                assert_eq!(port, 8080);
            }
            other => panic!("Expected a domain name, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_command() {
        let request = [5, 2, 0, 1, 127, 0, 0, 1, 0, 80];
        let result = request_progress(&request);
        assert_eq!(result, Err(RequestError::UnsupportedCommand(2)));
        assert_eq!(result.unwrap_err().reply_code(), ReplyCode::CommandNotSupported);
    }

    #[test]
    fn ipv6_is_unsupported() {
        let request = [5, 1, 0, 4, 0, 0, 0, 0, 0, 0];
        let result = request_progress(&request);
        assert_eq!(result, Err(RequestError::UnsupportedAddressType(4)));
        assert_eq!(result.unwrap_err().reply_code().into_u8(), 0x08);
    }

    #[test]
    fn peer_descriptor_with_ipv6_still_replies() {
        let descriptor = TargetDescriptor::from_bytes(vec![5, 1, 0, 4, 1, 2, 3]).unwrap();
        assert_eq!(descriptor.target(), Err(RequestError::UnsupportedAddressType(4)));
        assert_eq!(descriptor.reply(ReplyCode::AtypNotSupported), vec![5, 8, 0, 4, 1, 2, 3]);
    }

    #[test]
    fn peer_descriptor_truncated() {
        assert_eq!(TargetDescriptor::from_bytes(vec![5, 1]), Err(RequestError::Truncated));

        let descriptor = TargetDescriptor::from_bytes(vec![5, 1, 0, 3, 20, b'a']).unwrap();
        assert_eq!(descriptor.target(), Err(RequestError::Truncated));
    }

    #[test]
    fn reply_overwrites_only_second_byte() {
        let request = domain_request(b"localhost", 22);
        let descriptor = TargetDescriptor::from_request(&request).unwrap();
        let reply = descriptor.reply(ReplyCode::HostUnreachable);

        assert_eq!(reply[1], 0x04);
        assert_eq!(reply[0], request[0]);
        assert_eq!(&reply[2..], &request[2..]);
    }

    #[test]
    fn split_points_do_not_change_the_result() {
        let request = domain_request(b"split.example.org", 8443);

        for split in 0..=request.len() {
            let mut threshold = match request_progress(&request[..split]).unwrap() {
                Progress::Incomplete(threshold) => threshold,
                Progress::Complete(len) => len,
            };

            // Feed bytes as a reader would, never past the current threshold.
            let mut filled = split;
            while let Progress::Incomplete(next) = request_progress(&request[..filled]).unwrap() {
                assert!(next > filled);
                threshold = next;
                filled = threshold;
            }

            assert_eq!(threshold, request.len());
            assert_eq!(request_progress(&request[..filled]), Ok(Progress::Complete(request.len())));
        }
    }
}
