//! Length-prefixed AEAD frames.
//!
//! A frame is `length(u16, big endian) || ciphertext || tag`, where `length` counts the
//! ciphertext and the tag. The first frame from the ingress peer is a hello frame, which is a
//! regular frame preceded by the raw [`NONCE_SIZE`] bytes of the session nonce.
//!
//! Declared lengths shorter than [`TAG_SIZE`] are rejected before any decryption is attempted.
//! Since receive buffers are sized for [`MAX_HELLO_LEN`], every length a u16 can declare fits.

use std::fmt;

use crate::{
    crypto::{CryptoError, FrameCipher, NONCE_SIZE, TAG_SIZE},
    Progress,
};

pub const LENGTH_PREFIX_SIZE: usize = 2;

/// The largest `ciphertext || tag` a length prefix can describe.
pub const MAX_SEALED_LEN: usize = u16::MAX as usize;

/// The largest plaintext that fits in a single frame.
pub const MAX_PLAINTEXT_LEN: usize = MAX_SEALED_LEN - TAG_SIZE;

pub const MAX_FRAME_LEN: usize = LENGTH_PREFIX_SIZE + MAX_SEALED_LEN;

pub const MAX_HELLO_LEN: usize = NONCE_SIZE + MAX_FRAME_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The declared length cannot even hold an authentication tag.
    Malformed(u16),

    /// The plaintext is too long to be described by a u16 length.
    TooLarge(usize),

    Crypto(CryptoError),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(len) => write!(f, "Malformed frame: declared length {len} is shorter than the {TAG_SIZE}-byte tag"),
            Self::TooLarge(len) => write!(f, "Plaintext of {len} bytes exceeds the {MAX_PLAINTEXT_LEN}-byte frame limit"),
            Self::Crypto(error) => error.fmt(f),
        }
    }
}

impl From<CryptoError> for FrameError {
    fn from(value: CryptoError) -> Self {
        Self::Crypto(value)
    }
}

fn sealed_len_progress(buf: &[u8], offset: usize) -> Result<Progress<usize>, FrameError> {
    let header_end = offset + LENGTH_PREFIX_SIZE;
    if buf.len() < header_end {
        return Ok(Progress::Incomplete(header_end));
    }

    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
    if (len as usize) < TAG_SIZE {
        return Err(FrameError::Malformed(len));
    }

    let total = header_end + len as usize;
    match buf.len() < total {
        true => Ok(Progress::Incomplete(total)),
        false => Ok(Progress::Complete(total)),
    }
}

/// Checks whether a full frame is buffered. On completion, returns the frame's length including
/// its length prefix.
pub fn frame_progress(buf: &[u8]) -> Result<Progress<usize>, FrameError> {
    sealed_len_progress(buf, 0)
}

/// Checks whether a full hello frame is buffered. On completion, returns the hello's length
/// including the nonce and the length prefix.
pub fn hello_progress(buf: &[u8]) -> Result<Progress<usize>, FrameError> {
    sealed_len_progress(buf, NONCE_SIZE)
}

fn seal_into(cipher: &FrameCipher, plaintext: &[u8], out: &mut Vec<u8>) -> Result<(), FrameError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(FrameError::TooLarge(plaintext.len()));
    }

    let len = (plaintext.len() + TAG_SIZE) as u16;
    out.extend_from_slice(&len.to_be_bytes());
    cipher.encrypt(plaintext, out)?;
    Ok(())
}

/// Encrypts `plaintext` into a length-prefixed frame, replacing the contents of `out`.
pub fn encode_frame(cipher: &FrameCipher, plaintext: &[u8], out: &mut Vec<u8>) -> Result<(), FrameError> {
    out.clear();
    seal_into(cipher, plaintext, out)
}

/// Builds the hello frame: `nonce || length || AEAD(descriptor)`, replacing the contents of `out`.
pub fn encode_hello(cipher: &FrameCipher, descriptor: &[u8], out: &mut Vec<u8>) -> Result<(), FrameError> {
    out.clear();
    out.extend_from_slice(&cipher.export_nonce());
    seal_into(cipher, descriptor, out)
}

/// Decrypts a complete frame, as delimited by [`frame_progress`], replacing the contents of `out`
/// with its plaintext.
pub fn decode_frame(cipher: &FrameCipher, frame: &[u8], out: &mut Vec<u8>) -> Result<(), FrameError> {
    out.clear();
    let len = match frame_progress(frame)? {
        Progress::Complete(len) => len,
        Progress::Incomplete(_) => return Err(FrameError::Crypto(CryptoError::Decrypt)),
    };

    cipher.decrypt(&frame[LENGTH_PREFIX_SIZE..len], out)?;
    Ok(())
}

/// Installs the nonce carried by a complete hello frame into `cipher`, then decrypts the hello's
/// payload into `out`.
pub fn decode_hello(cipher: &mut FrameCipher, hello: &[u8], out: &mut Vec<u8>) -> Result<(), FrameError> {
    out.clear();
    let len = match hello_progress(hello)? {
        Progress::Complete(len) => len,
        Progress::Incomplete(_) => return Err(FrameError::Crypto(CryptoError::Decrypt)),
    };

    cipher.import_nonce(&hello[..NONCE_SIZE])?;
    cipher.decrypt(&hello[(NONCE_SIZE + LENGTH_PREFIX_SIZE)..len], out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::crypto::SharedKey;

    use super::*;

    fn cipher() -> FrameCipher {
        FrameCipher::with_nonce(&SharedKey::derive("secret"), [3u8; NONCE_SIZE])
    }

    #[test]
    fn frame_prefix_counts_ciphertext_and_tag() {
        let mut frame = Vec::new();
        encode_frame(&cipher(), b"0123456789", &mut frame).unwrap();

        assert_eq!(frame.len(), LENGTH_PREFIX_SIZE + 10 + TAG_SIZE);
        assert_eq!(u16::from_be_bytes([frame[0], frame[1]]) as usize, 10 + TAG_SIZE);
        assert_eq!(frame_progress(&frame), Ok(Progress::Complete(frame.len())));

        let mut plaintext = Vec::new();
        decode_frame(&cipher(), &frame, &mut plaintext).unwrap();
        assert_eq!(plaintext, b"0123456789");
    }

    #[test]
    fn empty_payload_round_trips() {
        let mut frame = Vec::new();
        encode_frame(&cipher(), b"", &mut frame).unwrap();
        assert_eq!(frame.len(), LENGTH_PREFIX_SIZE + TAG_SIZE);

        let mut plaintext = vec![9, 9];
        decode_frame(&cipher(), &frame, &mut plaintext).unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn zero_length_prefix_is_malformed() {
        assert_eq!(frame_progress(&[0, 0]), Err(FrameError::Malformed(0)));
        assert_eq!(frame_progress(&[0, 15, 1, 2]), Err(FrameError::Malformed(15)));
    }

    #[test]
    fn frame_threshold_grows_after_prefix() {
        assert_eq!(frame_progress(&[]), Ok(Progress::Incomplete(2)));
        assert_eq!(frame_progress(&[1]), Ok(Progress::Incomplete(2)));
        assert_eq!(frame_progress(&[0, 20]), Ok(Progress::Incomplete(22)));
        assert_eq!(frame_progress(&[0xFF, 0xFF]), Ok(Progress::Incomplete(MAX_FRAME_LEN)));
    }

    #[test]
    fn largest_plaintext_fits() {
        let plaintext = vec![0x5A; MAX_PLAINTEXT_LEN];
        let mut frame = Vec::new();
        encode_frame(&cipher(), &plaintext, &mut frame).unwrap();
        assert_eq!(frame.len(), MAX_FRAME_LEN);

        let mut decoded = Vec::new();
        decode_frame(&cipher(), &frame, &mut decoded).unwrap();
        assert_eq!(decoded, plaintext);

        let too_large = vec![0; MAX_PLAINTEXT_LEN + 1];
        assert_eq!(encode_frame(&cipher(), &too_large, &mut frame), Err(FrameError::TooLarge(MAX_PLAINTEXT_LEN + 1)));
    }

    #[test]
    fn tampered_frame_fails() {
        let mut frame = Vec::new();
        encode_frame(&cipher(), b"payload", &mut frame).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x80;

        let mut plaintext = Vec::new();
        assert_eq!(
            decode_frame(&cipher(), &frame, &mut plaintext),
            Err(FrameError::Crypto(CryptoError::Decrypt))
        );
        assert!(plaintext.is_empty());
    }

    #[test]
    fn hello_carries_nonce_and_descriptor() {
        let key = SharedKey::derive("secret");
        let ingress = FrameCipher::new(&key);
        let descriptor = [5, 1, 0, 1, 93, 184, 216, 34, 0, 80];

        let mut hello = Vec::new();
        encode_hello(&ingress, &descriptor, &mut hello).unwrap();
        assert_eq!(&hello[..NONCE_SIZE], &ingress.export_nonce());
        assert_eq!(hello_progress(&hello), Ok(Progress::Complete(hello.len())));
        assert_eq!(hello_progress(&hello[..NONCE_SIZE + 1]), Ok(Progress::Incomplete(NONCE_SIZE + 2)));

        let mut egress = FrameCipher::new(&key);
        let mut payload = Vec::new();
        decode_hello(&mut egress, &hello, &mut payload).unwrap();
        assert_eq!(payload, descriptor);
        assert_eq!(egress.export_nonce(), ingress.export_nonce());

        // Later frames in either direction use the nonce from the hello.
        let mut frame = Vec::new();
        encode_frame(&egress, b"reply", &mut frame).unwrap();
        decode_frame(&ingress, &frame, &mut payload).unwrap();
        assert_eq!(payload, b"reply");
    }

    #[test]
    fn frames_back_to_back_are_delimited() {
        let cipher = cipher();
        let mut stream = Vec::new();
        let mut frame = Vec::new();
        let chunks: [&[u8]; 3] = [b"first", b"second", b""];
        for chunk in chunks {
            encode_frame(&cipher, chunk, &mut frame).unwrap();
            stream.extend_from_slice(&frame);
        }

        let mut offset = 0;
        let mut decoded = Vec::new();
        while offset < stream.len() {
            let len = match frame_progress(&stream[offset..]).unwrap() {
                Progress::Complete(len) => len,
                Progress::Incomplete(_) => panic!("Stream ended mid-frame"),
            };

            let mut plaintext = Vec::new();
            decode_frame(&cipher, &stream[offset..offset + len], &mut plaintext).unwrap();
            decoded.push(plaintext);
            offset += len;
        }

        assert_eq!(decoded, vec![b"first".to_vec(), b"second".to_vec(), Vec::new()]);
    }
}
