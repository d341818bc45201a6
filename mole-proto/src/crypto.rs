//! The frame cipher: XChaCha20-Poly1305 under a key derived from a shared passphrase.
//!
//! # Nonce reuse
//! A [`FrameCipher`] holds a single nonce for its whole life. The ingress peer generates it at
//! random, sends it in the clear at the start of the hello frame, and then both peers encrypt
//! every frame in both directions under that same key and nonce. This is what the wire format
//! prescribes, and it means two frames encrypted in one session share a keystream: the
//! confidentiality and integrity of AEAD do not hold across frames. Changing this requires a new
//! protocol version, since per-frame nonces would not interoperate with existing peers.

use std::fmt;

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Key, Tag, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
pub const TAG_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    Encrypt,
    Decrypt,
    InvalidNonceLength(usize),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encrypt => write!(f, "encryption failed"),
            Self::Decrypt => write!(f, "decryption failed: bad tag or malformed ciphertext"),
            Self::InvalidNonceLength(len) => write!(f, "nonce must be {NONCE_SIZE} bytes, got {len}"),
        }
    }
}

/// A symmetric key derived from the shared passphrase.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// Derives the key as the SHA-256 digest of the passphrase, truncated to [`KEY_SIZE`].
    pub fn derive(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&digest[..KEY_SIZE]);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

pub struct FrameCipher {
    cipher: XChaCha20Poly1305,
    nonce: [u8; NONCE_SIZE],
}

impl FrameCipher {
    /// Creates a cipher with a fresh nonce from the OS random number generator.
    pub fn new(key: &SharedKey) -> Self {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        Self::with_nonce(key, nonce)
    }

    pub fn with_nonce(key: &SharedKey, nonce: [u8; NONCE_SIZE]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
            nonce,
        }
    }

    pub fn export_nonce(&self) -> [u8; NONCE_SIZE] {
        self.nonce
    }

    /// Replaces this cipher's nonce with the one a peer sent in its hello frame.
    pub fn import_nonce(&mut self, nonce: &[u8]) -> Result<(), CryptoError> {
        self.nonce = nonce.try_into().map_err(|_| CryptoError::InvalidNonceLength(nonce.len()))?;
        Ok(())
    }

    /// Encrypts `plaintext`, appending `ciphertext || tag` to `out`.
    pub fn encrypt(&self, plaintext: &[u8], out: &mut Vec<u8>) -> Result<(), CryptoError> {
        let start = out.len();
        out.extend_from_slice(plaintext);

        let result = self
            .cipher
            .encrypt_in_place_detached(XNonce::from_slice(&self.nonce), b"", &mut out[start..]);

        match result {
            Ok(tag) => {
                out.extend_from_slice(&tag);
                Ok(())
            }
            Err(_) => {
                out.truncate(start);
                Err(CryptoError::Encrypt)
            }
        }
    }

    /// Decrypts `ciphertext || tag`, appending the plaintext to `out`. On failure, `out` is left
    /// as it was: nothing of the unauthenticated plaintext is kept.
    pub fn decrypt(&self, sealed: &[u8], out: &mut Vec<u8>) -> Result<(), CryptoError> {
        if sealed.len() < TAG_SIZE {
            return Err(CryptoError::Decrypt);
        }

        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);
        let start = out.len();
        out.extend_from_slice(ciphertext);

        let result = self.cipher.decrypt_in_place_detached(
            XNonce::from_slice(&self.nonce),
            b"",
            &mut out[start..],
            Tag::from_slice(tag),
        );

        if result.is_err() {
            out.truncate(start);
            return Err(CryptoError::Decrypt);
        }

        Ok(())
    }
}

impl fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCipher").field("nonce", &self.nonce).finish_non_exhaustive()
    }
}
