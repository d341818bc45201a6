//! The two halves of a streaming session. A seal pump reads plaintext from a socket and writes
//! frames, an open pump reads frames and writes plaintext. Each one stops on its own; the other
//! direction is unaffected.
//!
//! Both halves of a session share one [`Activity`], so the session only counts as idle once
//! neither direction has moved data for the whole idle timeout.

use std::{cell::Cell, time::Duration};

use mole_proto::{
    crypto::FrameCipher,
    frame::{decode_frame, encode_frame, frame_progress},
    receive::ReceiveBuffer,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::Instant,
};
use tracing::{debug, trace};

use crate::session::SessionError;

/// How much plaintext is read from a socket at once.
pub const READ_CHUNK_SIZE: usize = 8192;

/// When data last moved through a session, in either direction.
#[derive(Debug)]
pub struct Activity {
    last: Cell<Instant>,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            last: Cell::new(Instant::now()),
        }
    }

    pub fn touch(&self) {
        self.last.set(Instant::now());
    }

    /// Completes once nothing has touched this for `idle_timeout`. Never completes without one.
    pub async fn idle(&self, idle_timeout: Option<Duration>) {
        let Some(idle_timeout) = idle_timeout else {
            return std::future::pending().await;
        };

        loop {
            let deadline = self.last.get() + idle_timeout;
            if Instant::now() >= deadline {
                return;
            }

            tokio::time::sleep_until(deadline).await;
        }
    }
}

/// Encrypts everything read from `reader` into frames written to `writer`. `pending` holds bytes
/// that were already read off the source during the handshake and are sent first.
///
/// On EOF the write side of `writer` is shut down. Returns the amount of plaintext bytes relayed.
pub async fn seal_pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    cipher: &FrameCipher,
    activity: &Activity,
    pending: &[u8],
) -> Result<u64, SessionError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut frame = Vec::with_capacity(READ_CHUNK_SIZE + 32);
    let mut total = 0u64;

    if !pending.is_empty() {
        for chunk in pending.chunks(READ_CHUNK_SIZE) {
            encode_frame(cipher, chunk, &mut frame)?;
            writer.write_all(&frame).await?;
            activity.touch();
        }

        total += pending.len() as u64;
        debug!("forwarded {} early bytes", pending.len());
    }

    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            writer.shutdown().await?;
            return Ok(total);
        }

        activity.touch();
        encode_frame(cipher, &buf[..read], &mut frame)?;
        writer.write_all(&frame).await?;
        activity.touch();
        total += read as u64;
        trace!("sealed {read} bytes into a {}-byte frame", frame.len());
    }
}

/// Decrypts frames from `reader` and writes their plaintext to `writer`, in arrival order. Whatever
/// `buffer` already holds is treated as the start of the frame stream.
///
/// A close between frames shuts down the write side of `writer`; a close mid-frame is an error.
/// Returns the amount of plaintext bytes relayed.
pub async fn open_pump<R, W>(
    reader: &mut R,
    buffer: &mut ReceiveBuffer,
    writer: &mut W,
    cipher: &FrameCipher,
    activity: &Activity,
) -> Result<u64, SessionError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut plaintext = Vec::with_capacity(READ_CHUNK_SIZE);
    let mut total = 0u64;

    loop {
        let result = buffer.receive_stage(reader, |buf| frame_progress(buf).map_err(SessionError::from)).await;

        let len = match result {
            Ok(len) => len,
            Err(SessionError::IO(error)) if error.kind() == std::io::ErrorKind::UnexpectedEof && buffer.is_empty() => {
                writer.shutdown().await?;
                return Ok(total);
            }
            Err(error) => return Err(error),
        };

        activity.touch();
        decode_frame(cipher, &buffer.filled()[..len], &mut plaintext)?;
        buffer.consume(len);

        writer.write_all(&plaintext).await?;
        activity.touch();
        total += plaintext.len() as u64;
        trace!("opened a {len}-byte frame into {} bytes", plaintext.len());
    }
}
