//! Accumulate-until-threshold receiving.
//!
//! A [`ReceiveBuffer`] is a fixed-capacity buffer plus a count of the bytes filled so far. Stage
//! parsers look at [`ReceiveBuffer::filled`] and either complete, or name a larger threshold; the
//! buffer then reads until at least that many bytes are filled and the stage is asked again. Once
//! a unit is consumed, whatever was read past it is moved to offset 0.

use std::{
    future::Future,
    io::{self, Error, ErrorKind},
    time::Duration,
};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::Progress;

pub struct ReceiveBuffer {
    buf: Box<[u8]>,
    filled: usize,
    idle_timeout: Option<Duration>,
}

impl ReceiveBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
            idle_timeout: None,
        }
    }

    /// Bounds every read issued by this buffer. A read that makes no progress for this long
    /// fails with [`ErrorKind::TimedOut`].
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Replaces the bound set by [`ReceiveBuffer::with_idle_timeout`], for reads issued from now on.
    pub fn set_idle_timeout(&mut self, idle_timeout: Option<Duration>) {
        self.idle_timeout = idle_timeout;
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Drops the first `count` filled bytes, moving the rest to the start of the buffer.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.filled);
        self.buf.copy_within(count..self.filled, 0);
        self.filled -= count;
    }

    /// Reads until at least `threshold` bytes are filled. Returns immediately, without reading,
    /// if that is already the case.
    ///
    /// Fails with [`ErrorKind::InvalidData`] if `threshold` exceeds the capacity, and with
    /// [`ErrorKind::UnexpectedEof`] if the reader closes first.
    pub async fn receive_at_least<R>(&mut self, reader: &mut R, threshold: usize) -> io::Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if threshold > self.buf.len() {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("Cannot wait for {threshold} bytes in a {}-byte buffer", self.buf.len()),
            ));
        }

        while self.filled < threshold {
            let read = with_idle_timeout(self.idle_timeout, reader.read(&mut self.buf[self.filled..])).await?;
            if read == 0 {
                return Err(Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("Connection closed with {} of {threshold} bytes received", self.filled),
                ));
            }

            self.filled += read;
            trace!("received {read} bytes, {} of {threshold} buffered", self.filled);
        }

        Ok(())
    }

    /// Runs a stage parser against the filled bytes, receiving more each time it asks for a
    /// larger threshold, until it completes or fails.
    pub async fn receive_stage<R, T, E, F>(&mut self, reader: &mut R, mut stage: F) -> Result<T, E>
    where
        R: AsyncRead + Unpin + ?Sized,
        E: From<io::Error>,
        F: FnMut(&[u8]) -> Result<Progress<T>, E>,
    {
        loop {
            match stage(self.filled())? {
                Progress::Complete(value) => return Ok(value),
                Progress::Incomplete(threshold) => self.receive_at_least(reader, threshold).await?,
            }
        }
    }
}

/// Awaits `future`, failing with [`ErrorKind::TimedOut`] if it takes longer than `idle_timeout`.
pub async fn with_idle_timeout<T, F>(idle_timeout: Option<Duration>, future: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match idle_timeout {
        None => future.await,
        Some(duration) => match tokio::time::timeout(duration, future).await {
            Ok(result) => result,
            Err(_) => Err(Error::new(ErrorKind::TimedOut, format!("No data received for {duration:?}"))),
        },
    }
}
