//! The remote side of a tunnel: receives the hello from an ingress peer, connects to the
//! destination it names, answers with a SOCKS5 reply frame and then relays.

use std::{
    io::{self, Error, ErrorKind},
    net::SocketAddr,
    rc::Rc,
    time::Duration,
};

use mole_proto::{
    crypto::FrameCipher,
    frame::{decode_hello, encode_frame, hello_progress, MAX_HELLO_LEN},
    receive::{with_idle_timeout, ReceiveBuffer},
    socks5::ReplyCode,
    target::{RequestError, Target, TargetDescriptor},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tracing::{debug, info, warn};

use crate::{
    relay::{open_pump, seal_pump, Activity},
    resolver::Resolve,
    session::{encode_nonce, idle_until_closed, log_session_error, SessionConfig, SessionError},
};

enum EgressStage {
    AwaitHello,
    Connecting(TargetDescriptor),
    Replying(TargetDescriptor, Result<TcpStream, ReplyCode>),
    Streaming(TcpStream),
    Idle,
    Closed,
}

pub struct EgressSession<T, R> {
    config: Rc<SessionConfig>,
    resolver: Rc<R>,
    tunnel: T,
    tunnel_buf: ReceiveBuffer,
    cipher: FrameCipher,
}

impl<T, R> EgressSession<T, R>
where
    T: AsyncRead + AsyncWrite + Unpin,
    R: Resolve,
{
    pub fn new(config: Rc<SessionConfig>, resolver: Rc<R>, tunnel: T) -> Self {
        let tunnel_buf = ReceiveBuffer::new(MAX_HELLO_LEN).with_idle_timeout(config.idle_timeout);
        let cipher = FrameCipher::new(&config.key);

        Self {
            config,
            resolver,
            tunnel,
            tunnel_buf,
            cipher,
        }
    }

    pub async fn run(mut self) -> Result<(), SessionError> {
        let mut stage = EgressStage::AwaitHello;

        loop {
            stage = match stage {
                EgressStage::AwaitHello => self.await_hello().await?,
                EgressStage::Connecting(descriptor) => self.connect(descriptor).await?,
                EgressStage::Replying(descriptor, outcome) => self.reply(descriptor, outcome).await?,
                EgressStage::Streaming(target) => return self.stream(target).await,
                EgressStage::Idle => {
                    idle_until_closed(&mut self.tunnel, self.config.idle_timeout).await;
                    EgressStage::Closed
                }
                EgressStage::Closed => return Ok(()),
            };
        }
    }

    async fn await_hello(&mut self) -> Result<EgressStage, SessionError> {
        let len = self
            .tunnel_buf
            .receive_stage(&mut self.tunnel, |buf| hello_progress(buf).map_err(SessionError::from))
            .await?;

        let mut payload = Vec::new();
        decode_hello(&mut self.cipher, &self.tunnel_buf.filled()[..len], &mut payload)?;
        self.tunnel_buf.consume(len);
        debug!("hello with nonce {}", encode_nonce(&self.cipher.export_nonce()));

        let descriptor = TargetDescriptor::from_bytes(payload)?;
        Ok(EgressStage::Connecting(descriptor))
    }

    async fn connect(&mut self, descriptor: TargetDescriptor) -> Result<EgressStage, SessionError> {
        let outcome = match descriptor.target() {
            Ok(Target::Address(address)) => {
                info!("target: {address}");
                let address = SocketAddr::V4(address);
                connect_any(&[address], self.config.idle_timeout)
                    .await
                    .map_err(|error| connect_failed(&address.to_string(), error))
            }
            Ok(Target::Domainname(domainname, port)) => {
                info!("target: {domainname}:{port}");
                match self.resolver.resolve(&domainname, port).await {
                    Ok(addresses) if !addresses.is_empty() => connect_any(&addresses, self.config.idle_timeout)
                        .await
                        .map_err(|error| connect_failed(&domainname, error)),
                    Ok(_) => {
                        debug!("{domainname} resolved to no addresses");
                        Err(ReplyCode::HostUnreachable)
                    }
                    Err(error) => {
                        debug!("could not resolve {domainname}: {error}");
                        Err(ReplyCode::HostUnreachable)
                    }
                }
            }
            Err(RequestError::Truncated) => return Err(RequestError::Truncated.into()),
            Err(error) => {
                warn!("{error}");
                Err(error.reply_code())
            }
        };

        Ok(EgressStage::Replying(descriptor, outcome))
    }

    async fn reply(&mut self, descriptor: TargetDescriptor, outcome: Result<TcpStream, ReplyCode>) -> Result<EgressStage, SessionError> {
        let code = match &outcome {
            Ok(_) => ReplyCode::Succeeded,
            Err(code) => *code,
        };

        let mut frame = Vec::new();
        encode_frame(&self.cipher, &descriptor.reply(code), &mut frame)?;
        self.tunnel.write_all(&frame).await?;

        match outcome {
            Ok(target) => Ok(EgressStage::Streaming(target)),
            Err(code) => {
                debug!("replied {code}, waiting for the peer to close");
                Ok(EgressStage::Idle)
            }
        }
    }

    async fn stream(mut self, mut target: TcpStream) -> Result<(), SessionError> {
        // From here on, idleness is judged for the session as a whole.
        self.tunnel_buf.set_idle_timeout(None);

        let idle_timeout = self.config.idle_timeout;
        let cipher = &self.cipher;
        let tunnel_buf = &mut self.tunnel_buf;

        let (mut tunnel_read, mut tunnel_write) = tokio::io::split(self.tunnel);
        let (mut target_read, mut target_write) = target.split();
        let activity = Activity::new();

        let pumps = async {
            tokio::join!(
                open_pump(&mut tunnel_read, tunnel_buf, &mut target_write, cipher, &activity),
                seal_pump(&mut target_read, &mut tunnel_write, cipher, &activity, &[]),
            )
        };

        let (sent, received) = tokio::select! {
            results = pumps => results,
            () = activity.idle(idle_timeout) => {
                debug!("no traffic in either direction, closing on idle timeout");
                return Ok(());
            }
        };

        match sent {
            Ok(bytes) => debug!("tunnel to target closed after {bytes} bytes"),
            Err(error) => log_session_error("tunnel to target", &error),
        }

        match received {
            Ok(bytes) => debug!("target to tunnel closed after {bytes} bytes"),
            Err(error) => log_session_error("target to tunnel", &error),
        }

        Ok(())
    }
}

fn connect_failed(target: &str, error: Error) -> ReplyCode {
    debug!("could not connect to {target}: {error}");
    ReplyCode::NetworkUnreachable
}

/// Connects to the first address that accepts, trying them in order. Fails with the last error
/// seen if none does.
pub async fn connect_any(addresses: &[SocketAddr], timeout: Option<Duration>) -> io::Result<TcpStream> {
    let mut last_error = None;

    for address in addresses {
        match with_idle_timeout(timeout, TcpStream::connect(*address)).await {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                debug!("connect to {address} failed: {error}");
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::new(ErrorKind::InvalidInput, "No addresses to connect to")))
}
