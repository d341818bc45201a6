//! The local side of a tunnel: serves SOCKS5 to an application, then relays its connection through
//! an encrypted tunnel to the egress peer.
//!
//! The SOCKS5 reply the application sees is not produced here but by the egress peer, once it has
//! tried to reach the destination. It arrives as the first frame from the tunnel and is forwarded
//! as-is. Only requests that cannot be served at all are answered locally.

use std::{net::SocketAddr, rc::Rc};

use mole_proto::{
    crypto::FrameCipher,
    frame::{encode_hello, MAX_FRAME_LEN},
    receive::{with_idle_timeout, ReceiveBuffer},
    socks5::{error_reply, greeting_progress, GREETING_REPLY},
    target::{request_progress, TargetDescriptor},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tracing::{debug, info, warn};

use crate::{
    relay::{open_pump, seal_pump, Activity},
    session::{encode_nonce, idle_until_closed, log_session_error, SessionConfig, SessionError},
};

/// Capacity of the buffer SOCKS5 messages are received into. Bounds the greeting to 2 + 255 bytes
/// and a domain request to 7 + 255.
pub const SOCKS_BUFFER_SIZE: usize = 8192;

enum IngressStage {
    AwaitGreeting,
    AwaitCommand,
    TunnelConnecting(TargetDescriptor),
    Streaming(TcpStream),
    Closed,
}

pub struct IngressSession<C> {
    config: Rc<SessionConfig>,
    egress: SocketAddr,
    client: C,
    client_buf: ReceiveBuffer,
    cipher: FrameCipher,
}

impl<C> IngressSession<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(config: Rc<SessionConfig>, egress: SocketAddr, client: C) -> Self {
        let client_buf = ReceiveBuffer::new(SOCKS_BUFFER_SIZE).with_idle_timeout(config.idle_timeout);
        let cipher = FrameCipher::new(&config.key);

        Self {
            config,
            egress,
            client,
            client_buf,
            cipher,
        }
    }

    pub async fn run(mut self) -> Result<(), SessionError> {
        let mut stage = IngressStage::AwaitGreeting;

        loop {
            stage = match stage {
                IngressStage::AwaitGreeting => self.await_greeting().await?,
                IngressStage::AwaitCommand => self.await_command().await?,
                IngressStage::TunnelConnecting(descriptor) => self.connect_tunnel(descriptor).await?,
                IngressStage::Streaming(tunnel) => return self.stream(tunnel).await,
                IngressStage::Closed => return Ok(()),
            };
        }
    }

    async fn await_greeting(&mut self) -> Result<IngressStage, SessionError> {
        let len = self
            .client_buf
            .receive_stage(&mut self.client, |buf| greeting_progress(buf).map_err(SessionError::from))
            .await?;

        self.client_buf.consume(len);
        self.client.write_all(&GREETING_REPLY).await?;
        Ok(IngressStage::AwaitCommand)
    }

    async fn await_command(&mut self) -> Result<IngressStage, SessionError> {
        let result = self
            .client_buf
            .receive_stage(&mut self.client, |buf| request_progress(buf).map_err(SessionError::from))
            .await;

        let len = match result {
            Ok(len) => len,
            Err(SessionError::Request(error)) => {
                warn!("{error}");
                self.client.write_all(&error_reply(error.reply_code())).await?;
                idle_until_closed(&mut self.client, self.config.idle_timeout).await;
                return Ok(IngressStage::Closed);
            }
            Err(error) => return Err(error),
        };

        let descriptor = TargetDescriptor::from_request(&self.client_buf.filled()[..len])?;
        self.client_buf.consume(len);

        if let Ok(target) = descriptor.target() {
            info!("target: {target}");
        }

        Ok(IngressStage::TunnelConnecting(descriptor))
    }

    async fn connect_tunnel(&mut self, descriptor: TargetDescriptor) -> Result<IngressStage, SessionError> {
        let mut tunnel = match with_idle_timeout(self.config.idle_timeout, TcpStream::connect(self.egress)).await {
            Ok(tunnel) => tunnel,
            Err(error) => {
                debug!("could not connect to egress peer at {}: {error}", self.egress);
                return Ok(IngressStage::Closed);
            }
        };

        let mut hello = Vec::new();
        encode_hello(&self.cipher, descriptor.as_bytes(), &mut hello)?;
        tunnel.write_all(&hello).await?;

        debug!("sent hello to {} with nonce {}", self.egress, encode_nonce(&self.cipher.export_nonce()));
        Ok(IngressStage::Streaming(tunnel))
    }

    async fn stream(self, mut tunnel: TcpStream) -> Result<(), SessionError> {
        let idle_timeout = self.config.idle_timeout;
        let early_data = self.client_buf.filled().to_vec();
        let cipher = &self.cipher;

        let (mut client_read, mut client_write) = tokio::io::split(self.client);
        let (mut tunnel_read, mut tunnel_write) = tunnel.split();
        let mut tunnel_buf = ReceiveBuffer::new(MAX_FRAME_LEN);
        let activity = Activity::new();

        let pumps = async {
            tokio::join!(
                seal_pump(&mut client_read, &mut tunnel_write, cipher, &activity, &early_data),
                open_pump(&mut tunnel_read, &mut tunnel_buf, &mut client_write, cipher, &activity),
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
            Ok(bytes) => debug!("client to tunnel closed after {bytes} bytes"),
            Err(error) => log_session_error("client to tunnel", &error),
        }

        match received {
            Ok(bytes) => debug!("tunnel to client closed after {bytes} bytes"),
            Err(error) => log_session_error("tunnel to client", &error),
        }

        Ok(())
    }
}
