//! Accepting connections and running their sessions.
//!
//! Accepting happens on the main thread. Every accepted stream is handed to a single worker
//! thread, which runs all sessions as local tasks on its own runtime.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    rc::Rc,
    thread,
    time::Duration,
};

use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::LocalSet,
};
use tracing::{debug, error, info_span, Instrument};

use crate::{
    egress::EgressSession,
    ingress::IngressSession,
    resolver::Resolver,
    session::{log_session_error, SessionConfig},
};

const LISTEN_BACKLOG: u32 = 1024;

/// Which session the worker starts for each accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
    /// Serve SOCKS5 and tunnel to the egress peer at this address.
    Ingress { egress: SocketAddr },

    /// Serve tunnels from ingress peers.
    Egress { dns_cache_ttl: Option<Duration> },
}

/// Binds a listener on all IPv4 interfaces, with address reuse enabled.
pub fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
    socket.listen(LISTEN_BACKLOG)
}

/// Starts the worker thread. Streams sent through the returned channel are started as sessions
/// of the given kind, once each. The worker exits when the sender is dropped.
pub fn spawn_worker(config: SessionConfig, kind: SessionKind) -> io::Result<UnboundedSender<std::net::TcpStream>> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    thread::Builder::new().name("mole-worker".to_owned()).spawn(move || {
        LocalSet::new().block_on(&runtime, run_worker(receiver, config, kind));
    })?;

    Ok(sender)
}

enum WorkerSessions {
    Ingress(SocketAddr),
    Egress(Rc<Resolver>),
}

async fn run_worker(mut receiver: UnboundedReceiver<std::net::TcpStream>, config: SessionConfig, kind: SessionKind) {
    let config = Rc::new(config);
    let sessions = match kind {
        SessionKind::Ingress { egress } => WorkerSessions::Ingress(egress),
        SessionKind::Egress { dns_cache_ttl } => WorkerSessions::Egress(Rc::new(Resolver::new(dns_cache_ttl))),
    };

    while let Some(std_stream) = receiver.recv().await {
        let stream = match TcpStream::from_std(std_stream) {
            Ok(stream) => stream,
            Err(error) => {
                error!("could not register accepted connection: {error}");
                continue;
            }
        };

        let peer = stream.peer_addr().map(|address| address.to_string()).unwrap_or_default();
        let config = Rc::clone(&config);

        match &sessions {
            WorkerSessions::Ingress(egress) => {
                let session = IngressSession::new(config, *egress, stream);
                let span = info_span!("ingress", %peer);
                tokio::task::spawn_local(
                    async move {
                        if let Err(error) = session.run().await {
                            log_session_error("session ended", &error);
                        }
                    }
                    .instrument(span),
                );
            }
            WorkerSessions::Egress(resolver) => {
                let session = EgressSession::new(config, Rc::clone(resolver), stream);
                let span = info_span!("egress", %peer);
                tokio::task::spawn_local(
                    async move {
                        if let Err(error) = session.run().await {
                            log_session_error("session ended", &error);
                        }
                    }
                    .instrument(span),
                );
            }
        }
    }

    debug!("worker stopped accepting sessions");
}

/// Accepts connections forever, handing each one to the worker. Accept errors are logged and
/// skipped. Returns only if the worker is gone.
pub async fn run_acceptor(listener: TcpListener, sender: UnboundedSender<std::net::TcpStream>) {
    loop {
        let (stream, from) = match listener.accept().await {
            Ok(t) => t,
            Err(error) => {
                error!("error accepting new incoming connection: {error}");
                continue;
            }
        };

        debug!("accept from {from}");

        let std_stream = match stream.into_std() {
            Ok(std_stream) => std_stream,
            Err(error) => {
                error!("could not hand over connection from {from}: {error}");
                continue;
            }
        };

        if sender.send(std_stream).is_err() {
            error!("worker is gone, no longer accepting connections");
            return;
        }
    }
}
