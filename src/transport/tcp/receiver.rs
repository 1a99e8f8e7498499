// ABOUTME: OSC over TCP, receiving side
// ABOUTME: Accept loop with veto and error hooks, connection bookkeeping and shutdown

use super::connection::{ConnectionId, ConnectionTable};
use crate::transport::config::ReceiverConfig;
use crate::transport::dispatcher::Dispatcher;
use crate::transport::framing::PacketFraming;
use crate::transport::{OnAcceptErrorFn, OnAcceptFn, Receiver};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;

const LISTEN_BACKLOG: u32 = 1024;

/// Accepts TCP connections and dispatches the messages framed on each.
///
/// Every accepted socket gets an id from a per-receiver counter and its own
/// read task. A failed connection is reported to the connection error
/// callback (or logged) and removed.
#[derive(Debug)]
pub struct ReceiverTcp {
    local_addr: SocketAddr,
    framing: Arc<dyn PacketFraming>,
    dispatcher: Arc<Dispatcher>,
    table: Arc<ConnectionTable>,
    acceptor: Option<Arc<TcpListener>>,
    accept_shutdown: watch::Sender<bool>,
}

impl ReceiverTcp {
    /// Receiver on `port` on every IPv4 interface, length-prefix framed
    pub fn new(port: u16) -> Self {
        Self::with_config(ReceiverConfig::new(port))
    }

    /// Receiver from a full configuration
    pub fn with_config(config: ReceiverConfig) -> Self {
        let (accept_shutdown, _) = watch::channel(false);
        Self {
            local_addr: config.local_addr,
            framing: config.framing.into_framing(),
            dispatcher: Arc::new(Dispatcher::with_disregarded_limit(config.disregarded_limit)),
            table: Arc::new(ConnectionTable::new(config.max_frame_size)),
            acceptor: None,
            accept_shutdown,
        }
    }

    /// Receiver reading from one already connected socket, tracked as
    /// connection 0. There is no acceptor.
    pub fn from_stream(stream: TcpStream, framing: Arc<dyn PacketFraming>) -> crate::Result<Self> {
        let (accept_shutdown, _) = watch::channel(false);
        let receiver = Self {
            local_addr: stream.local_addr()?,
            framing,
            dispatcher: Arc::new(Dispatcher::new()),
            table: Arc::new(ConnectionTable::default()),
            acceptor: None,
            accept_shutdown,
        };
        let id = receiver.table.next_id();
        receiver
            .table
            .add(stream, id, &receiver.framing, &receiver.dispatcher)?;
        Ok(receiver)
    }

    /// Actual listening address, while the acceptor is open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.as_ref().and_then(|a| a.local_addr().ok())
    }

    /// Start accepting connections.
    ///
    /// `on_accept` may reject a socket by returning `false`; the socket is then
    /// closed. On an accept error `on_accept_error` decides whether to keep
    /// accepting. Without it the error is logged and the loop exits.
    pub fn accept(&self, on_accept_error: Option<OnAcceptErrorFn>, on_accept: Option<OnAcceptFn>) {
        let Some(acceptor) = &self.acceptor else {
            log::error!("Acceptor on {} is not open", self.local_addr);
            return;
        };
        tokio::spawn(accept_loop(
            Arc::clone(acceptor),
            Arc::clone(&self.table),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.framing),
            self.accept_shutdown.subscribe(),
            on_accept_error,
            on_accept,
        ));
    }

    /// Called with the error and connection id whenever a connection fails
    pub fn set_connection_error_fn<F>(&self, error_fn: F)
    where
        F: Fn(&io::Error, ConnectionId) + Send + Sync + 'static,
    {
        self.table.set_error_fn(Some(Arc::new(error_fn)));
    }

    /// Stop accepting; existing connections stay up
    pub fn close_acceptor(&mut self) {
        if self.acceptor.take().is_some() {
            self.accept_shutdown.send_replace(true);
            log::debug!("Acceptor on {} closed", self.local_addr);
        }
    }

    /// Shut down and forget connection `id`. Unknown ids, and calls made while
    /// the receiver is closing, are ignored.
    pub fn close_connection(&self, id: ConnectionId, how: Shutdown) -> crate::Result<()> {
        Ok(self.table.close_connection(id, how)?)
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.table.connection_count()
    }

    /// Ids of live connections, ascending
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.table.connection_ids()
    }

    /// Remote address of connection `id`
    pub fn connection_peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.table.peer_addr(id)
    }
}

impl Receiver for ReceiverTcp {
    fn bind(&mut self) -> crate::Result<()> {
        if self.acceptor.is_some() {
            return Ok(());
        }
        let socket = if self.local_addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(self.local_addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        log::info!("TCP receiver listening on {:?}", listener.local_addr());

        self.table.set_shutting_down(false);
        self.accept_shutdown.send_replace(false);
        self.acceptor = Some(Arc::new(listener));
        Ok(())
    }

    fn close(&mut self) -> crate::Result<()> {
        self.table.set_shutting_down(true);
        self.close_acceptor();
        self.table.close_all();
        Ok(())
    }

    fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl Drop for ReceiverTcp {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Closing TCP receiver: {}", e);
        }
    }
}

async fn accept_loop(
    acceptor: Arc<TcpListener>,
    table: Arc<ConnectionTable>,
    dispatcher: Arc<Dispatcher>,
    framing: Arc<dyn PacketFraming>,
    mut shutdown: watch::Receiver<bool>,
    on_accept_error: Option<OnAcceptErrorFn>,
    on_accept: Option<OnAcceptFn>,
) {
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = acceptor.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                let id = table.next_id();
                if let Some(on_accept) = &on_accept {
                    if !on_accept(&stream, id) {
                        log::debug!("Connection from {} rejected", peer_addr);
                        continue;
                    }
                }
                if let Err(e) = table.add(stream, id, &framing, &dispatcher) {
                    log::error!("Failed to track connection from {}: {}", peer_addr, e);
                }
            }
            Err(e) => match &on_accept_error {
                Some(on_accept_error) => {
                    if !on_accept_error(&e) {
                        break;
                    }
                }
                None => {
                    log::error!("Tcp Accept: {}", e);
                    log::warn!("Exiting accept loop.");
                    break;
                }
            },
        }
    }
    log::debug!("Accept loop finished");
}
