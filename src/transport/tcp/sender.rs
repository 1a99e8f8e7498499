// ABOUTME: OSC over TCP, sending side
// ABOUTME: Bind, asynchronous connect, framed ordered writes and socket shutdown

use crate::transport::config::SenderConfig;
use crate::transport::framing::PacketFraming;
use crate::transport::{
    tolerate_not_connected, OnCompleteFn, OnConnectFn, OnErrorFn, Outgoing, Sender,
};
use parking_lot::Mutex;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;

/// Live connection: the write queue plus a handle for shutdown
#[derive(Debug)]
struct Link {
    queue: mpsc::UnboundedSender<Outgoing>,
    control: std::net::TcpStream,
}

/// Sends framed packets over one TCP connection.
///
/// `bind` opens the local socket, `connect` establishes the connection in the
/// background. Packets sent before the connection is up are dropped. A
/// `close` while a connect is pending cancels it.
#[derive(Debug)]
pub struct SenderTcp {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    framing: Arc<dyn PacketFraming>,
    socket: Option<TcpSocket>,
    link: Arc<Mutex<Option<Link>>>,
    // bumped by `close` under the `link` lock
    generation: Arc<AtomicU64>,
}

impl SenderTcp {
    /// Sender bound to `local_port` (0 for ephemeral) connecting to `destination`
    pub fn new(local_port: u16, destination: SocketAddr) -> Self {
        Self::with_config(SenderConfig::new(destination).local_port(local_port))
    }

    /// Sender from a full configuration
    pub fn with_config(config: SenderConfig) -> Self {
        Self {
            local_addr: config.local_addr,
            remote_addr: config.remote_addr,
            framing: config.framing.into_framing(),
            socket: None,
            link: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sender over an already connected stream
    pub fn from_stream(stream: TcpStream, framing: Arc<dyn PacketFraming>) -> crate::Result<Self> {
        let sender = Self {
            local_addr: stream.local_addr()?,
            remote_addr: stream.peer_addr()?,
            framing,
            socket: None,
            link: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
        };
        let link = open_link(stream, Arc::clone(&sender.framing))?;
        *sender.link.lock() = Some(link);
        Ok(sender)
    }

    /// Destination address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// True once `connect` has succeeded, until `close`
    pub fn is_connected(&self) -> bool {
        self.link.lock().is_some()
    }

    /// Connect the bound socket to the destination.
    ///
    /// `on_connect` receives the outcome; without it a failure is logged. If
    /// the sender is closed before the connect finishes, the new connection is
    /// dropped and `on_connect` gets `ConnectionAborted`.
    pub fn connect(&mut self, on_connect: Option<OnConnectFn>) {
        let Some(socket) = self.socket.take() else {
            let error = io::Error::new(io::ErrorKind::NotConnected, "Socket not open.");
            report_connect(Err(error), on_connect, self.remote_addr);
            return;
        };
        let remote_addr = self.remote_addr;
        let framing = Arc::clone(&self.framing);
        let link = Arc::clone(&self.link);
        let generation = Arc::clone(&self.generation);
        let started = generation.load(Ordering::Acquire);
        tokio::spawn(async move {
            let result = match socket.connect(remote_addr).await {
                Ok(stream) => {
                    let mut guard = link.lock();
                    if generation.load(Ordering::Acquire) != started {
                        Err(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "Sender closed while connecting.",
                        ))
                    } else {
                        open_link(stream, framing).map(|opened| {
                            *guard = Some(opened);
                            log::info!("Connected to {}", remote_addr);
                        })
                    }
                }
                Err(e) => Err(e),
            };
            report_connect(result, on_connect, remote_addr);
        });
    }

    /// Shut down the connection in one or both directions. Shutting down a
    /// socket the peer already closed is not an error.
    pub fn shutdown(&self, how: Shutdown) -> crate::Result<()> {
        if let Some(link) = self.link.lock().as_ref() {
            tolerate_not_connected(link.control.shutdown(how))?;
        }
        Ok(())
    }
}

fn report_connect(result: io::Result<()>, on_connect: Option<OnConnectFn>, remote_addr: SocketAddr) {
    match on_connect {
        Some(on_connect) => on_connect(result),
        None => {
            if let Err(e) = result {
                log::error!("Tcp Connect to {}: {}", remote_addr, e);
            }
        }
    }
}

fn open_link(stream: TcpStream, framing: Arc<dyn PacketFraming>) -> io::Result<Link> {
    let std_stream = stream.into_std()?;
    let control = std_stream.try_clone()?;
    let stream = TcpStream::from_std(std_stream)?;
    let (queue, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(stream, framing, rx));
    Ok(Link { queue, control })
}

async fn write_loop(
    mut stream: TcpStream,
    framing: Arc<dyn PacketFraming>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(outgoing) = rx.recv().await {
        let frame = framing.encode(&outgoing.packet);
        let result = stream.write_all(&frame).await;
        outgoing.finish(result, "Tcp");
    }
    log::debug!("TCP write task finished");
}

impl Sender for SenderTcp {
    fn bind(&mut self) -> crate::Result<()> {
        if self.socket.is_some() || self.is_connected() {
            return Ok(());
        }
        let socket = if self.local_addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(self.local_addr)?;
        self.socket = Some(socket);
        Ok(())
    }

    fn close(&mut self) -> crate::Result<()> {
        let result = self.shutdown(Shutdown::Both);
        {
            let mut guard = self.link.lock();
            self.generation.fetch_add(1, Ordering::AcqRel);
            *guard = None;
        }
        self.socket = None;
        result
    }

    fn send_packet(
        &self,
        packet: Arc<Vec<u8>>,
        on_error: Option<OnErrorFn>,
        on_complete: Option<OnCompleteFn>,
    ) {
        let guard = self.link.lock();
        let Some(link) = guard.as_ref() else {
            log::debug!("TCP sender to {} is not connected; dropping packet", self.remote_addr);
            return;
        };
        if link.queue.send(Outgoing::new(packet, on_error, on_complete)).is_err() {
            log::debug!("TCP write task for {} has stopped", self.remote_addr);
        }
    }
}

impl Drop for SenderTcp {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Closing TCP sender: {}", e);
        }
    }
}
