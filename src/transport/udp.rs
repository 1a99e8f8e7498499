// ABOUTME: OSC over UDP
// ABOUTME: Datagram sender with an ordered write task, and a receiver with a cancellable listen loop

use crate::transport::config::{ReceiverConfig, SenderConfig};
use crate::transport::dispatcher::Dispatcher;
use crate::transport::{OnCompleteFn, OnErrorFn, OnSocketErrorFn, Outgoing, Receiver, Sender};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

fn bind_udp(local_addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = std::net::UdpSocket::bind(local_addr)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket)
}

/// Sends each message or bundle as one datagram.
///
/// Packets are written in the order `send` was called, by a task that owns
/// the socket.
#[derive(Debug)]
pub struct SenderUdp {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    socket: Option<Arc<UdpSocket>>,
    queue: Option<mpsc::UnboundedSender<Outgoing>>,
}

impl SenderUdp {
    /// Sender bound to `local_port` (0 for ephemeral) sending to `destination`
    pub fn new(local_port: u16, destination: SocketAddr) -> Self {
        Self::with_config(SenderConfig::new(destination).local_port(local_port))
    }

    /// Sender from a full configuration
    pub fn with_config(config: SenderConfig) -> Self {
        Self {
            local_addr: config.local_addr,
            remote_addr: config.remote_addr,
            socket: None,
            queue: None,
        }
    }

    /// Sender over an already bound socket; it is open immediately
    pub fn from_socket(socket: UdpSocket, destination: SocketAddr) -> crate::Result<Self> {
        let mut sender = Self {
            local_addr: socket.local_addr()?,
            remote_addr: destination,
            socket: None,
            queue: None,
        };
        sender.start(Arc::new(socket));
        Ok(sender)
    }

    /// Actual bound address, once open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Destination address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// True between `bind` and `close`
    pub fn is_open(&self) -> bool {
        self.queue.is_some()
    }

    fn start(&mut self, socket: Arc<UdpSocket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(Arc::clone(&socket), self.remote_addr, rx));
        self.socket = Some(socket);
        self.queue = Some(tx);
    }
}

impl Sender for SenderUdp {
    fn bind(&mut self) -> crate::Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let socket = bind_udp(self.local_addr)?;
        log::debug!("UDP sender bound to {:?}", socket.local_addr());
        self.start(Arc::new(socket));
        Ok(())
    }

    fn close(&mut self) -> crate::Result<()> {
        // Dropping the queue lets the write task flush what is queued and exit.
        self.queue = None;
        self.socket = None;
        Ok(())
    }

    fn send_packet(
        &self,
        packet: Arc<Vec<u8>>,
        on_error: Option<OnErrorFn>,
        on_complete: Option<OnCompleteFn>,
    ) {
        let Some(queue) = &self.queue else {
            log::debug!("UDP sender to {} is not open; dropping packet", self.remote_addr);
            return;
        };
        if queue.send(Outgoing::new(packet, on_error, on_complete)).is_err() {
            log::debug!("UDP write task for {} has stopped", self.remote_addr);
        }
    }
}

async fn write_loop(
    socket: Arc<UdpSocket>,
    remote_addr: SocketAddr,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(outgoing) = rx.recv().await {
        // a datagram carries its own length
        let body = outgoing.packet.get(4..).unwrap_or_default();
        let result = socket.send_to(body, remote_addr).await.map(|_| ());
        outgoing.finish(result, "Udp");
    }
    log::debug!("UDP write task for {} finished", remote_addr);
}

/// Receives datagrams and dispatches the messages they carry.
#[derive(Debug)]
pub struct ReceiverUdp {
    local_addr: SocketAddr,
    socket: Option<Arc<UdpSocket>>,
    dispatcher: Arc<Dispatcher>,
    amount_to_receive: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
}

impl ReceiverUdp {
    /// Receiver on `port` on every IPv4 interface
    pub fn new(port: u16) -> Self {
        Self::with_config(ReceiverConfig::new(port))
    }

    /// Receiver from a full configuration
    pub fn with_config(config: ReceiverConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            local_addr: config.local_addr,
            socket: None,
            dispatcher: Arc::new(Dispatcher::with_disregarded_limit(config.disregarded_limit)),
            amount_to_receive: Arc::new(AtomicUsize::new(config.amount_to_receive)),
            shutdown,
        }
    }

    /// Receiver over an already bound socket; `bind` becomes a no-op
    pub fn from_socket(socket: UdpSocket) -> crate::Result<Self> {
        let config = ReceiverConfig::default().local_addr(socket.local_addr()?);
        let mut receiver = Self::with_config(config);
        receiver.socket = Some(Arc::new(socket));
        Ok(receiver)
    }

    /// Actual bound address, once open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Receive buffer size used by the next read; larger datagrams are truncated
    pub fn set_amount_to_receive(&self, bytes: usize) {
        self.amount_to_receive.store(bytes, Ordering::Relaxed);
    }

    /// Current receive buffer size
    pub fn amount_to_receive(&self) -> usize {
        self.amount_to_receive.load(Ordering::Relaxed)
    }

    /// Start the receive loop.
    ///
    /// On a socket error `on_error` decides whether to keep listening; it also
    /// gets the sender of the last datagram received. Without it the error is
    /// logged and the loop exits.
    pub fn listen(&self, on_error: Option<OnSocketErrorFn>) {
        let Some(socket) = &self.socket else {
            log::error!("UDP receiver on {} is not bound", self.local_addr);
            return;
        };
        tokio::spawn(listen_loop(
            Arc::clone(socket),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.amount_to_receive),
            self.shutdown.subscribe(),
            on_error,
        ));
    }
}

impl Receiver for ReceiverUdp {
    fn bind(&mut self) -> crate::Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = bind_udp(self.local_addr)?;
        log::info!("UDP receiver listening on {:?}", socket.local_addr());
        self.shutdown.send_replace(false);
        self.socket = Some(Arc::new(socket));
        Ok(())
    }

    fn close(&mut self) -> crate::Result<()> {
        self.shutdown.send_replace(true);
        self.socket = None;
        Ok(())
    }

    fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

async fn listen_loop(
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher>,
    amount_to_receive: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
    on_error: Option<OnSocketErrorFn>,
) {
    let mut last_sender = None;
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        let mut buffer = vec![0u8; amount_to_receive.load(Ordering::Relaxed).max(1)];
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut buffer) => received,
        };

        match received {
            Ok((len, from)) => {
                last_sender = Some(from);
                dispatcher.dispatch_methods(&buffer[..len], from);
            }
            Err(e) => {
                if !keep_listening(on_error.as_ref(), &e, last_sender) {
                    break;
                }
            }
        }
    }
    log::debug!("UDP listen loop finished");
}

fn keep_listening(
    on_error: Option<&OnSocketErrorFn>,
    error: &std::io::Error,
    remote: Option<SocketAddr>,
) -> bool {
    match on_error {
        Some(on_error) => on_error(error, remote),
        None => {
            match remote {
                Some(remote) => log::error!("Udp Message (last from {}): {}", remote, error),
                None => log::error!("Udp Message: {}", error),
            }
            log::warn!("Exiting listen loop.");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use std::time::Duration;

    fn loopback() -> ReceiverConfig {
        ReceiverConfig::default().local_addr("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let mut receiver = ReceiverUdp::with_config(loopback());
        assert!(receiver.local_addr().is_none());
        receiver.bind().unwrap();
        assert_ne!(receiver.local_addr().unwrap().port(), 0);
        receiver.close().unwrap();
        assert!(receiver.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_send_on_closed_sender_is_ignored() {
        let sender = SenderUdp::new(0, "127.0.0.1:9".parse().unwrap());
        sender.send(&Message::new("/x"), None, None);
        assert!(!sender.is_open());
    }

    #[test]
    fn test_socket_error_sees_last_sender() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let record = Arc::clone(&seen);
        let on_error: OnSocketErrorFn = Arc::new(move |e: &std::io::Error, remote: Option<SocketAddr>| {
            *record.lock() = Some((e.kind(), remote));
            e.kind() == std::io::ErrorKind::ConnectionReset
        });
        let remote: SocketAddr = "10.0.0.7:57120".parse().unwrap();

        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert!(keep_listening(Some(&on_error), &reset, Some(remote)));
        assert_eq!(
            *seen.lock(),
            Some((std::io::ErrorKind::ConnectionReset, Some(remote)))
        );

        let other = std::io::Error::from(std::io::ErrorKind::Other);
        assert!(!keep_listening(Some(&on_error), &other, None));
        assert_eq!(*seen.lock(), Some((std::io::ErrorKind::Other, None)));

        // without a callback the loop stops
        assert!(!keep_listening(None, &reset, Some(remote)));
    }

    #[tokio::test]
    async fn test_amount_to_receive_truncates() {
        let mut receiver = ReceiverUdp::with_config(loopback().amount_to_receive(12));
        assert_eq!(receiver.amount_to_receive(), 12);
        let (tx, mut rx) = mpsc::unbounded_channel();
        receiver.set_listener("/long/address/here", move |m: &Message| {
            let _ = tx.send(m.clone());
        });
        receiver.bind().unwrap();
        receiver.listen(Some(Arc::new(|_: &std::io::Error, _: Option<SocketAddr>| true)));

        let mut sender = SenderUdp::new(0, receiver.local_addr().unwrap());
        sender.bind().unwrap();
        let mut message = Message::new("/long/address/here");
        message.append_int32(1);
        sender.send(&message, None, None);

        // the truncated datagram fails to decode, so nothing is dispatched
        let got = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(got.is_err());
        receiver.close().unwrap();
    }
}
