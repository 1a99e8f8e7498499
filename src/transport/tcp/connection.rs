// ABOUTME: Accepted TCP connections and the table that owns them
// ABOUTME: Per-connection read loop reassembles frames and hands packets to the dispatcher

use crate::transport::dispatcher::Dispatcher;
use crate::transport::framing::PacketFraming;
use crate::transport::config::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::{tolerate_not_connected, ConnectionErrorFn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Identifier of an accepted connection, unique per receiver
pub type ConnectionId = u64;

const READ_CHUNK: usize = 4096;

/// One accepted peer. Dropping it stops its read loop.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    control: std::net::TcpStream,
    is_connected: AtomicBool,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// False once the socket has been shut down
    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Acquire)
    }

    /// Shut down the socket. A socket already shut down, or one the peer has
    /// already disconnected, is not an error.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        if !self.is_connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        tolerate_not_connected(self.control.shutdown(how))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Connections owned by a receiver, keyed by id
pub(crate) struct ConnectionTable {
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    error_fn: Mutex<Option<ConnectionErrorFn>>,
    max_frame_size: usize,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl std::fmt::Debug for ConnectionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTable")
            .field("connections", &self.connection_ids())
            .field("shutting_down", &self.is_shutting_down())
            .field("max_frame_size", &self.max_frame_size)
            .field("has_error_fn", &self.error_fn.lock().is_some())
            .finish()
    }
}

impl ConnectionTable {
    /// Empty table whose connections fail once a frame grows past `max_frame_size`
    pub(crate) fn new(max_frame_size: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            error_fn: Mutex::new(None),
            max_frame_size,
        }
    }

    pub(crate) fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn set_shutting_down(&self, value: bool) {
        self.shutting_down.store(value, Ordering::Release);
    }

    pub(crate) fn set_error_fn(&self, error_fn: Option<ConnectionErrorFn>) {
        *self.error_fn.lock() = error_fn;
    }

    /// Start reading from `stream` and track it under `id`
    pub(crate) fn add(
        self: &Arc<Self>,
        stream: TcpStream,
        id: ConnectionId,
        framing: &Arc<dyn PacketFraming>,
        dispatcher: &Arc<Dispatcher>,
    ) -> io::Result<()> {
        let peer_addr = stream.peer_addr()?;
        // keep a blocking handle to the same socket for synchronous shutdown
        let std_stream = stream.into_std()?;
        let control = std_stream.try_clone()?;
        let stream = TcpStream::from_std(std_stream)?;

        // Hold the lock across the spawn so a failing read loop cannot try to
        // remove the connection before it is inserted.
        let mut connections = self.connections.lock();
        let reader = tokio::spawn(read_loop(
            stream,
            id,
            peer_addr,
            Arc::clone(framing),
            Arc::clone(dispatcher),
            self.max_frame_size,
            Arc::downgrade(self),
        ));
        connections.insert(
            id,
            Connection {
                id,
                peer_addr,
                control,
                is_connected: AtomicBool::new(true),
                reader,
            },
        );
        log::info!(
            "Connection {} from {} added, total connections: {}",
            id,
            peer_addr,
            connections.len()
        );
        Ok(())
    }

    /// Shut down and forget one connection. A no-op while the receiver is
    /// shutting down or when `id` is unknown.
    pub(crate) fn close_connection(&self, id: ConnectionId, how: Shutdown) -> io::Result<()> {
        if self.is_shutting_down() {
            return Ok(());
        }
        let removed = {
            let mut connections = self.connections.lock();
            let removed = connections.remove(&id);
            if removed.is_some() {
                log::info!(
                    "Connection {} removed, total connections: {}",
                    id,
                    connections.len()
                );
            }
            removed
        };
        match removed {
            Some(connection) => connection.shutdown(how),
            None => Ok(()),
        }
    }

    /// Shut down every connection and clear the table
    pub(crate) fn close_all(&self) {
        let drained: Vec<Connection> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for connection in drained {
            if let Err(e) = connection.shutdown(Shutdown::Both) {
                log::debug!("Shutting down connection {}: {}", connection.id(), e);
            }
        }
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub(crate) fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.lock().get(&id).map(Connection::peer_addr)
    }

    /// Report a failed connection, then close it. The close is skipped while
    /// the receiver is shutting down; the report is not.
    fn connection_failed(&self, id: ConnectionId, peer_addr: SocketAddr, error: &io::Error) {
        let error_fn = self.error_fn.lock().clone();
        match error_fn {
            Some(error_fn) => error_fn(error, id),
            None => log::error!("{}, didn't receive message from {}", error, peer_addr),
        }
        if let Err(e) = self.close_connection(id, Shutdown::Both) {
            log::debug!("Closing connection {}: {}", id, e);
        }
    }
}

async fn read_loop(
    mut stream: TcpStream,
    id: ConnectionId,
    peer_addr: SocketAddr,
    framing: Arc<dyn PacketFraming>,
    dispatcher: Arc<Dispatcher>,
    max_frame_size: usize,
    table: Weak<ConnectionTable>,
) {
    let mut pending = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let error = loop {
        while let Some(end) = framing.message_complete(&pending) {
            let frame: Vec<u8> = pending.drain(..end).collect();
            let packet = framing.decode(&frame);
            if !packet.is_empty() {
                dispatcher.dispatch_methods(&packet, peer_addr);
            }
        }

        if pending.len() > max_frame_size {
            break io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Frame exceeds {} bytes.", max_frame_size),
            );
        }
        match stream.read(&mut chunk).await {
            Ok(0) => break io::Error::new(io::ErrorKind::UnexpectedEof, "End of file"),
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
            Err(e) => break e,
        }
    };
    if let Some(table) = table.upgrade() {
        table.connection_failed(id, peer_addr, &error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FramingKind;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    const WAIT: Duration = Duration::from_secs(2);

    /// Table tracking one accepted socket as id 0, plus the peer's end
    async fn tracked_pair(
        table: &Arc<ConnectionTable>,
    ) -> (TcpStream, mpsc::UnboundedReceiver<(io::ErrorKind, ConnectionId)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (server_side, _) = accepted.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        table.set_error_fn(Some(Arc::new(move |e: &io::Error, id: ConnectionId| {
            let _ = tx.send((e.kind(), id));
        })));
        let id = table.next_id();
        table
            .add(
                server_side,
                id,
                &FramingKind::LengthPrefix.into_framing(),
                &Arc::new(Dispatcher::new()),
            )
            .unwrap();
        (client.unwrap(), rx)
    }

    #[tokio::test]
    async fn test_close_connection_ignored_while_shutting_down() {
        let table = Arc::new(ConnectionTable::default());
        let (_peer, _errors) = tracked_pair(&table).await;

        table.set_shutting_down(true);
        assert!(table.close_connection(0, Shutdown::Both).is_ok());
        assert_eq!(table.connection_ids(), vec![0]);

        table.set_shutting_down(false);
        assert!(table.close_connection(0, Shutdown::Both).is_ok());
        assert_eq!(table.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_read_error_while_shutting_down_is_reported_but_kept() {
        let table = Arc::new(ConnectionTable::default());
        let (peer, mut errors) = tracked_pair(&table).await;

        table.set_shutting_down(true);
        drop(peer);

        let (kind, id) = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
        assert_eq!(kind, io::ErrorKind::UnexpectedEof);
        assert_eq!(id, 0);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(table.connection_ids(), vec![0]);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let table = Arc::new(ConnectionTable::new(64));
        let (mut peer, mut errors) = tracked_pair(&table).await;

        peer.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        peer.write_all(&[0u8; 128]).await.unwrap();

        let (kind, id) = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
        assert_eq!(kind, io::ErrorKind::InvalidData);
        assert_eq!(id, 0);
        for _ in 0..100 {
            if table.connection_count() == 0 {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("oversized connection was not removed");
    }
}
