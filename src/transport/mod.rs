// ABOUTME: Transport module: protocol-agnostic sender/receiver contracts
// ABOUTME: UDP and TCP implementations, listener dispatch and stream framing

mod config;
mod dispatcher;
mod framing;
mod tcp;
mod udp;

pub use config::{
    FramingKind, ReceiverConfig, SenderConfig, DEFAULT_AMOUNT_TO_RECEIVE, DEFAULT_MAX_FRAME_SIZE,
};
pub use dispatcher::{Dispatcher, DEFAULT_DISREGARDED_LIMIT};
pub use framing::{LengthPrefixFraming, PacketFraming, SlipFraming};
pub use tcp::{Connection, ConnectionId, ReceiverTcp, SenderTcp};
pub use udp::{ReceiverUdp, SenderUdp};

use crate::error::Error;
use crate::protocol::{Bundle, Message};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Callback invoked for every message whose address matches a listener pattern
pub type ListenerFn = Arc<dyn Fn(&Message) + Send + Sync>;
/// Called when an asynchronous send fails
pub type OnErrorFn = Box<dyn FnOnce(io::Error) + Send>;
/// Called when an asynchronous send has been handed to the socket
pub type OnCompleteFn = Box<dyn FnOnce() + Send>;
/// Called once an outbound TCP connect finishes
pub type OnConnectFn = Box<dyn FnOnce(io::Result<()>) + Send>;
/// Called on a receive error with the sender of the last datagram received,
/// if any; return `false` to stop listening
pub type OnSocketErrorFn = Arc<dyn Fn(&io::Error, Option<SocketAddr>) -> bool + Send + Sync>;
/// Called on an accept error; return `false` to stop accepting
pub type OnAcceptErrorFn = Arc<dyn Fn(&io::Error) -> bool + Send + Sync>;
/// Called for each accepted socket; return `false` to reject it
pub type OnAcceptFn = Arc<dyn Fn(&TcpStream, ConnectionId) -> bool + Send + Sync>;
/// Called when a tracked TCP connection fails
pub type ConnectionErrorFn = Arc<dyn Fn(&io::Error, ConnectionId) + Send + Sync>;

/// Sending half of an OSC transport (a "server" in OSC terms).
///
/// `send` never fails synchronously: transport errors arrive through
/// `on_error`, or are logged when no callback is given. Sending on a
/// sender that is not open is silently ignored.
pub trait Sender {
    /// Open and bind the local socket. Must run inside a tokio runtime.
    fn bind(&mut self) -> crate::Result<()>;

    /// Close the socket
    fn close(&mut self) -> crate::Result<()>;

    /// Queue an already serialized packet, 4-byte size field included
    fn send_packet(
        &self,
        packet: Arc<Vec<u8>>,
        on_error: Option<OnErrorFn>,
        on_complete: Option<OnCompleteFn>,
    );

    /// Serialize and send a message
    fn send(
        &self,
        message: &Message,
        on_error: Option<OnErrorFn>,
        on_complete: Option<OnCompleteFn>,
    ) {
        if !message.has_valid_address() {
            let error = Error::InvalidAddress(message.address().to_string());
            Outgoing::new(Arc::new(Vec::new()), on_error, None).finish(
                Err(io::Error::new(io::ErrorKind::InvalidInput, error)),
                "Osc",
            );
            return;
        }
        self.send_packet(message.shared_buffer(), on_error, on_complete);
    }

    /// Serialize and send a bundle
    fn send_bundle(
        &self,
        bundle: &Bundle,
        on_error: Option<OnErrorFn>,
        on_complete: Option<OnCompleteFn>,
    ) {
        self.send_packet(bundle.shared_buffer(), on_error, on_complete);
    }
}

/// Receiving half of an OSC transport (a "client" in OSC terms).
pub trait Receiver {
    /// Open and bind the local socket. Must run inside a tokio runtime.
    fn bind(&mut self) -> crate::Result<()>;

    /// Close the socket and stop all receive loops
    fn close(&mut self) -> crate::Result<()>;

    /// Listener table shared with the receive loops
    fn dispatcher(&self) -> &Arc<Dispatcher>;

    /// Register `listener` for `address` (a pattern), replacing any listener
    /// already registered for the same pattern string.
    fn set_listener<F>(&self, address: impl Into<String>, listener: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
        Self: Sized,
    {
        self.dispatcher().set_listener(address, Arc::new(listener));
    }

    /// Remove the listener registered for exactly `address`
    fn remove_listener(&self, address: &str) {
        self.dispatcher().remove_listener(address);
    }
}

/// One queued packet plus its completion callbacks
pub(crate) struct Outgoing {
    pub(crate) packet: Arc<Vec<u8>>,
    on_error: Option<OnErrorFn>,
    on_complete: Option<OnCompleteFn>,
}

impl Outgoing {
    pub(crate) fn new(
        packet: Arc<Vec<u8>>,
        on_error: Option<OnErrorFn>,
        on_complete: Option<OnCompleteFn>,
    ) -> Self {
        Self {
            packet,
            on_error,
            on_complete,
        }
    }

    /// Report the outcome of the write to whoever asked for it
    pub(crate) fn finish(self, result: io::Result<()>, transport: &str) {
        let Outgoing {
            packet,
            on_error,
            on_complete,
        } = self;
        match result {
            Ok(()) => {
                if let Some(on_complete) = on_complete {
                    on_complete();
                }
            }
            Err(e) => match on_error {
                Some(on_error) => on_error(e),
                None => log::error!(
                    "{} Send: {} (address {:?})",
                    transport,
                    e,
                    extract_osc_address(&packet)
                ),
            },
        }
    }
}

/// Pull the OSC address out of a serialized packet, for diagnostics.
/// Returns an empty string when none is found.
pub fn extract_osc_address(packet: &[u8]) -> String {
    let Some(start) = packet.iter().position(|&b| b == b'/') else {
        return String::new();
    };
    let end = packet[start..]
        .iter()
        .position(|&b| b == 0)
        .map_or(packet.len(), |i| start + i);
    String::from_utf8_lossy(&packet[start..end]).into_owned()
}

/// Unspecified address of the same family as `remote`, with `port`
pub(crate) fn unspecified_for(remote: &SocketAddr, port: u16) -> SocketAddr {
    match remote {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], port)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], port)),
    }
}

/// Map "not connected" to success: the peer may have closed first.
pub(crate) fn tolerate_not_connected(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_extract_osc_address() {
        let message = Message::new("/synth/freq");
        assert_eq!(extract_osc_address(&message.shared_buffer()), "/synth/freq");
        assert_eq!(extract_osc_address(b"\0\0\0\0"), "");
    }

    #[test]
    fn test_unspecified_matches_family() {
        let v6: SocketAddr = "[::1]:9000".parse().unwrap();
        assert!(unspecified_for(&v6, 5).is_ipv6());
        let v4: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(unspecified_for(&v4, 5).to_string(), "0.0.0.0:5");
    }

    #[test]
    fn test_outgoing_routes_result() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ok = Arc::clone(&seen);
        let err = Arc::clone(&seen);
        Outgoing::new(
            Arc::new(Vec::new()),
            Some(Box::new(move |e| err.lock().push(format!("error {}", e.kind())))),
            Some(Box::new(move || ok.lock().push("complete".to_string()))),
        )
        .finish(Ok(()), "Test");
        assert_eq!(*seen.lock(), vec!["complete".to_string()]);

        let err = Arc::clone(&seen);
        Outgoing::new(
            Arc::new(Vec::new()),
            Some(Box::new(move |e| err.lock().push(format!("error {:?}", e.kind())))),
            None,
        )
        .finish(Err(io::ErrorKind::BrokenPipe.into()), "Test");
        assert_eq!(seen.lock().last().unwrap(), "error BrokenPipe");
    }

    #[test]
    fn test_tolerate_not_connected() {
        assert!(tolerate_not_connected(Err(io::ErrorKind::NotConnected.into())).is_ok());
        assert!(tolerate_not_connected(Err(io::ErrorKind::BrokenPipe.into())).is_err());
    }
}
