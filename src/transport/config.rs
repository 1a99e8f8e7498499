// ABOUTME: Transport configuration
// ABOUTME: Builder-style settings for senders and receivers, plus stream framing choice

use crate::transport::dispatcher::DEFAULT_DISREGARDED_LIMIT;
use crate::transport::framing::{LengthPrefixFraming, PacketFraming, SlipFraming};
use crate::transport::unspecified_for;
use std::net::SocketAddr;
use std::sync::Arc;

/// Default UDP receive buffer size in bytes
pub const DEFAULT_AMOUNT_TO_RECEIVE: usize = 4096;

/// Default limit on one buffered TCP frame; a connection exceeding it fails
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// How OSC packets are delimited on a TCP stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FramingKind {
    /// 4-byte big-endian length before every packet (OSC 1.0)
    #[default]
    LengthPrefix,
    /// SLIP double-END framing (OSC 1.1)
    Slip,
}

impl FramingKind {
    /// Build the framing strategy
    pub fn into_framing(self) -> Arc<dyn PacketFraming> {
        match self {
            FramingKind::LengthPrefix => Arc::new(LengthPrefixFraming),
            FramingKind::Slip => Arc::new(SlipFraming),
        }
    }
}

/// Receiver configuration
#[derive(Clone, Debug)]
pub struct ReceiverConfig {
    /// Local address to bind to
    pub local_addr: SocketAddr,
    /// UDP receive buffer size; larger datagrams are truncated
    pub amount_to_receive: usize,
    /// How many unmatched addresses are remembered for warn-once logging
    pub disregarded_limit: usize,
    /// TCP stream framing
    pub framing: FramingKind,
    /// Largest TCP frame buffered before the connection is dropped
    pub max_frame_size: usize,
}

impl ReceiverConfig {
    /// Listen on `port` on every IPv4 interface
    pub fn new(port: u16) -> Self {
        Self {
            local_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            ..Default::default()
        }
    }

    /// Set the local address
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = addr;
        self
    }

    /// Set the UDP receive buffer size
    pub fn amount_to_receive(mut self, bytes: usize) -> Self {
        self.amount_to_receive = bytes;
        self
    }

    /// Set the size of the unmatched-address memory
    pub fn disregarded_limit(mut self, limit: usize) -> Self {
        self.disregarded_limit = limit;
        self
    }

    /// Set the TCP framing
    pub fn framing(mut self, framing: FramingKind) -> Self {
        self.framing = framing;
        self
    }

    /// Set the TCP frame size limit
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            local_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            amount_to_receive: DEFAULT_AMOUNT_TO_RECEIVE,
            disregarded_limit: DEFAULT_DISREGARDED_LIMIT,
            framing: FramingKind::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Sender configuration
#[derive(Clone, Debug)]
pub struct SenderConfig {
    /// Local address to bind to; port 0 picks an ephemeral port
    pub local_addr: SocketAddr,
    /// Destination
    pub remote_addr: SocketAddr,
    /// TCP stream framing
    pub framing: FramingKind,
}

impl SenderConfig {
    /// Send to `remote_addr` from an ephemeral port of the same address family
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            local_addr: unspecified_for(&remote_addr, 0),
            remote_addr,
            framing: FramingKind::default(),
        }
    }

    /// Set the local address
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = addr;
        self
    }

    /// Bind to `port` on the unspecified address
    pub fn local_port(mut self, port: u16) -> Self {
        self.local_addr.set_port(port);
        self
    }

    /// Set the TCP framing
    pub fn framing(mut self, framing: FramingKind) -> Self {
        self.framing = framing;
        self
    }
}
