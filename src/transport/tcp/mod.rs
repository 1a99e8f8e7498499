// ABOUTME: OSC over TCP
// ABOUTME: Stream sender and multi-connection receiver

mod connection;
mod receiver;
mod sender;

pub use connection::{Connection, ConnectionId};
pub use receiver::ReceiverTcp;
pub use sender::SenderTcp;
