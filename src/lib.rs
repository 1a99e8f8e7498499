// ABOUTME: Main library entry point for oscnet
// ABOUTME: Exports the OSC codec, pattern matcher and UDP/TCP transports

//! # oscnet
//!
//! Open Sound Control (OSC 1.0/1.1) messages and bundles, address pattern
//! dispatch, and asynchronous UDP/TCP transports running on tokio.
//!
//! ## Features
//!
//! - **Protocol**: typed message construction, lazily cached wire encoding,
//!   bundle packing and a decoder that never panics on malformed input
//! - **Dispatch**: OSC glob patterns (`?`, `*`, `[a-z]`, `{a,b}`) routing
//!   messages to registered listeners
//! - **Transport**: UDP datagrams, TCP streams with length-prefix or SLIP
//!   framing, and per-connection tracking on the receiving side
//!
//! ## Example: Receiving over UDP
//!
//! ```no_run
//! use oscnet::transport::{Receiver, ReceiverUdp};
//!
//! #[tokio::main]
//! async fn main() -> oscnet::Result<()> {
//!     let mut receiver = ReceiverUdp::new(9000);
//!     receiver.set_listener("/fader/*", |message| {
//!         println!("{}", message);
//!     });
//!     receiver.bind()?;
//!     receiver.listen(None);
//!
//!     tokio::signal::ctrl_c().await?;
//!     receiver.close()
//! }
//! ```

#![warn(missing_docs)]

/// Command-line argument parsing shared by the `oscnet` binary
pub mod cli;
/// OSC data model, wire codec and pattern matching
pub mod protocol;
/// Senders and receivers over UDP and TCP
pub mod transport;

pub use protocol::{ArgType, ArgValue, Bundle, Message};
pub use transport::{Receiver, ReceiverTcp, ReceiverUdp, Sender, SenderTcp, SenderUdp};

/// Result type for oscnet operations
pub type Result<T> = std::result::Result<T, error::Error>;

/// Error types for oscnet
pub mod error {
    use crate::protocol::ArgType;
    use thiserror::Error;

    /// Error types for oscnet operations
    #[derive(Error, Debug)]
    pub enum Error {
        /// Socket-level failure while binding, connecting, shutting down or closing
        #[error("Transport error: {0}")]
        Transport(#[from] std::io::Error),

        /// Argument index beyond the number of arguments in the message
        #[error("Index {index} out of bounds for message {address}")]
        IndexOutOfBounds {
            /// Address of the message that was indexed
            address: String,
            /// Requested index
            index: usize,
        },

        /// Typed accessor used on an argument of another type
        #[error("Argument of message {address} is {actual}, not convertible to {requested}")]
        NonConvertible {
            /// Address of the message that was accessed
            address: String,
            /// Type the caller asked for
            requested: ArgType,
            /// Type actually stored
            actual: ArgType,
        },

        /// Packet could not be decoded
        #[error("Malformed packet: {0}")]
        Malformed(String),

        /// Message address is empty or does not start with '/'
        #[error("Invalid OSC address: {0:?}")]
        InvalidAddress(String),
    }
}
