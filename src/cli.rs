// ABOUTME: Command-line argument parsing for the oscnet binary
// ABOUTME: Transport flags, send/dump arguments, typed OSC argument syntax and JSON output

use crate::protocol::time::current_ntp_time;
use crate::protocol::{ArgValue, Message};
use crate::transport::{FramingKind, ReceiverConfig, SenderConfig};
use base64::Engine;
use clap::Args;
use serde::Serialize;
use std::net::SocketAddr;

/// Transport flags shared by every subcommand
///
/// Use with `#[command(flatten)]`:
/// ```ignore
/// #[derive(Args)]
/// struct MyArgs {
///     #[command(flatten)]
///     transport: TransportArgs,
/// }
/// ```
#[derive(Args, Debug, Clone, Default)]
pub struct TransportArgs {
    /// Use TCP instead of UDP
    #[arg(long)]
    pub tcp: bool,

    /// Frame TCP packets with SLIP (OSC 1.1) instead of a length prefix
    #[arg(long, requires = "tcp")]
    pub slip: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl TransportArgs {
    /// Initialize tracing based on verbosity flag
    pub fn init_tracing(&self) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let filter = if self.verbose {
            "oscnet=debug"
        } else {
            "oscnet=info"
        };

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| filter.into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    /// Selected stream framing
    pub fn framing(&self) -> FramingKind {
        if self.slip {
            FramingKind::Slip
        } else {
            FramingKind::LengthPrefix
        }
    }

    fn protocol_name(&self) -> &'static str {
        match (self.tcp, self.slip) {
            (false, _) => "UDP",
            (true, false) => "TCP",
            (true, true) => "TCP/SLIP",
        }
    }
}

/// Arguments of `oscnet send`
#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    #[allow(missing_docs)]
    #[command(flatten)]
    pub transport: TransportArgs,

    /// Destination HOST:PORT
    #[arg(long)]
    pub to: SocketAddr,

    /// Local port to send from (0 for any)
    #[arg(long, default_value = "0")]
    pub local_port: u16,

    /// Wrap the message in a bundle
    #[arg(long)]
    pub bundle: bool,

    /// OSC address, e.g. /mixer/fader/1
    pub address: String,

    /// Arguments: TAG:VALUE (i:1 f:0.5 d:2.0 h:7 t:NTP s:text c:x b:BASE64 m:0,144,60,100)
    /// or a bare T, F, N, I or `now`
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl SendArgs {
    /// Build the message described on the command line
    pub fn build_message(&self) -> Result<Message, String> {
        let mut message = Message::new(self.address.as_str());
        if !message.has_valid_address() {
            return Err(format!("address {:?} must start with '/'", self.address));
        }
        for arg in &self.args {
            message.append_value(parse_arg(arg)?);
        }
        Ok(message)
    }

    /// Sender configuration from these args
    pub fn build_config(&self) -> SenderConfig {
        SenderConfig::new(self.to)
            .local_port(self.local_port)
            .framing(self.transport.framing())
    }

    /// Log what is about to be sent
    pub fn log_startup_info(&self) {
        tracing::info!("oscnet v{}", env!("CARGO_PKG_VERSION"));
        tracing::info!("Sending to {} over {}", self.to, self.transport.protocol_name());
    }
}

/// Arguments of `oscnet dump`
#[derive(Args, Debug, Clone)]
pub struct DumpArgs {
    #[allow(missing_docs)]
    #[command(flatten)]
    pub transport: TransportArgs,

    /// Local port to listen on
    #[arg(short, long, default_value = "9000")]
    pub port: u16,

    /// Only show messages whose address matches this pattern
    #[arg(long, default_value = "*")]
    pub pattern: String,

    /// Print one JSON object per message instead of text
    #[arg(long)]
    pub json: bool,

    /// UDP receive buffer size in bytes
    #[arg(long, default_value = "4096")]
    pub amount_to_receive: usize,
}

impl DumpArgs {
    /// Receiver configuration from these args
    pub fn build_config(&self) -> ReceiverConfig {
        ReceiverConfig::new(self.port)
            .amount_to_receive(self.amount_to_receive)
            .framing(self.transport.framing())
    }

    /// Log startup information
    pub fn log_startup_info(&self) {
        tracing::info!("oscnet v{}", env!("CARGO_PKG_VERSION"));
        tracing::info!(
            "Listening on port {} over {}",
            self.port,
            self.transport.protocol_name()
        );
        tracing::info!("Pattern: {}", self.pattern);
    }
}

/// Parse one `TAG:VALUE` (or bare tag) command-line argument
pub fn parse_arg(arg: &str) -> Result<ArgValue, String> {
    match arg {
        "T" => return Ok(ArgValue::Bool(true)),
        "F" => return Ok(ArgValue::Bool(false)),
        "N" => return Ok(ArgValue::Nil),
        "I" => return Ok(ArgValue::Impulse),
        "now" => return Ok(ArgValue::TimeTag(current_ntp_time(0))),
        _ => {}
    }

    let (tag, value) = arg
        .split_once(':')
        .ok_or_else(|| format!("argument {:?} is not TAG:VALUE", arg))?;
    let bad = |e: &dyn std::fmt::Display| format!("bad {} value {:?}: {}", tag, value, e);

    let parsed = match tag {
        "i" => ArgValue::Int32(value.parse::<i32>().map_err(|e| bad(&e))?),
        "f" => ArgValue::Float(value.parse::<f32>().map_err(|e| bad(&e))?),
        "d" => ArgValue::Double(value.parse::<f64>().map_err(|e| bad(&e))?),
        "h" => ArgValue::Int64(value.parse::<i64>().map_err(|e| bad(&e))?),
        "t" => ArgValue::TimeTag(value.parse::<u64>().map_err(|e| bad(&e))?),
        "s" => ArgValue::String(value.to_string()),
        "c" => {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii() => ArgValue::Char(c),
                _ => return Err(bad(&"expected one ASCII character")),
            }
        }
        "b" => ArgValue::Blob(
            base64::engine::general_purpose::STANDARD
                .decode(value)
                .map_err(|e| bad(&e))?,
        ),
        "m" => {
            let bytes = value
                .split(',')
                .map(|b| b.trim().parse::<u8>())
                .collect::<Result<Vec<u8>, _>>()
                .map_err(|e| bad(&e))?;
            let midi: [u8; 4] = bytes
                .try_into()
                .map_err(|_| bad(&"expected port,status,data1,data2"))?;
            ArgValue::Midi(midi)
        }
        other => return Err(format!("unknown type tag {:?}", other)),
    };
    Ok(parsed)
}

/// One received message as printed by `oscnet dump --json`
#[derive(Debug, Serialize)]
pub struct MessageRecord {
    /// OSC address
    pub address: String,
    /// Sender endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Time tag of the enclosing bundle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timetag: Option<u64>,
    /// Decoded arguments
    pub args: Vec<ArgValue>,
}

impl From<&Message> for MessageRecord {
    fn from(message: &Message) -> Self {
        Self {
            address: message.address().to_string(),
            sender: message.sender_addr().map(|addr| addr.to_string()),
            timetag: message.timetag(),
            args: message.values(),
        }
    }
}

/// Render a message as a single JSON line
pub fn to_json_line(message: &Message) -> Result<String, serde_json::Error> {
    serde_json::to_string(&MessageRecord::from(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        send: SendArgs,
    }

    #[test]
    fn test_parse_tagged_args() {
        assert_eq!(parse_arg("i:-5").unwrap(), ArgValue::Int32(-5));
        assert_eq!(parse_arg("f:1.5").unwrap(), ArgValue::Float(1.5));
        assert_eq!(parse_arg("d:2").unwrap(), ArgValue::Double(2.0));
        assert_eq!(parse_arg("h:7").unwrap(), ArgValue::Int64(7));
        assert_eq!(parse_arg("s:a:b").unwrap(), ArgValue::String("a:b".into()));
        assert_eq!(parse_arg("c:x").unwrap(), ArgValue::Char('x'));
        assert_eq!(parse_arg("b:AP8Q").unwrap(), ArgValue::Blob(vec![0, 255, 16]));
        assert_eq!(
            parse_arg("m:0,144,60,100").unwrap(),
            ArgValue::Midi([0, 144, 60, 100])
        );
        assert_eq!(parse_arg("T").unwrap(), ArgValue::Bool(true));
        assert_eq!(parse_arg("N").unwrap(), ArgValue::Nil);
        assert!(matches!(parse_arg("now").unwrap(), ArgValue::TimeTag(_)));
    }

    #[test]
    fn test_parse_rejects_bad_args() {
        assert!(parse_arg("i:abc").is_err());
        assert!(parse_arg("x:1").is_err());
        assert!(parse_arg("plain").is_err());
        assert!(parse_arg("b:abc").is_err());
        assert!(parse_arg("b:00ff!").is_err());
        assert!(parse_arg("c:xy").is_err());
        assert!(parse_arg("m:1,2,3").is_err());
    }

    #[test]
    fn test_send_args_build_message() {
        let cli = TestCli::parse_from([
            "test", "--to", "127.0.0.1:9000", "--tcp", "--slip", "/synth/note", "i:60", "f:-0.5", "T",
        ]);
        let message = cli.send.build_message().unwrap();
        assert_eq!(message.address(), "/synth/note");
        assert_eq!(message.type_tag_string(), "ifT");
        assert_eq!(message.arg_float(1).unwrap(), -0.5);

        let config = cli.send.build_config();
        assert_eq!(config.remote_addr.port(), 9000);
        assert_eq!(config.framing, FramingKind::Slip);
    }

    #[test]
    fn test_send_args_reject_bad_address() {
        let cli = TestCli::parse_from(["test", "--to", "127.0.0.1:9000", "synth"]);
        assert!(cli.send.build_message().is_err());
    }

    #[test]
    fn test_json_line() {
        let mut message = Message::new("/a");
        message.append_int32(3);
        message.append_blob(&[1, 2]);
        let json: serde_json::Value = serde_json::from_str(&to_json_line(&message).unwrap()).unwrap();
        assert_eq!(json["address"], "/a");
        assert_eq!(json["args"][0]["type"], "int32");
        assert_eq!(json["args"][0]["value"], 3);
        assert_eq!(json["args"][1]["value"], "AQI=");
        assert!(json.get("sender").is_none());
    }

    #[test]
    fn test_blob_argument_matches_json_output() {
        let blob = vec![0xC0, 0xDB, 0x00, 0x7F, 0xFF];
        let mut message = Message::new("/blob");
        message.append_blob(&blob);
        let json: serde_json::Value = serde_json::from_str(&to_json_line(&message).unwrap()).unwrap();
        let encoded = json["args"][0]["value"].as_str().unwrap();
        assert_eq!(parse_arg(&format!("b:{}", encoded)).unwrap(), ArgValue::Blob(blob));
    }
}
