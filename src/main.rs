// ABOUTME: oscnet command-line tool
// ABOUTME: Sends single OSC messages and dumps incoming traffic over UDP or TCP

use clap::{Parser, Subcommand};
use oscnet::cli::{to_json_line, DumpArgs, SendArgs};
use oscnet::transport::{ConnectionId, OnCompleteFn, OnErrorFn};
use oscnet::{Bundle, Message, Receiver, ReceiverTcp, ReceiverUdp, Sender, SenderTcp, SenderUdp};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "oscnet")]
#[command(author, version, about = "Send and inspect Open Sound Control traffic", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message (optionally bundled) and exit
    Send(SendArgs),
    /// Print every message received until Ctrl+C
    Dump(DumpArgs),
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    match Args::parse().command {
        Command::Send(args) => send(args).await,
        Command::Dump(args) => dump(args).await,
    }
}

async fn send(args: SendArgs) -> Result<(), BoxError> {
    args.transport.init_tracing();
    args.log_startup_info();

    let message = args.build_message()?;
    let config = args.build_config();

    let mut sender: Box<dyn Sender> = if args.transport.tcp {
        let mut sender = SenderTcp::with_config(config);
        sender.bind()?;
        let (tx, rx) = oneshot::channel();
        sender.connect(Some(Box::new(move |result| {
            let _ = tx.send(result);
        })));
        rx.await??;
        Box::new(sender)
    } else {
        let mut sender = SenderUdp::with_config(config);
        sender.bind()?;
        Box::new(sender)
    };

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<io::Result<()>>();
    let on_error: OnErrorFn = {
        let done_tx = done_tx.clone();
        Box::new(move |e| {
            let _ = done_tx.send(Err(e));
        })
    };
    let on_complete: OnCompleteFn = Box::new(move || {
        let _ = done_tx.send(Ok(()));
    });

    if args.bundle {
        let mut bundle = Bundle::new();
        bundle.append_message(&message);
        sender.send_bundle(&bundle, Some(on_error), Some(on_complete));
    } else {
        sender.send(&message, Some(on_error), Some(on_complete));
    }

    let outcome = tokio::time::timeout(SEND_TIMEOUT, done_rx.recv()).await;
    sender.close()?;
    match outcome {
        Ok(Some(Ok(()))) => {
            tracing::info!("Sent {}", message);
            Ok(())
        }
        Ok(Some(Err(e))) => Err(e.into()),
        Ok(None) => Err("send was dropped before completing".into()),
        Err(_) => Err("timed out waiting for the send to complete".into()),
    }
}

async fn dump(args: DumpArgs) -> Result<(), BoxError> {
    args.transport.init_tracing();
    args.log_startup_info();

    let config = args.build_config();
    let printer = printer(args.json);

    if args.transport.tcp {
        let mut receiver = ReceiverTcp::with_config(config);
        receiver.set_listener(args.pattern.clone(), printer);
        receiver.set_connection_error_fn(|e, id| {
            tracing::info!("Connection {} closed: {}", id, e);
        });
        receiver.bind()?;
        receiver.accept(
            None,
            Some(Arc::new(|stream: &TcpStream, id: ConnectionId| {
                tracing::info!("Connection {} from {:?}", id, stream.peer_addr());
                true
            })),
        );

        tracing::info!("Press Ctrl+C to stop");
        let mut report = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = report.tick() => {
                    let count = receiver.connection_count();
                    if count > 0 {
                        tracing::info!("Connected: {} {:?}", count, receiver.connection_ids());
                    }
                }
            }
        }
        receiver.close()?;
    } else {
        let mut receiver = ReceiverUdp::with_config(config);
        receiver.set_listener(args.pattern.clone(), printer);
        receiver.bind()?;
        receiver.listen(Some(Arc::new(|e: &io::Error, remote: Option<SocketAddr>| {
            match remote {
                Some(remote) => tracing::warn!("Receive error (last from {}): {}", remote, e),
                None => tracing::warn!("Receive error: {}", e),
            }
            // ICMP port-unreachable surfaces as a reset on some platforms
            e.kind() == io::ErrorKind::ConnectionReset
        })));

        tracing::info!("Press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
        receiver.close()?;
    }
    Ok(())
}

fn printer(json: bool) -> impl Fn(&Message) + Send + Sync + 'static {
    move |message: &Message| {
        if json {
            match to_json_line(message) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!("Failed to serialize {}: {}", message.address(), e),
            }
        } else {
            println!("{}", message);
        }
    }
}
