use oscnet::transport::{ReceiverConfig, SenderConfig};
use oscnet::{Bundle, Message, Receiver, ReceiverUdp, Sender, SenderUdp};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn loopback_receiver() -> ReceiverUdp {
    ReceiverUdp::with_config(ReceiverConfig::default().local_addr("127.0.0.1:0".parse().unwrap()))
}

fn forward_to_channel(receiver: &ReceiverUdp, pattern: &str) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    receiver.set_listener(pattern, move |message: &Message| {
        let _ = tx.send(message.clone());
    });
    rx
}

fn bound_sender(destination: SocketAddr) -> SenderUdp {
    let mut sender = SenderUdp::with_config(SenderConfig::new(destination));
    tokio_test::assert_ok!(sender.bind());
    sender
}

#[tokio::test]
async fn test_message_round_trip() {
    init_logging();
    let mut receiver = loopback_receiver();
    let mut messages = forward_to_channel(&receiver, "/test/*");
    tokio_test::assert_ok!(receiver.bind());
    receiver.listen(None);

    let sender = bound_sender(receiver.local_addr().unwrap());
    let mut message = Message::new("/test/1");
    message.append_int32(245);
    message.append_string("hello");
    message.append_float(1.5);

    let (done_tx, done_rx) = oneshot::channel();
    sender.send(
        &message,
        None,
        Some(Box::new(move || {
            let _ = done_tx.send(());
        })),
    );
    timeout(WAIT, done_rx).await.unwrap().unwrap();

    let received = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(received, message);
    assert_eq!(received.arg_int32(0).unwrap(), 245);
    assert_eq!(received.arg_string(1).unwrap(), "hello");
    assert_eq!(received.arg_float(2).unwrap(), 1.5);
    let from = received.sender_addr().unwrap();
    assert_eq!(from.port(), sender.local_addr().unwrap().port());

    tokio_test::assert_ok!(receiver.close());
}

#[tokio::test]
async fn test_bundle_dispatches_each_message() {
    init_logging();
    let mut receiver = loopback_receiver();
    let mut messages = forward_to_channel(&receiver, "*");
    receiver.bind().unwrap();
    receiver.listen(None);

    let mut first = Message::new("/one");
    first.append_int32(1);
    let mut second = Message::new("/two");
    second.append_string("x");
    let mut bundle = Bundle::new();
    bundle.set_timetag(0x0000_0010_0000_0000);
    bundle.append_message(&first);
    bundle.append_message(&second);

    let sender = bound_sender(receiver.local_addr().unwrap());
    sender.send_bundle(&bundle, None, None);

    let a = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    let b = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(a.address(), "/one");
    assert_eq!(b.address(), "/two");
    assert_eq!(a.timetag(), Some(0x0000_0010_0000_0000));
    assert_eq!(b.arg_string(0).unwrap(), "x");
}

#[tokio::test]
async fn test_sends_arrive_in_order() {
    init_logging();
    let mut receiver = loopback_receiver();
    let mut messages = forward_to_channel(&receiver, "/seq");
    receiver.bind().unwrap();
    receiver.listen(None);

    let sender = bound_sender(receiver.local_addr().unwrap());
    for i in 0..20 {
        let mut message = Message::new("/seq");
        message.append_int32(i);
        sender.send(&message, None, None);
    }

    for i in 0..20 {
        let message = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
        assert_eq!(message.arg_int32(0).unwrap(), i);
    }
}

#[tokio::test]
async fn test_invalid_address_reports_error() {
    let sender = bound_sender("127.0.0.1:9".parse().unwrap());
    let (tx, rx) = oneshot::channel();
    sender.send(
        &Message::new("no-slash"),
        Some(Box::new(move |e| {
            let _ = tx.send(e.kind());
        })),
        None,
    );
    let kind = timeout(WAIT, rx).await.unwrap().unwrap();
    assert_eq!(kind, std::io::ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_close_stops_dispatch() {
    init_logging();
    let mut receiver = loopback_receiver();
    let mut messages = forward_to_channel(&receiver, "/x");
    receiver.bind().unwrap();
    receiver.listen(None);
    let destination = receiver.local_addr().unwrap();
    receiver.close().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sender = bound_sender(destination);
    sender.send(&Message::new("/x"), None, None);
    assert!(timeout(Duration::from_millis(200), messages.recv()).await.is_err());
}

#[tokio::test]
async fn test_removed_listener_is_not_called() {
    let mut receiver = loopback_receiver();
    let mut removed = forward_to_channel(&receiver, "/gone");
    let mut kept = forward_to_channel(&receiver, "/kept");
    receiver.remove_listener("/gone");
    receiver.bind().unwrap();
    receiver.listen(None);

    let sender = bound_sender(receiver.local_addr().unwrap());
    sender.send(&Message::new("/gone"), None, None);
    sender.send(&Message::new("/kept"), None, None);

    let message = timeout(WAIT, kept.recv()).await.unwrap().unwrap();
    assert_eq!(message.address(), "/kept");
    // the sender dropped with the listener, so the channel is closed and empty
    assert!(removed.recv().await.is_none());
}
