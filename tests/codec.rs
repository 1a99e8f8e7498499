use oscnet::error::Error;
use oscnet::protocol::{decode_packet, pattern_match, ArgType};
use oscnet::transport::Dispatcher;
use oscnet::{ArgValue, Bundle, Message};
use parking_lot::Mutex;
use std::sync::Arc;

fn body(buffer: &[u8]) -> &[u8] {
    &buffer[4..]
}

#[test]
fn test_message_wire_layout() {
    let mut message = Message::new("/test/1");
    message.append_int32(245);
    message.append_string("hello");
    message.append_float(1.5);

    let buffer = message.shared_buffer();
    assert_eq!(buffer.len(), 36);
    assert_eq!(&buffer[0..4], &32u32.to_be_bytes());
    assert_eq!(&buffer[4..12], b"/test/1\0");
    assert_eq!(&buffer[12..20], b",isf\0\0\0\0");
    assert_eq!(&buffer[20..24], &245i32.to_be_bytes());
    assert_eq!(&buffer[24..32], b"hello\0\0\0");
    assert_eq!(&buffer[32..36], &1.5f32.to_be_bytes());
}

#[test]
fn test_decode_matches_source() {
    let mut message = Message::new("/mixer/channel/3");
    message.append(-12i32);
    message.append(0.75f32);
    message.append("vocals");
    message.append(vec![1u8, 2, 3, 4, 5]);
    message.append(true);
    message.append_midi(1, 0x90, 60, 127);

    let decoded = decode_packet(body(&message.shared_buffer())).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0], message);
    assert_eq!(
        decoded[0].values(),
        vec![
            ArgValue::Int32(-12),
            ArgValue::Float(0.75),
            ArgValue::String("vocals".into()),
            ArgValue::Blob(vec![1, 2, 3, 4, 5]),
            ArgValue::Bool(true),
            ArgValue::Midi([1, 0x90, 60, 127]),
        ]
    );
}

#[test]
fn test_accessor_errors() {
    let mut message = Message::new("/a");
    message.append_float(1.0);

    assert!(matches!(
        message.arg_int32(0),
        Err(Error::NonConvertible {
            requested: ArgType::Int32,
            actual: ArgType::Float,
            ..
        })
    ));
    assert!(matches!(
        message.arg_float(1),
        Err(Error::IndexOutOfBounds { index: 1, .. })
    ));
}

#[test]
fn test_bundle_of_bundles() {
    let mut inner = Bundle::new();
    inner.append_message(&Message::new("/inner"));

    let mut outer = Bundle::new();
    outer.set_timetag(0x0000_0001_0000_0002);
    outer.append_message(&Message::new("/outer"));
    outer.append_bundle(&inner);

    let decoded = decode_packet(body(&outer.shared_buffer())).unwrap();
    let addresses: Vec<&str> = decoded.iter().map(|m| m.address()).collect();
    assert_eq!(addresses, vec!["/outer", "/inner"]);
    assert!(decoded
        .iter()
        .all(|m| m.timetag() == Some(0x0000_0001_0000_0002)));
}

#[test]
fn test_random_bytes_never_panic() {
    // deterministic xorshift so failures are reproducible
    let mut state: u32 = 0x1234_5678;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
    };
    for round in 0..500 {
        let len = (next() % 64) as usize;
        let mut packet: Vec<u8> = (0..len).map(|_| next() as u8).collect();
        if round % 3 == 0 && !packet.is_empty() {
            packet[0] = b'/';
        }
        if round % 5 == 0 {
            let mut bundled = b"#bundle\0".to_vec();
            bundled.extend_from_slice(&packet);
            packet = bundled;
        }
        let _ = decode_packet(&packet);
    }
}

#[test]
fn test_pattern_properties() {
    for address in ["/a", "/a/b/c", "/synth/1/freq"] {
        assert!(pattern_match(address, address));
        assert!(pattern_match(address, "*"));
    }
    assert!(!pattern_match("", "?"));
    assert!(pattern_match("/synth/1/freq", "/synth/[0-9]/{freq,gain}"));
    assert!(!pattern_match("/synth/x/freq", "/synth/[0-9]/{freq,gain}"));
}

#[test]
fn test_dispatcher_runs_every_match_in_order() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Dispatcher::new();
    for pattern in ["/foo/1", "/foo/*", "/bar"] {
        let calls = Arc::clone(&calls);
        dispatcher.set_listener(
            pattern,
            Arc::new(move |message: &Message| {
                calls.lock().push((pattern, message.address().to_string()));
            }),
        );
    }

    let sender = "10.0.0.1:8000".parse().unwrap();
    let invoked = dispatcher.dispatch_methods(body(&Message::new("/foo/1").shared_buffer()), sender);
    assert_eq!(invoked, 2);
    assert_eq!(
        *calls.lock(),
        vec![
            ("/foo/1", "/foo/1".to_string()),
            ("/foo/*", "/foo/1".to_string())
        ]
    );
}
