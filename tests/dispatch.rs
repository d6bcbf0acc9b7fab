//! End-to-end recognition scenarios driven through the public recognizer
//! API: the selector chooses a factory over segmented input, the factory's
//! parser produces the typed message.

use flowscope::memory::{BufferPool, View};
use flowscope::protocols::stream::{
    AcceptDecision, ParserFactory, ParserSelector, SessionParser, Selection,
};
use flowscope::{ConnectionId, EventContent};

fn selector() -> ParserSelector {
    let pool = BufferPool::new(1024 * 1024, 4096).unwrap();
    ParserSelector::new(ParserFactory::default_set(pool, 1024 * 1024))
}

/// Runs one selection round and returns the parser plus the accepted input.
fn accept(selector: &ParserSelector, input: &View, is_end: bool) -> (SessionParser, View) {
    match selector.select(input, is_end) {
        Selection::Accept {
            factory,
            discard_front,
        } => {
            let parser = factory.create_parser(ConnectionId::new(), 1000, 2000);
            (parser, input.sub_view(discard_front, input.len()))
        }
        other => panic!("selector did not accept: {other:?}"),
    }
}

#[test]
fn segmented_http2_preface_is_accepted_with_discard() {
    let mut input = View::from(&b"abcdef"[..]);
    input.append(&View::from(&b"PRI * HT"[..]));
    input.append(&View::from(&b"TP/2.0\r\n\r\nSM\r\n\r\n"[..]));

    let selector = selector();
    match selector.select(&input, true) {
        Selection::Accept {
            factory,
            discard_front,
        } => {
            assert_eq!(discard_front, 6);
            assert_eq!(factory.name(), "HTTP/2 connection preface parser factory");
        }
        other => panic!("expected accept, got {other:?}"),
    }

    let (mut parser, accepted) = accept(&selector, &input, true);
    let status = parser.parse(&accepted, true).unwrap();
    assert!(matches!(
        status.content,
        Some(EventContent::Http2ConnectionPreface)
    ));

    // After the preface the sink swallows everything silently.
    let status = parser.parse(&View::from(&b"opaque frames"[..]), false).unwrap();
    assert!(status.content.is_none());
    let status = parser.parse(&View::new(), true).unwrap();
    assert!(status.content.is_none());
}

#[test]
fn http_get_parses_under_all_segmentations() {
    let raw = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
    let n = raw.len();
    let selector = selector();

    // Deliver the bytes in every 4-way segmentation.
    for i in 0..=n {
        for j in i..=n {
            for k in j..=n {
                let mut input = View::new();
                for part in [&raw[..i], &raw[i..j], &raw[j..k], &raw[k..]] {
                    input.append(&View::from(part));
                }

                match selector.select(&input, true) {
                    Selection::Accept { discard_front, .. } => assert_eq!(discard_front, 0),
                    other => panic!("expected accept, got {other:?}"),
                }
                let (mut parser, accepted) = accept(&selector, &input, true);
                let status = parser.parse(&accepted, true).unwrap();
                match status.content {
                    Some(EventContent::HttpRequest(req)) => {
                        assert_eq!(req.method, "GET");
                        assert_eq!(req.target, "/");
                        assert_eq!(req.host.as_deref(), Some("x"));
                        assert!(req.body.is_empty());
                    }
                    other => panic!("expected a request, got {other:?}"),
                }
            }
        }
    }
}

#[test]
fn http_response_without_body() {
    let input = View::from(&b"HTTP/1.1 200 OK\r\n\r\n"[..]);
    let selector = selector();
    let (mut parser, accepted) = accept(&selector, &input, true);
    let status = parser.parse(&accepted, true).unwrap();
    match status.content {
        Some(EventContent::HttpResponse(resp)) => {
            assert_eq!(resp.status_code, 200);
            assert_eq!(resp.reason, "OK");
            assert!(resp.body.is_empty());
        }
        other => panic!("expected a response, got {other:?}"),
    }
}

#[test]
fn garbage_prefix_is_discarded_before_the_request() {
    let input = View::from(&b"hello I'm garbage\r\nGET / HTTP/1.1\r\n\r\n"[..]);
    let selector = selector();
    match selector.select(&input, true) {
        Selection::Accept { discard_front, .. } => assert_eq!(discard_front, 19),
        other => panic!("expected accept, got {other:?}"),
    }
    let (mut parser, accepted) = accept(&selector, &input, true);
    let status = parser.parse(&accepted, true).unwrap();
    match status.content {
        Some(EventContent::HttpRequest(req)) => assert_eq!(req.method, "GET"),
        other => panic!("expected a request, got {other:?}"),
    }
}

#[test]
fn tls_client_hello_with_sni_and_alpn() {
    let input = View::from(client_hello_with_sni());
    let selector = selector();
    match selector.select(&input, false) {
        Selection::Accept { factory, .. } => {
            assert_eq!(factory.name(), "TLS 1.2/1.3 client parser factory");
        }
        other => panic!("expected accept, got {other:?}"),
    }
    let (mut parser, accepted) = accept(&selector, &input, false);
    let status = parser.parse(&accepted, false).unwrap();
    match status.content {
        Some(EventContent::TlsClientHello(hello)) => {
            assert_eq!(hello.server_name.as_deref(), Some("example.com"));
            assert_eq!(hello.alpn_protocols, vec!["h2", "http/1.1"]);
        }
        other => panic!("expected a client hello, got {other:?}"),
    }
}

#[test]
fn ftp_session_command_and_reply() {
    let selector = selector();

    let input = View::from(&b"USER anonymous\r\n"[..]);
    let (mut parser, accepted) = accept(&selector, &input, false);
    let status = parser.parse(&accepted, false).unwrap();
    match status.content {
        Some(EventContent::FtpSmtpRequest(req)) => {
            assert_eq!(req.command, "USER");
            assert_eq!(req.arg, "anonymous");
        }
        other => panic!("expected a command, got {other:?}"),
    }

    let input = View::from(&b"331 Please specify the password.\r\n"[..]);
    let (mut parser, accepted) = accept(&selector, &input, false);
    let status = parser.parse(&accepted, false).unwrap();
    match status.content {
        Some(EventContent::FtpSmtpResponse(resp)) => {
            assert_eq!(resp.code, "331");
            assert_eq!(resp.arg, "Please specify the password.");
        }
        other => panic!("expected a reply, got {other:?}"),
    }
}

#[test]
fn undecided_input_converts_to_reject_at_stream_end() {
    let selector = selector();
    let input = View::from(&b"GE"[..]);
    match selector.select(&input, false) {
        Selection::NeedMoreData { discard_front } => assert_eq!(discard_front, 0),
        other => panic!("expected need-more-data, got {other:?}"),
    }
    match selector.select(&input, true) {
        Selection::Reject { discard_front } => assert_eq!(discard_front, 2),
        other => panic!("expected reject, got {other:?}"),
    }
}

#[test]
fn factories_expose_acceptance_directly() {
    let pool = BufferPool::new(64 * 1024, 4096).unwrap();
    let factories = ParserFactory::default_set(pool, 1024 * 1024);
    let request_factory = &factories[0];

    let input = View::from(&b"GET / HTTP/1.1\r\n"[..]);
    assert_eq!(
        request_factory.accepts(&input, false),
        (AcceptDecision::Accept, 0)
    );
}

/// A TLS 1.2 Client Hello carrying SNI `example.com` and ALPN `h2` +
/// `http/1.1`, assembled field by field.
fn client_hello_with_sni() -> Vec<u8> {
    fn with_u16_len(out: &mut Vec<u8>, body: &[u8]) {
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
    }

    let mut extensions = vec![];

    let mut sni_entry = vec![0x00]; // DNS hostname type
    with_u16_len(&mut sni_entry, b"example.com");
    let mut sni_list = vec![];
    with_u16_len(&mut sni_list, &sni_entry);
    extensions.extend_from_slice(&0x0000u16.to_be_bytes()); // server_name
    with_u16_len(&mut extensions, &sni_list);

    let mut alpn_entries = vec![];
    for proto in [&b"h2"[..], &b"http/1.1"[..]] {
        alpn_entries.push(proto.len() as u8);
        alpn_entries.extend_from_slice(proto);
    }
    let mut alpn_list = vec![];
    with_u16_len(&mut alpn_list, &alpn_entries);
    extensions.extend_from_slice(&0x0010u16.to_be_bytes()); // alpn
    with_u16_len(&mut extensions, &alpn_list);

    let mut hello = vec![0x03, 0x03]; // TLS 1.2
    hello.extend_from_slice(&[0x42; 32]); // random
    hello.push(0); // empty session id
    with_u16_len(&mut hello, &[0x13, 0x01, 0xc0, 0x2f]); // cipher suites
    hello.extend_from_slice(&[0x01, 0x00]); // null compression
    with_u16_len(&mut hello, &extensions);

    let mut handshake = vec![0x01]; // client hello
    handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&hello);

    let mut record = vec![0x16, 0x03, 0x01]; // handshake record, TLS 1.0
    with_u16_len(&mut record, &handshake);
    record
}
