//! Application-protocol recognition over reassembled TCP flows.
//!
//! A recognizer is a factory plus the parser it creates. The factory decides
//! whether some byte prefix belongs to its protocol; the parser extracts a
//! typed message. Factories are consulted in a fixed priority order by the
//! [`ParserSelector`]; once one accepts, it alone parses the flow until its
//! message completes or fails.

pub mod ftpsmtp;
pub mod http;
pub mod http2;
pub mod tls;

use crate::conntrack::conn_id::ConnectionId;
use crate::event::EventContent;
use crate::memory::{BufferPool, View};

use self::ftpsmtp::{
    FtpSmtpRequestFactory, FtpSmtpRequestParser, FtpSmtpResponseFactory, FtpSmtpResponseParser,
};
use self::http::parser::{HttpRequestFactory, HttpResponseFactory, HttpSessionParser};
use self::http2::{Http2PrefaceFactory, Http2Sink};
use self::tls::parser::{
    TlsCertificateFactory, TlsCertificateParser, TlsClientHelloFactory, TlsClientHelloParser,
    TlsServerHelloFactory, TlsServerHelloParser,
};

use anyhow::Result;

/// A recognizer factory's verdict on a byte prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptDecision {
    /// A recognizable protocol unit starts `discard_front` bytes in; discard
    /// those bytes and instantiate a parser from this factory.
    Accept,
    /// Undecided: the first `discard_front` bytes are definitively
    /// unrecognizable and may be dropped, the rest must be retained and
    /// offered again with more data.
    NeedMoreData,
    /// This factory will never accept any prefix of the input.
    Reject,
}

/// The outcome of feeding bytes to a parser.
#[derive(Debug)]
pub struct ParseStatus {
    /// The parsed message once a complete unit has been recognized.
    pub content: Option<EventContent>,
    /// Trailing bytes that belong to the next protocol unit.
    pub unused: View,
    /// Total bytes this parser has consumed from the flow.
    pub consumed: usize,
}

impl ParseStatus {
    /// More bytes are needed before a message can complete.
    pub(crate) fn needs_more(consumed: usize) -> ParseStatus {
        ParseStatus {
            content: None,
            unused: View::new(),
            consumed,
        }
    }

    /// A message completed, with `unused` bytes left over for the next unit.
    pub(crate) fn done(content: EventContent, unused: View, consumed: usize) -> ParseStatus {
        ParseStatus {
            content: Some(content),
            unused,
            consumed,
        }
    }
}

/// A protocol recognizer factory.
#[derive(Debug)]
pub enum ParserFactory {
    HttpRequest(HttpRequestFactory),
    HttpResponse(HttpResponseFactory),
    Http2Preface(Http2PrefaceFactory),
    TlsClientHello(TlsClientHelloFactory),
    TlsServerHello(TlsServerHelloFactory),
    TlsCertificate(TlsCertificateFactory),
    FtpSmtpRequest(FtpSmtpRequestFactory),
    FtpSmtpResponse(FtpSmtpResponseFactory),
    #[cfg(test)]
    Stub(StubFactory),
}

impl ParserFactory {
    /// The default recognizer cascade, in priority order.
    pub fn default_set(pool: BufferPool, http_max_body_len: usize) -> Vec<ParserFactory> {
        vec![
            ParserFactory::HttpRequest(HttpRequestFactory::new(pool.clone(), http_max_body_len)),
            ParserFactory::HttpResponse(HttpResponseFactory::new(pool, http_max_body_len)),
            ParserFactory::Http2Preface(Http2PrefaceFactory),
            ParserFactory::TlsClientHello(TlsClientHelloFactory),
            ParserFactory::TlsServerHello(TlsServerHelloFactory),
            ParserFactory::TlsCertificate(TlsCertificateFactory),
            ParserFactory::FtpSmtpRequest(FtpSmtpRequestFactory),
            ParserFactory::FtpSmtpResponse(FtpSmtpResponseFactory),
        ]
    }

    /// Human-readable identifier used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ParserFactory::HttpRequest(_) => "HTTP/1.x request parser factory",
            ParserFactory::HttpResponse(_) => "HTTP/1.x response parser factory",
            ParserFactory::Http2Preface(_) => "HTTP/2 connection preface parser factory",
            ParserFactory::TlsClientHello(_) => "TLS 1.2/1.3 client parser factory",
            ParserFactory::TlsServerHello(_) => "TLS 1.2/1.3 server parser factory",
            ParserFactory::TlsCertificate(_) => "TLS certificate parser factory",
            ParserFactory::FtpSmtpRequest(_) => "FTP/SMTP request parser factory",
            ParserFactory::FtpSmtpResponse(_) => "FTP/SMTP response parser factory",
            #[cfg(test)]
            ParserFactory::Stub(_) => "stub factory",
        }
    }

    /// Decides whether a recognizable protocol unit starts within `input`.
    /// With `is_end` set there will be no more data, so an undecided factory
    /// rejects and discards the whole input.
    pub fn accepts(&self, input: &View, is_end: bool) -> (AcceptDecision, usize) {
        let (decision, discard_front) = match self {
            ParserFactory::HttpRequest(f) => f.accepts(input),
            ParserFactory::HttpResponse(f) => f.accepts(input),
            ParserFactory::Http2Preface(f) => f.accepts(input),
            ParserFactory::TlsClientHello(f) => f.accepts(input),
            ParserFactory::TlsServerHello(f) => f.accepts(input),
            ParserFactory::TlsCertificate(f) => f.accepts(input),
            ParserFactory::FtpSmtpRequest(f) => f.accepts(input),
            ParserFactory::FtpSmtpResponse(f) => f.accepts(input),
            #[cfg(test)]
            ParserFactory::Stub(f) => (f.decision, f.discard_front),
        };
        if is_end && decision == AcceptDecision::NeedMoreData {
            (AcceptDecision::Reject, input.len())
        } else {
            (decision, discard_front)
        }
    }

    /// Builds a parser carrying the per-connection state it needs: the
    /// connection identifier to tag emitted results, and the TCP
    /// sequence/acknowledgment numbers of the first accepted byte, used to
    /// pair requests with responses.
    pub fn create_parser(&self, connection_id: ConnectionId, seq: u32, ack: u32) -> SessionParser {
        match self {
            ParserFactory::HttpRequest(f) => {
                SessionParser::Http(f.create_parser(connection_id, seq, ack))
            }
            ParserFactory::HttpResponse(f) => {
                SessionParser::Http(f.create_parser(connection_id, seq, ack))
            }
            ParserFactory::Http2Preface(_) => SessionParser::Http2(Http2Sink::new()),
            ParserFactory::TlsClientHello(_) => {
                SessionParser::TlsClientHello(TlsClientHelloParser::new(connection_id))
            }
            ParserFactory::TlsServerHello(_) => {
                SessionParser::TlsServerHello(TlsServerHelloParser::new(connection_id))
            }
            ParserFactory::TlsCertificate(_) => {
                SessionParser::TlsCertificate(TlsCertificateParser::new(connection_id))
            }
            ParserFactory::FtpSmtpRequest(_) => {
                SessionParser::FtpSmtpRequest(FtpSmtpRequestParser::new(connection_id))
            }
            ParserFactory::FtpSmtpResponse(_) => {
                SessionParser::FtpSmtpResponse(FtpSmtpResponseParser::new(connection_id))
            }
            #[cfg(test)]
            ParserFactory::Stub(_) => unreachable!("stub factories never create parsers"),
        }
    }
}

/// An in-flight protocol parser bound to one direction of one connection.
#[derive(Debug)]
pub enum SessionParser {
    Http(HttpSessionParser),
    Http2(Http2Sink),
    TlsClientHello(TlsClientHelloParser),
    TlsServerHello(TlsServerHelloParser),
    TlsCertificate(TlsCertificateParser),
    FtpSmtpRequest(FtpSmtpRequestParser),
    FtpSmtpResponse(FtpSmtpResponseParser),
}

impl SessionParser {
    /// Human-readable identifier used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            SessionParser::Http(p) => p.name(),
            SessionParser::Http2(_) => "HTTP/2 sink",
            SessionParser::TlsClientHello(_) => "TLS 1.2/1.3 client-hello parser",
            SessionParser::TlsServerHello(_) => "TLS 1.2/1.3 server-hello parser",
            SessionParser::TlsCertificate(_) => "TLS certificate parser",
            SessionParser::FtpSmtpRequest(_) => "FTP/SMTP request parser",
            SessionParser::FtpSmtpResponse(_) => "FTP/SMTP response parser",
        }
    }

    /// `true` for parsers that stay in place after their first result and
    /// swallow the rest of the flow (the HTTP/2 sink: there is no way to
    /// downgrade, so everything after the preface is opaque frames).
    pub fn sinks_remainder(&self) -> bool {
        matches!(self, SessionParser::Http2(_))
    }

    /// Feeds reassembled bytes to the parser. With `is_end` set the parser
    /// must finalize: emit a result, an error, or nothing (which callers
    /// treat as stream truncation). An error resets the flow; the bytes fed
    /// so far are reported as dropped.
    pub fn parse(&mut self, input: &View, is_end: bool) -> Result<ParseStatus> {
        match self {
            SessionParser::Http(p) => p.parse(input, is_end),
            SessionParser::Http2(p) => p.parse(input, is_end),
            SessionParser::TlsClientHello(p) => p.parse(input, is_end),
            SessionParser::TlsServerHello(p) => p.parse(input, is_end),
            SessionParser::TlsCertificate(p) => p.parse(input, is_end),
            SessionParser::FtpSmtpRequest(p) => p.parse(input, is_end),
            SessionParser::FtpSmtpResponse(p) => p.parse(input, is_end),
        }
    }
}

/// A test stand-in factory with a fixed verdict.
#[cfg(test)]
#[derive(Debug)]
pub struct StubFactory {
    pub decision: AcceptDecision,
    pub discard_front: usize,
}

/// The result of offering input to every factory in a selector.
#[derive(Debug)]
pub enum Selection<'a> {
    /// The first factory that accepted, with its discard-front.
    Accept {
        factory: &'a ParserFactory,
        discard_front: usize,
    },
    /// At least one factory needs more data. The discard-front is the
    /// minimum over the undecided factories, so retained data is maximal.
    NeedMoreData { discard_front: usize },
    /// No factory will ever accept; the whole input should be dropped.
    Reject { discard_front: usize },
}

/// An ordered set of recognizer factories.
#[derive(Debug)]
pub struct ParserSelector {
    factories: Vec<ParserFactory>,
}

impl ParserSelector {
    pub fn new(factories: Vec<ParserFactory>) -> ParserSelector {
        ParserSelector { factories }
    }

    /// Offers `input` to each factory in priority order: the first `Accept`
    /// wins immediately; otherwise any `NeedMoreData` keeps the flow
    /// undecided with the minimum discard-front; otherwise the input is
    /// rejected outright.
    pub fn select(&self, input: &View, is_end: bool) -> Selection<'_> {
        let mut min_keep: Option<usize> = None;
        for factory in &self.factories {
            let (decision, discard_front) = factory.accepts(input, is_end);
            match decision {
                AcceptDecision::Accept => {
                    log::debug!("{} accepted at {}", factory.name(), discard_front);
                    return Selection::Accept {
                        factory,
                        discard_front,
                    };
                }
                AcceptDecision::NeedMoreData => {
                    min_keep = Some(match min_keep {
                        Some(front) => front.min(discard_front),
                        None => discard_front,
                    });
                }
                AcceptDecision::Reject => {}
            }
        }
        match min_keep {
            Some(discard_front) => Selection::NeedMoreData { discard_front },
            None => Selection::Reject {
                discard_front: input.len(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(decision: AcceptDecision, discard_front: usize) -> ParserFactory {
        ParserFactory::Stub(StubFactory {
            decision,
            discard_front,
        })
    }

    fn input() -> View {
        View::from(&b"hello I'm test input"[..])
    }

    #[test]
    fn empty_selector_rejects() {
        let selector = ParserSelector::new(vec![]);
        match selector.select(&input(), true) {
            Selection::Reject { discard_front } => assert_eq!(discard_front, input().len()),
            other => panic!("unexpected selection: {other:?}"),
        }
    }

    #[test]
    fn first_accept_wins() {
        let selector = ParserSelector::new(vec![
            stub(AcceptDecision::Accept, 6),
            stub(AcceptDecision::NeedMoreData, 1),
            stub(AcceptDecision::Reject, 20),
        ]);
        match selector.select(&input(), true) {
            Selection::Accept { discard_front, .. } => assert_eq!(discard_front, 6),
            other => panic!("unexpected selection: {other:?}"),
        }
    }

    #[test]
    fn single_need_more_data() {
        let selector = ParserSelector::new(vec![
            stub(AcceptDecision::Reject, 20),
            stub(AcceptDecision::NeedMoreData, 1),
            stub(AcceptDecision::Reject, 20),
        ]);
        match selector.select(&input(), false) {
            Selection::NeedMoreData { discard_front } => assert_eq!(discard_front, 1),
            other => panic!("unexpected selection: {other:?}"),
        }
    }

    #[test]
    fn need_more_data_takes_minimum_discard() {
        let selector = ParserSelector::new(vec![
            stub(AcceptDecision::Reject, 20),
            stub(AcceptDecision::NeedMoreData, 10),
            stub(AcceptDecision::NeedMoreData, 1),
            stub(AcceptDecision::Reject, 20),
        ]);
        match selector.select(&input(), false) {
            Selection::NeedMoreData { discard_front } => assert_eq!(discard_front, 1),
            other => panic!("unexpected selection: {other:?}"),
        }
    }

    #[test]
    fn all_rejects_discard_whole_input() {
        let selector = ParserSelector::new(vec![
            stub(AcceptDecision::Reject, 0),
            stub(AcceptDecision::Reject, 3),
            stub(AcceptDecision::Reject, 7),
        ]);
        match selector.select(&input(), true) {
            Selection::Reject { discard_front } => assert_eq!(discard_front, input().len()),
            other => panic!("unexpected selection: {other:?}"),
        }
    }

    #[test]
    fn end_of_stream_turns_undecided_into_reject() {
        let selector = ParserSelector::new(vec![stub(AcceptDecision::NeedMoreData, 1)]);
        match selector.select(&input(), true) {
            Selection::Reject { discard_front } => assert_eq!(discard_front, input().len()),
            other => panic!("unexpected selection: {other:?}"),
        }
    }
}
