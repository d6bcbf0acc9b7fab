//! Emitted traffic records.
//!
//! Every record that leaves the pipeline is a [`TrafficEvent`]: the transport
//! kind, endpoint addresses, connection identity (for TCP), the capture
//! timestamps bracketing the content, the raw payload where applicable, and a
//! typed [`EventContent`].

use crate::conntrack::conn_id::ConnectionId;
use crate::memory::View;
use crate::protocols::dns::DnsMessage;
use crate::protocols::stream::ftpsmtp::{FtpSmtpRequest, FtpSmtpResponse};
use crate::protocols::stream::http::{HttpRequest, HttpResponse};
use crate::protocols::stream::tls::{TlsCertificateChain, TlsClientHello, TlsServerHello};

use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;

use crossbeam_channel::{bounded, Receiver};

/// Transport layer a record was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Udp,
    /// UDP carrying a decoded DNS payload.
    Dns,
    Icmpv4,
    Icmpv6,
    /// Any other IP protocol; the payload rides along undecoded.
    Other,
}

/// Flags of an observed TCP segment that carried no payload.
#[derive(Debug, Clone, Copy)]
pub struct TcpPacketMetadata {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

/// The typed content of a traffic record.
#[derive(Debug)]
pub enum EventContent {
    HttpRequest(Box<HttpRequest>),
    HttpResponse(Box<HttpResponse>),
    TlsClientHello(Box<TlsClientHello>),
    TlsServerHello(Box<TlsServerHello>),
    TlsCertificateChain(Box<TlsCertificateChain>),
    /// An HTTP/2 connection preface; the rest of the connection is opaque.
    Http2ConnectionPreface,
    FtpSmtpRequest(FtpSmtpRequest),
    FtpSmtpResponse(FtpSmtpResponse),
    Dns(Box<DnsMessage>),
    /// An empty TCP segment, reported for its flags.
    TcpPacket(TcpPacketMetadata),
    /// Bytes no recognizer claimed, or bytes fed to a parser that failed.
    /// The count is exact; the event's payload holds the bytes themselves,
    /// except that a failed parser's payload is capped at the configured
    /// retention bound.
    DroppedBytes(usize),
    /// Raw payload of a non-TCP layer; the bytes are in the event's payload.
    Raw,
}

impl EventContent {
    /// Returns pooled storage held by the content, if any.
    pub fn release_buffers(&mut self) {
        match self {
            EventContent::HttpRequest(req) => req.release_buffers(),
            EventContent::HttpResponse(resp) => resp.release_buffers(),
            _ => {}
        }
    }
}

/// A single parsed record of network traffic.
#[derive(Debug)]
pub struct TrafficEvent {
    pub transport: TransportKind,
    pub src_ip: IpAddr,
    /// Unset for transports without ports.
    pub src_port: Option<u16>,
    pub dst_ip: IpAddr,
    /// Unset for transports without ports.
    pub dst_port: Option<u16>,
    /// Set for TCP records only.
    pub connection_id: Option<ConnectionId>,
    /// Capture time of the first packet contributing to this record.
    pub observed: SystemTime,
    /// Arrival time of the final packet; equals `observed` for
    /// single-packet content.
    pub final_time: SystemTime,
    /// Raw bytes for unparsed and non-TCP content; empty otherwise.
    pub payload: View,
    pub content: EventContent,
}

impl TrafficEvent {
    /// Releases any pooled storage backing this record. Consumers that do
    /// not need a record's payload must call this (or drop the event).
    pub fn release_buffers(&mut self) {
        self.payload.clear();
        self.content.release_buffers();
    }
}

/// Fans one event channel into two. Events are shared, not copied; both
/// outputs must be drained or the forwarding thread (and therefore the
/// pipeline) stalls.
pub fn tee(input: Receiver<TrafficEvent>) -> (Receiver<Arc<TrafficEvent>>, Receiver<Arc<TrafficEvent>>) {
    let (tx1, rx1) = bounded(0);
    let (tx2, rx2) = bounded(0);
    std::thread::spawn(move || {
        for event in input {
            let event = Arc::new(event);
            if tx1.send(Arc::clone(&event)).is_err() {
                break;
            }
            if tx2.send(event).is_err() {
                break;
            }
        }
    });
    (rx1, rx2)
}
