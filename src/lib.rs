//! Passive network traffic analysis over live or offline captures.
//!
//! Flowscope consumes packet captures, reassembles TCP byte streams, and
//! runs each direction of each connection through a cascade of
//! application-protocol recognizers: HTTP/1.x requests and responses, TLS
//! Client/Server Hello and Certificate messages, the HTTP/2 connection
//! preface, and FTP/SMTP command lines. It emits a stream of typed, parsed
//! records tagged with the connection identity, the endpoint addresses, and
//! capture timing. UDP, DNS, and ICMP traffic is emitted directly with
//! per-packet decoding.
//!
//! Nothing is decrypted and nothing is injected: the pipeline observes,
//! reassembles, and reports. Streams with unrecoverable capture gaps are
//! surfaced as dropped-bytes records rather than silently spliced.
//!
//! ```no_run
//! use flowscope::{Options, TrafficParser};
//!
//! fn main() -> anyhow::Result<()> {
//!     let opts = Options::file("./traces/capture.pcap");
//!     let (_stop, done) = crossbeam_channel::bounded::<()>(0);
//!     let events = TrafficParser::new(opts)?.parse(done)?;
//!     for event in events {
//!         println!("{:?} {:?}", event.transport, event.content);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod conntrack;
pub mod event;
pub mod memory;
pub mod protocols;
pub mod runtime;
pub mod stats;

pub use config::Options;
pub use conntrack::conn_id::ConnectionId;
pub use event::{tee, EventContent, TrafficEvent, TransportKind};
pub use memory::{Buffer, BufferPool, View, ViewReader};
pub use runtime::TrafficParser;
