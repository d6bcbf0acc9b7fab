//! Connection state management.
//!
//! The [`StreamTable`] owns every tracked TCP conversation, keyed by the
//! direction-independent endpoint pair. The dispatch task drives it with
//! decoded segments and a periodic tick that flushes capture gaps and
//! retires idle conversations.

pub mod conn_id;
pub(crate) mod flow;
pub(crate) mod pdu;
pub(crate) mod reassembly;
pub(crate) mod stream;

use self::conn_id::{ConnKey, FiveTuple};
use self::pdu::L4Pdu;
use self::stream::TcpStream;
use crate::event::TrafficEvent;
use crate::protocols::stream::ParserSelector;

use std::time::{Duration, SystemTime};

use crossbeam_channel::Sender;
use hashlink::linked_hash_map::{LinkedHashMap, RawEntryMut};

/// Configurable limits for a [`StreamTable`].
#[derive(Debug, Clone)]
pub(crate) struct TableConfig {
    /// Maximum number of conversations tracked at once.
    pub(crate) max_connections: usize,
    /// Maximum out-of-order segments buffered per conversation.
    pub(crate) max_out_of_order: usize,
    /// Maximum out-of-order segments buffered across all conversations.
    pub(crate) max_out_of_order_total: usize,
    /// Cap on raw bytes a flow retains per in-flight parse for its
    /// dropped-bytes report on failure.
    pub(crate) max_retained_bytes: usize,
    /// Oldest capture gap tolerated before data is delivered around it.
    pub(crate) flush_timeout: Duration,
    /// Idleness bound after which a conversation is retired.
    pub(crate) close_timeout: Duration,
}

/// Manages state for all tracked TCP conversations.
pub(crate) struct StreamTable {
    config: TableConfig,
    table: LinkedHashMap<ConnKey, TcpStream>,
    out: Sender<TrafficEvent>,
    /// Running count of out-of-order segments buffered across the table.
    total_buffered: usize,
}

impl StreamTable {
    pub(crate) fn new(config: TableConfig, out: Sender<TrafficEvent>) -> StreamTable {
        StreamTable {
            table: LinkedHashMap::with_capacity(config.max_connections.min(1 << 16)),
            config,
            out,
            total_buffered: 0,
        }
    }

    /// Number of tracked conversations.
    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.table.len()
    }

    /// Routes one decoded TCP segment to its conversation, creating the
    /// conversation on first sight.
    pub(crate) fn process(&mut self, pdu: L4Pdu, selector: &ParserSelector) {
        let key = ConnKey::new(pdu.ctxt.src, pdu.ctxt.dst, pdu.ctxt.proto);
        match self.table.raw_entry_mut().from_key(&key) {
            RawEntryMut::Occupied(mut occupied) => {
                let stream = occupied.get_mut();
                let before = stream.buffered();
                stream.process(pdu, selector);
                let after = stream.buffered();
                self.total_buffered = self.total_buffered + after - before;
                if stream.terminated() {
                    stream.terminate(selector);
                    self.total_buffered = self.total_buffered.saturating_sub(after);
                    occupied.remove();
                }
            }
            RawEntryMut::Vacant(_) => {
                if self.table.len() >= self.config.max_connections {
                    log::error!("stream table full, dropping packet");
                    return;
                }
                let five_tuple = FiveTuple {
                    orig: pdu.ctxt.src,
                    resp: pdu.ctxt.dst,
                    proto: pdu.ctxt.proto,
                };
                let mut stream = TcpStream::new(
                    five_tuple,
                    pdu.ts,
                    self.out.clone(),
                    self.config.max_out_of_order,
                    self.config.max_retained_bytes,
                );
                stream.process(pdu, selector);
                if stream.terminated() {
                    stream.terminate(selector);
                } else {
                    self.total_buffered += stream.buffered();
                    self.table.insert(key, stream);
                }
            }
        }

        if self.total_buffered > self.config.max_out_of_order_total {
            log::warn!(
                "out-of-order budget exceeded ({} segments), flushing all gaps",
                self.total_buffered
            );
            self.flush_all_gaps(selector);
        }
    }

    /// Periodic maintenance: retires conversations idle past the close
    /// timeout and delivers data stuck behind gaps older than the flush
    /// timeout. Returns (segments flushed, conversations closed).
    pub(crate) fn tick(&mut self, now: SystemTime, selector: &ParserSelector) -> (usize, usize) {
        let flush_cutoff = now
            .checked_sub(self.config.flush_timeout)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let close_cutoff = now
            .checked_sub(self.config.close_timeout)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut flushed = 0;
        let mut to_close = vec![];
        for (key, stream) in self.table.iter_mut() {
            if stream.last_seen < close_cutoff {
                to_close.push(key.clone());
            } else {
                let before = stream.buffered();
                flushed += stream.flush(flush_cutoff, selector);
                self.total_buffered = self.total_buffered + stream.buffered() - before;
            }
        }

        let closed = to_close.len();
        for key in to_close {
            if let Some(mut stream) = self.table.remove(&key) {
                self.total_buffered -= stream.buffered().min(self.total_buffered);
                stream.terminate(selector);
            }
        }
        (flushed, closed)
    }

    /// Terminates every conversation. Called when the packet source closes.
    pub(crate) fn drain(&mut self, selector: &ParserSelector) {
        log::info!("draining {} tracked conversations", self.table.len());
        for (_, mut stream) in self.table.drain() {
            stream.terminate(selector);
        }
        self.total_buffered = 0;
    }

    /// Skips every gap in every conversation, freeing the out-of-order
    /// buffers.
    fn flush_all_gaps(&mut self, selector: &ParserSelector) {
        for (_, stream) in self.table.iter_mut() {
            stream.flush_all(selector);
        }
        self.total_buffered = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conntrack::pdu::L4Context;
    use crate::event::EventContent;
    use crate::memory::BufferPool;
    use crate::protocols::packet::tcp::ACK;
    use crate::protocols::stream::ParserFactory;

    use std::net::SocketAddr;
    use std::sync::Arc;

    use crossbeam_channel::{unbounded, Receiver};

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn selector() -> ParserSelector {
        let pool = BufferPool::new(1024 * 1024, 4096).unwrap();
        ParserSelector::new(ParserFactory::default_set(pool, 1024 * 1024))
    }

    fn config() -> TableConfig {
        TableConfig {
            max_connections: 128,
            max_out_of_order: 32,
            max_out_of_order_total: 1024,
            max_retained_bytes: 1024 * 1024,
            flush_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(90),
        }
    }

    fn pdu(src: &str, dst: &str, seq: u32, payload: &[u8], secs: u64) -> L4Pdu {
        L4Pdu::new(
            Arc::new(payload.to_vec()),
            L4Context {
                src: addr(src),
                dst: addr(dst),
                proto: 6,
                offset: 0,
                length: payload.len(),
                seq_no: seq,
                ack_no: 0,
                flags: ACK,
            },
            SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        )
    }

    fn contents(rx: &Receiver<TrafficEvent>) -> Vec<EventContent> {
        rx.try_iter().map(|event| event.content).collect()
    }

    #[test]
    fn tracks_connections_per_endpoint_pair() {
        let (tx, _rx) = unbounded();
        let mut table = StreamTable::new(config(), tx);
        let selector = selector();

        table.process(pdu("10.0.0.1:1000", "10.0.0.2:80", 1, b"GE", 1), &selector);
        table.process(pdu("10.0.0.2:80", "10.0.0.1:1000", 9, b"HT", 1), &selector);
        assert_eq!(table.size(), 1);

        table.process(pdu("10.0.0.3:1000", "10.0.0.2:80", 1, b"GE", 1), &selector);
        assert_eq!(table.size(), 2);
    }

    #[test]
    fn close_timeout_retires_idle_streams() {
        let (tx, rx) = unbounded();
        let mut table = StreamTable::new(config(), tx);
        let selector = selector();

        // An undecided prefix stays buffered in the flow.
        table.process(pdu("10.0.0.1:1000", "10.0.0.2:80", 1, b"GE", 0), &selector);
        assert_eq!(table.size(), 1);
        assert!(contents(&rx).is_empty());

        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(200);
        let (_, closed) = table.tick(now, &selector);
        assert_eq!(closed, 1);
        assert_eq!(table.size(), 0);
        // Retiring the stream flushed the undecided bytes as dropped.
        let events = contents(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], EventContent::DroppedBytes(2)));
    }

    #[test]
    fn flush_timeout_delivers_around_gaps() {
        let (tx, rx) = unbounded();
        let mut table = StreamTable::new(config(), tx);
        let selector = selector();

        table.process(
            pdu("10.0.0.1:1000", "10.0.0.2:80", 1, b"USER anon", 0),
            &selector,
        );
        // A hole before this segment keeps it buffered.
        table.process(
            pdu("10.0.0.1:1000", "10.0.0.2:80", 30, b"ymous\r\n", 0),
            &selector,
        );
        assert!(contents(&rx).is_empty());

        // Within the flush window nothing moves.
        let (flushed, _) = table.tick(SystemTime::UNIX_EPOCH + Duration::from_secs(5), &selector);
        assert_eq!(flushed, 0);

        // Past it, the buffered segment is delivered around the gap.
        let (flushed, closed) =
            table.tick(SystemTime::UNIX_EPOCH + Duration::from_secs(20), &selector);
        assert_eq!(flushed, 1);
        assert_eq!(closed, 0);
        let events = contents(&rx);
        assert!(!events.is_empty());
    }

    #[test]
    fn drain_terminates_everything() {
        let (tx, rx) = unbounded();
        let mut table = StreamTable::new(config(), tx);
        let selector = selector();

        table.process(
            pdu(
                "10.0.0.2:80",
                "10.0.0.1:1000",
                500,
                b"HTTP/1.1 200 OK\r\n\r\nbody until close",
                0,
            ),
            &selector,
        );
        assert!(contents(&rx).is_empty());
        table.drain(&selector);
        assert_eq!(table.size(), 0);
        let events = contents(&rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            EventContent::HttpResponse(resp) => {
                assert_eq!(resp.body.to_vec(), b"body until close");
            }
            other => panic!("expected a response, got {other:?}"),
        }
    }

    #[test]
    fn table_capacity_is_enforced() {
        let (tx, _rx) = unbounded();
        let mut table = StreamTable::new(
            TableConfig {
                max_connections: 1,
                ..config()
            },
            tx,
        );
        let selector = selector();

        table.process(pdu("10.0.0.1:1000", "10.0.0.2:80", 1, b"GE", 0), &selector);
        table.process(pdu("10.0.0.3:1000", "10.0.0.2:80", 1, b"GE", 0), &selector);
        assert_eq!(table.size(), 1);
    }
}
