//! Capture-to-dispatch orchestration.
//!
//! A [`TrafficParser`] wires the pipeline together: a capture thread reads
//! packets from the source onto a bounded channel; a dispatch thread decodes
//! them, feeds TCP segments through the stream table, emits everything else
//! directly, and runs a periodic tick that flushes capture gaps and retires
//! idle conversations. The emission channel is bounded, so a slow consumer
//! back-pressures the whole pipeline.

pub(crate) mod capture;

use self::capture::CapturedPacket;
use crate::config::Options;
use crate::conntrack::pdu::{decode_frame, L4Pdu, PacketLayers};
use crate::conntrack::{StreamTable, TableConfig};
use crate::event::{EventContent, TrafficEvent, TransportKind};
use crate::memory::{BufferPool, View};
use crate::protocols::dns::parse_dns;
use crate::protocols::stream::{ParserFactory, ParserSelector};
use crate::stats;

use std::net::IpAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Result};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};

/// Parses network traffic from a capture file or a live interface.
///
/// Traffic is parsed with the highest level of protocol detail the
/// recognizer cascade can establish; the order of recognizers matters, and
/// once one accepts a flow no other is consulted for that protocol unit.
pub struct TrafficParser {
    opts: Options,
}

impl TrafficParser {
    /// Validates `opts` and builds a parser for them.
    pub fn new(opts: Options) -> Result<TrafficParser> {
        if opts.reader_name.is_empty() {
            bail!("no capture source: set reader_name");
        }
        if opts.stream_flush_timeout == 0 || opts.stream_close_timeout == 0 {
            bail!("stream timeouts must be non-zero");
        }
        Ok(TrafficParser { opts })
    }

    /// Starts the pipeline and returns the emission channel. The channel
    /// closes after the capture source ends (or `done` fires) and all
    /// remaining flows have been flushed.
    pub fn parse(self, done: Receiver<()>) -> Result<Receiver<TrafficEvent>> {
        let pool = BufferPool::new(self.opts.max_pool_size, self.opts.chunk_size)?;
        let selector = ParserSelector::new(ParserFactory::default_set(
            pool,
            self.opts.http_max_body_len,
        ));

        let packets = capture::spawn_capture(&self.opts, done)?;
        let (tx, rx) = bounded(self.opts.emit_channel_capacity);

        let flush_timeout = Duration::from_secs(self.opts.stream_flush_timeout);
        let table_config = TableConfig {
            max_connections: self.opts.max_connections,
            max_out_of_order: self.opts.max_buffered_pages_per_connection,
            max_out_of_order_total: self.opts.max_buffered_pages_total,
            // Error-report retention is bounded by the same cap as message
            // bodies; an in-flight parse never pins more raw bytes than a
            // completed one keeps.
            max_retained_bytes: self.opts.http_max_body_len,
            flush_timeout,
            close_timeout: Duration::from_secs(self.opts.stream_close_timeout),
        };

        std::thread::Builder::new()
            .name("flowscope-dispatch".into())
            .spawn(move || dispatch_loop(packets, tx, table_config, selector, flush_timeout))?;

        Ok(rx)
    }
}

/// Consumes packets until the capture channel closes, then flushes all
/// remaining state. Closing the emission channel (by dropping `tx`) signals
/// completion to the consumer.
fn dispatch_loop(
    packets: Receiver<CapturedPacket>,
    tx: Sender<TrafficEvent>,
    table_config: TableConfig,
    selector: ParserSelector,
    flush_timeout: Duration,
) {
    let mut table = StreamTable::new(table_config, tx.clone());
    let ticker = tick(flush_timeout / 4);

    loop {
        select! {
            recv(packets) -> packet => match packet {
                Ok(packet) => {
                    // A panic while handling one packet discards that packet
                    // only; the pipeline keeps running.
                    let trapped = catch_unwind(AssertUnwindSafe(|| {
                        handle_packet(&mut table, &tx, &selector, packet);
                    }));
                    if trapped.is_err() {
                        stats::bump(&stats::PACKETS_DROPPED_BY_TRAP);
                        log::error!("panic while handling packet; packet dropped");
                    }
                }
                Err(_) => {
                    // Capture ended: flush everything so in-progress parsers
                    // observe end-of-stream.
                    table.drain(&selector);
                    break;
                }
            },
            recv(ticker) -> _ => {
                let (flushed, closed) = table.tick(SystemTime::now(), &selector);
                if flushed != 0 || closed != 0 {
                    log::debug!("tick: {} segments flushed, {} streams closed", flushed, closed);
                }
            }
        }
    }
}

/// Decodes one captured frame and routes it: TCP into the stream table,
/// everything else straight onto the emission channel.
fn handle_packet(
    table: &mut StreamTable,
    tx: &Sender<TrafficEvent>,
    selector: &ParserSelector,
    packet: CapturedPacket,
) {
    let layers = match decode_frame(&packet.data) {
        Ok(layers) => layers,
        Err(e) => {
            log::trace!("dropping undecodable packet: {}", e);
            return;
        }
    };
    let ts = packet.ts;
    let frame = Arc::new(packet.data);

    match layers {
        PacketLayers::Tcp(ctxt) => {
            table.process(L4Pdu::new(frame, ctxt, ts), selector);
        }
        PacketLayers::Udp(ctxt) => {
            let end = (ctxt.offset + ctxt.length).min(frame.len());
            let dns = parse_dns(&frame[ctxt.offset..end]);
            let mut payload = View::new();
            if ctxt.offset < end {
                payload.push_segment(frame.clone(), ctxt.offset, end);
            }
            let (transport, content) = match dns {
                Some(message) => (TransportKind::Dns, EventContent::Dns(Box::new(message))),
                None => (TransportKind::Udp, EventContent::Raw),
            };
            let _ = tx.send(TrafficEvent {
                transport,
                src_ip: ctxt.src.ip(),
                src_port: Some(ctxt.src.port()),
                dst_ip: ctxt.dst.ip(),
                dst_port: Some(ctxt.dst.port()),
                connection_id: None,
                observed: ts,
                final_time: ts,
                payload,
                content,
            });
        }
        PacketLayers::Icmp {
            v6,
            src,
            dst,
            offset,
            length,
        } => {
            let transport = if v6 {
                TransportKind::Icmpv6
            } else {
                TransportKind::Icmpv4
            };
            let _ = tx.send(raw_event(transport, src, dst, frame, offset, length, ts));
        }
        PacketLayers::Other {
            proto,
            src,
            dst,
            offset,
            length,
        } => {
            log::trace!("passing through IP protocol {}", proto);
            let _ = tx.send(raw_event(
                TransportKind::Other,
                src,
                dst,
                frame,
                offset,
                length,
                ts,
            ));
        }
    }
}

fn raw_event(
    transport: TransportKind,
    src: IpAddr,
    dst: IpAddr,
    frame: Arc<Vec<u8>>,
    offset: usize,
    length: usize,
    ts: SystemTime,
) -> TrafficEvent {
    let end = (offset + length).min(frame.len());
    let mut payload = View::new();
    if offset < end {
        payload.push_segment(frame, offset, end);
    }
    TrafficEvent {
        transport,
        src_ip: src,
        src_port: None,
        dst_ip: dst,
        dst_port: None,
        connection_id: None,
        observed: ts,
        final_time: ts,
        payload,
        content: EventContent::Raw,
    }
}
