//! Per-flow protocol selection and dispatch.
//!
//! A [`Flow`] receives reassembled byte ranges in sequence order and runs
//! the recognition state machine over them: while no parser is active,
//! candidate bytes accumulate until the selector accepts, rejects, or keeps
//! waiting; once a parser is active, bytes stream into it until a message
//! completes or the parse fails. Bytes nothing claims are reported as
//! dropped, in byte order with the successful parses, so a consumer can
//! reconstruct each direction exactly.

use crate::conntrack::conn_id::ConnectionId;
use crate::event::{EventContent, TrafficEvent, TransportKind};
use crate::memory::View;
use crate::protocols::stream::{ParserSelector, Selection, SessionParser};
use crate::stats;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::SystemTime;

use crossbeam_channel::Sender;

/// Capture context for one delivered byte range: where it starts in the
/// flow's candidate buffer and the TCP numbers of its first byte.
#[derive(Debug, Clone, Copy)]
struct ByteRange {
    offset: usize,
    seq: u32,
    ack: u32,
    ts: SystemTime,
}

/// Tracks which capture context covers which candidate byte.
#[derive(Debug, Default)]
struct RangeLog {
    ranges: VecDeque<ByteRange>,
}

impl RangeLog {
    fn push(&mut self, offset: usize, seq: u32, ack: u32, ts: SystemTime) {
        self.ranges.push_back(ByteRange {
            offset,
            seq,
            ack,
            ts,
        });
    }

    /// Context of the byte at `offset`, if any delivery covers it.
    fn context_at(&self, offset: usize) -> Option<ByteRange> {
        let range = self
            .ranges
            .iter()
            .rev()
            .find(|range| range.offset <= offset)?;
        Some(ByteRange {
            offset,
            seq: range.seq.wrapping_add((offset - range.offset) as u32),
            ack: range.ack,
            ts: range.ts,
        })
    }

    /// Rebases the log after the first `count` candidate bytes are dropped.
    fn trim_front(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let base = self.context_at(count);
        self.ranges.retain(|range| range.offset > count);
        for range in &mut self.ranges {
            range.offset -= count;
        }
        if let Some(mut base) = base {
            base.offset = 0;
            self.ranges.push_front(base);
        }
    }

    fn clear(&mut self) {
        self.ranges.clear();
    }

    fn first_ts(&self) -> Option<SystemTime> {
        self.ranges.front().map(|range| range.ts)
    }
}

/// A parser bound to this flow, plus everything needed to report on it.
#[derive(Debug)]
struct ActiveParser {
    parser: SessionParser,
    /// Capture time of the first byte handed to the parser.
    first_ts: SystemTime,
    /// Sequence number of the first byte handed to the parser.
    first_seq: u32,
    /// Prefix of the bytes handed to the parser, kept for error reporting.
    /// Bounded by the flow's retention cap; sink parsers retain nothing.
    fed: View,
    /// Exact count of bytes handed to the parser, even past the cap.
    fed_len: usize,
}

/// One direction of a TCP conversation.
pub(crate) struct Flow {
    conn_id: ConnectionId,
    src: SocketAddr,
    dst: SocketAddr,
    out: Sender<TrafficEvent>,
    /// Cap on raw bytes retained per in-flight parse for error reporting.
    /// The parser's own body buffer is separately capped; without this
    /// bound a long message would pin its whole raw byte stream anyway.
    max_retained_bytes: usize,
    /// Bytes retained after a NeedMoreData selection, awaiting more data.
    residual: View,
    residual_ctx: RangeLog,
    current: Option<ActiveParser>,
}

impl Flow {
    pub(crate) fn new(
        conn_id: ConnectionId,
        src: SocketAddr,
        dst: SocketAddr,
        out: Sender<TrafficEvent>,
        max_retained_bytes: usize,
    ) -> Flow {
        Flow {
            conn_id,
            src,
            dst,
            out,
            max_retained_bytes,
            residual: View::new(),
            residual_ctx: RangeLog::default(),
            current: None,
        }
    }

    /// Handles one reassembled byte range.
    pub(crate) fn deliver(
        &mut self,
        selector: &ParserSelector,
        bytes: View,
        seq: u32,
        ack: u32,
        ts: SystemTime,
    ) {
        self.deliver_inner(selector, bytes, seq, ack, ts, false);
    }

    fn deliver_inner(
        &mut self,
        selector: &ParserSelector,
        bytes: View,
        seq: u32,
        ack: u32,
        ts: SystemTime,
        is_end: bool,
    ) {
        if self.current.is_none() {
            self.residual_ctx.push(self.residual.len(), seq, ack, ts);
            self.residual.append(&bytes);

            match selector.select(&self.residual, is_end) {
                Selection::NeedMoreData { discard_front } => {
                    self.drop_candidate_prefix(discard_front);
                }
                Selection::Reject { .. } => {
                    self.drop_candidate_prefix(self.residual.len());
                }
                Selection::Accept {
                    factory,
                    discard_front,
                } => {
                    self.drop_candidate_prefix(discard_front);
                    let Some(ctx) = self.residual_ctx.context_at(0) else {
                        // No capture context for the first accepted byte;
                        // report the bytes rather than parse blind.
                        stats::bump(&stats::MISSING_CONTEXT_ON_ACCEPT);
                        self.drop_candidate_prefix(self.residual.len());
                        return;
                    };
                    log::debug!("{}: starting {}", self.conn_id_short(), factory.name());
                    let parser = factory.create_parser(self.conn_id, ctx.seq, ctx.ack);
                    self.current = Some(ActiveParser {
                        parser,
                        first_ts: ctx.ts,
                        first_seq: ctx.seq,
                        fed: View::new(),
                        fed_len: 0,
                    });
                    let input = std::mem::take(&mut self.residual);
                    self.residual_ctx.clear();
                    self.feed_parser(selector, input, ack, ts, is_end);
                }
            }
        } else {
            self.feed_parser(selector, bytes, ack, ts, is_end);
        }
    }

    /// Streams bytes into the active parser and handles its outcome.
    fn feed_parser(
        &mut self,
        selector: &ParserSelector,
        input: View,
        ack: u32,
        ts: SystemTime,
        is_end: bool,
    ) {
        let Some(active) = self.current.as_mut() else {
            return;
        };
        active.fed_len += input.len();
        // A sink never fails, so its swallowed bytes need no retention; for
        // everything else keep at most the retention cap.
        if !active.parser.sinks_remainder() && active.fed.len() < self.max_retained_bytes {
            active.fed.append(&input);
            if active.fed.len() > self.max_retained_bytes {
                active.fed = active.fed.sub_view(0, self.max_retained_bytes);
            }
        }

        match active.parser.parse(&input, is_end) {
            Err(e) => {
                log::debug!("{} failed: {}", active.parser.name(), e);
                // Return what this parser swallowed so the byte sequence
                // stays reconstructable; the count is exact even when the
                // retained payload was capped.
                let first_ts = active.first_ts;
                let fed_len = active.fed_len;
                let fed = std::mem::take(&mut active.fed);
                self.current = None;
                self.emit_dropped_counted(fed, fed_len, first_ts);
            }
            Ok(status) => {
                let Some(content) = status.content else {
                    // The parser holds the bytes internally and waits.
                    return;
                };
                if active.parser.sinks_remainder() {
                    // The parser stays in place and swallows the rest of
                    // the flow without further emissions.
                    let first_ts = active.first_ts;
                    self.emit_parsed(content, first_ts, ts);
                    return;
                }

                let active = self.current.take().expect("active parser");
                self.emit_parsed(content, active.first_ts, ts);

                let unused = status.unused;
                if !unused.is_empty() {
                    // The unused tail starts `consumed` bytes after the
                    // parser's first byte.
                    let seq = active.first_seq.wrapping_add(status.consumed as u32);
                    if is_end {
                        // Last chance to recognize trailing content.
                        self.deliver_inner(selector, unused, seq, ack, ts, true);
                    } else {
                        self.residual = unused;
                        self.residual_ctx.clear();
                        self.residual_ctx.push(0, seq, ack, ts);
                    }
                }
            }
        }
    }

    /// Signals end of stream: finalizes any active parser and flushes any
    /// retained candidate bytes as dropped.
    pub(crate) fn end(&mut self, selector: &ParserSelector) {
        if let Some(active) = &self.current {
            let first_ts = active.first_ts;
            self.feed_parser(selector, View::new(), 0, first_ts, true);
            // A parser that finalized with neither a result nor an error
            // swallowed a truncated unit; there is nothing to report.
            self.current = None;
        } else if !self.residual.is_empty() {
            let ts = self.residual_ctx.first_ts().unwrap_or_else(|| {
                stats::bump(&stats::MISSING_CONTEXT_AFTER_PARSE);
                SystemTime::now()
            });
            let residual = std::mem::take(&mut self.residual);
            self.residual_ctx.clear();
            self.emit_dropped(residual, ts);
        }
    }

    /// Drops the first `count` candidate bytes, reporting them.
    fn drop_candidate_prefix(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let ts = self.residual_ctx.first_ts().unwrap_or_else(|| {
            stats::bump(&stats::MISSING_CONTEXT_AFTER_PARSE);
            SystemTime::now()
        });
        let dropped = self.residual.sub_view(0, count);
        self.residual = self.residual.sub_view(count, self.residual.len());
        self.residual_ctx.trim_front(count);
        if self.residual.is_empty() {
            self.residual_ctx.clear();
        }
        self.emit_dropped(dropped, ts);
    }

    fn emit_dropped(&self, bytes: View, ts: SystemTime) {
        let count = bytes.len();
        self.emit_dropped_counted(bytes, count, ts);
    }

    /// Reports `count` dropped bytes; `bytes` carries as much of them as
    /// was retained.
    fn emit_dropped_counted(&self, bytes: View, count: usize, ts: SystemTime) {
        if count == 0 {
            return;
        }
        let _ = self.out.send(TrafficEvent {
            transport: TransportKind::Tcp,
            src_ip: self.src.ip(),
            src_port: Some(self.src.port()),
            dst_ip: self.dst.ip(),
            dst_port: Some(self.dst.port()),
            connection_id: Some(self.conn_id),
            observed: ts,
            final_time: ts,
            content: EventContent::DroppedBytes(count),
            payload: bytes,
        });
    }

    fn emit_parsed(&self, content: EventContent, first_ts: SystemTime, last_ts: SystemTime) {
        let _ = self.out.send(TrafficEvent {
            transport: TransportKind::Tcp,
            src_ip: self.src.ip(),
            src_port: Some(self.src.port()),
            dst_ip: self.dst.ip(),
            dst_port: Some(self.dst.port()),
            connection_id: Some(self.conn_id),
            observed: first_ts,
            final_time: last_ts,
            payload: View::new(),
            content,
        });
    }

    fn conn_id_short(&self) -> String {
        format!("{} -> {}", self.src, self.dst)
    }
}
