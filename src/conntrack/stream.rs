//! A TCP conversation: one connection identity over a pair of
//! uni-directional flows.

use crate::conntrack::conn_id::{ConnectionId, FiveTuple};
use crate::conntrack::flow::Flow;
use crate::conntrack::pdu::L4Pdu;
use crate::conntrack::reassembly::{saw_fin, saw_reset, FlowReassembler};
use crate::event::{EventContent, TcpPacketMetadata, TrafficEvent, TransportKind};
use crate::memory::View;
use crate::protocols::packet::tcp::{ACK, FIN, RST, SYN};
use crate::protocols::stream::ParserSelector;

use std::time::SystemTime;

use crossbeam_channel::Sender;

/// One direction's reassembly and dispatch state, created on the first
/// packet observed in that direction.
struct FlowState {
    reassembler: FlowReassembler,
    dispatcher: Flow,
}

/// State for one TCP conversation.
pub(crate) struct TcpStream {
    conn_id: ConnectionId,
    five_tuple: FiveTuple,
    /// Capture time of the most recent packet in either direction.
    pub(crate) last_seen: SystemTime,
    /// Flow state per direction: originator-to-responder first.
    flows: [Option<FlowState>; 2],
    out: Sender<TrafficEvent>,
    max_out_of_order: usize,
    max_retained_bytes: usize,
}

impl TcpStream {
    /// Creates stream state for the conversation whose first observed packet
    /// had context `five_tuple`. The sender of that packet becomes the
    /// originator.
    pub(crate) fn new(
        five_tuple: FiveTuple,
        ts: SystemTime,
        out: Sender<TrafficEvent>,
        max_out_of_order: usize,
        max_retained_bytes: usize,
    ) -> TcpStream {
        TcpStream {
            conn_id: ConnectionId::new(),
            five_tuple,
            last_seen: ts,
            flows: [None, None],
            out,
            max_out_of_order,
            max_retained_bytes,
        }
    }

    /// Handles one packet of this conversation.
    pub(crate) fn process(&mut self, pdu: L4Pdu, selector: &ParserSelector) {
        self.last_seen = pdu.ts;

        if pdu.length() == 0 {
            self.emit_packet_metadata(&pdu);
        }

        let dir = pdu.ctxt.src == self.five_tuple.orig;
        let index = usize::from(!dir);
        if self.flows[index].is_none() {
            self.flows[index] = Some(FlowState {
                reassembler: FlowReassembler::new(self.max_out_of_order),
                dispatcher: Flow::new(
                    self.conn_id,
                    pdu.ctxt.src,
                    pdu.ctxt.dst,
                    self.out.clone(),
                    self.max_retained_bytes,
                ),
            });
        }
        let state = self.flows[index].as_mut().expect("flow state exists");

        for segment in state.reassembler.insert(pdu) {
            dispatch(&mut state.dispatcher, selector, &segment);
        }
    }

    /// Delivers data stuck behind capture gaps older than `cutoff`. Flows
    /// stay open.
    pub(crate) fn flush(&mut self, cutoff: SystemTime, selector: &ParserSelector) -> usize {
        let mut flushed = 0;
        for state in self.flows.iter_mut().flatten() {
            for segment in state.reassembler.flush_older_than(cutoff) {
                flushed += 1;
                dispatch(&mut state.dispatcher, selector, &segment);
            }
        }
        flushed
    }

    /// Delivers everything still buffered, skipping all gaps. Flows stay
    /// open; used when the out-of-order budget is exceeded.
    pub(crate) fn flush_all(&mut self, selector: &ParserSelector) {
        for state in self.flows.iter_mut().flatten() {
            for segment in state.reassembler.drain() {
                dispatch(&mut state.dispatcher, selector, &segment);
            }
        }
    }

    /// Terminates the conversation: drains both reassemblers and signals
    /// end-of-stream to both dispatchers.
    pub(crate) fn terminate(&mut self, selector: &ParserSelector) {
        for state in self.flows.iter_mut().flatten() {
            for segment in state.reassembler.drain() {
                dispatch(&mut state.dispatcher, selector, &segment);
            }
            state.dispatcher.end(selector);
        }
    }

    /// `true` once the conversation is over on the wire: a RST in either
    /// direction, or a FIN consumed in both.
    pub(crate) fn terminated(&self) -> bool {
        let flags = |index: usize| {
            self.flows[index]
                .as_ref()
                .map(|state| state.reassembler.consumed_flags())
                .unwrap_or(0)
        };
        let (orig, resp) = (flags(0), flags(1));
        saw_reset(orig) || saw_reset(resp) || (saw_fin(orig) && saw_fin(resp))
    }

    /// Total out-of-order segments buffered across both directions.
    pub(crate) fn buffered(&self) -> usize {
        self.flows
            .iter()
            .flatten()
            .map(|state| state.reassembler.buffered())
            .sum()
    }

    /// Reports the flags of a payload-less segment.
    fn emit_packet_metadata(&self, pdu: &L4Pdu) {
        let flags = pdu.flags();
        let _ = self.out.send(TrafficEvent {
            transport: TransportKind::Tcp,
            src_ip: pdu.ctxt.src.ip(),
            src_port: Some(pdu.ctxt.src.port()),
            dst_ip: pdu.ctxt.dst.ip(),
            dst_port: Some(pdu.ctxt.dst.port()),
            connection_id: Some(self.conn_id),
            observed: pdu.ts,
            final_time: pdu.ts,
            payload: View::new(),
            content: EventContent::TcpPacket(TcpPacketMetadata {
                syn: flags & SYN != 0,
                ack: flags & ACK != 0,
                fin: flags & FIN != 0,
                rst: flags & RST != 0,
            }),
        });
    }
}

/// Hands one reassembled segment's payload to the flow dispatcher.
fn dispatch(dispatcher: &mut Flow, selector: &ParserSelector, segment: &L4Pdu) {
    let payload = segment.payload();
    if payload.is_empty() {
        return;
    }
    dispatcher.deliver(
        selector,
        payload,
        segment.seq_no(),
        segment.ack_no(),
        segment.ts,
    );
}
