//! Per-flow TCP sequencing.
//!
//! Each uni-directional flow tracks the next expected sequence number,
//! buffers out-of-order segments, trims overlap, and drops stale data.
//! Segments come back out strictly in sequence order. Capture gaps are not
//! filled: when a hole is older than the flush deadline (or the buffer
//! overflows), the flow skips to the earliest buffered segment and delivers
//! what it has.

use crate::conntrack::pdu::L4Pdu;
use crate::protocols::packet::tcp::{FIN, RST, SYN};

use std::collections::VecDeque;
use std::time::SystemTime;

/// Reorders one direction of a TCP conversation.
#[derive(Debug)]
pub(crate) struct FlowReassembler {
    /// Expected sequence number of the next segment; `None` until the first
    /// segment is seen. Streams are never assumed to start with a SYN: a
    /// capture may join an existing connection mid-life.
    next_seq: Option<u32>,
    /// Flags of every consumed segment, OR-ed together.
    consumed_flags: u8,
    /// Out-of-order buffer, capacity-bounded.
    capacity: usize,
    ooo: VecDeque<L4Pdu>,
}

impl FlowReassembler {
    pub(crate) fn new(capacity: usize) -> FlowReassembler {
        FlowReassembler {
            next_seq: None,
            consumed_flags: 0,
            capacity: capacity.max(1),
            ooo: VecDeque::new(),
        }
    }

    /// Flags consumed so far; used to detect FIN/RST stream shutdown.
    #[inline]
    pub(crate) fn consumed_flags(&self) -> u8 {
        self.consumed_flags
    }

    /// Number of segments waiting in the out-of-order buffer.
    #[inline]
    pub(crate) fn buffered(&self) -> usize {
        self.ooo.len()
    }

    /// Capture time of the oldest buffered segment.
    pub(crate) fn oldest_buffered(&self) -> Option<SystemTime> {
        self.ooo.iter().map(|pdu| pdu.ts).min()
    }

    /// Inserts an incoming segment, returning any segments that are now
    /// deliverable in sequence order.
    pub(crate) fn insert(&mut self, mut segment: L4Pdu) -> Vec<L4Pdu> {
        let mut ready = vec![];

        match self.next_seq {
            None => {
                // First segment of the capture for this direction.
                let expected = segment.seq_no().wrapping_add(segment_span(&segment));
                self.next_seq = Some(expected);
                self.consume(segment, &mut ready);
                self.flush_in_order(&mut ready);
            }
            Some(next_seq) => {
                if segment.seq_no() == next_seq {
                    let expected = next_seq.wrapping_add(segment_span(&segment));
                    self.next_seq = Some(expected);
                    self.consume(segment, &mut ready);
                    self.flush_in_order(&mut ready);
                } else if wrapping_lt(next_seq, segment.seq_no()) {
                    // Future data; hold it until the hole fills.
                    self.ooo.push_back(segment);
                    if self.ooo.len() > self.capacity {
                        log::warn!("out-of-order buffer overflow, skipping gap");
                        ready.extend(self.skip_gaps());
                    }
                } else if trim_overlap(&mut segment, next_seq) {
                    // Starts before the expected sequence but carries new data.
                    let expected = segment.seq_no().wrapping_add(segment_span(&segment));
                    self.next_seq = Some(expected);
                    self.consume(segment, &mut ready);
                    self.flush_in_order(&mut ready);
                } else {
                    log::debug!(
                        "dropping old segment: seq {} expected {}",
                        segment.seq_no(),
                        next_seq
                    );
                }
            }
        }

        ready
    }

    /// Delivers buffered segments older than `cutoff` by skipping over the
    /// holes in front of them. Newer segments stay buffered.
    pub(crate) fn flush_older_than(&mut self, cutoff: SystemTime) -> Vec<L4Pdu> {
        let mut ready = vec![];
        while self
            .oldest_buffered()
            .map(|oldest| oldest < cutoff)
            .unwrap_or(false)
        {
            let drained = self.skip_gaps_once();
            if drained.is_empty() {
                break;
            }
            ready.extend(drained);
        }
        ready
    }

    /// Delivers everything still buffered, skipping all holes. Called when
    /// the stream terminates.
    pub(crate) fn drain(&mut self) -> Vec<L4Pdu> {
        self.skip_gaps()
    }

    /// Repeatedly jumps the expected sequence number to the earliest
    /// buffered segment until the buffer empties.
    fn skip_gaps(&mut self) -> Vec<L4Pdu> {
        let mut ready = vec![];
        while !self.ooo.is_empty() {
            let drained = self.skip_gaps_once();
            if drained.is_empty() {
                break;
            }
            ready.extend(drained);
        }
        ready
    }

    /// Jumps the expected sequence number over one hole and flushes what
    /// follows it.
    fn skip_gaps_once(&mut self) -> Vec<L4Pdu> {
        let mut ready = vec![];
        let Some(base) = self.next_seq else {
            return ready;
        };
        // The segment closest past the hole comes first in wrapping order.
        let Some(target) = self
            .ooo
            .iter()
            .map(|pdu| pdu.seq_no())
            .min_by_key(|seq| seq.wrapping_sub(base))
        else {
            return ready;
        };
        self.next_seq = Some(target);
        self.flush_in_order(&mut ready);
        ready
    }

    /// Consumes buffered segments that match the expected sequence number,
    /// trimming overlap and dropping stale data.
    fn flush_in_order(&mut self, ready: &mut Vec<L4Pdu>) {
        let mut next_seq = self.next_seq.expect("flush before first segment");
        let mut index = 0;
        while index < self.ooo.len() {
            let cur_seq = self.ooo[index].seq_no();
            if cur_seq == next_seq {
                let segment = self.ooo.remove(index).expect("index in bounds");
                next_seq = next_seq.wrapping_add(segment_span(&segment));
                self.consume(segment, ready);
                index = 0;
            } else if wrapping_lt(next_seq, cur_seq) {
                index += 1;
            } else {
                let mut segment = self.ooo.remove(index).expect("index in bounds");
                if trim_overlap(&mut segment, next_seq) {
                    next_seq = segment.seq_no().wrapping_add(segment_span(&segment));
                    self.consume(segment, ready);
                    index = 0;
                } else {
                    log::debug!("dropping old segment during flush");
                    index += 1;
                }
            }
        }
        self.next_seq = Some(next_seq);
    }

    fn consume(&mut self, segment: L4Pdu, ready: &mut Vec<L4Pdu>) {
        self.consumed_flags |= segment.flags();
        ready.push(segment);
    }
}

/// Sequence-space size of a segment: payload length plus one for SYN and
/// FIN, which each occupy a sequence number.
fn segment_span(segment: &L4Pdu) -> u32 {
    let mut span = segment.length() as u32;
    if segment.flags() & SYN != 0 {
        span = span.wrapping_add(1);
    }
    if segment.flags() & FIN != 0 {
        span = span.wrapping_add(1);
    }
    span
}

/// `true` when the reassembler has seen a RST.
pub(crate) fn saw_reset(flags: u8) -> bool {
    flags & RST != 0
}

/// `true` when the reassembler has seen a FIN.
pub(crate) fn saw_fin(flags: u8) -> bool {
    flags & FIN != 0
}

/// From RFC 1323: a segment is "old" when its sequence number is more than
/// 2^31 bytes behind the left edge of the window.
pub(crate) fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    lhs.wrapping_sub(rhs) > (1 << 31)
}

/// Trims the front of a segment that starts before `expected_seq`. Returns
/// `true` when new data remains after the trim.
fn trim_overlap(segment: &mut L4Pdu, expected_seq: u32) -> bool {
    let length = segment.length() as u32;
    let cur_seq = segment.seq_no();
    let end_seq = cur_seq.wrapping_add(length);

    if wrapping_lt(expected_seq, end_seq) {
        let new_len = end_seq.wrapping_sub(expected_seq);
        let skip = expected_seq.wrapping_sub(cur_seq);
        segment.ctxt.offset += skip as usize;
        segment.ctxt.length = new_len as usize;
        segment.ctxt.seq_no = expected_seq;
        true
    } else {
        false
    }
}
