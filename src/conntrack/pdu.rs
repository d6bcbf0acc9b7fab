//! Transport-layer protocol data units.
//!
//! [`decode_frame`] classifies a captured frame down to its transport layer;
//! [`L4Pdu`] carries one TCP segment's shared frame storage plus the parsed
//! transport context through reassembly and dispatch.

use crate::memory::{Slab, View};
use crate::protocols::packet::ethernet::Ethernet;
use crate::protocols::packet::ipv4::Ipv4;
use crate::protocols::packet::ipv6::Ipv6;
use crate::protocols::packet::tcp::{Tcp, TCP_PROTOCOL};
use crate::protocols::packet::udp::{Udp, UDP_PROTOCOL};
use crate::protocols::packet::{Frame, Packet, ICMP6_PROTOCOL, ICMP_PROTOCOL};

use std::net::{IpAddr, SocketAddr};
use std::time::SystemTime;

use anyhow::{bail, Result};

/// Parsed transport-layer context of a TCP or UDP packet.
#[derive(Debug, Clone, Copy)]
pub(crate) struct L4Context {
    /// Source socket address.
    pub(crate) src: SocketAddr,
    /// Destination socket address.
    pub(crate) dst: SocketAddr,
    /// L4 protocol.
    pub(crate) proto: u8,
    /// Offset into the frame where the payload begins.
    pub(crate) offset: usize,
    /// Length of the payload in bytes.
    pub(crate) length: usize,
    /// Raw sequence number of the segment.
    pub(crate) seq_no: u32,
    /// Raw acknowledgment number of the segment.
    pub(crate) ack_no: u32,
    /// TCP flags.
    pub(crate) flags: u8,
}

/// A captured frame classified down to its transport layer.
#[derive(Debug)]
pub(crate) enum PacketLayers {
    Tcp(L4Context),
    Udp(L4Context),
    Icmp {
        v6: bool,
        src: IpAddr,
        dst: IpAddr,
        offset: usize,
        length: usize,
    },
    Other {
        proto: u8,
        src: IpAddr,
        dst: IpAddr,
        offset: usize,
        length: usize,
    },
}

/// Decodes the link, network, and transport layers of a captured frame.
/// Fails for frames without a recognizable network layer.
pub(crate) fn decode_frame(data: &[u8]) -> Result<PacketLayers> {
    let frame = Frame::new(data);
    let eth: Ethernet = frame.parse_to()?;

    if let Ok(ipv4) = eth.parse_to::<Ipv4>() {
        let src = IpAddr::V4(ipv4.src_addr());
        let dst = IpAddr::V4(ipv4.dst_addr());
        let declared = (ipv4.total_length() as usize).saturating_sub(ipv4.header_len());
        return classify(data, &ipv4, src, dst, ipv4.protocol(), declared);
    }
    if let Ok(ipv6) = eth.parse_to::<Ipv6>() {
        let src = IpAddr::V6(ipv6.src_addr());
        let dst = IpAddr::V6(ipv6.dst_addr());
        let declared = ipv6.payload_length() as usize;
        return classify(data, &ipv6, src, dst, ipv6.protocol(), declared);
    }
    bail!("not an IP packet");
}

/// Classifies the transport layer of an IP packet. `declared` is the IP
/// layer's payload length; the actual length is clamped to the captured
/// bytes, since the snap length may have cut the frame short.
fn classify<'a>(
    data: &'a [u8],
    ip: &'a impl Packet<'a>,
    src: IpAddr,
    dst: IpAddr,
    proto: u8,
    declared: usize,
) -> Result<PacketLayers> {
    match proto {
        TCP_PROTOCOL => {
            let tcp: Tcp = ip.parse_to()?;
            let offset = tcp.next_header_offset();
            let Some(payload) = declared.checked_sub(tcp.header_len()) else {
                bail!("malformed TCP packet");
            };
            let length = payload.min(data.len().saturating_sub(offset));
            Ok(PacketLayers::Tcp(L4Context {
                src: SocketAddr::new(src, tcp.src_port()),
                dst: SocketAddr::new(dst, tcp.dst_port()),
                proto,
                offset,
                length,
                seq_no: tcp.seq_no(),
                ack_no: tcp.ack_no(),
                flags: tcp.flags(),
            }))
        }
        UDP_PROTOCOL => {
            let udp: Udp = ip.parse_to()?;
            let offset = udp.next_header_offset();
            let Some(payload) = declared.checked_sub(udp.header_len()) else {
                bail!("malformed UDP packet");
            };
            let length = payload.min(data.len().saturating_sub(offset));
            Ok(PacketLayers::Udp(L4Context {
                src: SocketAddr::new(src, udp.src_port()),
                dst: SocketAddr::new(dst, udp.dst_port()),
                proto,
                offset,
                length,
                seq_no: 0,
                ack_no: 0,
                flags: 0,
            }))
        }
        ICMP_PROTOCOL | ICMP6_PROTOCOL => {
            let offset = ip.next_header_offset();
            Ok(PacketLayers::Icmp {
                v6: proto == ICMP6_PROTOCOL,
                src,
                dst,
                offset,
                length: declared.min(data.len().saturating_sub(offset)),
            })
        }
        proto => {
            let offset = ip.next_header_offset();
            Ok(PacketLayers::Other {
                proto,
                src,
                dst,
                offset,
                length: declared.min(data.len().saturating_sub(offset)),
            })
        }
    }
}

/// One TCP segment: shared frame storage plus transport context.
#[derive(Debug)]
pub(crate) struct L4Pdu {
    /// The whole captured frame.
    pub(crate) data: Slab,
    /// Transport-layer context.
    pub(crate) ctxt: L4Context,
    /// Capture timestamp.
    pub(crate) ts: SystemTime,
}

impl L4Pdu {
    pub(crate) fn new(data: Slab, ctxt: L4Context, ts: SystemTime) -> L4Pdu {
        L4Pdu { data, ctxt, ts }
    }

    /// A zero-copy view of the segment payload.
    pub(crate) fn payload(&self) -> View {
        let mut view = View::new();
        let end = (self.ctxt.offset + self.ctxt.length).min(self.data.len());
        if self.ctxt.offset < end {
            view.push_segment(self.data.clone(), self.ctxt.offset, end);
        }
        view
    }

    #[inline]
    pub(crate) fn length(&self) -> usize {
        self.ctxt.length
    }

    #[inline]
    pub(crate) fn seq_no(&self) -> u32 {
        self.ctxt.seq_no
    }

    #[inline]
    pub(crate) fn ack_no(&self) -> u32 {
        self.ctxt.ack_no
    }

    #[inline]
    pub(crate) fn flags(&self) -> u8 {
        self.ctxt.flags
    }
}
