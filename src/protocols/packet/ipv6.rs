//! IPv6 packet.

use crate::protocols::packet::ethernet::ETHERTYPE_IPV6;
use crate::protocols::packet::{read_u16, Packet, PacketParseError};

use std::net::Ipv6Addr;

use anyhow::{bail, Result};

const HDR_SIZE: usize = 40;

/// An IPv6 packet header. Extension headers are not walked; the fixed
/// header's next-header field is taken as the transport protocol.
#[derive(Debug)]
pub struct Ipv6<'a> {
    frame: &'a [u8],
    /// Offset to this header from the start of the frame.
    offset: usize,
}

impl<'a> Ipv6<'a> {
    /// Returns the source address.
    #[inline]
    pub fn src_addr(&self) -> Ipv6Addr {
        let b: [u8; 16] = self.frame[self.offset + 8..self.offset + 24]
            .try_into()
            .expect("bounds checked on parse");
        Ipv6Addr::from(b)
    }

    /// Returns the destination address.
    #[inline]
    pub fn dst_addr(&self) -> Ipv6Addr {
        let b: [u8; 16] = self.frame[self.offset + 24..self.offset + 40]
            .try_into()
            .expect("bounds checked on parse");
        Ipv6Addr::from(b)
    }

    /// Returns the payload length in bytes.
    #[inline]
    pub fn payload_length(&self) -> u16 {
        read_u16(self.frame, self.offset + 4).unwrap_or(0)
    }

    /// Returns the next-header protocol number.
    #[inline]
    pub fn protocol(&self) -> u8 {
        self.frame[self.offset + 6]
    }
}

impl<'a> Packet<'a> for Ipv6<'a> {
    fn frame(&self) -> &'a [u8] {
        self.frame
    }

    fn header_len(&self) -> usize {
        HDR_SIZE
    }

    fn next_header_offset(&self) -> usize {
        self.offset + HDR_SIZE
    }

    fn next_header(&self) -> Option<usize> {
        Some(self.protocol() as usize)
    }

    fn parse_from(outer: &'a impl Packet<'a>) -> Result<Self> {
        if outer.next_header() != Some(ETHERTYPE_IPV6 as usize) {
            bail!(PacketParseError::InvalidProtocol);
        }
        let frame = outer.frame();
        let offset = outer.next_header_offset();
        if frame.len() < offset + HDR_SIZE {
            bail!(PacketParseError::InvalidRead);
        }
        let packet = Ipv6 { frame, offset };
        if frame[offset] >> 4 != 6 {
            bail!(PacketParseError::InvalidProtocol);
        }
        Ok(packet)
    }
}
