//! IPv4 packet.

use crate::protocols::packet::ethernet::ETHERTYPE_IPV4;
use crate::protocols::packet::{read_u16, Packet, PacketParseError};

use std::net::Ipv4Addr;

use anyhow::{bail, Result};

const MIN_HDR_SIZE: usize = 20;

/// An IPv4 packet header. Options are not parsed.
#[derive(Debug)]
pub struct Ipv4<'a> {
    frame: &'a [u8],
    /// Offset to this header from the start of the frame.
    offset: usize,
    header_len: usize,
}

impl<'a> Ipv4<'a> {
    /// Returns the source address.
    #[inline]
    pub fn src_addr(&self) -> Ipv4Addr {
        let b = &self.frame[self.offset + 12..self.offset + 16];
        Ipv4Addr::new(b[0], b[1], b[2], b[3])
    }

    /// Returns the destination address.
    #[inline]
    pub fn dst_addr(&self) -> Ipv4Addr {
        let b = &self.frame[self.offset + 16..self.offset + 20];
        Ipv4Addr::new(b[0], b[1], b[2], b[3])
    }

    /// Returns the total packet length, header included.
    #[inline]
    pub fn total_length(&self) -> u16 {
        read_u16(self.frame, self.offset + 2).unwrap_or(0)
    }

    /// Returns the encapsulated protocol number.
    #[inline]
    pub fn protocol(&self) -> u8 {
        self.frame[self.offset + 9]
    }

    /// Returns the time-to-live.
    #[inline]
    pub fn ttl(&self) -> u8 {
        self.frame[self.offset + 8]
    }
}

impl<'a> Packet<'a> for Ipv4<'a> {
    fn frame(&self) -> &'a [u8] {
        self.frame
    }

    fn header_len(&self) -> usize {
        self.header_len
    }

    fn next_header_offset(&self) -> usize {
        self.offset + self.header_len
    }

    fn next_header(&self) -> Option<usize> {
        Some(self.protocol() as usize)
    }

    fn parse_from(outer: &'a impl Packet<'a>) -> Result<Self> {
        if outer.next_header() != Some(ETHERTYPE_IPV4 as usize) {
            bail!(PacketParseError::InvalidProtocol);
        }
        let frame = outer.frame();
        let offset = outer.next_header_offset();
        let Some(first) = frame.get(offset) else {
            bail!(PacketParseError::InvalidRead);
        };
        if first >> 4 != 4 {
            bail!(PacketParseError::InvalidProtocol);
        }
        let header_len = ((first & 0x0f) as usize) * 4;
        if header_len < MIN_HDR_SIZE || frame.len() < offset + header_len {
            bail!(PacketParseError::InvalidRead);
        }
        Ok(Ipv4 {
            frame,
            offset,
            header_len,
        })
    }
}
