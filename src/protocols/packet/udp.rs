//! UDP datagram.

use crate::protocols::packet::{read_u16, Packet, PacketParseError};

use anyhow::{bail, Result};

/// UDP assigned protocol number.
pub const UDP_PROTOCOL: u8 = 17;

const HDR_SIZE: usize = 8;

/// A UDP datagram header.
#[derive(Debug)]
pub struct Udp<'a> {
    frame: &'a [u8],
    /// Offset to this header from the start of the frame.
    offset: usize,
}

impl<'a> Udp<'a> {
    /// Returns the sending port.
    #[inline]
    pub fn src_port(&self) -> u16 {
        read_u16(self.frame, self.offset).unwrap_or(0)
    }

    /// Returns the receiving port.
    #[inline]
    pub fn dst_port(&self) -> u16 {
        read_u16(self.frame, self.offset + 2).unwrap_or(0)
    }

    /// Returns the datagram length, header included.
    #[inline]
    pub fn length(&self) -> u16 {
        read_u16(self.frame, self.offset + 4).unwrap_or(0)
    }
}

impl<'a> Packet<'a> for Udp<'a> {
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
        None
    }

    fn parse_from(outer: &'a impl Packet<'a>) -> Result<Self> {
        if outer.next_header() != Some(UDP_PROTOCOL as usize) {
            bail!(PacketParseError::InvalidProtocol);
        }
        let frame = outer.frame();
        let offset = outer.next_header_offset();
        if frame.len() < offset + HDR_SIZE {
            bail!(PacketParseError::InvalidRead);
        }
        Ok(Udp { frame, offset })
    }
}
