//! TCP segment.

use crate::protocols::packet::{read_u16, read_u32, Packet, PacketParseError};

use anyhow::{bail, Result};

/// TCP assigned protocol number.
pub const TCP_PROTOCOL: u8 = 6;

// TCP flags.
pub const CWR: u8 = 0b1000_0000;
pub const ECE: u8 = 0b0100_0000;
pub const URG: u8 = 0b0010_0000;
pub const ACK: u8 = 0b0001_0000;
pub const PSH: u8 = 0b0000_1000;
pub const RST: u8 = 0b0000_0100;
pub const SYN: u8 = 0b0000_0010;
pub const FIN: u8 = 0b0000_0001;

const MIN_HDR_SIZE: usize = 20;

/// A TCP segment header. Options are not parsed.
#[derive(Debug)]
pub struct Tcp<'a> {
    frame: &'a [u8],
    /// Offset to this header from the start of the frame.
    offset: usize,
    header_len: usize,
}

impl<'a> Tcp<'a> {
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

    /// Returns the sequence number.
    #[inline]
    pub fn seq_no(&self) -> u32 {
        read_u32(self.frame, self.offset + 4).unwrap_or(0)
    }

    /// Returns the acknowledgment number.
    #[inline]
    pub fn ack_no(&self) -> u32 {
        read_u32(self.frame, self.offset + 8).unwrap_or(0)
    }

    /// Returns the 8-bit TCP flags.
    #[inline]
    pub fn flags(&self) -> u8 {
        self.frame[self.offset + 13]
    }

    /// Returns `true` if both SYN and ACK are set.
    #[inline]
    pub fn synack(&self) -> bool {
        self.flags() & (SYN | ACK) == (SYN | ACK)
    }
}

impl<'a> Packet<'a> for Tcp<'a> {
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
        None
    }

    fn parse_from(outer: &'a impl Packet<'a>) -> Result<Self> {
        if outer.next_header() != Some(TCP_PROTOCOL as usize) {
            bail!(PacketParseError::InvalidProtocol);
        }
        let frame = outer.frame();
        let offset = outer.next_header_offset();
        let Some(data_offset) = frame.get(offset + 12) else {
            bail!(PacketParseError::InvalidRead);
        };
        // The data-offset field counts 32-bit words.
        let header_len = ((data_offset >> 4) as usize) * 4;
        if header_len < MIN_HDR_SIZE || frame.len() < offset + header_len {
            bail!(PacketParseError::InvalidRead);
        }
        Ok(Tcp {
            frame,
            offset,
            header_len,
        })
    }
}
