//! Ethernet frame.

use crate::protocols::packet::{read_u16, Packet, PacketParseError};

use anyhow::{bail, Result};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

const VLAN_802_1Q: u16 = 0x8100;
const VLAN_802_1AD: u16 = 0x88a8;

const TAG_SIZE: usize = 4;
const HDR_SIZE: usize = 14;
const HDR_SIZE_802_1Q: usize = HDR_SIZE + TAG_SIZE;

/// An Ethernet frame header.
///
/// On networks that support virtual LANs, the frame may include a VLAN tag
/// after the source MAC address. Double-tagged frames (QinQ) are not
/// supported.
#[derive(Debug)]
pub struct Ethernet<'a> {
    frame: &'a [u8],
    ether_type: u16,
    header_len: usize,
}

impl<'a> Ethernet<'a> {
    /// Returns the destination MAC address.
    #[inline]
    pub fn dst(&self) -> [u8; 6] {
        self.frame[0..6].try_into().expect("bounds checked on parse")
    }

    /// Returns the source MAC address.
    #[inline]
    pub fn src(&self) -> [u8; 6] {
        self.frame[6..12].try_into().expect("bounds checked on parse")
    }

    /// Returns the encapsulated protocol identifier, with any single VLAN
    /// tag skipped.
    #[inline]
    pub fn ether_type(&self) -> u16 {
        self.ether_type
    }
}

impl<'a> Packet<'a> for Ethernet<'a> {
    fn frame(&self) -> &'a [u8] {
        self.frame
    }

    fn header_len(&self) -> usize {
        self.header_len
    }

    fn next_header_offset(&self) -> usize {
        self.header_len
    }

    fn next_header(&self) -> Option<usize> {
        match self.ether_type {
            // Unimplemented QinQ outer tag.
            VLAN_802_1AD => None,
            ether_type => Some(ether_type as usize),
        }
    }

    fn parse_from(outer: &'a impl Packet<'a>) -> Result<Self> {
        let frame = outer.frame();
        let Some(ether_type) = read_u16(frame, 12) else {
            bail!(PacketParseError::InvalidRead);
        };
        let (ether_type, header_len) = match ether_type {
            VLAN_802_1Q => match read_u16(frame, HDR_SIZE + 2) {
                Some(inner) => (inner, HDR_SIZE_802_1Q),
                None => bail!(PacketParseError::InvalidRead),
            },
            other => (other, HDR_SIZE),
        };
        Ok(Ethernet {
            frame,
            ether_type,
            header_len,
        })
    }
}
