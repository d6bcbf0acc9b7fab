//! Protocol parsing at the packet and stream levels.
//!
//! The `packet` module decodes single-frame protocols (link, IP, transport).
//! The `stream` module recognizes and parses application protocols that
//! span multiple packets of a reassembled TCP flow. DNS sits in between: it
//! is decoded per UDP datagram.

pub mod dns;
pub mod packet;
pub mod stream;
