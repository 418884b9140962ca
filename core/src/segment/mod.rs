//! TCP segment handles.
//!
//! The capture layer owns raw frames; the rewriting engine only sees TCP
//! segments. A [`TcpSegment`] carries the endpoint addresses the capture
//! layer resolved from the network layer, the fixed TCP header fields, any
//! options bytes (kept opaque, never rewritten), and a resizable payload.
//!
//! ## Remarks
//! The checksum field is carried through verbatim. After a payload has been
//! rewritten it is stale by construction; recomputing it requires the
//! pseudo-header, which belongs to the capture layer that owns the network
//! layer.

use std::net::{IpAddr, SocketAddr};

use anyhow::{bail, Result};
use byteorder::{ByteOrder, NetworkEndian};
use thiserror::Error;

// TCP flags.
pub const CWR: u8 = 0b1000_0000;
pub const ECE: u8 = 0b0100_0000;
pub const URG: u8 = 0b0010_0000;
pub const ACK: u8 = 0b0001_0000;
pub const PSH: u8 = 0b0000_1000;
pub const RST: u8 = 0b0000_0100;
pub const SYN: u8 = 0b0000_0010;
pub const FIN: u8 = 0b0000_0001;

/// Size of the fixed portion of a TCP header in bytes.
const FIXED_HEADER_LEN: usize = 20;

/// An owned TCP segment.
///
/// TCP options are not parsed; they are preserved as raw bytes and re-emitted
/// unchanged.
#[derive(Debug, Clone)]
pub struct TcpSegment {
    /// Source socket address.
    src: SocketAddr,
    /// Destination socket address.
    dst: SocketAddr,
    seq_no: u32,
    ack_no: u32,
    /// Reserved bits and the (historical) nonce sum bit, as received.
    reserved_ns: u8,
    flags: u8,
    window: u16,
    checksum: u16,
    urgent_pointer: u16,
    /// Raw options bytes following the fixed header.
    options: Vec<u8>,
    payload: Vec<u8>,
}

impl TcpSegment {
    /// Creates a segment from already-resolved fields. Used by capture layers
    /// that parse headers themselves and by tests.
    pub fn new(src: SocketAddr, dst: SocketAddr, seq_no: u32, flags: u8, payload: Vec<u8>) -> Self {
        TcpSegment {
            src,
            dst,
            seq_no,
            ack_no: 0,
            reserved_ns: 0,
            flags,
            window: 0,
            checksum: 0,
            urgent_pointer: 0,
            options: vec![],
            payload,
        }
    }

    /// Parses a segment from the raw bytes of a TCP datagram (header +
    /// payload, no network layer). `src_ip` and `dst_ip` come from the
    /// encapsulating layer; ports come from the TCP header.
    pub fn parse(src_ip: IpAddr, dst_ip: IpAddr, data: &[u8]) -> Result<Self> {
        if data.len() < FIXED_HEADER_LEN {
            bail!(SegmentError::Truncated { len: data.len() });
        }
        let data_offset = ((data[12] & 0xf0) >> 2) as usize;
        if data_offset < FIXED_HEADER_LEN || data_offset > data.len() {
            bail!(SegmentError::InvalidDataOffset { len: data_offset });
        }
        Ok(TcpSegment {
            src: SocketAddr::new(src_ip, NetworkEndian::read_u16(&data[0..2])),
            dst: SocketAddr::new(dst_ip, NetworkEndian::read_u16(&data[2..4])),
            seq_no: NetworkEndian::read_u32(&data[4..8]),
            ack_no: NetworkEndian::read_u32(&data[8..12]),
            reserved_ns: data[12] & 0x0f,
            flags: data[13],
            window: NetworkEndian::read_u16(&data[14..16]),
            checksum: NetworkEndian::read_u16(&data[16..18]),
            urgent_pointer: NetworkEndian::read_u16(&data[18..20]),
            options: data[FIXED_HEADER_LEN..data_offset].to_vec(),
            payload: data[data_offset..].to_vec(),
        })
    }

    /// Re-emits the segment as raw TCP datagram bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header_len = FIXED_HEADER_LEN + self.options.len();
        let mut buf = vec![0u8; header_len + self.payload.len()];
        NetworkEndian::write_u16(&mut buf[0..2], self.src.port());
        NetworkEndian::write_u16(&mut buf[2..4], self.dst.port());
        NetworkEndian::write_u32(&mut buf[4..8], self.seq_no);
        NetworkEndian::write_u32(&mut buf[8..12], self.ack_no);
        buf[12] = (((header_len >> 2) as u8) << 4) | self.reserved_ns;
        buf[13] = self.flags;
        NetworkEndian::write_u16(&mut buf[14..16], self.window);
        NetworkEndian::write_u16(&mut buf[16..18], self.checksum);
        NetworkEndian::write_u16(&mut buf[18..20], self.urgent_pointer);
        buf[FIXED_HEADER_LEN..header_len].copy_from_slice(&self.options);
        buf[header_len..].copy_from_slice(&self.payload);
        buf
    }

    /// Returns the source socket address.
    #[inline]
    pub fn src(&self) -> SocketAddr {
        self.src
    }

    /// Returns the destination socket address.
    #[inline]
    pub fn dst(&self) -> SocketAddr {
        self.dst
    }

    /// Returns the sending port.
    #[inline]
    pub fn src_port(&self) -> u16 {
        self.src.port()
    }

    /// Returns the receiving port.
    #[inline]
    pub fn dst_port(&self) -> u16 {
        self.dst.port()
    }

    /// Returns the sequence number.
    #[inline]
    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    /// Rewrites the sequence number.
    #[inline]
    pub fn set_seq_no(&mut self, seq_no: u32) {
        self.seq_no = seq_no;
    }

    /// Returns the acknowledgment number.
    #[inline]
    pub fn ack_no(&self) -> u32 {
        self.ack_no
    }

    /// Rewrites the acknowledgment number.
    #[inline]
    pub fn set_ack_no(&mut self, ack_no: u32) {
        self.ack_no = ack_no;
    }

    /// Returns the 8-bit TCP flags.
    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Returns the size of the receive window in window size units.
    #[inline]
    pub fn window(&self) -> u16 {
        self.window
    }

    /// Returns `true` if the synchronize flag is set.
    #[inline]
    pub fn syn(&self) -> bool {
        self.flags & SYN != 0
    }

    /// Returns `true` if the acknowledgment flag is set.
    #[inline]
    pub fn ack(&self) -> bool {
        self.flags & ACK != 0
    }

    /// Returns `true` if the FIN flag is set.
    #[inline]
    pub fn fin(&self) -> bool {
        self.flags & FIN != 0
    }

    /// Returns `true` if the reset flag is set.
    #[inline]
    pub fn rst(&self) -> bool {
        self.flags & RST != 0
    }

    /// Returns the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the length of the payload in bytes.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Resizes the payload buffer and returns it for rewriting. Grown space
    /// is zero-filled.
    pub fn resize_payload(&mut self, len: usize) -> &mut [u8] {
        self.payload.resize(len, 0);
        &mut self.payload
    }
}

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("segment truncated: {len} bytes")]
    Truncated { len: usize },

    #[error("invalid data offset: {len} bytes")]
    InvalidDataOffset { len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> (SocketAddr, SocketAddr) {
        (
            "10.0.0.1:43210".parse().unwrap(),
            "10.0.0.2:80".parse().unwrap(),
        )
    }

    fn raw_header(seq: u32, ack: u32, flags: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 20];
        NetworkEndian::write_u16(&mut buf[0..2], 43210);
        NetworkEndian::write_u16(&mut buf[2..4], 80);
        NetworkEndian::write_u32(&mut buf[4..8], seq);
        NetworkEndian::write_u32(&mut buf[8..12], ack);
        buf[12] = 5 << 4;
        buf[13] = flags;
        NetworkEndian::write_u16(&mut buf[14..16], 0xffff);
        buf
    }

    #[test]
    fn parse_data_segment() {
        let mut raw = raw_header(1001, 2000, ACK | PSH);
        raw.extend_from_slice(b"HELLO");

        let seg = TcpSegment::parse("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap(), &raw)
            .unwrap();
        assert_eq!(seg.src_port(), 43210);
        assert_eq!(seg.dst_port(), 80);
        assert_eq!(seg.seq_no(), 1001);
        assert_eq!(seg.ack_no(), 2000);
        assert!(seg.ack());
        assert!(!seg.syn());
        assert_eq!(seg.window(), 0xffff);
        assert_eq!(seg.payload(), b"HELLO");
    }

    #[test]
    fn parse_preserves_options() {
        let mut raw = raw_header(1, 0, SYN);
        raw[12] = 6 << 4; // one options word
        raw.extend_from_slice(&[2, 4, 0x05, 0xb4]); // MSS option
        raw.extend_from_slice(b"X");

        let seg = TcpSegment::parse("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap(), &raw)
            .unwrap();
        assert_eq!(seg.payload(), b"X");

        let emitted = seg.to_bytes();
        assert_eq!(emitted, raw);
    }

    #[test]
    fn parse_rejects_truncated() {
        let raw = [0u8; 12];
        let err = TcpSegment::parse("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap(), &raw)
            .unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn parse_rejects_bad_data_offset() {
        let mut raw = raw_header(1, 0, 0);
        raw[12] = 0xf0; // claims 60-byte header in a 20-byte datagram
        let err = TcpSegment::parse("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap(), &raw)
            .unwrap_err();
        assert!(err.to_string().contains("data offset"));
    }

    #[test]
    fn roundtrip_after_rewrite() {
        let (src, dst) = addrs();
        let mut seg = TcpSegment::new(src, dst, 500, ACK, b"abcdef".to_vec());
        seg.set_seq_no(510);
        seg.set_ack_no(42);
        seg.resize_payload(3).copy_from_slice(b"xyz");

        let reparsed = TcpSegment::parse(src.ip(), dst.ip(), &seg.to_bytes()).unwrap();
        assert_eq!(reparsed.seq_no(), 510);
        assert_eq!(reparsed.ack_no(), 42);
        assert_eq!(reparsed.payload(), b"xyz");
    }
}
