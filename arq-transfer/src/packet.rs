//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (magic, type, seq/ack, payload).
//! - Serialising a [`Packet`] into a fixed-capacity [`PacketBuf`] ready for
//!   transmission, without touching the heap.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed, truncated, or corrupted input.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Magic (0xCCAA)        |     Type      |     Flags     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Payload Length        |         CRC-32 (high)         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         CRC-32 (low)          |          Payload ...          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 18 bytes.
//! magic(2) + type(1) + flags(1) + seq(4) + ack(4) + len(2) + crc32(4)
//!
//! # Checksum
//!
//! The CRC-32 (reflected IEEE polynomial `0xEDB88320`) always covers the
//! canonical layout: the full header with the checksum field set to zero,
//! followed by the payload.  Decoding verifies the checksum over the datagram
//! exactly as received before any other field is trusted, so a single flipped
//! bit anywhere in the datagram is reported as [`PacketError::ChecksumMismatch`].

use std::fmt;
use std::ops::Deref;

use thiserror::Error;

/// Constant in the first two bytes of every packet.
pub const MAGIC: u16 = 0xCCAA;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 18;

/// Largest payload a single packet may carry.
pub const MAX_PAYLOAD: usize = 1000;

/// Largest datagram the protocol ever produces or accepts.
pub const MAX_PACKET_LEN: usize = HEADER_LEN + MAX_PAYLOAD;

// Byte offsets of each field within the serialised header.
const OFF_MAGIC: usize = 0;
const OFF_TYPE: usize = 2;
const OFF_FLAGS: usize = 3;
const OFF_SEQ: usize = 4;
const OFF_ACK: usize = 8;
const OFF_LEN: usize = 12;
const OFF_CHECKSUM: usize = 14;

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// Value of the `type` header byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Carries one chunk of the transferred file.
    Data = 0,
    /// Acknowledges DATA (cumulative for GBN, selective for SR).
    Ack = 1,
    /// Sender has no more data.
    Fin = 2,
    /// Receiver acknowledges the FIN.
    FinAck = 3,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => PacketType::Data,
            1 => PacketType::Ack,
            2 => PacketType::Fin,
            3 => PacketType::FinAck,
            _ => return None,
        })
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketType::Data => "DATA",
            PacketType::Ack => "ACK",
            PacketType::Fin => "FIN",
            PacketType::FinAck => "FINACK",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A decoded protocol datagram.
///
/// The `flags` byte is reserved: it is written as zero and ignored on decode.
/// The checksum and payload length are derived fields and therefore not
/// stored here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub seq: u32,
    pub ack: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    /// DATA packet carrying `payload` under sequence number `seq`.
    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: PacketType::Data,
            seq,
            ack: 0,
            payload,
        }
    }

    /// Pure acknowledgement.
    pub fn ack(ack: u32) -> Self {
        Self {
            kind: PacketType::Ack,
            seq: 0,
            ack,
            payload: Vec::new(),
        }
    }

    /// End-of-stream marker; `seq` is the sender's `next_seq`.
    pub fn fin(seq: u32) -> Self {
        Self {
            kind: PacketType::Fin,
            seq,
            ack: 0,
            payload: Vec::new(),
        }
    }

    /// Acknowledgement of a FIN.
    pub fn fin_ack(ack: u32) -> Self {
        Self {
            kind: PacketType::FinAck,
            seq: 0,
            ack,
            payload: Vec::new(),
        }
    }

    /// Serialise this packet into a fixed-capacity buffer.
    ///
    /// Fails with [`PacketError::PayloadTooLarge`] when the payload exceeds
    /// [`MAX_PAYLOAD`]; that is a caller bug, never a network condition.
    pub fn encode(&self) -> Result<PacketBuf, PacketError> {
        let payload_len = self.payload.len();
        if payload_len > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(payload_len));
        }

        let mut buf = PacketBuf::zeroed(HEADER_LEN + payload_len);
        let bytes = buf.as_mut_slice();

        bytes[OFF_MAGIC..OFF_MAGIC + 2].copy_from_slice(&MAGIC.to_be_bytes());
        bytes[OFF_TYPE] = self.kind as u8;
        bytes[OFF_FLAGS] = 0;
        bytes[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        bytes[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        bytes[OFF_LEN..OFF_LEN + 2].copy_from_slice(&(payload_len as u16).to_be_bytes());
        // Checksum field is still zero here: this is the canonical layout.
        bytes[HEADER_LEN..].copy_from_slice(&self.payload);

        let crc = crc32(bytes);
        bytes[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&crc.to_be_bytes());

        Ok(buf)
    }

    /// Parse a [`Packet`] from one received datagram.
    ///
    /// Checks run in this order: header present, checksum, magic, declared
    /// length, type.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::TruncatedHeader { len: buf.len() });
        }

        let stored = read_u32(buf, OFF_CHECKSUM);
        let computed = canonical_checksum(buf);
        if stored != computed {
            return Err(PacketError::ChecksumMismatch { stored, computed });
        }

        let magic = read_u16(buf, OFF_MAGIC);
        if magic != MAGIC {
            return Err(PacketError::BadMagic(magic));
        }

        let declared = usize::from(read_u16(buf, OFF_LEN));
        if declared > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(declared));
        }
        let available = buf.len() - HEADER_LEN;
        if declared != available {
            return Err(PacketError::PayloadLengthMismatch {
                declared,
                available,
            });
        }

        let kind =
            PacketType::from_u8(buf[OFF_TYPE]).ok_or(PacketError::UnknownType(buf[OFF_TYPE]))?;

        Ok(Packet {
            kind,
            seq: read_u32(buf, OFF_SEQ),
            ack: read_u32(buf, OFF_ACK),
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} seq={} ack={} len={}",
            self.kind,
            self.seq,
            self.ack,
            self.payload.len()
        )
    }
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can arise when building or parsing a datagram.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Datagram shorter than the fixed header.
    #[error("datagram of {len} bytes is shorter than the {header}-byte header", header = HEADER_LEN)]
    TruncatedHeader { len: usize },
    /// First two bytes are not [`MAGIC`].
    #[error("bad magic 0x{0:04x}")]
    BadMagic(u16),
    /// Declared payload length disagrees with the bytes after the header.
    #[error("declared payload length {declared} but {available} bytes follow the header")]
    PayloadLengthMismatch { declared: usize, available: usize },
    /// CRC-32 over the canonical layout does not match the stored value.
    #[error("checksum mismatch: stored 0x{stored:08x}, computed 0x{computed:08x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    /// Payload longer than [`MAX_PAYLOAD`].
    #[error("payload of {0} bytes exceeds the {max}-byte limit", max = MAX_PAYLOAD)]
    PayloadTooLarge(usize),
    /// Type byte outside DATA/ACK/FIN/FINACK.
    #[error("unknown packet type {0}")]
    UnknownType(u8),
}

// ---------------------------------------------------------------------------
// PacketBuf
// ---------------------------------------------------------------------------

/// Fixed-capacity byte buffer holding one datagram.
///
/// Capacity is [`MAX_PACKET_LEN`]; the buffer lives inline so queued
/// datagrams need no heap allocation of their own.
#[derive(Clone)]
pub struct PacketBuf {
    bytes: [u8; MAX_PACKET_LEN],
    len: usize,
}

impl PacketBuf {
    pub const CAPACITY: usize = MAX_PACKET_LEN;

    fn zeroed(len: usize) -> Self {
        debug_assert!(len <= Self::CAPACITY);
        Self {
            bytes: [0u8; MAX_PACKET_LEN],
            len,
        }
    }

    /// Copy `data` into a new buffer; `None` if it exceeds the capacity.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() > Self::CAPACITY {
            return None;
        }
        let mut buf = Self::zeroed(data.len());
        buf.bytes[..data.len()].copy_from_slice(data);
        Some(buf)
    }

    /// The valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len]
    }
}

impl Deref for PacketBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for PacketBuf {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuf")
            .field("len", &self.len)
            .field("bytes", &self.as_slice())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// CRC-32
// ---------------------------------------------------------------------------

const CRC_POLY: u32 = 0xEDB8_8320;

/// Byte-at-a-time lookup table, built at compile time.
const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut bit = 0;
        while bit < 8 {
            c = if c & 1 != 0 { CRC_POLY ^ (c >> 1) } else { c >> 1 };
            bit += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

/// Running CRC-32 state.
struct Crc32(u32);

impl Crc32 {
    fn new() -> Self {
        Crc32(0xFFFF_FFFF)
    }

    fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.0 = CRC_TABLE[((self.0 ^ u32::from(byte)) & 0xFF) as usize] ^ (self.0 >> 8);
        }
    }

    fn finish(self) -> u32 {
        self.0 ^ 0xFFFF_FFFF
    }
}

/// Standard CRC-32 (IEEE 802.3) of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(data);
    crc.finish()
}

/// CRC of a received datagram with its checksum field taken as zero.
///
/// `datagram` must be at least [`HEADER_LEN`] bytes long.
fn canonical_checksum(datagram: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(&datagram[..OFF_CHECKSUM]);
    crc.update(&[0u8; 4]);
    crc.update(&datagram[OFF_CHECKSUM + 4..]);
    crc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Recompute the checksum after a test has tampered with header fields.
    fn reseal(bytes: &mut [u8]) {
        let crc = canonical_checksum(bytes);
        bytes[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&crc.to_be_bytes());
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = Packet::data(42, b"hello".to_vec());
        let decoded = Packet::decode(&pkt.encode().unwrap()).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn control_packets_roundtrip() {
        for pkt in [Packet::ack(7), Packet::fin(9), Packet::fin_ack(u32::MAX)] {
            let decoded = Packet::decode(&pkt.encode().unwrap()).unwrap();
            assert_eq!(decoded, pkt);
            assert!(decoded.payload.is_empty());
        }
    }

    #[test]
    fn max_payload_roundtrip() {
        let payload: Vec<u8> = (0..MAX_PAYLOAD).map(|i| (i % 251) as u8).collect();
        let bytes = Packet::data(3, payload.clone()).encode().unwrap();
        assert_eq!(bytes.len(), MAX_PACKET_LEN);
        assert_eq!(Packet::decode(&bytes).unwrap().payload, payload);
    }

    #[test]
    fn header_fields_big_endian_on_wire() {
        let pkt = Packet {
            kind: PacketType::Fin,
            seq: 0x0102_0304,
            ack: 0x0506_0708,
            payload: b"xyz".to_vec(),
        };
        let bytes = pkt.encode().unwrap();
        assert_eq!(&bytes[OFF_MAGIC..OFF_MAGIC + 2], &[0xCC, 0xAA]);
        assert_eq!(bytes[OFF_TYPE], 2);
        assert_eq!(bytes[OFF_FLAGS], 0);
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[OFF_ACK..OFF_ACK + 4], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&bytes[OFF_LEN..OFF_LEN + 2], &[0x00, 0x03]);
        assert_eq!(&bytes[HEADER_LEN..], b"xyz");
    }

    #[test]
    fn checksum_covers_header_with_zeroed_field() {
        let bytes = Packet::data(1, b"abc".to_vec()).encode().unwrap();
        let mut canonical = bytes.to_vec();
        canonical[OFF_CHECKSUM..OFF_CHECKSUM + 4].fill(0);
        assert_eq!(read_u32(&bytes, OFF_CHECKSUM), crc32(&canonical));
    }

    #[test]
    fn every_single_bit_flip_is_a_checksum_mismatch() {
        let bytes = Packet::data(0xDEAD_BEEF, b"payload!".to_vec())
            .encode()
            .unwrap();
        for bit in 0..bytes.len() * 8 {
            let mut corrupt = bytes.to_vec();
            corrupt[bit / 8] ^= 1 << (bit % 8);
            assert!(
                matches!(
                    Packet::decode(&corrupt),
                    Err(PacketError::ChecksumMismatch { .. })
                ),
                "bit {bit} flip not detected as checksum mismatch"
            );
        }
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Packet::decode(&[0u8; HEADER_LEN - 1]),
            Err(PacketError::TruncatedHeader {
                len: HEADER_LEN - 1
            })
        );
        assert_eq!(
            Packet::decode(&[]),
            Err(PacketError::TruncatedHeader { len: 0 })
        );
    }

    #[test]
    fn decode_bad_magic() {
        let mut bytes = Packet::ack(1).encode().unwrap().to_vec();
        bytes[0] = 0x12;
        bytes[1] = 0x34;
        reseal(&mut bytes);
        assert_eq!(Packet::decode(&bytes), Err(PacketError::BadMagic(0x1234)));
    }

    #[test]
    fn decode_declared_length_disagrees() {
        let mut bytes = Packet::data(0, b"data".to_vec()).encode().unwrap().to_vec();
        bytes.pop();
        reseal(&mut bytes);
        assert_eq!(
            Packet::decode(&bytes),
            Err(PacketError::PayloadLengthMismatch {
                declared: 4,
                available: 3
            })
        );
    }

    #[test]
    fn truncated_datagram_fails_checksum() {
        let mut bytes = Packet::data(0, b"data".to_vec()).encode().unwrap().to_vec();
        bytes.truncate(HEADER_LEN + 2);
        assert!(matches!(
            Packet::decode(&bytes),
            Err(PacketError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn decode_unknown_type() {
        let mut bytes = Packet::ack(1).encode().unwrap().to_vec();
        bytes[OFF_TYPE] = 9;
        reseal(&mut bytes);
        assert_eq!(Packet::decode(&bytes), Err(PacketError::UnknownType(9)));
    }

    #[test]
    fn decode_ignores_reserved_flags() {
        let mut bytes = Packet::ack(5).encode().unwrap().to_vec();
        bytes[OFF_FLAGS] = 0x80;
        reseal(&mut bytes);
        assert_eq!(Packet::decode(&bytes).unwrap(), Packet::ack(5));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let pkt = Packet::data(0, vec![0u8; MAX_PAYLOAD + 1]);
        assert_eq!(
            pkt.encode().unwrap_err(),
            PacketError::PayloadTooLarge(MAX_PAYLOAD + 1)
        );
    }

    #[test]
    fn packet_buf_from_slice_respects_capacity() {
        assert!(PacketBuf::from_slice(&[0u8; MAX_PACKET_LEN]).is_some());
        assert!(PacketBuf::from_slice(&[0u8; MAX_PACKET_LEN + 1]).is_none());
        let buf = PacketBuf::from_slice(b"abc").unwrap();
        assert_eq!(&*buf, b"abc");
    }

    #[test]
    fn header_len_constant_is_correct() {
        // magic(2) + type(1) + flags(1) + seq(4) + ack(4) + len(2) + crc32(4)
        assert_eq!(HEADER_LEN, 18);
        assert_eq!(OFF_CHECKSUM + 4, HEADER_LEN);
    }
}
