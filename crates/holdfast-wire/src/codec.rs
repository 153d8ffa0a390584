//! Wire codec: variable-length integers, peer references and strings.
//!
//! Integers use a base-128 little-endian VLQ: every byte carries 7 value
//! bits, least significant group first, and only the *last* byte of a value
//! has the high bit set. A peer reference is its bare identifier as 8
//! little-endian bytes; a peer list is a VLQ count followed by references.

use holdfast_types::peer::PeerId;
use thiserror::Error;

/// Errors from decoding wire data. Any of these means the producer is
/// malformed and is fatal to that peer's connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Unexpected end of stream")]
    UnexpectedEndOfStream,
    #[error("VLQ value does not fit in 64 bits")]
    VarintOverflow,
    #[error("String is not valid UTF-8")]
    InvalidUtf8,
    #[error("Unknown {what} tag: {value:#04x}")]
    UnknownTag { what: &'static str, value: u8 },
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
}

const CONTINUE_MASK: u8 = 0x7f;
const TERMINATOR: u8 = 0x80;

/// Append the VLQ encoding of `value` to `out`.
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value > u64::from(CONTINUE_MASK) {
        out.push((value as u8) & CONTINUE_MASK);
        value >>= 7;
    }
    out.push((value as u8) | TERMINATOR);
}

/// Number of bytes [`encode_varint`] emits for `value`.
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Growable output buffer with typed writers.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_varint(&mut self, value: u64) {
        encode_varint(value, &mut self.buf);
    }

    pub fn write_peer(&mut self, peer: PeerId) {
        self.buf.extend_from_slice(&peer.0.to_le_bytes());
    }

    /// Presence byte followed by the reference when present.
    pub fn write_optional_peer(&mut self, peer: Option<PeerId>) {
        match peer {
            Some(peer) => {
                self.write_u8(1);
                self.write_peer(peer);
            }
            None => self.write_u8(0),
        }
    }

    pub fn write_peers(&mut self, peers: &[PeerId]) {
        self.write_varint(peers.len() as u64);
        for peer in peers {
            self.write_peer(*peer);
        }
    }

    /// VLQ byte length followed by UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) {
        self.write_varint(value.len() as u64);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over an inbound payload.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or(WireError::UnexpectedEndOfStream)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::UnexpectedEndOfStream);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Decode one VLQ value, accumulating `part & 0x7f` until a byte with
    /// the high bit set.
    pub fn read_varint(&mut self) -> Result<u64, WireError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            if shift > 63 {
                return Err(WireError::VarintOverflow);
            }
            let part = self.read_u8()?;
            let bits = u64::from(part & CONTINUE_MASK);
            // Only one value bit is left at the top group.
            if shift == 63 && bits > 1 {
                return Err(WireError::VarintOverflow);
            }
            value |= bits << shift;
            if part & TERMINATOR != 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Read a VLQ length and check that at least `len * unit` bytes follow,
    /// so a corrupt count cannot trigger a huge allocation.
    fn read_len(&mut self, unit: usize) -> Result<usize, WireError> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| WireError::UnexpectedEndOfStream)?;
        if len.saturating_mul(unit) > self.remaining() {
            return Err(WireError::UnexpectedEndOfStream);
        }
        Ok(len)
    }

    pub fn read_peer(&mut self) -> Result<PeerId, WireError> {
        let bytes = self.read_bytes(PeerId::WIRE_SIZE)?;
        let mut raw = [0u8; PeerId::WIRE_SIZE];
        raw.copy_from_slice(bytes);
        Ok(PeerId(u64::from_le_bytes(raw)))
    }

    pub fn read_optional_peer(&mut self) -> Result<Option<PeerId>, WireError> {
        match self.read_u8()? {
            0 => Ok(None),
            1 => self.read_peer().map(Some),
            value => Err(WireError::UnknownTag {
                what: "optional peer",
                value,
            }),
        }
    }

    pub fn read_peers(&mut self) -> Result<Vec<PeerId>, WireError> {
        let count = self.read_len(PeerId::WIRE_SIZE)?;
        (0..count).map(|_| self.read_peer()).collect()
    }

    pub fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_len(1)?;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| WireError::InvalidUtf8)
    }
}
