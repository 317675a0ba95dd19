//! Wire format (v1)
//!
//! Every serialized artifact starts with the same 8-byte header:
//!
//!   version[1] || kind[1] || flags[1] || reserved[1] || dim[4, BE]
//!
//! followed by kind-specific fields. All multi-byte integers are
//! big-endian. Decoding failures collapse to a single [`DecodeError`]
//! so the byte layout cannot be probed through error variants.

use crate::error::DecodeError;

/// Version byte for v1.
pub const FORMAT_VERSION: u8 = 0x01;

/// Artifact kind identifiers (on-wire).
pub const KIND_ENCRYPTION_KEY: u8 = 0xE1;
pub const KIND_EVALUATION_KEY: u8 = 0xE2;
pub const KIND_SECRET_KEY: u8 = 0xE3;
pub const KIND_SCORES: u8 = 0xC1;

/// Flags (reserved for future use).
pub const FLAGS_V1: u8 = 0x00;

/// Header size: version + kind + flags + reserved + dim(u32).
pub const HEADER_BYTES: usize = 1 + 1 + 1 + 1 + 4;

/// Largest lattice dimension any artifact may declare.
pub const MAX_DIM: u32 = 1 << 15;

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

pub(crate) fn encode_header(out: &mut Vec<u8>, kind: u8, dim: u32) {
    out.push(FORMAT_VERSION);
    out.push(kind);
    out.push(FLAGS_V1);
    out.push(0x00);
    out.extend_from_slice(&dim.to_be_bytes());
}

pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Cursor over a serialized artifact. Every accessor fails with the
/// uniform [`DecodeError`] on underrun.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Parse and validate the common header, returning the declared
    /// dimension. The kind byte must match `expect_kind` exactly.
    pub fn header(&mut self, expect_kind: u8) -> Result<u32, DecodeError> {
        if self.data.len() < HEADER_BYTES {
            return Err(DecodeError);
        }
        if self.data[0] != FORMAT_VERSION {
            return Err(DecodeError);
        }
        if self.data[1] != expect_kind {
            return Err(DecodeError);
        }
        if self.data[2] != FLAGS_V1 || self.data[3] != 0x00 {
            return Err(DecodeError);
        }
        self.pos = 4;
        let dim = self.take_u32()?;
        if dim == 0 || dim > MAX_DIM {
            return Err(DecodeError);
        }
        Ok(dim)
    }

    pub fn take_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes: [u8; 4] = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or(DecodeError)?
            .try_into()
            .map_err(|_| DecodeError)?;
        self.pos += 4;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn take_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes: [u8; 8] = self
            .data
            .get(self.pos..self.pos + 8)
            .ok_or(DecodeError)?
            .try_into()
            .map_err(|_| DecodeError)?;
        self.pos += 8;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Remaining unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Decoding must consume the buffer exactly; trailing bytes are a
    /// framing error.
    pub fn finish(self) -> Result<(), DecodeError> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(DecodeError)
        }
    }
}
