// ah.rs - Authentication Header wire codec

use thiserror::Error;

/// Fixed portion of the AH header in bytes (next-header through sequence).
pub const AH_FIXED_LEN: usize = 12;

/// Error returned while encoding or decoding an AH header.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// Buffer shorter than required.
    #[error("ah buffer too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Declared ICV length disagrees with the SA's negotiated digest
    /// length. Rejecting here is the primary defense against digest
    /// truncation and padding games.
    #[error("icv length mismatch: header declares {declared}, sa expects {expected}")]
    IcvLengthMismatch { declared: usize, expected: usize },

    /// ICV longer than the one-byte length field can represent.
    #[error("icv length {0} not encodable")]
    IcvNotEncodable(usize),

    /// Reserved field was nonzero under strict decoding.
    #[error("reserved ah field must be zero (found {0:#06x})")]
    ReservedNotZero(u16),
}

/// AH header as carried on the wire:
/// `next_header | payload_len | reserved | spi | sequence | auth_data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AhHeader {
    /// Protocol of the protected payload (or 4 for a tunneled packet).
    pub next_header: u8,
    /// Reserved field; transmitted as zero.
    pub reserved: u16,
    /// Security Parameter Index selecting the SA.
    pub spi: u32,
    /// Anti-replay sequence number.
    pub sequence: u32,
    /// Integrity check value, `digest_len` bytes.
    pub auth_data: Vec<u8>,
}

impl AhHeader {
    /// Total encoded length in bytes. Always a multiple of 4 for the ICV
    /// widths the digest layer produces.
    pub fn wire_len(&self) -> usize {
        AH_FIXED_LEN + self.auth_data.len()
    }

    /// The `payload_len` field value: header length in 32-bit words,
    /// minus 2.
    pub fn payload_len_words(&self) -> Result<u8, HeaderError> {
        let words = self.wire_len() / 4;
        if self.wire_len() % 4 != 0 || words < 2 || words - 2 > u8::MAX as usize {
            return Err(HeaderError::IcvNotEncodable(self.auth_data.len()));
        }
        Ok((words - 2) as u8)
    }

    /// Encodes into `out`, which must hold at least [`Self::wire_len`]
    /// bytes.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<(), HeaderError> {
        let wire_len = self.wire_len();
        if out.len() < wire_len {
            return Err(HeaderError::Truncated {
                expected: wire_len,
                actual: out.len(),
            });
        }
        out[0] = self.next_header;
        out[1] = self.payload_len_words()?;
        out[2..4].copy_from_slice(&self.reserved.to_be_bytes());
        out[4..8].copy_from_slice(&self.spi.to_be_bytes());
        out[8..12].copy_from_slice(&self.sequence.to_be_bytes());
        out[12..wire_len].copy_from_slice(&self.auth_data);
        Ok(())
    }

    /// Encodes into a fresh buffer.
    pub fn encode(&self) -> Result<Vec<u8>, HeaderError> {
        let mut out = vec![0u8; self.wire_len()];
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Parses an AH header from the front of `bytes`, insisting that the
    /// declared ICV width matches `expected_icv_len` exactly.
    pub fn parse(bytes: &[u8], expected_icv_len: usize) -> Result<Self, HeaderError> {
        if bytes.len() < AH_FIXED_LEN {
            return Err(HeaderError::Truncated {
                expected: AH_FIXED_LEN,
                actual: bytes.len(),
            });
        }

        let payload_len = bytes[1] as usize;
        let wire_len = (payload_len + 2) * 4;
        let declared_icv = wire_len - AH_FIXED_LEN;
        if declared_icv != expected_icv_len {
            return Err(HeaderError::IcvLengthMismatch {
                declared: declared_icv,
                expected: expected_icv_len,
            });
        }
        if bytes.len() < wire_len {
            return Err(HeaderError::Truncated {
                expected: wire_len,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            next_header: bytes[0],
            reserved: u16::from_be_bytes([bytes[2], bytes[3]]),
            spi: u32::from_be_bytes(bytes[4..8].try_into().unwrap()),
            sequence: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
            auth_data: bytes[AH_FIXED_LEN..wire_len].to_vec(),
        })
    }
}
