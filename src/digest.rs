// digest.rs - per-SA truncated HMAC digest context

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Full output width of the underlying HMAC.
pub const DIGEST_MAX_LEN: usize = 32;

/// The RFC 2402 96-bit truncation most AH peers negotiate.
pub const DIGEST_LEN_96: usize = 12;

/// Wrapper for SA integrity-key material.
#[derive(Clone, PartialEq, Eq)]
pub struct SaKey(Vec<u8>);

impl SaKey {
    /// Creates a key from raw bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the underlying key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SaKey {
    // Key material stays out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SaKey").field(&"..").finish()
    }
}

/// Errors returned by the digest context.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    /// Requested truncation exceeds the primitive's output width.
    #[error("digest length {requested} exceeds maximum {DIGEST_MAX_LEN}")]
    LengthUnsupported { requested: usize },

    /// Computed digest did not match the provided value.
    #[error("integrity check value mismatch")]
    Mismatch,
}

/// Incremental keyed digest bound to one SA for one packet. Create fresh
/// per packet; there is no cross-packet state.
#[derive(Debug)]
pub struct DigestContext {
    mac: HmacSha256,
    digest_len: usize,
}

impl DigestContext {
    /// Creates a context producing `digest_len` bytes of output.
    pub fn new(key: &SaKey, digest_len: usize) -> Result<Self, DigestError> {
        if digest_len == 0 || digest_len > DIGEST_MAX_LEN {
            return Err(DigestError::LengthUnsupported {
                requested: digest_len,
            });
        }
        // HMAC accepts any key length.
        let mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|_| DigestError::LengthUnsupported {
                requested: digest_len,
            })?;
        Ok(Self { mac, digest_len })
    }

    /// Feeds one byte range. Ranges may arrive in arbitrary chunk sizes.
    pub fn update(&mut self, bytes: &[u8]) {
        self.mac.update(bytes);
    }

    /// Finalizes and truncates to the SA's negotiated length.
    #[must_use]
    pub fn finalize(self) -> Vec<u8> {
        let full = self.mac.finalize().into_bytes();
        full[..self.digest_len].to_vec()
    }

    /// Finalizes and compares against `expected` in constant time.
    pub fn verify(self, expected: &[u8]) -> Result<(), DigestError> {
        let digest_len = self.digest_len;
        if expected.len() != digest_len {
            return Err(DigestError::Mismatch);
        }
        let computed = self.finalize();
        if computed.as_slice().ct_eq(expected).into() {
            Ok(())
        } else {
            Err(DigestError::Mismatch)
        }
    }
}
