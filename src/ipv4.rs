// ipv4.rs - IPv4 header codec, option cursor, and mutable-field canonicalizer

use thiserror::Error;

/// Minimum (option-free) IPv4 header length in bytes.
pub const IPV4_HDR_MIN: usize = 20;

/// Maximum IPv4 header length in bytes (IHL is 4 bits of 32-bit words).
pub const IPV4_HDR_MAX: usize = 60;

/// Protocol number carried for the Authentication Header.
pub const PROTO_AH: u8 = 51;

/// Protocol number for IP-in-IP encapsulation (tunnel-mode inner packet).
pub const PROTO_IPIP: u8 = 4;

/// Fragment-control mask: more-fragments flag plus a nonzero offset.
const FRAG_MASK: u16 = 0x3fff;

mod opt {
    pub const END: u8 = 0;
    pub const NOOP: u8 = 1;
    pub const SEC: u8 = 130;
    pub const LSRR: u8 = 131;
    pub const CIPSO: u8 = 134;
    pub const SSRR: u8 = 137;
    pub const RA: u8 = 148;
    /// Sender-directed multi-destination delivery, RFC 1770.
    pub const SDB: u8 = 149;
}

/// Error raised by the IPv4 codec and canonicalizer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Ipv4Error {
    /// Buffer shorter than required.
    #[error("ipv4 buffer too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Version nibble was not 4.
    #[error("not an ipv4 packet (version {0})")]
    BadVersion(u8),

    /// IHL below the minimum of 5 words or beyond the buffer.
    #[error("invalid ipv4 header length {0} words")]
    BadHeaderLength(u8),

    /// Option area failed validation. Option bytes are attacker-controlled,
    /// so every declared length is checked before use.
    #[error("malformed ip option at offset {offset}: {reason}")]
    MalformedOptions {
        offset: usize,
        reason: &'static str,
    },
}

/// Parsed fixed-header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub header_len: usize,
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    pub frag_off: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Ipv4Header {
    /// Parses the fixed header from the front of `bytes`. The full header
    /// (including options) must be present.
    pub fn parse(bytes: &[u8]) -> Result<Self, Ipv4Error> {
        if bytes.len() < IPV4_HDR_MIN {
            return Err(Ipv4Error::Truncated {
                expected: IPV4_HDR_MIN,
                actual: bytes.len(),
            });
        }
        let version = bytes[0] >> 4;
        if version != 4 {
            return Err(Ipv4Error::BadVersion(version));
        }
        let ihl = bytes[0] & 0x0f;
        let header_len = ihl as usize * 4;
        if ihl < 5 {
            return Err(Ipv4Error::BadHeaderLength(ihl));
        }
        if bytes.len() < header_len {
            return Err(Ipv4Error::Truncated {
                expected: header_len,
                actual: bytes.len(),
            });
        }

        let mut src = [0u8; 4];
        let mut dst = [0u8; 4];
        src.copy_from_slice(&bytes[12..16]);
        dst.copy_from_slice(&bytes[16..20]);

        Ok(Self {
            header_len,
            tos: bytes[1],
            total_len: u16::from_be_bytes([bytes[2], bytes[3]]),
            id: u16::from_be_bytes([bytes[4], bytes[5]]),
            frag_off: u16::from_be_bytes([bytes[6], bytes[7]]),
            ttl: bytes[8],
            protocol: bytes[9],
            checksum: u16::from_be_bytes([bytes[10], bytes[11]]),
            src,
            dst,
        })
    }

    /// True when the packet is a fragment (offset nonzero or MF set).
    pub fn is_fragment(&self) -> bool {
        self.frag_off & FRAG_MASK != 0
    }

    /// Encodes an option-free 20-byte header.
    pub fn encode(&self) -> [u8; IPV4_HDR_MIN] {
        let mut buf = [0u8; IPV4_HDR_MIN];
        buf[0] = 0x45;
        buf[1] = self.tos;
        buf[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        buf[4..6].copy_from_slice(&self.id.to_be_bytes());
        buf[6..8].copy_from_slice(&self.frag_off.to_be_bytes());
        buf[8] = self.ttl;
        buf[9] = self.protocol;
        buf[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        buf[12..16].copy_from_slice(&self.src);
        buf[16..20].copy_from_slice(&self.dst);
        buf
    }
}

/// Computes the ones-complement header checksum over `header` with the
/// checksum field included as-is (zero it first when recomputing).
pub fn header_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = header.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [odd] = chunks.remainder() {
        sum += u32::from(*odd) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Zeroes the checksum field in `header` and writes a freshly computed one.
pub fn refresh_checksum(header: &mut [u8]) {
    header[10] = 0;
    header[11] = 0;
    let sum = header_checksum(header);
    header[10..12].copy_from_slice(&sum.to_be_bytes());
}

/// Writes the protocol field.
pub fn set_protocol(header: &mut [u8], protocol: u8) {
    header[9] = protocol;
}

/// Writes the total-length field.
pub fn set_total_len(header: &mut [u8], total_len: u16) {
    header[2..4].copy_from_slice(&total_len.to_be_bytes());
}

/// Pre-canonicalization copy of the fields routers may rewrite in transit.
/// Created per packet and discarded once the transform completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutableFieldSnapshot {
    pub tos: u8,
    pub ttl: u8,
    pub frag_off: u16,
    pub checksum: u16,
}

impl MutableFieldSnapshot {
    /// Restores TOS, TTL, and fragment control into `header`. The checksum
    /// is deliberately not restored; callers recompute it over the final
    /// header instead.
    pub fn apply(&self, header: &mut [u8]) {
        header[1] = self.tos;
        header[6..8].copy_from_slice(&self.frag_off.to_be_bytes());
        header[8] = self.ttl;
    }
}

/// Canonical form of one IPv4 header: mutable fields zeroed, unrecognized
/// option payloads zeroed, and the digest-relevant final destination
/// resolved through any source-routing option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    /// Working copy of the header, `header_len` bytes.
    pub bytes: Vec<u8>,
    /// Destination the digest must cover. Differs from the wire
    /// destination only when an LSRR/SSRR option is present.
    pub final_dst: [u8; 4],
    /// Original values of the zeroed fields.
    pub snapshot: MutableFieldSnapshot,
}

/// Cursor over the TLV-encoded IPv4 option area. Yields `(kind, offset,
/// len)` triples where `offset` indexes the start of the option within the
/// area and `len` covers type and length bytes.
struct OptionCursor<'a> {
    area: &'a [u8],
    offset: usize,
    finished: bool,
}

impl<'a> OptionCursor<'a> {
    fn new(area: &'a [u8]) -> Self {
        Self {
            area,
            offset: 0,
            finished: false,
        }
    }
}

impl Iterator for OptionCursor<'_> {
    type Item = Result<(u8, usize, usize), Ipv4Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.offset >= self.area.len() {
            return None;
        }

        let offset = self.offset;
        let kind = self.area[offset];
        match kind {
            opt::END => {
                self.finished = true;
                Some(Ok((kind, offset, 1)))
            }
            opt::NOOP => {
                self.offset += 1;
                Some(Ok((kind, offset, 1)))
            }
            _ => {
                if offset + 1 >= self.area.len() {
                    self.finished = true;
                    return Some(Err(Ipv4Error::MalformedOptions {
                        offset,
                        reason: "option truncated before length byte",
                    }));
                }
                let len = self.area[offset + 1] as usize;
                if len < 2 {
                    self.finished = true;
                    return Some(Err(Ipv4Error::MalformedOptions {
                        offset,
                        reason: "option length below 2",
                    }));
                }
                if offset + len > self.area.len() {
                    self.finished = true;
                    return Some(Err(Ipv4Error::MalformedOptions {
                        offset,
                        reason: "option overruns option area",
                    }));
                }
                self.offset += len;
                Some(Ok((kind, offset, len)))
            }
        }
    }
}

/// Canonicalizes one IPv4 header (`header_len` bytes, options included)
/// for digest computation.
///
/// Mutable fields (TOS, TTL, fragment control, checksum) are recorded in
/// the snapshot and zeroed. Options classified as immutable-in-transit are
/// left intact; loose/strict source routes additionally donate the final
/// destination from their last recorded slot; everything else has its
/// value bytes zeroed. The caller's buffer is never touched.
pub fn canonicalize(header: &[u8]) -> Result<Canonical, Ipv4Error> {
    let parsed = Ipv4Header::parse(header)?;
    let mut bytes = header[..parsed.header_len].to_vec();

    let snapshot = MutableFieldSnapshot {
        tos: parsed.tos,
        ttl: parsed.ttl,
        frag_off: parsed.frag_off,
        checksum: parsed.checksum,
    };

    bytes[1] = 0;
    bytes[6] = 0;
    bytes[7] = 0;
    bytes[8] = 0;
    bytes[10] = 0;
    bytes[11] = 0;

    let mut final_dst = parsed.dst;
    let area_start = IPV4_HDR_MIN;
    let area_len = parsed.header_len - area_start;

    // Walk first, rewrite second, so a malformed tail never leaves a
    // half-canonicalized buffer behind.
    let mut actions: Vec<(u8, usize, usize)> = Vec::new();
    for item in OptionCursor::new(&bytes[area_start..area_start + area_len]) {
        actions.push(item?);
    }

    for (kind, offset, len) in actions {
        let abs = area_start + offset;
        match kind {
            opt::END | opt::NOOP => {}
            opt::SEC | opt::CIPSO | opt::RA | opt::SDB => {
                // Immutable in transit; authenticated as-is.
            }
            opt::LSRR | opt::SSRR => {
                if len < 7 {
                    return Err(Ipv4Error::MalformedOptions {
                        offset,
                        reason: "source route too short for an address slot",
                    });
                }
                // The digest must cover the address the packet will finally
                // reach, not the next hop currently in the header.
                final_dst.copy_from_slice(&bytes[abs + len - 4..abs + len]);
                bytes[16..20].copy_from_slice(&final_dst);
            }
            _ => {
                for b in &mut bytes[abs + 2..abs + len] {
                    *b = 0;
                }
            }
        }
    }

    Ok(Canonical {
        bytes,
        final_dst,
        snapshot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base_header(options: &[u8]) -> Vec<u8> {
        assert_eq!(options.len() % 4, 0);
        let header_len = IPV4_HDR_MIN + options.len();
        let mut h = vec![0u8; header_len];
        h[0] = 0x40 | (header_len / 4) as u8;
        h[1] = 0xb8; // tos
        h[2..4].copy_from_slice(&(header_len as u16 + 4).to_be_bytes());
        h[4..6].copy_from_slice(&0x1c46u16.to_be_bytes());
        h[6..8].copy_from_slice(&0x4000u16.to_be_bytes()); // DF
        h[8] = 64;
        h[9] = 17;
        h[12..16].copy_from_slice(&[10, 0, 0, 1]);
        h[16..20].copy_from_slice(&[10, 0, 0, 2]);
        h[20..].copy_from_slice(options);
        refresh_checksum(&mut h);
        h
    }

    #[test]
    fn checksum_matches_known_vector() {
        // Classic worked example: 172.16.10.99 -> 172.16.10.12, TCP.
        let mut h = hex("4500003c1c46400040060000ac100a63ac100a0c");
        let sum = header_checksum(&h);
        assert_eq!(sum, 0xb1e6);
        h[10..12].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(header_checksum(&h), 0);
    }

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn fixed_header_round_trip() {
        let hdr = Ipv4Header {
            header_len: 20,
            tos: 0x10,
            total_len: 576,
            id: 0xbeef,
            frag_off: 0x4000,
            ttl: 63,
            protocol: 6,
            checksum: 0,
            src: [192, 168, 1, 1],
            dst: [192, 168, 1, 2],
        };
        let bytes = hdr.encode();
        assert_eq!(Ipv4Header::parse(&bytes).unwrap(), hdr);
    }

    #[test]
    fn canonicalize_zeroes_mutable_fields() {
        let h = base_header(&[]);
        let canon = canonicalize(&h).unwrap();
        assert_eq!(canon.bytes[1], 0);
        assert_eq!(&canon.bytes[6..8], &[0, 0]);
        assert_eq!(canon.bytes[8], 0);
        assert_eq!(&canon.bytes[10..12], &[0, 0]);
        assert_eq!(canon.snapshot.tos, 0xb8);
        assert_eq!(canon.snapshot.ttl, 64);
        assert_eq!(canon.snapshot.frag_off, 0x4000);
        assert_eq!(canon.final_dst, [10, 0, 0, 2]);
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let h = base_header(&[opt::RA, 4, 0, 0]);
        let once = canonicalize(&h).unwrap();
        let twice = canonicalize(&once.bytes).unwrap();
        assert_eq!(once.bytes, twice.bytes);
        assert_eq!(once.final_dst, twice.final_dst);
    }

    #[test]
    fn unknown_option_values_are_zeroed() {
        // Timestamp option (68) is mutable; type/len survive, value dies.
        let h = base_header(&[68, 8, 5, 0, 0xde, 0xad, 0xbe, 0xef]);
        let canon = canonicalize(&h).unwrap();
        assert_eq!(&canon.bytes[20..28], &[68, 8, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn authenticated_options_survive() {
        let h = base_header(&[opt::SEC, 4, 0xab, 0xcd, opt::RA, 4, 0x12, 0x34]);
        let canon = canonicalize(&h).unwrap();
        assert_eq!(&canon.bytes[20..28], &h[20..28]);
    }

    #[test]
    fn lsrr_substitutes_final_destination() {
        // Route slots: next hop 10.9.9.9, final hop 172.16.0.7.
        let h = base_header(&[
            opt::LSRR,
            11,
            4,
            10,
            9,
            9,
            9,
            172,
            16,
            0,
            7,
            opt::END,
        ]);
        let canon = canonicalize(&h).unwrap();
        assert_eq!(canon.final_dst, [172, 16, 0, 7]);
        assert_eq!(&canon.bytes[16..20], &[172, 16, 0, 7]);
        // Route bytes themselves are not zeroed.
        assert_eq!(&canon.bytes[20..31], &h[20..31]);
    }

    #[test]
    fn short_source_route_is_malformed() {
        let h = base_header(&[opt::SSRR, 3, 4, opt::END]);
        let err = canonicalize(&h).unwrap_err();
        assert!(matches!(err, Ipv4Error::MalformedOptions { .. }));
    }

    #[test]
    fn overrunning_option_is_malformed() {
        let h = base_header(&[68, 9, 0, 0]);
        let err = canonicalize(&h).unwrap_err();
        assert!(matches!(
            err,
            Ipv4Error::MalformedOptions {
                reason: "option overruns option area",
                ..
            }
        ));
    }

    #[test]
    fn zero_length_option_is_malformed() {
        let h = base_header(&[68, 0, 0, 0]);
        let err = canonicalize(&h).unwrap_err();
        assert!(matches!(
            err,
            Ipv4Error::MalformedOptions {
                reason: "option length below 2",
                ..
            }
        ));
    }

    #[test]
    fn end_terminates_option_walk() {
        // Garbage after END must be ignored, not inspected.
        let h = base_header(&[opt::END, 0xff, 0xff, 0xff]);
        let canon = canonicalize(&h).unwrap();
        assert_eq!(&canon.bytes[20..24], &h[20..24]);
    }

    proptest! {
        #[test]
        fn canonicalize_never_panics(options in prop::collection::vec(any::<u8>(), 0..40)) {
            let mut padded = options.clone();
            while padded.len() % 4 != 0 {
                padded.push(0);
            }
            let h = base_header(&padded);
            let _ = canonicalize(&h);
        }

        #[test]
        fn checksum_refresh_validates(len in 5usize..=15) {
            let mut h = vec![0u8; len * 4];
            h[0] = 0x40 | len as u8;
            refresh_checksum(&mut h);
            prop_assert_eq!(header_checksum(&h), 0);
        }
    }
}
