// transform.rs - AH encode/decode orchestration

use tracing::{debug, warn};

use thiserror::Error;

use crate::ah::{AhHeader, HeaderError, AH_FIXED_LEN};
use crate::config::Config;
use crate::digest::{DigestContext, DigestError};
use crate::ipv4::{
    self, canonicalize, Ipv4Error, Ipv4Header, IPV4_HDR_MIN, PROTO_AH, PROTO_IPIP,
};
use crate::metrics::Metrics;
use crate::sa::{SaError, SaMode, SecurityAssociation};
use crate::segment::{PacketView, SegmentError};

/// Largest representable IPv4 datagram.
const MAX_TOTAL_LEN: usize = u16::MAX as usize;

/// Error returned by the transform engine. Every kind is a per-packet
/// drop except [`AhError::Sa`], which the SA lifecycle layer must act on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AhError {
    /// Packet shorter than the headers it must carry, or a fragment.
    /// AH is defined only over whole, reassembled datagrams.
    #[error("packet not processable: {0}")]
    Truncated(&'static str),

    /// IPv4 parsing or option canonicalization failed.
    #[error("ipv4 error: {0}")]
    Ipv4(#[from] Ipv4Error),

    /// The AH header itself failed validation.
    #[error("ah header error: {0}")]
    Header(#[from] HeaderError),

    /// The inbound packet does not carry AH.
    #[error("packet protocol {0} is not AH")]
    UnexpectedProtocol(u8),

    /// Recomputed digest did not match the received ICV. Fatal for the
    /// packet, never for the SA.
    #[error("integrity check failed for spi {spi:#010x}")]
    IntegrityFailure { spi: u32 },

    /// Sequence exhaustion or lifetime expiry; surfaced to the SA store.
    #[error(transparent)]
    Sa(#[from] SaError),

    /// The packet buffer could not accommodate the AH header.
    #[error("buffer expansion failed: {0}")]
    BufferExpansionFailure(&'static str),

    /// The de-encapsulated packet could not be assembled into a view.
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    /// Digest primitive rejected the SA parameters.
    #[error("digest error: {0}")]
    Digest(#[from] DigestError),
}

/// A verified, de-encapsulated inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    /// The packet with the AH header (and, in tunnel mode, the outer IP
    /// header) spliced out.
    pub packet: PacketView,
    /// Upper-layer protocol restored from the AH next-header field.
    pub next_header: u8,
    /// Verified sequence number, for the SA store's replay window.
    pub sequence: u32,
}

/// AH transform engine. Stateless across packets; all per-flow state
/// lives in the [`SecurityAssociation`].
#[derive(Debug)]
pub struct AhTransform {
    config: Config,
    metrics: Option<Metrics>,
}

impl AhTransform {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    /// Attaches a metrics registry to the transform paths.
    pub fn with_metrics(config: Config, metrics: Metrics) -> Self {
        Self {
            config,
            metrics: Some(metrics),
        }
    }

    /// Bytes of per-packet overhead this SA adds, for the caller's PMTU
    /// accounting.
    pub fn overhead(&self, sa: &SecurityAssociation) -> usize {
        let ah = AH_FIXED_LEN + sa.digest_len;
        match sa.mode {
            SaMode::Transport => ah,
            SaMode::Tunnel => ah + IPV4_HDR_MIN,
        }
    }

    /// Applies AH protection to an outbound packet.
    ///
    /// The returned packet is ready for the routing/output collaborator.
    /// The SA's sequence counter is the only shared state mutated, and
    /// only after all validation that can fail without side effects.
    pub fn encode(
        &self,
        sa: &SecurityAssociation,
        packet: PacketView,
    ) -> Result<PacketView, AhError> {
        let result = match sa.mode {
            SaMode::Transport => self.encode_transport(sa, packet),
            SaMode::Tunnel => self.encode_tunnel(sa, packet),
        };
        match &result {
            Ok(out) => {
                sa.stats.record_out(out.len());
                if let Some(m) = &self.metrics {
                    m.packets_out.inc();
                    m.bytes_protected.inc_by(out.len() as u64);
                }
                debug!(spi = sa.spi, len = out.len(), "ah encode ok");
            }
            Err(err) => self.note_error(err),
        }
        result
    }

    fn encode_transport(
        &self,
        sa: &SecurityAssociation,
        mut packet: PacketView,
    ) -> Result<PacketView, AhError> {
        let ip = Ipv4Header::parse(packet.head())?;
        if packet.len() != ip.total_len as usize {
            return Err(AhError::Truncated("declared length != packet length"));
        }

        let ah_len = AH_FIXED_LEN + sa.digest_len;
        let new_total = packet.len() + ah_len;
        if new_total > MAX_TOTAL_LEN {
            return Err(AhError::BufferExpansionFailure(
                "total length exceeds 65535",
            ));
        }

        let mut canon = canonicalize(&packet.head()[..ip.header_len])?;
        ipv4::set_protocol(&mut canon.bytes, PROTO_AH);
        ipv4::set_total_len(&mut canon.bytes, new_total as u16);

        sa.check_expiry()?;
        let sequence = sa.next_sequence()?;

        let mut ah = AhHeader {
            next_header: ip.protocol,
            reserved: 0,
            spi: sa.spi,
            sequence,
            auth_data: vec![0u8; sa.digest_len],
        };

        let mut ctx = DigestContext::new(&sa.key, sa.digest_len)?;
        ctx.update(&canon.bytes);
        ctx.update(&ah.encode()?);
        packet.for_each_range_from(ip.header_len, |range| ctx.update(range));
        ah.auth_data = ctx.finalize();

        if !packet.insert_into_head(ip.header_len, ah_len) {
            return Err(AhError::BufferExpansionFailure(
                "ah insertion point outside primary segment",
            ));
        }
        ah.encode_into(&mut packet.head_mut()[ip.header_len..ip.header_len + ah_len])?;

        let head = packet.head_mut();
        canon.snapshot.apply(head);
        ipv4::set_protocol(head, PROTO_AH);
        ipv4::set_total_len(head, new_total as u16);
        ipv4::refresh_checksum(&mut head[..ip.header_len]);

        Ok(packet)
    }

    fn encode_tunnel(
        &self,
        sa: &SecurityAssociation,
        mut packet: PacketView,
    ) -> Result<PacketView, AhError> {
        let inner = Ipv4Header::parse(packet.head())?;

        let ah_len = AH_FIXED_LEN + sa.digest_len;
        let new_total = IPV4_HDR_MIN + ah_len + packet.len();
        if new_total > MAX_TOTAL_LEN {
            return Err(AhError::BufferExpansionFailure(
                "total length exceeds 65535",
            ));
        }

        let outer = Ipv4Header {
            header_len: IPV4_HDR_MIN,
            tos: inner.tos,
            total_len: new_total as u16,
            id: 0,
            frag_off: 0,
            ttl: self.config.tunnel_ttl,
            protocol: PROTO_AH,
            checksum: 0,
            src: sa.source_addr,
            dst: sa.dest_addr,
        };
        let outer_bytes = outer.encode();
        let canon = canonicalize(&outer_bytes)?;

        sa.check_expiry()?;
        let sequence = sa.next_sequence()?;

        let mut ah = AhHeader {
            next_header: PROTO_IPIP,
            reserved: 0,
            spi: sa.spi,
            sequence,
            auth_data: vec![0u8; sa.digest_len],
        };

        let mut ctx = DigestContext::new(&sa.key, sa.digest_len)?;
        ctx.update(&canon.bytes);
        ctx.update(&ah.encode()?);
        for range in packet.byte_ranges() {
            ctx.update(range);
        }
        ah.auth_data = ctx.finalize();

        let mut prefix = Vec::with_capacity(IPV4_HDR_MIN + ah_len);
        prefix.extend_from_slice(&outer_bytes);
        prefix.extend_from_slice(&ah.encode()?);
        ipv4::refresh_checksum(&mut prefix[..IPV4_HDR_MIN]);
        packet.prepend_to_head(&prefix);

        Ok(packet)
    }

    /// Verifies and strips the AH header of an inbound packet.
    ///
    /// The caller's buffer is never mutated; a failed packet can still be
    /// inspected (e.g. by capture) exactly as received.
    pub fn decode(
        &self,
        sa: &SecurityAssociation,
        packet: &PacketView,
    ) -> Result<DecodedPacket, AhError> {
        let result = self.decode_inner(sa, packet);
        match &result {
            Ok(decoded) => {
                sa.stats.record_in(packet.len());
                if let Some(m) = &self.metrics {
                    m.packets_in.inc();
                    m.bytes_protected.inc_by(packet.len() as u64);
                }
                debug!(
                    spi = sa.spi,
                    seq = decoded.sequence,
                    next_header = decoded.next_header,
                    "ah decode ok"
                );
            }
            Err(err) => {
                if matches!(err, AhError::IntegrityFailure { .. }) {
                    sa.stats.record_auth_failure();
                }
                self.note_error(err);
            }
        }
        result
    }

    fn decode_inner(
        &self,
        sa: &SecurityAssociation,
        packet: &PacketView,
    ) -> Result<DecodedPacket, AhError> {
        let ip = Ipv4Header::parse(packet.head())?;
        if ip.is_fragment() {
            return Err(AhError::Truncated("ah over a fragment"));
        }
        if ip.protocol != PROTO_AH {
            return Err(AhError::UnexpectedProtocol(ip.protocol));
        }
        if packet.len() != ip.total_len as usize {
            return Err(AhError::Truncated("declared length != packet length"));
        }

        let ah_len = AH_FIXED_LEN + sa.digest_len;
        if packet.len() < ip.header_len + AH_FIXED_LEN {
            return Err(AhError::Truncated("shorter than ip + fixed ah header"));
        }
        if packet.head().len() < ip.header_len + ah_len {
            return Err(AhError::Truncated("headers split across segments"));
        }

        let ah = AhHeader::parse(&packet.head()[ip.header_len..], sa.digest_len)?;
        if self.config.strict_reserved && ah.reserved != 0 {
            return Err(AhError::Header(HeaderError::ReservedNotZero(ah.reserved)));
        }

        // Work on a canonical copy; the received buffer stays pristine
        // until the digest verifies.
        let canon = canonicalize(&packet.head()[..ip.header_len])?;

        let zeroed = AhHeader {
            auth_data: vec![0u8; sa.digest_len],
            ..ah.clone()
        };
        let mut ctx = DigestContext::new(&sa.key, sa.digest_len)?;
        ctx.update(&canon.bytes);
        ctx.update(&zeroed.encode()?);
        packet.for_each_range_from(ip.header_len + ah_len, |range| ctx.update(range));
        ctx.verify(&ah.auth_data).map_err(|_| {
            warn!(spi = sa.spi, seq = ah.sequence, "ah integrity failure");
            AhError::IntegrityFailure { spi: sa.spi }
        })?;

        let out = match ah.next_header {
            PROTO_IPIP => {
                // Tunnel mode: drop the outer header entirely; the inner
                // packet is self-describing.
                let strip = ip.header_len + ah_len;
                let inner_len = packet.len() - strip;
                if inner_len < IPV4_HDR_MIN {
                    return Err(AhError::Truncated(
                        "tunneled packet shorter than an ip header",
                    ));
                }

                // The outer headers are resident in the head segment, but
                // the inner packet may start anywhere in the stream.
                let mut lead = None;
                packet.for_each_range_from(strip, |range| {
                    if lead.is_none() {
                        lead = range.first().copied();
                    }
                });
                let inner_hdr_len = usize::from(lead.unwrap_or(0) & 0x0f) * 4;

                let resident = packet.head().len() - strip;
                let out = if resident >= inner_hdr_len.max(IPV4_HDR_MIN) {
                    let mut out = packet.clone();
                    if !out.remove_from_head(0, strip) {
                        return Err(AhError::Truncated("headers split across segments"));
                    }
                    out
                } else {
                    // Inner header straddles the head boundary; rebuild
                    // the packet contiguously.
                    let mut flat = Vec::with_capacity(inner_len);
                    packet.for_each_range_from(strip, |range| flat.extend_from_slice(range));
                    PacketView::contiguous(flat)?
                };
                Ipv4Header::parse(out.head())?;
                out
            }
            _ => {
                let mut out = packet.clone();
                if !out.remove_from_head(ip.header_len, ah_len) {
                    return Err(AhError::Truncated("headers split across segments"));
                }
                let head = out.head_mut();
                ipv4::set_protocol(head, ah.next_header);
                ipv4::set_total_len(head, (ip.total_len as usize - ah_len) as u16);
                ipv4::refresh_checksum(&mut head[..ip.header_len]);
                out
            }
        };

        Ok(DecodedPacket {
            packet: out,
            next_header: ah.next_header,
            sequence: ah.sequence,
        })
    }

    fn note_error(&self, err: &AhError) {
        let Some(m) = &self.metrics else { return };
        match err {
            AhError::Truncated(_) | AhError::UnexpectedProtocol(_) => m.truncated_packets.inc(),
            AhError::Ipv4(Ipv4Error::MalformedOptions { .. }) => m.malformed_options.inc(),
            AhError::Ipv4(_) => m.truncated_packets.inc(),
            AhError::Header(_) => m.header_errors.inc(),
            AhError::IntegrityFailure { .. } => m.integrity_failures.inc(),
            AhError::Sa(SaError::SequenceExhausted { .. }) => m.sequence_exhausted.inc(),
            AhError::Sa(_) => {}
            AhError::BufferExpansionFailure(_) => m.expansion_failures.inc(),
            AhError::Segment(_) => m.truncated_packets.inc(),
            AhError::Digest(_) => m.header_errors.inc(),
        }
    }
}
