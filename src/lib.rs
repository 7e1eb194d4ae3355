// ahgate public library surface.

pub mod config;

pub mod segment;

pub mod ipv4;

pub mod digest;

pub mod ah;

pub mod sa;

pub mod transform;

pub mod metrics;

pub use config::{Config, ConfigError};

pub use segment::{PacketView, RangeWalker, SegmentError, MAX_CHAIN_DEPTH};

pub use ipv4::{
    canonicalize, header_checksum, Canonical, Ipv4Error, Ipv4Header, MutableFieldSnapshot,
    IPV4_HDR_MAX, IPV4_HDR_MIN, PROTO_AH, PROTO_IPIP,
};

pub use digest::{DigestContext, DigestError, SaKey, DIGEST_LEN_96, DIGEST_MAX_LEN};

pub use ah::{AhHeader, HeaderError, AH_FIXED_LEN};

pub use sa::{
    MemorySaStore, SaError, SaLimits, SaMode, SaStats, SaStore, SecurityAssociation,
};

pub use transform::{AhError, AhTransform, DecodedPacket};

pub use metrics::{Metrics, MetricsError};
