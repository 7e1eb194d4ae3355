// sa.rs - security association state and the SA-store collaborator seam

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use thiserror::Error;

use crate::digest::SaKey;

/// Error surfaced to the SA lifecycle layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SaError {
    /// The outbound sequence counter would wrap. Fatal for the SA: the
    /// key must be retired before another packet is sent.
    #[error("sequence counter exhausted for spi {spi:#010x}")]
    SequenceExhausted { spi: u32 },

    /// The SA exceeded a configured lifetime limit.
    #[error("sa {spi:#010x} expired: {reason}")]
    Expired { spi: u32, reason: &'static str },
}

/// Whether AH protects the existing header in place or wraps the packet
/// in a new outer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaMode {
    Transport,
    Tunnel,
}

/// Cumulative per-SA counters. Relaxed atomics: readers only ever need
/// eventually-consistent totals.
#[derive(Debug, Default)]
pub struct SaStats {
    pub packets_out: AtomicU64,
    pub packets_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub bytes_in: AtomicU64,
    pub auth_failures: AtomicU64,
}

impl SaStats {
    pub fn record_out(&self, bytes: usize) {
        self.packets_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_in(&self, bytes: usize) {
        self.packets_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Lifetime limits; zero disables a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaLimits {
    pub max_packets: u64,
    pub max_bytes: u64,
}

/// One authenticated flow. Owned by the SA store; the transform engine
/// borrows it read-mostly and mutates only the sequence counter and the
/// stats counters.
#[derive(Debug)]
pub struct SecurityAssociation {
    pub spi: u32,
    pub mode: SaMode,
    pub source_addr: [u8; 4],
    pub dest_addr: [u8; 4],
    pub key: SaKey,
    pub digest_len: usize,
    pub limits: SaLimits,
    pub stats: SaStats,
    sequence: AtomicU32,
}

impl SecurityAssociation {
    pub fn new(
        spi: u32,
        mode: SaMode,
        source_addr: [u8; 4],
        dest_addr: [u8; 4],
        key: SaKey,
        digest_len: usize,
    ) -> Self {
        Self {
            spi,
            mode,
            source_addr,
            dest_addr,
            key,
            digest_len,
            limits: SaLimits::default(),
            stats: SaStats::default(),
            sequence: AtomicU32::new(0),
        }
    }

    /// Allocates the next outbound sequence number. A single atomic
    /// read-modify-write, so concurrent encodes on the same SA always
    /// draw distinct, monotonically assigned values. Wrap is never
    /// silent.
    pub fn next_sequence(&self) -> Result<u32, SaError> {
        self.sequence
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |seq| {
                seq.checked_add(1)
            })
            .map(|prev| prev + 1)
            .map_err(|_| SaError::SequenceExhausted { spi: self.spi })
    }

    /// Last sequence number handed out (zero before first use).
    pub fn current_sequence(&self) -> u32 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Checks lifetime limits against the cumulative counters.
    pub fn check_expiry(&self) -> Result<(), SaError> {
        let packets = self.stats.packets_out.load(Ordering::Relaxed)
            + self.stats.packets_in.load(Ordering::Relaxed);
        if self.limits.max_packets != 0 && packets >= self.limits.max_packets {
            return Err(SaError::Expired {
                spi: self.spi,
                reason: "packet lifetime limit reached",
            });
        }
        let bytes = self.stats.bytes_out.load(Ordering::Relaxed)
            + self.stats.bytes_in.load(Ordering::Relaxed);
        if self.limits.max_bytes != 0 && bytes >= self.limits.max_bytes {
            return Err(SaError::Expired {
                spi: self.spi,
                reason: "byte lifetime limit reached",
            });
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn force_sequence(&self, value: u32) {
        self.sequence.store(value, Ordering::Release);
    }
}

/// SA-store collaborator boundary. Lookup, failure accounting, and
/// replay-window bookkeeping live behind this trait, outside the
/// transform engine.
pub trait SaStore {
    /// Resolves the SA for a received `(spi, dst, protocol)` triple.
    fn lookup(&self, spi: u32, dst: [u8; 4], protocol: u8) -> Option<&SecurityAssociation>;

    /// Records an integrity failure against the SA.
    fn record_failure(&self, sa: &SecurityAssociation) {
        sa.stats.record_auth_failure();
    }

    /// Checks the SA's lifetime.
    fn check_expiry(&self, sa: &SecurityAssociation) -> Result<(), SaError> {
        sa.check_expiry()
    }
}

/// Minimal in-memory store, sufficient for tests and single-process use.
#[derive(Debug, Default)]
pub struct MemorySaStore {
    entries: Vec<SecurityAssociation>,
}

impl MemorySaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sa: SecurityAssociation) {
        self.entries.push(sa);
    }
}

impl SaStore for MemorySaStore {
    fn lookup(&self, spi: u32, dst: [u8; 4], _protocol: u8) -> Option<&SecurityAssociation> {
        self.entries
            .iter()
            .find(|sa| sa.spi == spi && sa.dest_addr == dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample_sa() -> SecurityAssociation {
        SecurityAssociation::new(
            0x100,
            SaMode::Transport,
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            SaKey::new([9u8; 16]),
            12,
        )
    }

    #[test]
    fn first_sequence_is_one() {
        let sa = sample_sa();
        assert_eq!(sa.next_sequence().unwrap(), 1);
        assert_eq!(sa.next_sequence().unwrap(), 2);
        assert_eq!(sa.current_sequence(), 2);
    }

    #[test]
    fn wrap_is_an_error_not_a_reset() {
        let sa = sample_sa();
        sa.force_sequence(u32::MAX - 1);
        assert_eq!(sa.next_sequence().unwrap(), u32::MAX);
        assert_eq!(
            sa.next_sequence().unwrap_err(),
            SaError::SequenceExhausted { spi: 0x100 }
        );
        // Still exhausted on retry.
        assert!(sa.next_sequence().is_err());
    }

    #[test]
    fn concurrent_allocation_yields_distinct_values() {
        let sa = Arc::new(sample_sa());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let sa = Arc::clone(&sa);
            handles.push(std::thread::spawn(move || {
                (0..100)
                    .map(|_| sa.next_sequence().unwrap())
                    .collect::<Vec<u32>>()
            }));
        }

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let expected: Vec<u32> = (1..=800).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn expiry_tracks_lifetime_limits() {
        let mut sa = sample_sa();
        sa.limits = SaLimits {
            max_packets: 2,
            max_bytes: 0,
        };
        assert!(sa.check_expiry().is_ok());
        sa.stats.record_out(100);
        sa.stats.record_in(100);
        assert_eq!(
            sa.check_expiry().unwrap_err(),
            SaError::Expired {
                spi: 0x100,
                reason: "packet lifetime limit reached"
            }
        );
    }

    #[test]
    fn store_lookup_matches_spi_and_dst() {
        let mut store = MemorySaStore::new();
        store.insert(sample_sa());
        assert!(store.lookup(0x100, [10, 0, 0, 2], 51).is_some());
        assert!(store.lookup(0x100, [10, 0, 0, 3], 51).is_none());
        assert!(store.lookup(0x101, [10, 0, 0, 2], 51).is_none());
    }

    #[test]
    fn record_failure_bumps_counter() {
        let mut store = MemorySaStore::new();
        store.insert(sample_sa());
        let sa = store.lookup(0x100, [10, 0, 0, 2], 51).unwrap();
        store.record_failure(sa);
        assert_eq!(sa.stats.auth_failures.load(Ordering::Relaxed), 1);
    }
}
